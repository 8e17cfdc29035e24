use std::sync::Arc;
use std::sync::Mutex;

use kiln_core::gpu::*;

use crate::next_object_id;

/// What one descriptor slot currently holds. Retained so tests can read
/// descriptors back byte-for-byte across heap growth.
#[derive(Debug, Clone, PartialEq)]
pub enum NullDescriptor {
    Empty,
    TextureView {
        texture: u64,
        view_type: TextureViewType,
        desc: TextureViewDesc,
    },
    BufferView {
        buffer: u64,
        desc: BufferViewDesc,
    },
    NullView {
        view_type: ResourceViewType,
        format: Format,
    },
    Sampler(SamplerDesc),
}

pub(crate) type HeapSlots = Arc<Mutex<Vec<NullDescriptor>>>;

const GPU_HANDLE_BIT: u64 = 1 << 63;
const HEAP_ID_SHIFT: u32 = 32;

pub struct NullDescriptorHeap {
    pub(crate) id: u64,
    pub(crate) kind: DescriptorHeapKind,
    pub(crate) shader_visible: bool,
    pub(crate) slots: HeapSlots,
}

impl NullDescriptorHeap {
    pub(crate) fn new(kind: DescriptorHeapKind, capacity: u32, shader_visible: bool) -> Self {
        Self {
            id: next_object_id(),
            kind,
            shader_visible,
            slots: Arc::new(Mutex::new(vec![NullDescriptor::Empty; capacity as usize])),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.slots.lock().unwrap().len() as u32
    }

    /// Test helper: reads one descriptor back.
    pub fn descriptor(&self, index: u32) -> NullDescriptor {
        self.slots.lock().unwrap()[index as usize].clone()
    }
}

impl DescriptorHeap for NullDescriptorHeap {
    unsafe fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        CpuDescriptorHandle((self.id << HEAP_ID_SHIFT) | index as u64)
    }

    unsafe fn gpu_handle(&self, index: u32) -> GpuDescriptorHandle {
        debug_assert!(self.shader_visible);
        GpuDescriptorHandle(GPU_HANDLE_BIT | (self.id << HEAP_ID_SHIFT) | index as u64)
    }
}

pub(crate) fn split_cpu_handle(handle: CpuDescriptorHandle) -> (u64, u32) {
    (handle.0 >> HEAP_ID_SHIFT, (handle.0 & 0xFFFF_FFFF) as u32)
}

/// Test helper: extracts (heap id, slot index) from a GPU handle.
pub fn split_gpu_handle(handle: GpuDescriptorHandle) -> (u64, u32) {
    (
        (handle.0 & !GPU_HANDLE_BIT) >> HEAP_ID_SHIFT,
        (handle.0 & 0xFFFF_FFFF) as u32,
    )
}
