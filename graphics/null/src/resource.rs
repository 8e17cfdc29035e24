use std::cell::UnsafeCell;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use kiln_core::align_up_64;
use kiln_core::gpu::*;

use crate::next_object_id;

static NEXT_GPU_ADDRESS: AtomicU64 = AtomicU64::new(0x1000_0000);

fn allocate_gpu_address(size: u64) -> GpuVirtualAddress {
    let span = align_up_64(size.max(1), 0x10000);
    GpuVirtualAddress(NEXT_GPU_ADDRESS.fetch_add(span, Ordering::Relaxed))
}

pub struct NullTexture {
    pub(crate) id: u64,
    desc: TextureDesc,
}

impl NullTexture {
    pub(crate) fn new(desc: &TextureDesc) -> Self {
        Self {
            id: next_object_id(),
            desc: desc.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

/// A buffer backed by host memory so maps and buffer-to-buffer copies
/// really move bytes.
pub struct NullBuffer {
    pub(crate) id: u64,
    size: u64,
    gpu_address: GpuVirtualAddress,
    data: UnsafeCell<Box<[u8]>>,
}

unsafe impl Send for NullBuffer {}
unsafe impl Sync for NullBuffer {}

impl NullBuffer {
    pub(crate) fn new(desc: &BufferDesc) -> Self {
        let size = desc.byte_size.max(1);
        Self {
            id: next_object_id(),
            size,
            gpu_address: allocate_gpu_address(size),
            data: UnsafeCell::new(vec![0u8; size as usize].into_boxed_slice()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    /// Test helper: snapshots the buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        unsafe { (*self.data.get()).to_vec() }
    }
}

impl Buffer for NullBuffer {
    unsafe fn map(&self, offset: u64, _length: u64) -> Option<*mut u8> {
        if offset >= self.size {
            return None;
        }
        Some(self.data_ptr().add(offset as usize))
    }

    unsafe fn unmap(&self, _offset: u64, _length: u64) {}

    fn gpu_address(&self) -> GpuVirtualAddress {
        self.gpu_address
    }
}

/// Samplers are pure descriptor writes; the object is a marker.
pub struct NullSampler;

pub struct NullHeap {
    pub(crate) desc: HeapDesc,
}

impl NullHeap {
    pub fn desc(&self) -> &HeapDesc {
        &self.desc
    }
}

pub struct NullRootLayout {
    pub(crate) id: u64,
    desc: RootLayoutDesc,
}

impl NullRootLayout {
    pub(crate) fn new(desc: &RootLayoutDesc) -> Self {
        Self {
            id: next_object_id(),
            desc: desc.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &RootLayoutDesc {
        &self.desc
    }
}

pub struct NullGraphicsPipeline {
    pub(crate) id: u64,
}

pub struct NullComputePipeline {
    pub(crate) id: u64,
}

pub struct NullCommandAllocator {
    #[allow(dead_code)]
    pub(crate) id: u64,
}

pub struct NullQueryHeap {
    pub(crate) timestamps: std::sync::Mutex<Vec<u64>>,
}

impl NullQueryHeap {
    pub(crate) fn new(count: u32) -> Self {
        Self {
            timestamps: std::sync::Mutex::new(vec![0; count as usize]),
        }
    }
}
