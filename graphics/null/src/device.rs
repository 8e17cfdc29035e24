use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::Weak;

use kiln_core::align_up_64;
use kiln_core::gpu::*;

use crate::split_cpu_handle;
use crate::HeapSlots;
use crate::NullBackend;
use crate::NullBuffer;
use crate::NullCommandAllocator;
use crate::NullCommandList;
use crate::NullDescriptor;
use crate::NullDescriptorHeap;
use crate::NullComputePipeline;
use crate::NullGraphicsPipeline;
use crate::NullHeap;
use crate::NullQueryHeap;
use crate::NullQueue;
use crate::NullRootLayout;
use crate::NullTexture;
use crate::next_object_id;

/// The headless device. Creation never touches a driver; descriptor writes
/// land in heap-slot vectors looked up through a weak registry.
pub struct NullDevice {
    queues: [Option<NullQueue>; 3],
    heap_registry: Mutex<HashMap<u64, Weak<Mutex<Vec<NullDescriptor>>>>>,
    removed: AtomicBool,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            queues: [
                Some(NullQueue::new(QueueType::Graphics)),
                Some(NullQueue::new(QueueType::Compute)),
                Some(NullQueue::new(QueueType::Transfer)),
            ],
            heap_registry: Mutex::new(HashMap::new()),
            removed: AtomicBool::new(false),
        }
    }

    /// Test helper: simulates device loss.
    pub fn simulate_device_removal(&self) {
        self.removed.store(true, Ordering::Release);
    }

    fn register_heap(&self, heap: &NullDescriptorHeap) {
        self.heap_registry
            .lock()
            .unwrap()
            .insert(heap.id, std::sync::Arc::downgrade(&heap.slots));
    }

    fn heap_slots(&self, heap_id: u64) -> Option<HeapSlots> {
        self.heap_registry
            .lock()
            .unwrap()
            .get(&heap_id)
            .and_then(|weak| weak.upgrade())
    }

    fn write_descriptor(&self, handle: CpuDescriptorHandle, descriptor: NullDescriptor) {
        let (heap_id, index) = split_cpu_handle(handle);
        let Some(slots) = self.heap_slots(heap_id) else {
            log::error!("descriptor write into unknown heap {}", heap_id);
            return;
        };
        let mut slots = slots.lock().unwrap();
        if (index as usize) < slots.len() {
            slots[index as usize] = descriptor;
        } else {
            log::error!("descriptor write out of bounds: {} in heap {}", index, heap_id);
        }
    }
}

impl Device<NullBackend> for NullDevice {
    unsafe fn create_texture(&self, desc: &TextureDesc) -> RhiResult<NullTexture> {
        Ok(NullTexture::new(desc))
    }

    unsafe fn create_placed_texture(
        &self,
        desc: &TextureDesc,
        _heap: &NullHeap,
        _offset: u64,
    ) -> RhiResult<NullTexture> {
        Ok(NullTexture::new(desc))
    }

    unsafe fn texture_memory_requirements(&self, desc: &TextureDesc) -> MemoryRequirements {
        let mut size = 0u64;
        for mip in 0..desc.mip_levels {
            size += subresource_footprint(desc, mip).total_bytes();
        }
        MemoryRequirements {
            size: align_up_64(size * desc.array_size as u64, 0x10000),
            alignment: 0x10000,
        }
    }

    unsafe fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<NullBuffer> {
        Ok(NullBuffer::new(desc))
    }

    unsafe fn create_placed_buffer(
        &self,
        desc: &BufferDesc,
        _heap: &NullHeap,
        _offset: u64,
    ) -> RhiResult<NullBuffer> {
        Ok(NullBuffer::new(desc))
    }

    unsafe fn buffer_memory_requirements(&self, desc: &BufferDesc) -> MemoryRequirements {
        MemoryRequirements {
            size: align_up_64(desc.byte_size.max(1), 0x10000),
            alignment: 0x10000,
        }
    }

    unsafe fn create_heap(&self, desc: &HeapDesc) -> RhiResult<NullHeap> {
        Ok(NullHeap { desc: desc.clone() })
    }

    unsafe fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<NullDescriptorHeap> {
        let heap = NullDescriptorHeap::new(kind, capacity, shader_visible);
        self.register_heap(&heap);
        Ok(heap)
    }

    unsafe fn copy_descriptors(
        &self,
        _kind: DescriptorHeapKind,
        dst: &NullDescriptorHeap,
        dst_index: u32,
        src: &NullDescriptorHeap,
        src_index: u32,
        count: u32,
    ) {
        if count == 0 {
            return;
        }
        let copied: Vec<NullDescriptor> = {
            let src_slots = src.slots.lock().unwrap();
            src_slots[src_index as usize..(src_index + count) as usize].to_vec()
        };
        let mut dst_slots = dst.slots.lock().unwrap();
        dst_slots[dst_index as usize..(dst_index + count) as usize].clone_from_slice(&copied);
    }

    unsafe fn create_texture_view(
        &self,
        handle: CpuDescriptorHandle,
        view_type: TextureViewType,
        texture: &NullTexture,
        desc: &TextureViewDesc,
    ) {
        self.write_descriptor(
            handle,
            NullDescriptor::TextureView {
                texture: texture.id(),
                view_type,
                desc: desc.clone(),
            },
        );
    }

    unsafe fn create_buffer_view(
        &self,
        handle: CpuDescriptorHandle,
        buffer: &NullBuffer,
        desc: &BufferViewDesc,
    ) {
        self.write_descriptor(
            handle,
            NullDescriptor::BufferView {
                buffer: buffer.id(),
                desc: desc.clone(),
            },
        );
    }

    unsafe fn create_null_view(
        &self,
        handle: CpuDescriptorHandle,
        view_type: ResourceViewType,
        format: Format,
    ) {
        self.write_descriptor(handle, NullDescriptor::NullView { view_type, format });
    }

    unsafe fn create_sampler_view(&self, handle: CpuDescriptorHandle, desc: &SamplerDesc) {
        self.write_descriptor(handle, NullDescriptor::Sampler(desc.clone()));
    }

    unsafe fn create_root_layout(&self, desc: &RootLayoutDesc) -> RhiResult<NullRootLayout> {
        Ok(NullRootLayout::new(desc))
    }

    unsafe fn create_graphics_pipeline(
        &self,
        desc: &NativeGraphicsPipelineDesc<'_, NullBackend>,
    ) -> RhiResult<NullGraphicsPipeline> {
        if desc.vs.is_none() {
            log::error!("graphics pipelines need at least a vertex shader");
            return Err(RhiError::InvalidArgument);
        }
        Ok(NullGraphicsPipeline {
            id: next_object_id(),
        })
    }

    unsafe fn create_compute_pipeline(
        &self,
        _desc: &NativeComputePipelineDesc<'_, NullBackend>,
    ) -> RhiResult<NullComputePipeline> {
        Ok(NullComputePipeline {
            id: next_object_id(),
        })
    }

    unsafe fn create_fence(&self) -> RhiResult<crate::NullFence> {
        Ok(crate::NullFence::new())
    }

    unsafe fn create_command_allocator(&self, _queue: QueueType) -> RhiResult<NullCommandAllocator> {
        Ok(NullCommandAllocator {
            id: next_object_id(),
        })
    }

    unsafe fn create_command_list(
        &self,
        _queue: QueueType,
        _allocator: &NullCommandAllocator,
    ) -> RhiResult<NullCommandList> {
        Ok(NullCommandList::new())
    }

    unsafe fn create_query_heap(&self, timestamp_count: u32) -> RhiResult<NullQueryHeap> {
        Ok(NullQueryHeap::new(timestamp_count))
    }

    fn queue(&self, queue: QueueType) -> Option<&NullQueue> {
        self.queues[queue.index()].as_ref()
    }

    fn supports_ray_tracing(&self) -> bool {
        false
    }

    unsafe fn device_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}
