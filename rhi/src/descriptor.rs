use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Weak;

use kiln_core::gpu::DescriptorHeap as _;
use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;
use kiln_core::next_power_of_two_32;

use crate::RootSignature;

/// One staged descriptor heap with an optional shader-visible mirror.
///
/// Slots are handed out by a word-packed bitset allocator (one bit per
/// slot, set = allocated) with a rolling search cursor. When no run of the
/// requested length exists the heap doubles to the next power of two,
/// native-copying every previously written descriptor so live indices stay
/// valid. GPU handles, however, move on growth; the recorder watches the
/// generation counter and rebinds its tables when it changes.
pub struct StaticDescriptorHeap<B: GpuBackend> {
    kind: DescriptorHeapKind,
    shader_visible: bool,
    /// Slots hidden from the allocator at the front of the heap. The
    /// SRV-etc heap reserves slot 0 for the GUI overlay.
    reserved: u32,
    inner: Mutex<HeapInner<B>>,
}

struct HeapInner<B: GpuBackend> {
    heap: B::DescriptorHeap,
    shader_visible_heap: Option<B::DescriptorHeap>,
    words: Vec<u64>,
    capacity: u32,
    search_start: u32,
    num_allocated: u32,
    generation: u64,
}

fn words_for(capacity: u32) -> usize {
    ((capacity + 63) / 64) as usize
}

impl<B: GpuBackend> HeapInner<B> {
    #[inline(always)]
    fn is_allocated(&self, index: u32) -> bool {
        self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    #[inline(always)]
    fn mark(&mut self, index: u32, allocated: bool) {
        let word = &mut self.words[(index / 64) as usize];
        let bit = 1u64 << (index % 64);
        if allocated {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

impl<B: GpuBackend> StaticDescriptorHeap<B> {
    pub(crate) fn new(
        device: &B::Device,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        reserved: u32,
    ) -> RhiResult<Self> {
        let heap = unsafe { device.create_descriptor_heap(kind, capacity + reserved, false)? };
        let shader_visible_heap = if shader_visible {
            Some(unsafe { device.create_descriptor_heap(kind, capacity + reserved, true)? })
        } else {
            None
        };
        Ok(Self {
            kind,
            shader_visible,
            reserved,
            inner: Mutex::new(HeapInner {
                heap,
                shader_visible_heap,
                words: vec![0u64; words_for(capacity)],
                capacity,
                search_start: 0,
                num_allocated: 0,
                generation: 0,
            }),
        })
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn allocate(&self, device: &B::Device, count: u32) -> RhiResult<u32> {
        if count == 0 {
            return Err(RhiError::InvalidArgument);
        }
        let mut inner = self.inner.lock().unwrap();

        let mut found_index = 0u32;
        let mut found = false;
        let mut free_run = 0u32;
        let mut index = inner.search_start;
        while index < inner.capacity {
            // Fully-allocated words can't extend a run; skip them whole.
            if index % 64 == 0
                && index + 64 <= inner.capacity
                && inner.words[(index / 64) as usize] == !0u64
            {
                free_run = 0;
                index += 64;
                continue;
            }
            if inner.is_allocated(index) {
                free_run = 0;
            } else {
                free_run += 1;
            }
            if free_run >= count {
                found_index = index - count + 1;
                found = true;
                break;
            }
            index += 1;
        }

        if !found {
            found_index = inner.capacity;
            let required = inner.capacity + count;
            self.grow(device, &mut inner, required)?;
        }

        for index in found_index..found_index + count {
            inner.mark(index, true);
        }
        inner.num_allocated += count;
        inner.search_start = found_index + count;
        Ok(found_index)
    }

    /// Marks the range free again. Releasing a slot that is not allocated is
    /// reported and ignored, keeping double-releases harmless.
    pub fn release(&self, base_index: u32, count: u32) {
        if count == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for index in base_index..base_index + count {
            if index >= inner.capacity || !inner.is_allocated(index) {
                log::error!(
                    "attempted to release descriptor {} which is not allocated",
                    index
                );
                return;
            }
            inner.mark(index, false);
        }
        inner.num_allocated -= count;
        if inner.search_start > base_index {
            inner.search_start = base_index;
        }
    }

    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        let inner = self.inner.lock().unwrap();
        unsafe { inner.heap.cpu_handle(index + self.reserved) }
    }

    pub fn cpu_handle_shader_visible(&self, index: u32) -> CpuDescriptorHandle {
        let inner = self.inner.lock().unwrap();
        let heap = inner
            .shader_visible_heap
            .as_ref()
            .expect("heap has no shader-visible mirror");
        unsafe { heap.cpu_handle(index + self.reserved) }
    }

    pub fn gpu_handle_shader_visible(&self, index: u32) -> GpuDescriptorHandle {
        let inner = self.inner.lock().unwrap();
        let heap = inner
            .shader_visible_heap
            .as_ref()
            .expect("heap has no shader-visible mirror");
        unsafe { heap.gpu_handle(index + self.reserved) }
    }

    /// Copies descriptors between two runs of the staged heap.
    pub(crate) fn copy_staged(
        &self,
        device: &B::Device,
        dst_index: u32,
        src_index: u32,
        count: u32,
    ) {
        let inner = self.inner.lock().unwrap();
        unsafe {
            device.copy_descriptors(
                self.kind,
                &inner.heap,
                dst_index + self.reserved,
                &inner.heap,
                src_index + self.reserved,
                count,
            );
        }
    }

    /// Replicates staged descriptors into the shader-visible mirror. Must
    /// run before the GPU dereferences the table.
    pub fn copy_to_shader_visible(&self, device: &B::Device, base_index: u32, count: u32) {
        let inner = self.inner.lock().unwrap();
        let Some(shader_visible) = inner.shader_visible_heap.as_ref() else {
            return;
        };
        unsafe {
            device.copy_descriptors(
                self.kind,
                shader_visible,
                base_index + self.reserved,
                &inner.heap,
                base_index + self.reserved,
                count,
            );
        }
    }

    pub fn capacity(&self) -> u32 {
        self.inner.lock().unwrap().capacity
    }

    pub fn num_allocated(&self) -> u32 {
        self.inner.lock().unwrap().num_allocated
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    pub fn with_shader_visible_heap<R>(&self, f: impl FnOnce(&B::DescriptorHeap) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(inner
            .shader_visible_heap
            .as_ref()
            .expect("heap has no shader-visible mirror"))
    }

    pub fn with_staged_heap<R>(&self, f: impl FnOnce(&B::DescriptorHeap) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(&inner.heap)
    }

    /// Slots hidden at the front of the heap (slot 0 of the SRV-etc heap).
    pub fn reserved_slots(&self) -> u32 {
        self.reserved
    }

    fn grow(&self, device: &B::Device, inner: &mut HeapInner<B>, required: u32) -> RhiResult<()> {
        let old_capacity = inner.capacity;
        let new_capacity = next_power_of_two_32(required);

        let new_heap = unsafe {
            device
                .create_descriptor_heap(self.kind, new_capacity + self.reserved, false)
                .map_err(|e| {
                    log::error!("failed to grow a descriptor heap to {}", new_capacity);
                    e
                })?
        };
        unsafe {
            device.copy_descriptors(
                self.kind,
                &new_heap,
                0,
                &inner.heap,
                0,
                old_capacity + self.reserved,
            );
        }
        inner.heap = new_heap;

        if self.shader_visible {
            let new_visible = unsafe {
                device.create_descriptor_heap(self.kind, new_capacity + self.reserved, true)?
            };
            let old_visible = inner.shader_visible_heap.as_ref().unwrap();
            unsafe {
                device.copy_descriptors(
                    self.kind,
                    &new_visible,
                    0,
                    old_visible,
                    0,
                    old_capacity + self.reserved,
                );
            }
            inner.shader_visible_heap = Some(new_visible);
        }

        inner.words.resize(words_for(new_capacity), 0u64);
        inner.capacity = new_capacity;
        inner.generation += 1;
        Ok(())
    }
}

/// The four descriptor heaps of the device plus the root-signature memo map.
pub struct DescriptorHeaps<B: GpuBackend> {
    pub render_target: StaticDescriptorHeap<B>,
    pub depth_stencil: StaticDescriptorHeap<B>,
    pub shader_resource: StaticDescriptorHeap<B>,
    pub sampler: StaticDescriptorHeap<B>,
    pub(crate) root_signature_cache: Mutex<HashMap<u64, Weak<RootSignature<B>>>>,
}

impl<B: GpuBackend> DescriptorHeaps<B> {
    pub(crate) fn new(
        device: &B::Device,
        rtv_count: u32,
        dsv_count: u32,
        srv_count: u32,
        sampler_count: u32,
    ) -> RhiResult<Self> {
        Ok(Self {
            render_target: StaticDescriptorHeap::new(
                device,
                DescriptorHeapKind::RenderTargetView,
                rtv_count,
                false,
                0,
            )?,
            depth_stencil: StaticDescriptorHeap::new(
                device,
                DescriptorHeapKind::DepthStencilView,
                dsv_count,
                false,
                0,
            )?,
            shader_resource: StaticDescriptorHeap::new(
                device,
                DescriptorHeapKind::ShaderResourceView,
                srv_count,
                true,
                1,
            )?,
            sampler: StaticDescriptorHeap::new(
                device,
                DescriptorHeapKind::Sampler,
                sampler_count,
                true,
                0,
            )?,
            root_signature_cache: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn shader_visible_generations(&self) -> (u64, u64) {
        (
            self.shader_resource.generation(),
            self.sampler.generation(),
        )
    }
}
