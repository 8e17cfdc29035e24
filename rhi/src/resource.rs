use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

use kiln_core::align_up_64;
use kiln_core::gpu::Buffer as _;
use kiln_core::gpu::Device as _;
use kiln_core::gpu::Fence as _;
use kiln_core::gpu::*;

use crate::DeviceContext;
use crate::ResourceId;
use crate::StaticDescriptorHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureViewKey {
    subresources: TextureSubresourceSet,
    format: Format,
    read_only_dsv: bool,
}

#[derive(Default)]
struct TextureViewCaches {
    srv: HashMap<TextureViewKey, u32>,
    uav: HashMap<TextureViewKey, u32>,
    rtv: HashMap<TextureViewKey, u32>,
    dsv: HashMap<TextureViewKey, u32>,
    /// Whole-mip UAVs used by the clear path, keyed by mip level.
    clear_mip_uavs: HashMap<u32, u32>,
}

/// Fence moment a staging resource was last used at; `map` waits on it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LastUse {
    pub queue: QueueType,
    pub value: u64,
}

pub struct Texture<B: GpuBackend> {
    pub(crate) id: ResourceId,
    desc: TextureDesc,
    ctx: Arc<DeviceContext<B>>,
    native: OnceLock<B::Texture>,
    pub(crate) plane_count: u32,
    views: Mutex<TextureViewCaches>,
    bound_heap: Mutex<Option<Arc<Heap<B>>>>,
}

impl<B: GpuBackend> Texture<B> {
    pub(crate) fn new(ctx: Arc<DeviceContext<B>>, desc: TextureDesc) -> RhiResult<Arc<Self>> {
        let texture = Self::wrapper(ctx.clone(), desc.clone());
        if !desc.is_virtual {
            let native = unsafe { ctx.device.create_texture(&desc)? };
            let _ = texture.native.set(native);
        }
        Ok(texture)
    }

    pub(crate) fn from_native(ctx: Arc<DeviceContext<B>>, desc: TextureDesc, native: B::Texture) -> Arc<Self> {
        let texture = Self::wrapper(ctx, desc);
        let _ = texture.native.set(native);
        texture
    }

    fn wrapper(ctx: Arc<DeviceContext<B>>, desc: TextureDesc) -> Arc<Self> {
        let info = format_info(desc.format);
        let plane_count = if info.has_depth && info.has_stencil { 2 } else { 1 };
        Arc::new(Self {
            id: ResourceId::next(),
            desc,
            ctx,
            native: OnceLock::new(),
            plane_count,
            views: Mutex::new(TextureViewCaches::default()),
            bound_heap: Mutex::new(None),
        })
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        unsafe { self.ctx.device.texture_memory_requirements(&self.desc) }
    }

    /// Places a virtual texture into `heap` at `offset`. Must happen before
    /// first GPU use.
    pub fn bind_memory(&self, heap: &Arc<Heap<B>>, offset: u64) -> RhiResult<()> {
        if !self.desc.is_virtual {
            log::error!("texture '{}' is not virtual", self.desc.name);
            return Err(RhiError::StatePolicyViolation);
        }
        if self.native.get().is_some() {
            log::error!("texture '{}' already has bound memory", self.desc.name);
            return Err(RhiError::StatePolicyViolation);
        }
        let native = unsafe {
            self.ctx
                .device
                .create_placed_texture(&self.desc, &heap.native, offset)?
        };
        let _ = self.native.set(native);
        *self.bound_heap.lock().unwrap() = Some(heap.clone());
        Ok(())
    }

    pub(crate) fn native(&self) -> RhiResult<&B::Texture> {
        self.native.get().ok_or_else(|| {
            log::error!(
                "texture '{}' was used before memory was bound",
                self.desc.name
            );
            RhiError::StatePolicyViolation
        })
    }

    /// Returns the cached descriptor index for the view, authoring it on
    /// first use. Identical (view-type, subresource, format) requests return
    /// the same index for the texture's whole lifetime.
    pub fn view_index(
        &self,
        view_type: TextureViewType,
        format: Format,
        subresources: TextureSubresourceSet,
        read_only_dsv: bool,
    ) -> RhiResult<u32> {
        let format = if format == Format::Unknown {
            self.desc.format
        } else {
            format
        };
        let key = TextureViewKey {
            subresources,
            format,
            read_only_dsv,
        };

        let mut views = self.views.lock().unwrap();
        let (cache, heap) = self.cache_and_heap(&mut views, view_type);
        if let Some(index) = cache.get(&key) {
            return Ok(*index);
        }

        let index = heap.allocate(&self.ctx.device, 1)?;
        let view_desc = TextureViewDesc {
            format,
            dimension: self.desc.dimension,
            subresources,
            is_read_only_dsv: read_only_dsv,
        };
        unsafe {
            self.ctx.device.create_texture_view(
                heap.cpu_handle(index),
                view_type,
                self.native()?,
                &view_desc,
            );
        }
        if matches!(
            view_type,
            TextureViewType::ShaderResource | TextureViewType::UnorderedAccess
        ) {
            heap.copy_to_shader_visible(&self.ctx.device, index, 1);
        }

        let (cache, _) = self.cache_and_heap(&mut views, view_type);
        cache.insert(key, index);
        Ok(index)
    }

    pub(crate) fn view_cpu_handle(
        &self,
        view_type: TextureViewType,
        format: Format,
        subresources: TextureSubresourceSet,
        read_only_dsv: bool,
    ) -> RhiResult<CpuDescriptorHandle> {
        let index = self.view_index(view_type, format, subresources, read_only_dsv)?;
        let heap = self.heap_for(view_type);
        Ok(heap.cpu_handle(index))
    }

    /// A whole-mip UAV used by `clear_texture_*`, created on demand and
    /// cached per mip.
    pub(crate) fn clear_mip_uav_index(&self, mip_level: u32) -> RhiResult<u32> {
        {
            let views = self.views.lock().unwrap();
            if let Some(index) = views.clear_mip_uavs.get(&mip_level) {
                return Ok(*index);
            }
        }
        let subresources = TextureSubresourceSet {
            base_mip_level: mip_level,
            mip_level_count: 1,
            base_array_slice: 0,
            array_slice_count: self.desc.array_size,
        };
        let heap = &self.ctx.heaps.shader_resource;
        let index = heap.allocate(&self.ctx.device, 1)?;
        unsafe {
            self.ctx.device.create_texture_view(
                heap.cpu_handle(index),
                TextureViewType::UnorderedAccess,
                self.native()?,
                &TextureViewDesc {
                    format: self.desc.format,
                    dimension: self.desc.dimension,
                    subresources,
                    is_read_only_dsv: false,
                },
            );
        }
        heap.copy_to_shader_visible(&self.ctx.device, index, 1);
        self.views
            .lock()
            .unwrap()
            .clear_mip_uavs
            .insert(mip_level, index);
        Ok(index)
    }

    fn heap_for(&self, view_type: TextureViewType) -> &StaticDescriptorHeap<B> {
        match view_type {
            TextureViewType::ShaderResource | TextureViewType::UnorderedAccess => {
                &self.ctx.heaps.shader_resource
            }
            TextureViewType::RenderTarget => &self.ctx.heaps.render_target,
            TextureViewType::DepthStencil => &self.ctx.heaps.depth_stencil,
        }
    }

    fn cache_and_heap<'a>(
        &'a self,
        views: &'a mut TextureViewCaches,
        view_type: TextureViewType,
    ) -> (&'a mut HashMap<TextureViewKey, u32>, &'a StaticDescriptorHeap<B>) {
        match view_type {
            TextureViewType::ShaderResource => (&mut views.srv, &self.ctx.heaps.shader_resource),
            TextureViewType::UnorderedAccess => (&mut views.uav, &self.ctx.heaps.shader_resource),
            TextureViewType::RenderTarget => (&mut views.rtv, &self.ctx.heaps.render_target),
            TextureViewType::DepthStencil => (&mut views.dsv, &self.ctx.heaps.depth_stencil),
        }
    }
}

impl<B: GpuBackend> Drop for Texture<B> {
    fn drop(&mut self) {
        let views = self.views.lock().unwrap();
        for index in views.srv.values().chain(views.uav.values()) {
            self.ctx.heaps.shader_resource.release(*index, 1);
        }
        for index in views.clear_mip_uavs.values() {
            self.ctx.heaps.shader_resource.release(*index, 1);
        }
        for index in views.rtv.values() {
            self.ctx.heaps.render_target.release(*index, 1);
        }
        for index in views.dsv.values() {
            self.ctx.heaps.depth_stencil.release(*index, 1);
        }
    }
}

#[derive(Default)]
struct BufferViewCaches {
    srv: HashMap<BufferRange, u32>,
    uav: HashMap<BufferRange, u32>,
    cbv: HashMap<BufferRange, u32>,
    clear_uav: Option<u32>,
}

pub struct Buffer<B: GpuBackend> {
    pub(crate) id: ResourceId,
    desc: BufferDesc,
    ctx: Arc<DeviceContext<B>>,
    native: OnceLock<B::Buffer>,
    views: Mutex<BufferViewCaches>,
    bound_heap: Mutex<Option<Arc<Heap<B>>>>,
    pub(crate) last_use: Mutex<Option<LastUse>>,
    mapped: Mutex<bool>,
}

impl<B: GpuBackend> Buffer<B> {
    pub(crate) fn new(ctx: Arc<DeviceContext<B>>, desc: BufferDesc) -> RhiResult<Arc<Self>> {
        if desc.is_volatile && desc.cpu_access != CpuAccessMode::Write {
            log::error!("volatile buffer '{}' must be CPU-writable", desc.name);
            return Err(RhiError::InvalidArgument);
        }
        let buffer = Self::wrapper(ctx.clone(), desc.clone());
        // Volatile buffers have no persistent GPU backing; their memory
        // comes from the upload ring one write at a time.
        if !desc.is_virtual && !desc.is_volatile {
            let native = unsafe { ctx.device.create_buffer(&desc)? };
            let _ = buffer.native.set(native);
        }
        Ok(buffer)
    }

    pub(crate) fn from_native(ctx: Arc<DeviceContext<B>>, desc: BufferDesc, native: B::Buffer) -> Arc<Self> {
        let buffer = Self::wrapper(ctx, desc);
        let _ = buffer.native.set(native);
        buffer
    }

    fn wrapper(ctx: Arc<DeviceContext<B>>, desc: BufferDesc) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::next(),
            desc,
            ctx,
            native: OnceLock::new(),
            views: Mutex::new(BufferViewCaches::default()),
            bound_heap: Mutex::new(None),
            last_use: Mutex::new(None),
            mapped: Mutex::new(false),
        })
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        unsafe { self.ctx.device.buffer_memory_requirements(&self.desc) }
    }

    pub fn bind_memory(&self, heap: &Arc<Heap<B>>, offset: u64) -> RhiResult<()> {
        if !self.desc.is_virtual {
            log::error!("buffer '{}' is not virtual", self.desc.name);
            return Err(RhiError::StatePolicyViolation);
        }
        if self.native.get().is_some() {
            log::error!("buffer '{}' already has bound memory", self.desc.name);
            return Err(RhiError::StatePolicyViolation);
        }
        let native = unsafe {
            self.ctx
                .device
                .create_placed_buffer(&self.desc, &heap.native, offset)?
        };
        let _ = self.native.set(native);
        *self.bound_heap.lock().unwrap() = Some(heap.clone());
        Ok(())
    }

    pub(crate) fn native(&self) -> RhiResult<&B::Buffer> {
        self.native.get().ok_or_else(|| {
            log::error!(
                "buffer '{}' has no GPU backing in this context",
                self.desc.name
            );
            RhiError::StatePolicyViolation
        })
    }

    pub fn gpu_address(&self) -> GpuVirtualAddress {
        self.native
            .get()
            .map(|native| native.gpu_address())
            .unwrap_or(GpuVirtualAddress::NULL)
    }

    /// Maps a CPU-accessible buffer, waiting for the last recorded GPU use
    /// to retire first.
    pub fn map(&self) -> RhiResult<*mut u8> {
        if self.desc.cpu_access == CpuAccessMode::None {
            log::error!("buffer '{}' is not CPU-accessible", self.desc.name);
            return Err(RhiError::StatePolicyViolation);
        }
        let mut mapped = self.mapped.lock().unwrap();
        if *mapped {
            log::error!("buffer '{}' is already mapped", self.desc.name);
            return Err(RhiError::UsageBug);
        }

        if let Some(last_use) = self.last_use.lock().unwrap().take() {
            if let Some(queue) = self.ctx.queue(last_use.queue) {
                if queue.last_completed_value() < last_use.value {
                    unsafe { queue.fence.await_value(last_use.value) };
                    queue.update_last_completed_value();
                }
            }
        }

        let ptr = unsafe { self.native()?.map(0, self.desc.byte_size) }.ok_or_else(|| {
            log::error!("failed to map buffer '{}'", self.desc.name);
            RhiError::NativeFailure
        })?;
        *mapped = true;
        Ok(ptr)
    }

    pub fn unmap(&self) {
        let mut mapped = self.mapped.lock().unwrap();
        if !*mapped {
            return;
        }
        if let Ok(native) = self.native() {
            unsafe { native.unmap(0, self.desc.byte_size) };
        }
        *mapped = false;
    }

    /// Cached view index for SRV / UAV / CBV over a byte range. Constant
    /// buffer views go through the same cache as the shader views.
    pub fn view_index(&self, view_type: ResourceViewType, range: BufferRange) -> RhiResult<u32> {
        let range = range.resolve(&self.desc);
        let normalized = view_type.normalized();
        if !matches!(
            normalized,
            ResourceViewType::TypedBufferSrv
                | ResourceViewType::TypedBufferUav
                | ResourceViewType::ConstantBuffer
        ) {
            log::error!("unsupported buffer view type {:?}", view_type);
            return Err(RhiError::InvalidArgument);
        }
        if normalized == ResourceViewType::ConstantBuffer && self.desc.is_volatile {
            log::error!(
                "volatile buffer '{}' can't have a static constant buffer view",
                self.desc.name
            );
            return Err(RhiError::InvalidArgument);
        }

        let mut views = self.views.lock().unwrap();
        let cache = match normalized {
            ResourceViewType::TypedBufferSrv => &mut views.srv,
            ResourceViewType::TypedBufferUav => &mut views.uav,
            _ => &mut views.cbv,
        };
        if let Some(index) = cache.get(&range) {
            return Ok(*index);
        }

        let heap = &self.ctx.heaps.shader_resource;
        let index = heap.allocate(&self.ctx.device, 1)?;
        unsafe {
            self.ctx.device.create_buffer_view(
                heap.cpu_handle(index),
                self.native()?,
                &BufferViewDesc {
                    view_type,
                    format: self.desc.format,
                    range,
                    struct_stride: self.desc.struct_stride,
                },
            );
        }
        heap.copy_to_shader_visible(&self.ctx.device, index, 1);
        cache.insert(range, index);
        Ok(index)
    }

    /// A raw R32 UAV over the whole buffer, used by `clear_buffer_uint`.
    pub(crate) fn clear_uav_index(&self) -> RhiResult<u32> {
        {
            let views = self.views.lock().unwrap();
            if let Some(index) = views.clear_uav {
                return Ok(index);
            }
        }
        let heap = &self.ctx.heaps.shader_resource;
        let index = heap.allocate(&self.ctx.device, 1)?;
        unsafe {
            self.ctx.device.create_buffer_view(
                heap.cpu_handle(index),
                self.native()?,
                &BufferViewDesc {
                    view_type: ResourceViewType::RawBufferUav,
                    format: Format::R32UInt,
                    range: ENTIRE_BUFFER_RANGE.resolve(&self.desc),
                    struct_stride: 0,
                },
            );
        }
        heap.copy_to_shader_visible(&self.ctx.device, index, 1);
        self.views.lock().unwrap().clear_uav = Some(index);
        Ok(index)
    }
}

impl<B: GpuBackend> Drop for Buffer<B> {
    fn drop(&mut self) {
        let views = self.views.lock().unwrap();
        for index in views
            .srv
            .values()
            .chain(views.uav.values())
            .chain(views.cbv.values())
            .chain(views.clear_uav.iter())
        {
            self.ctx.heaps.shader_resource.release(*index, 1);
        }
    }
}

pub struct Sampler<B: GpuBackend> {
    desc: SamplerDesc,
    ctx: Arc<DeviceContext<B>>,
}

impl<B: GpuBackend> Sampler<B> {
    pub(crate) fn new(ctx: Arc<DeviceContext<B>>, desc: SamplerDesc) -> Arc<Self> {
        Arc::new(Self { desc, ctx })
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    pub(crate) fn author_descriptor(&self, handle: CpuDescriptorHandle) {
        unsafe { self.ctx.device.create_sampler_view(handle, &self.desc) };
    }
}

pub struct Heap<B: GpuBackend> {
    desc: HeapDesc,
    pub(crate) native: B::Heap,
}

impl<B: GpuBackend> Heap<B> {
    pub(crate) fn new(ctx: &DeviceContext<B>, desc: HeapDesc) -> RhiResult<Arc<Self>> {
        let native = unsafe { ctx.device.create_heap(&desc)? };
        Ok(Arc::new(Self { desc, native }))
    }

    pub fn desc(&self) -> &HeapDesc {
        &self.desc
    }
}

/// A readback/writeback surface over a linear buffer, carved into
/// backend-footprint slices per (mip, array slice).
pub struct StagingTexture<B: GpuBackend> {
    desc: TextureDesc,
    cpu_access: CpuAccessMode,
    pub(crate) buffer: Arc<Buffer<B>>,
    regions: Vec<SubresourceFootprint>,
    mapped_slice: Mutex<Option<TextureSlice>>,
}

impl<B: GpuBackend> StagingTexture<B> {
    pub(crate) fn new(
        ctx: Arc<DeviceContext<B>>,
        desc: TextureDesc,
        cpu_access: CpuAccessMode,
    ) -> RhiResult<Arc<Self>> {
        if cpu_access == CpuAccessMode::None {
            log::error!("staging texture '{}' needs CPU access", desc.name);
            return Err(RhiError::InvalidArgument);
        }

        let mut regions = Vec::with_capacity(desc.num_subresources() as usize);
        let mut offset = 0u64;
        for _slice in 0..desc.array_size {
            for mip in 0..desc.mip_levels {
                let mut footprint = subresource_footprint(&desc, mip);
                offset = align_up_64(offset, TEXTURE_PLACEMENT_ALIGNMENT);
                footprint.offset = offset;
                offset += footprint.total_bytes();
                regions.push(footprint);
            }
        }

        let buffer_desc = BufferDesc {
            name: desc.name.clone(),
            byte_size: offset.max(TEXTURE_PLACEMENT_ALIGNMENT),
            cpu_access,
            initial_state: if cpu_access == CpuAccessMode::Read {
                ResourceStates::COPY_DEST
            } else {
                ResourceStates::COMMON
            },
            ..Default::default()
        };
        let buffer = Buffer::new(ctx, buffer_desc)?;

        Ok(Arc::new(Self {
            desc,
            cpu_access,
            buffer,
            regions,
            mapped_slice: Mutex::new(None),
        }))
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn cpu_access(&self) -> CpuAccessMode {
        self.cpu_access
    }

    pub(crate) fn slice_region(&self, slice: &TextureSlice) -> SubresourceFootprint {
        let index = subresource_index(slice.mip_level, slice.array_slice, &self.desc) as usize;
        self.regions[index]
    }

    pub fn required_size(&self) -> u64 {
        self.buffer.desc().byte_size
    }

    /// Maps one subresource. At most one `map`/`unmap` pair may be
    /// outstanding; `row_pitch` receives the linear row stride.
    pub fn map(&self, slice: &TextureSlice, row_pitch: &mut u64) -> RhiResult<*mut u8> {
        let mut mapped = self.mapped_slice.lock().unwrap();
        if mapped.is_some() {
            log::error!("staging texture '{}' is already mapped", self.desc.name);
            return Err(RhiError::UsageBug);
        }
        let resolved = slice.resolve(&self.desc);
        let region = self.slice_region(&resolved);
        let base = self.buffer.map()?;
        *mapped = Some(resolved);
        *row_pitch = region.row_pitch;
        Ok(unsafe { base.add(region.offset as usize) })
    }

    pub fn unmap(&self) {
        let mut mapped = self.mapped_slice.lock().unwrap();
        if mapped.take().is_none() {
            log::error!("staging texture '{}' is not mapped", self.desc.name);
            return;
        }
        self.buffer.unmap();
    }
}

/// A strong reference to any bindable resource, as held by binding-set
/// items and command-list instances.
pub enum ResourceHandle<B: GpuBackend> {
    None,
    Texture(Arc<Texture<B>>),
    Buffer(Arc<Buffer<B>>),
    Sampler(Arc<Sampler<B>>),
}

impl<B: GpuBackend> Clone for ResourceHandle<B> {
    fn clone(&self) -> Self {
        match self {
            ResourceHandle::None => ResourceHandle::None,
            ResourceHandle::Texture(t) => ResourceHandle::Texture(t.clone()),
            ResourceHandle::Buffer(b) => ResourceHandle::Buffer(b.clone()),
            ResourceHandle::Sampler(s) => ResourceHandle::Sampler(s.clone()),
        }
    }
}

impl<B: GpuBackend> ResourceHandle<B> {
    pub fn texture(&self) -> Option<&Arc<Texture<B>>> {
        match self {
            ResourceHandle::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn buffer(&self) -> Option<&Arc<Buffer<B>>> {
        match self {
            ResourceHandle::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn sampler(&self) -> Option<&Arc<Sampler<B>>> {
        match self {
            ResourceHandle::Sampler(s) => Some(s),
            _ => None,
        }
    }
}
