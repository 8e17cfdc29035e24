use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;

use smallvec::SmallVec;

use kiln_core::gpu::CommandList as _;
use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;

use crate::make_version;
use crate::BindingSetHandle;
use crate::Buffer;
use crate::CommandQueue;
use crate::DeviceContext;
use crate::FrameBuffer;
use crate::GraphicsPipeline;
use crate::ComputePipeline;
use crate::ResourceId;
use crate::ResourceStateTracker;
use crate::RootSignature;
use crate::StagingTexture;
use crate::Texture;
use crate::TimerQuery;
use crate::UploadChunk;
use crate::UploadManager;
use crate::LastUse;

#[derive(Debug, Clone)]
pub struct CommandListDesc {
    pub queue_type: QueueType,
    pub upload_chunk_size: u64,
    pub upload_memory_limit: u64,
}

impl Default for CommandListDesc {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Graphics,
            upload_chunk_size: crate::DEFAULT_UPLOAD_CHUNK_SIZE,
            upload_memory_limit: 0,
        }
    }
}

pub struct VertexBufferBinding<B: GpuBackend> {
    pub buffer: Arc<Buffer<B>>,
    pub slot: u32,
    pub offset: u64,
}

impl<B: GpuBackend> Clone for VertexBufferBinding<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            slot: self.slot,
            offset: self.offset,
        }
    }
}

impl<B: GpuBackend> VertexBufferBinding<B> {
    fn same_binding(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.slot == other.slot
            && self.offset == other.offset
    }
}

pub struct IndexBufferBinding<B: GpuBackend> {
    pub buffer: Arc<Buffer<B>>,
    pub format: Format,
    pub offset: u64,
}

impl<B: GpuBackend> Clone for IndexBufferBinding<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            format: self.format,
            offset: self.offset,
        }
    }
}

/// Everything one graphics draw depends on. The recorder diffs consecutive
/// states and emits only the changed subsets.
pub struct GraphicsState<B: GpuBackend> {
    pub pipeline: Option<Arc<GraphicsPipeline<B>>>,
    pub binding_sets: SmallVec<[BindingSetHandle<B>; MAX_BINDING_LAYOUTS]>,
    pub framebuffer: Option<Arc<FrameBuffer<B>>>,
    pub viewport: ViewportState,
    pub blend_constant: Color,
    pub dynamic_stencil_ref: u8,
    pub index_buffer: Option<IndexBufferBinding<B>>,
    pub vertex_buffers: SmallVec<[VertexBufferBinding<B>; MAX_VERTEX_ATTRIBUTES]>,
}

impl<B: GpuBackend> Default for GraphicsState<B> {
    fn default() -> Self {
        Self {
            pipeline: None,
            binding_sets: SmallVec::new(),
            framebuffer: None,
            viewport: ViewportState::default(),
            blend_constant: Color::BLACK,
            dynamic_stencil_ref: 0,
            index_buffer: None,
            vertex_buffers: SmallVec::new(),
        }
    }
}

impl<B: GpuBackend> Clone for GraphicsState<B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            binding_sets: self.binding_sets.clone(),
            framebuffer: self.framebuffer.clone(),
            viewport: self.viewport.clone(),
            blend_constant: self.blend_constant,
            dynamic_stencil_ref: self.dynamic_stencil_ref,
            index_buffer: self.index_buffer.clone(),
            vertex_buffers: self.vertex_buffers.clone(),
        }
    }
}

pub struct ComputeState<B: GpuBackend> {
    pub pipeline: Option<Arc<ComputePipeline<B>>>,
    pub binding_sets: SmallVec<[BindingSetHandle<B>; MAX_BINDING_LAYOUTS]>,
}

impl<B: GpuBackend> Default for ComputeState<B> {
    fn default() -> Self {
        Self {
            pipeline: None,
            binding_sets: SmallVec::new(),
        }
    }
}

impl<B: GpuBackend> Clone for ComputeState<B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            binding_sets: self.binding_sets.clone(),
        }
    }
}

/// A strong reference held purely for lifetime: dropping the instance is
/// what releases it.
#[allow(dead_code)]
pub(crate) enum InstanceRef<B: GpuBackend> {
    Texture(Arc<Texture<B>>),
    Buffer(Arc<Buffer<B>>),
    FrameBuffer(Arc<FrameBuffer<B>>),
    BindingSet(Arc<crate::BindingSet<B>>),
    BindlessSet(Arc<crate::BindlessSet<B>>),
    GraphicsPipeline(Arc<GraphicsPipeline<B>>),
    ComputePipeline(Arc<ComputePipeline<B>>),
}

/// The record of one open→close recording: strong references to everything
/// it touched, released together once the submission fence is observed.
pub struct CommandListInstance<B: GpuBackend> {
    pub(crate) refs: Vec<InstanceRef<B>>,
    pub(crate) staging_buffers: Vec<Arc<Buffer<B>>>,
    pub(crate) staging_textures: Vec<Arc<StagingTexture<B>>>,
    pub(crate) timer_queries: Vec<Arc<TimerQuery<B>>>,
    pub(crate) upload_chunks: Vec<Arc<UploadChunk<B>>>,
    pub(crate) queue_type: QueueType,
    pub(crate) submitted_value: u64,
}

impl<B: GpuBackend> CommandListInstance<B> {
    fn new(queue_type: QueueType) -> Self {
        Self {
            refs: Vec::new(),
            staging_buffers: Vec::new(),
            staging_textures: Vec::new(),
            timer_queries: Vec::new(),
            upload_chunks: Vec::new(),
            queue_type,
            submitted_value: 0,
        }
    }
}

struct InternalCommandList<B: GpuBackend> {
    allocator: B::CommandAllocator,
    list: B::CommandList,
    last_submitted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Idle,
    Open,
    Closed,
}

struct VolatileCbBinding<B: GpuBackend> {
    root_parameter_index: u32,
    buffer: Arc<Buffer<B>>,
    gpu_address: GpuVirtualAddress,
}

/// Records GPU work. Owns a pool of native allocator/list pairs it recycles
/// on fence completion, the upload manager for its queue, and the resource
/// state tracker whose barriers it commits.
pub struct CommandList<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
    desc: CommandListDesc,
    upload: UploadManager<B>,

    pool: VecDeque<InternalCommandList<B>>,
    active: Option<InternalCommandList<B>>,
    instance: Option<CommandListInstance<B>>,
    state: RecordingState,
    recording_version: u64,

    tracker: ResourceStateTracker,
    tracked_textures: HashMap<ResourceId, Weak<Texture<B>>>,
    tracked_buffers: HashMap<ResourceId, Weak<Buffer<B>>>,

    graphics_state_valid: bool,
    compute_state_valid: bool,
    current_graphics: GraphicsState<B>,
    current_compute: ComputeState<B>,
    current_graphics_volatile_cbs: Vec<VolatileCbBinding<B>>,
    current_compute_volatile_cbs: Vec<VolatileCbBinding<B>>,
    volatile_cb_addresses: HashMap<ResourceId, GpuVirtualAddress>,
    any_volatile_cb_writes: bool,

    bound_heap_generations: Option<(u64, u64)>,
    current_upload_chunk: Option<Arc<UploadChunk<B>>>,
}

impl<B: GpuBackend> CommandList<B> {
    pub(crate) fn new(ctx: Arc<DeviceContext<B>>, desc: CommandListDesc) -> RhiResult<Self> {
        if ctx.queue(desc.queue_type).is_none() {
            log::error!("device has no {:?} queue", desc.queue_type);
            return Err(RhiError::InvalidArgument);
        }
        let upload = UploadManager::new(
            ctx.clone(),
            desc.queue_type,
            desc.upload_chunk_size,
            desc.upload_memory_limit,
        );
        Ok(Self {
            ctx,
            desc,
            upload,
            pool: VecDeque::new(),
            active: None,
            instance: None,
            state: RecordingState::Idle,
            recording_version: 0,
            tracker: ResourceStateTracker::new(),
            tracked_textures: HashMap::new(),
            tracked_buffers: HashMap::new(),
            graphics_state_valid: false,
            compute_state_valid: false,
            current_graphics: GraphicsState::default(),
            current_compute: ComputeState::default(),
            current_graphics_volatile_cbs: Vec::new(),
            current_compute_volatile_cbs: Vec::new(),
            volatile_cb_addresses: HashMap::new(),
            any_volatile_cb_writes: false,
            bound_heap_generations: None,
            current_upload_chunk: None,
        })
    }

    pub fn desc(&self) -> &CommandListDesc {
        &self.desc
    }

    pub fn is_open(&self) -> bool {
        self.state == RecordingState::Open
    }

    fn queue(&self) -> &CommandQueue<B> {
        self.ctx.queue(self.desc.queue_type).unwrap()
    }

    /// Begins a recording, reusing the oldest pooled allocator/list whose
    /// submission has retired, and stamps the new recording version.
    pub fn open(&mut self) -> RhiResult<()> {
        if self.state == RecordingState::Open {
            log::error!("command list is already open");
            return Err(RhiError::StatePolicyViolation);
        }
        if self.ctx.is_removed() {
            return Err(RhiError::DeviceRemoved);
        }
        let completed = self.queue().update_last_completed_value();

        let mut reused = None;
        if let Some(front) = self.pool.front() {
            if front.last_submitted <= completed {
                let mut internal = self.pool.pop_front().unwrap();
                unsafe { internal.list.reset(&internal.allocator) };
                reused = Some(internal);
            }
        }
        let internal = match reused {
            Some(internal) => internal,
            None => {
                let allocator =
                    unsafe { self.ctx.device.create_command_allocator(self.desc.queue_type)? };
                let list = unsafe {
                    self.ctx
                        .device
                        .create_command_list(self.desc.queue_type, &allocator)?
                };
                InternalCommandList {
                    allocator,
                    list,
                    last_submitted: 0,
                }
            }
        };

        self.active = Some(internal);
        self.instance = Some(CommandListInstance::new(self.desc.queue_type));
        self.recording_version =
            make_version(self.queue().next_recording_id(), self.desc.queue_type, false);
        self.state = RecordingState::Open;
        self.bound_heap_generations = None;
        Ok(())
    }

    /// Ends the recording: pending barriers are committed, the native list
    /// is closed and the per-recording caches are dropped.
    pub fn close(&mut self) -> RhiResult<()> {
        self.check_open()?;
        self.commit_barriers()?;
        let active = self.active.as_mut().unwrap();
        unsafe { active.list.close() };

        self.clear_state_cache();
        self.current_upload_chunk = None;
        self.volatile_cb_addresses.clear();
        self.tracked_textures.retain(|_, weak| weak.strong_count() > 0);
        self.tracked_buffers.retain(|_, weak| weak.strong_count() > 0);
        self.state = RecordingState::Closed;
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == RecordingState::Closed
    }

    pub(crate) fn native_list(&self) -> Option<&B::CommandList> {
        self.active.as_ref().map(|internal| &internal.list)
    }

    /// The native command list of the current recording, exposed the way
    /// the backend sees it.
    pub fn native_command_list(&self) -> Option<&B::CommandList> {
        self.native_list()
    }

    /// Called by the device after submission: stamps the instance and every
    /// fence-tracked side object, then returns the list to the pool.
    pub(crate) fn executed(&mut self, fence_value: u64) -> CommandListInstance<B> {
        let mut instance = self.instance.take().unwrap();
        instance.submitted_value = fence_value;

        for buffer in &instance.staging_buffers {
            *buffer.last_use.lock().unwrap() = Some(LastUse {
                queue: instance.queue_type,
                value: fence_value,
            });
        }
        for staging in &instance.staging_textures {
            *staging.buffer.last_use.lock().unwrap() = Some(LastUse {
                queue: instance.queue_type,
                value: fence_value,
            });
        }
        for query in &instance.timer_queries {
            query.started.store(true, std::sync::atomic::Ordering::Release);
            query.resolved.store(false, std::sync::atomic::Ordering::Release);
            *query.fence_use.lock().unwrap() = Some(LastUse {
                queue: instance.queue_type,
                value: fence_value,
            });
        }

        let mut active = self.active.take().unwrap();
        active.last_submitted = fence_value;
        self.pool.push_back(active);

        let submitted_version = make_version(fence_value, self.desc.queue_type, true);
        self.upload.submit_chunks(self.recording_version, submitted_version);
        self.recording_version = 0;
        self.state = RecordingState::Idle;
        instance
    }

    pub fn pooled_lists(&self) -> usize {
        self.pool.len() + self.active.is_some() as usize
    }

    fn check_open(&self) -> RhiResult<()> {
        if self.state != RecordingState::Open {
            log::error!("command issued on a command list that is not open");
            return Err(RhiError::StatePolicyViolation);
        }
        Ok(())
    }

    fn clear_state_cache(&mut self) {
        self.any_volatile_cb_writes = false;
        self.graphics_state_valid = false;
        self.compute_state_valid = false;
        self.current_graphics = GraphicsState::default();
        self.current_compute = ComputeState::default();
        self.current_graphics_volatile_cbs.clear();
        self.current_compute_volatile_cbs.clear();
    }

    // ---- state tracking -------------------------------------------------

    pub fn require_texture_state(
        &mut self,
        texture: &Arc<Texture<B>>,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) -> RhiResult<()> {
        self.check_open()?;
        self.tracker
            .require_texture_state(texture.id, texture.desc(), subresources, state);
        self.tracked_textures
            .insert(texture.id, Arc::downgrade(texture));
        self.instance
            .as_mut()
            .unwrap()
            .refs
            .push(InstanceRef::Texture(texture.clone()));
        Ok(())
    }

    pub fn require_buffer_state(
        &mut self,
        buffer: &Arc<Buffer<B>>,
        state: ResourceStates,
    ) -> RhiResult<()> {
        self.check_open()?;
        self.tracker
            .require_buffer_state(buffer.id, buffer.desc(), state)?;
        self.tracked_buffers
            .insert(buffer.id, Arc::downgrade(buffer));
        let instance = self.instance.as_mut().unwrap();
        if buffer.desc().cpu_access != CpuAccessMode::None {
            instance.staging_buffers.push(buffer.clone());
        } else {
            instance.refs.push(InstanceRef::Buffer(buffer.clone()));
        }
        Ok(())
    }

    fn require_staging_texture_state(
        &mut self,
        staging: &Arc<StagingTexture<B>>,
        state: ResourceStates,
    ) -> RhiResult<()> {
        self.check_open()?;
        self.tracker
            .require_buffer_state(staging.buffer.id, staging.buffer.desc(), state)?;
        self.instance
            .as_mut()
            .unwrap()
            .staging_textures
            .push(staging.clone());
        Ok(())
    }

    pub fn set_texture_uav_barriers_enabled(
        &mut self,
        texture: &Arc<Texture<B>>,
        enable: bool,
    ) -> RhiResult<()> {
        self.check_open()?;
        self.tracker
            .set_texture_enable_uav_barriers(texture.id, texture.desc(), enable);
        Ok(())
    }

    pub fn set_buffer_uav_barriers_enabled(
        &mut self,
        buffer: &Arc<Buffer<B>>,
        enable: bool,
    ) -> RhiResult<()> {
        self.check_open()?;
        self.tracker
            .set_buffer_enable_uav_barriers(buffer.id, buffer.desc(), enable);
        Ok(())
    }

    pub fn texture_subresource_state(
        &mut self,
        texture: &Arc<Texture<B>>,
        array_slice: u32,
        mip_level: u32,
    ) -> ResourceStates {
        self.tracker
            .texture_state(texture.id, texture.desc(), array_slice, mip_level)
    }

    pub fn buffer_state(&mut self, buffer: &Arc<Buffer<B>>) -> ResourceStates {
        self.tracker.buffer_state(buffer.id, buffer.desc())
    }

    /// Lowers the tracker's scratch barriers into one native barrier batch
    /// and flushes them onto the list.
    pub fn commit_barriers(&mut self) -> RhiResult<()> {
        if !self.tracker.has_pending_barriers() {
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Err(RhiError::StatePolicyViolation);
        };

        let mut upgraded_textures: Vec<(crate::TextureBarrier, Arc<Texture<B>>)> = Vec::new();
        for barrier in self.tracker.texture_barriers() {
            let texture = self
                .tracked_textures
                .get(&barrier.resource)
                .and_then(|weak| weak.upgrade())
                .ok_or(RhiError::UsageBug)?;
            upgraded_textures.push((*barrier, texture));
        }
        let mut upgraded_buffers: Vec<(crate::BufferBarrier, Arc<Buffer<B>>)> = Vec::new();
        for barrier in self.tracker.buffer_barriers() {
            let buffer = self
                .tracked_buffers
                .get(&barrier.resource)
                .and_then(|weak| weak.upgrade())
                .ok_or(RhiError::UsageBug)?;
            upgraded_buffers.push((*barrier, buffer));
        }

        let mut native_barriers: Vec<NativeBarrier<'_, B>> = Vec::new();
        for (barrier, texture) in &upgraded_textures {
            let native = texture.native()?;
            if barrier.before != barrier.after {
                if barrier.entire_texture {
                    native_barriers.push(NativeBarrier::TextureTransition {
                        texture: native,
                        subresource: None,
                        before: barrier.before,
                        after: barrier.after,
                    });
                } else {
                    let desc = texture.desc();
                    for plane in 0..texture.plane_count {
                        native_barriers.push(NativeBarrier::TextureTransition {
                            texture: native,
                            subresource: Some(subresource_index_with_plane(
                                barrier.mip_level,
                                barrier.array_slice,
                                plane,
                                desc.mip_levels,
                                desc.array_size,
                            )),
                            before: barrier.before,
                            after: barrier.after,
                        });
                    }
                }
            } else if barrier.after.contains(ResourceStates::UNORDERED_ACCESS) {
                native_barriers.push(NativeBarrier::TextureUav { texture: native });
            }
        }
        for (barrier, buffer) in &upgraded_buffers {
            let native = buffer.native()?;
            if barrier.before != barrier.after {
                native_barriers.push(NativeBarrier::BufferTransition {
                    buffer: native,
                    before: barrier.before,
                    after: barrier.after,
                });
            } else if barrier.after.contains(ResourceStates::UNORDERED_ACCESS) {
                native_barriers.push(NativeBarrier::BufferUav { buffer: native });
            }
        }

        if !native_barriers.is_empty() {
            unsafe { active.list.resource_barriers(&native_barriers) };
        }
        drop(native_barriers);
        self.tracker.clear_barriers();
        Ok(())
    }

    /// Binds the shader-visible heaps if they changed (including growth,
    /// which moves GPU handles). Returns true when a rebind happened.
    fn commit_descriptor_heaps(&mut self) -> bool {
        let generations = self.ctx.heaps.shader_visible_generations();
        if self.bound_heap_generations == Some(generations) {
            return false;
        }
        let ctx = self.ctx.clone();
        let active = self.active.as_mut().unwrap();
        ctx.heaps.shader_resource.with_shader_visible_heap(|srv_heap| {
            ctx.heaps.sampler.with_shader_visible_heap(|sampler_heap| unsafe {
                active.list.set_descriptor_heaps(srv_heap, sampler_heap);
            });
        });
        self.bound_heap_generations = Some(generations);
        true
    }

    // ---- pipeline state -------------------------------------------------

    fn diff_binding_sets(
        old: &[BindingSetHandle<B>],
        new: &[BindingSetHandle<B>],
    ) -> u32 {
        let mut mask = 0u32;
        let max_len = old.len().max(new.len());
        for i in 0..max_len {
            let same = match (old.get(i), new.get(i)) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                _ => false,
            };
            if !same {
                mask |= 1 << i;
            }
        }
        mask
    }

    pub fn set_graphics_state(&mut self, state: &GraphicsState<B>) -> RhiResult<()> {
        self.check_open()?;
        let Some(pipeline) = state.pipeline.clone() else {
            log::error!("graphics state has no pipeline");
            return Err(RhiError::InvalidArgument);
        };
        let root_signature = pipeline.root_signature.clone();

        let update_root_signature = !self.graphics_state_valid
            || self
                .current_graphics
                .pipeline
                .as_ref()
                .map(|current| !Arc::ptr_eq(&current.root_signature, &root_signature))
                .unwrap_or(true);

        let mut binding_update_mask = if update_root_signature { !0u32 } else { 0u32 };
        if self.commit_descriptor_heaps() {
            binding_update_mask = !0u32;
        }
        if binding_update_mask == 0 {
            binding_update_mask = Self::diff_binding_sets(
                &self.current_graphics.binding_sets,
                &state.binding_sets,
            );
        }

        let update_pipeline = !self.graphics_state_valid
            || self
                .current_graphics
                .pipeline
                .as_ref()
                .map(|current| !Arc::ptr_eq(current, &pipeline))
                .unwrap_or(true);
        if update_pipeline {
            let active = self.active.as_mut().unwrap();
            unsafe {
                if update_root_signature {
                    active.list.set_graphics_root_layout(&root_signature.native);
                }
                active.list.set_pipeline(NativePipeline::Graphics(&pipeline.native));
                active.list.set_primitive_topology(pipeline.topology);
            }
            self.instance
                .as_mut()
                .unwrap()
                .refs
                .push(InstanceRef::GraphicsPipeline(pipeline.clone()));
        }

        let depth_stencil = &pipeline.desc().render_state.depth_stencil;
        let effective_stencil_ref = if depth_stencil.dynamic_stencil_ref {
            state.dynamic_stencil_ref
        } else {
            depth_stencil.stencil_ref_value
        };
        let update_stencil_ref = !self.graphics_state_valid
            || self.current_graphics.dynamic_stencil_ref != effective_stencil_ref;
        if depth_stencil.stencil_enable && (update_pipeline || update_stencil_ref) {
            let active = self.active.as_mut().unwrap();
            unsafe { active.list.set_stencil_ref(effective_stencil_ref) };
        }

        let update_blend_factor = !self.graphics_state_valid
            || self.current_graphics.blend_constant != state.blend_constant;
        if pipeline.requires_blend_factor && update_blend_factor {
            let active = self.active.as_mut().unwrap();
            unsafe { active.list.set_blend_constant(state.blend_constant) };
        }

        let update_framebuffer = !self.graphics_state_valid
            || match (&self.current_graphics.framebuffer, &state.framebuffer) {
                (Some(current), Some(new)) => !Arc::ptr_eq(current, new),
                (None, None) => false,
                _ => true,
            };
        if update_framebuffer {
            let Some(framebuffer) = &state.framebuffer else {
                log::error!("graphics state has no frame buffer");
                return Err(RhiError::InvalidArgument);
            };
            self.bind_framebuffer(framebuffer.clone())?;
        }

        self.set_bindings(&state.binding_sets, binding_update_mask, &root_signature, false)?;

        let update_index_buffer = !self.graphics_state_valid
            || match (&self.current_graphics.index_buffer, &state.index_buffer) {
                (Some(current), Some(new)) => {
                    !Arc::ptr_eq(&current.buffer, &new.buffer)
                        || current.format != new.format
                        || current.offset != new.offset
                }
                (None, None) => false,
                _ => true,
            };
        if update_index_buffer {
            if let Some(binding) = &state.index_buffer {
                let buffer = binding.buffer.clone();
                self.require_buffer_state(&buffer, ResourceStates::INDEX_BUFFER)?;
                let active = self.active.as_mut().unwrap();
                let size = (buffer.desc().byte_size - binding.offset) as u32;
                unsafe {
                    active.list.set_index_buffer(
                        buffer.gpu_address().offset(binding.offset),
                        size,
                        binding.format,
                    );
                }
            }
        }

        let update_vertex_buffers = !self.graphics_state_valid
            || self.current_graphics.vertex_buffers.len() != state.vertex_buffers.len()
            || self
                .current_graphics
                .vertex_buffers
                .iter()
                .zip(state.vertex_buffers.iter())
                .any(|(a, b)| !a.same_binding(b));
        if update_vertex_buffers && !state.vertex_buffers.is_empty() {
            let Some(input_layout) = pipeline.desc().input_layout.clone() else {
                log::error!("vertex buffers bound but the pipeline has no input layout");
                return Err(RhiError::InvalidArgument);
            };
            for binding in state.vertex_buffers.iter() {
                if binding.slot as usize >= MAX_VERTEX_ATTRIBUTES {
                    log::error!("vertex buffer slot {} is out of range", binding.slot);
                    return Err(RhiError::InvalidArgument);
                }
            }
            let bindings: SmallVec<[VertexBufferBinding<B>; MAX_VERTEX_ATTRIBUTES]> =
                state.vertex_buffers.iter().cloned().collect();
            for binding in &bindings {
                self.require_buffer_state(&binding.buffer, ResourceStates::VERTEX_BUFFER)?;
            }
            let active = self.active.as_mut().unwrap();
            for binding in &bindings {
                let view = VertexBufferView {
                    address: binding.buffer.gpu_address().offset(binding.offset),
                    size_bytes: (binding.buffer.desc().byte_size - binding.offset)
                        .min(u32::MAX as u64) as u32,
                    stride_bytes: input_layout.slot_stride(binding.slot),
                };
                unsafe { active.list.set_vertex_buffers(binding.slot, &[view]) };
            }
        }

        self.commit_barriers()?;

        let update_viewports = !self.graphics_state_valid
            || self.current_graphics.viewport != state.viewport;
        if update_viewports && !state.viewport.viewports.is_empty() {
            let scissor_enable = pipeline.desc().render_state.rasterizer.scissor_enable;
            let scissors: SmallVec<[Rect; 1]> = if scissor_enable {
                state.viewport.scissors.clone()
            } else {
                state
                    .viewport
                    .viewports
                    .iter()
                    .map(|viewport| Rect {
                        min_x: viewport.min_x as i32,
                        max_x: viewport.max_x as i32,
                        min_y: viewport.min_y as i32,
                        max_y: viewport.max_y as i32,
                    })
                    .collect()
            };
            let active = self.active.as_mut().unwrap();
            unsafe {
                active.list.set_viewports(&state.viewport.viewports);
                if !scissors.is_empty() {
                    active.list.set_scissors(&scissors);
                }
            }
        }

        self.graphics_state_valid = true;
        self.compute_state_valid = false;
        self.current_graphics = state.clone();
        self.current_graphics.dynamic_stencil_ref = effective_stencil_ref;
        Ok(())
    }

    pub fn set_compute_state(&mut self, state: &ComputeState<B>) -> RhiResult<()> {
        self.check_open()?;
        let Some(pipeline) = state.pipeline.clone() else {
            log::error!("compute state has no pipeline");
            return Err(RhiError::InvalidArgument);
        };
        let root_signature = pipeline.root_signature.clone();

        let update_root_signature = !self.compute_state_valid
            || self
                .current_compute
                .pipeline
                .as_ref()
                .map(|current| !Arc::ptr_eq(&current.root_signature, &root_signature))
                .unwrap_or(true);

        let mut binding_update_mask = if update_root_signature { !0u32 } else { 0u32 };
        if self.commit_descriptor_heaps() {
            binding_update_mask = !0u32;
        }
        if binding_update_mask == 0 {
            binding_update_mask = Self::diff_binding_sets(
                &self.current_compute.binding_sets,
                &state.binding_sets,
            );
        }

        if update_root_signature {
            let active = self.active.as_mut().unwrap();
            unsafe { active.list.set_compute_root_layout(&root_signature.native) };
        }

        let update_pipeline = !self.compute_state_valid
            || self
                .current_compute
                .pipeline
                .as_ref()
                .map(|current| !Arc::ptr_eq(current, &pipeline))
                .unwrap_or(true);
        if update_pipeline {
            let active = self.active.as_mut().unwrap();
            unsafe {
                active
                    .list
                    .set_pipeline(NativePipeline::Compute(&pipeline.native))
            };
            self.instance
                .as_mut()
                .unwrap()
                .refs
                .push(InstanceRef::ComputePipeline(pipeline.clone()));
        }

        self.set_bindings(&state.binding_sets, binding_update_mask, &root_signature, true)?;
        self.commit_barriers()?;

        self.compute_state_valid = true;
        self.graphics_state_valid = false;
        self.current_compute = state.clone();
        Ok(())
    }

    /// Writes descriptor tables and volatile root CBVs for every set whose
    /// bit is in the update mask, and re-requires states for the bindings
    /// that need them. Clears the volatile-write flag only after a full
    /// mask has walked every set.
    fn set_bindings(
        &mut self,
        sets: &[BindingSetHandle<B>],
        update_mask: u32,
        root_signature: &Arc<RootSignature<B>>,
        is_compute: bool,
    ) -> RhiResult<()> {
        if update_mask > 0 {
            let mut new_volatile_cbs: Vec<VolatileCbBinding<B>> = Vec::new();

            for (set_index, set) in sets.iter().enumerate() {
                let update_the_set = (update_mask & (1 << set_index)) != 0;
                let Some((expected_layout, root_param_offset)) =
                    root_signature.layout_offset(set_index)
                else {
                    log::error!(
                        "binding set {} has no matching layout in the pipeline",
                        set_index
                    );
                    return Err(RhiError::InvalidArgument);
                };
                if !Arc::ptr_eq(set.layout(), expected_layout) {
                    log::error!(
                        "binding set {} does not match the pipeline's binding layout",
                        set_index
                    );
                    return Err(RhiError::InvalidArgument);
                }

                match set {
                    BindingSetHandle::Bound(set) => {
                        let set = set.clone();
                        for (relative_index, buffer) in &set.volatile_cbs {
                            let root_index = relative_index + root_param_offset;
                            if buffer.desc().is_volatile {
                                let address = self
                                    .volatile_cb_addresses
                                    .get(&buffer.id)
                                    .copied()
                                    .unwrap_or(GpuVirtualAddress::NULL);
                                if address.is_null() {
                                    log::error!(
                                        "volatile constant buffer '{}' used before it was \
                                         written in this recording",
                                        buffer.desc().name
                                    );
                                    return Err(RhiError::UsageBug);
                                }
                                let previous = if is_compute {
                                    &self.current_compute_volatile_cbs
                                } else {
                                    &self.current_graphics_volatile_cbs
                                };
                                let unchanged = previous
                                    .get(new_volatile_cbs.len())
                                    .map(|binding| binding.gpu_address == address)
                                    .unwrap_or(false);
                                if update_the_set || !unchanged {
                                    let active = self.active.as_mut().unwrap();
                                    unsafe {
                                        if is_compute {
                                            active
                                                .list
                                                .set_compute_root_constant_buffer(root_index, address);
                                        } else {
                                            active
                                                .list
                                                .set_graphics_root_constant_buffer(root_index, address);
                                        }
                                    }
                                }
                                new_volatile_cbs.push(VolatileCbBinding {
                                    root_parameter_index: root_index,
                                    buffer: buffer.clone(),
                                    gpu_address: address,
                                });
                            } else if update_the_set {
                                let address = buffer.gpu_address();
                                if address.is_null() {
                                    log::error!(
                                        "constant buffer '{}' has no GPU address",
                                        buffer.desc().name
                                    );
                                    return Err(RhiError::UsageBug);
                                }
                                let active = self.active.as_mut().unwrap();
                                unsafe {
                                    if is_compute {
                                        active
                                            .list
                                            .set_compute_root_constant_buffer(root_index, address);
                                    } else {
                                        active
                                            .list
                                            .set_graphics_root_constant_buffer(root_index, address);
                                    }
                                }
                            }
                        }

                        if update_the_set {
                            if let Some(sampler_root) = set.sampler_root_index {
                                let handle = self
                                    .ctx
                                    .heaps
                                    .sampler
                                    .gpu_handle_shader_visible(set.sampler_base);
                                let active = self.active.as_mut().unwrap();
                                unsafe {
                                    if is_compute {
                                        active.list.set_compute_root_descriptor_table(
                                            root_param_offset + sampler_root,
                                            handle,
                                        );
                                    } else {
                                        active.list.set_graphics_root_descriptor_table(
                                            root_param_offset + sampler_root,
                                            handle,
                                        );
                                    }
                                }
                            }
                            if let Some(srv_etc_root) = set.srv_etc_root_index {
                                let handle = self
                                    .ctx
                                    .heaps
                                    .shader_resource
                                    .gpu_handle_shader_visible(set.srv_etc_base);
                                let active = self.active.as_mut().unwrap();
                                unsafe {
                                    if is_compute {
                                        active.list.set_compute_root_descriptor_table(
                                            root_param_offset + srv_etc_root,
                                            handle,
                                        );
                                    } else {
                                        active.list.set_graphics_root_descriptor_table(
                                            root_param_offset + srv_etc_root,
                                            handle,
                                        );
                                    }
                                }
                            }
                            if set.desc().track_liveness {
                                self.instance
                                    .as_mut()
                                    .unwrap()
                                    .refs
                                    .push(InstanceRef::BindingSet(set.clone()));
                            }
                        }

                        // UAV bindings may need fresh barriers even when the
                        // set itself did not change.
                        if update_the_set || set.has_uavs {
                            self.require_binding_set_states(&set)?;
                        }
                    }
                    BindingSetHandle::Bindless(set) => {
                        if update_the_set {
                            let handle = self
                                .ctx
                                .heaps
                                .shader_resource
                                .gpu_handle_shader_visible(set.base_index());
                            let active = self.active.as_mut().unwrap();
                            unsafe {
                                if is_compute {
                                    active.list.set_compute_root_descriptor_table(
                                        root_param_offset,
                                        handle,
                                    );
                                } else {
                                    active.list.set_graphics_root_descriptor_table(
                                        root_param_offset,
                                        handle,
                                    );
                                }
                            }
                            self.instance
                                .as_mut()
                                .unwrap()
                                .refs
                                .push(InstanceRef::BindlessSet(set.clone()));
                        }
                    }
                }
            }

            if is_compute {
                self.current_compute_volatile_cbs = new_volatile_cbs;
            } else {
                self.current_graphics_volatile_cbs = new_volatile_cbs;
            }
        }

        let full_mask = if sets.is_empty() {
            0
        } else {
            (1u32 << sets.len()) - 1
        };
        if (update_mask & full_mask) == full_mask {
            self.any_volatile_cb_writes = false;
        }
        Ok(())
    }

    fn require_binding_set_states(&mut self, set: &Arc<crate::BindingSet<B>>) -> RhiResult<()> {
        let shader_resource_states =
            ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE;
        for index in set.transition_bindings.clone() {
            let item = &set.desc().items[index as usize];
            let view_type = item.view_type;
            match &item.resource {
                crate::ResourceHandle::Texture(texture) => {
                    let texture = texture.clone();
                    let state = if view_type.is_uav() {
                        ResourceStates::UNORDERED_ACCESS
                    } else {
                        shader_resource_states
                    };
                    let subresources = item.subresources;
                    self.require_texture_state(&texture, subresources, state)?;
                }
                crate::ResourceHandle::Buffer(buffer) => {
                    let buffer = buffer.clone();
                    let state = match view_type {
                        ResourceViewType::ConstantBuffer => ResourceStates::CONSTANT_BUFFER,
                        ResourceViewType::AccelStruct => ResourceStates::ACCEL_STRUCT_READ,
                        view_type if view_type.is_uav() => ResourceStates::UNORDERED_ACCESS,
                        _ => shader_resource_states,
                    };
                    self.require_buffer_state(&buffer, state)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Arc<FrameBuffer<B>>) -> RhiResult<()> {
        for attachment in &framebuffer.desc().color_attachments.clone() {
            self.require_texture_state(
                &attachment.texture,
                attachment.subresources,
                ResourceStates::RENDER_TARGET,
            )?;
        }
        if let Some(depth) = &framebuffer.desc().depth_stencil_attachment.clone() {
            let state = if depth.is_read_only {
                ResourceStates::DEPTH_READ
            } else {
                ResourceStates::DEPTH_WRITE
            };
            self.require_texture_state(&depth.texture, depth.subresources, state)?;
        }

        let active = self.active.as_mut().unwrap();
        unsafe {
            active
                .list
                .set_render_targets(&framebuffer.rtv_handles, framebuffer.dsv_handle);
        }
        self.instance
            .as_mut()
            .unwrap()
            .refs
            .push(InstanceRef::FrameBuffer(framebuffer));
        Ok(())
    }

    // ---- draws and dispatches -------------------------------------------

    /// Re-binds any volatile CB whose mapped address moved since it was
    /// last bound.
    fn update_graphics_volatile_buffers(&mut self) {
        if !self.any_volatile_cb_writes {
            return;
        }
        let active = self.active.as_mut().unwrap();
        for binding in self.current_graphics_volatile_cbs.iter_mut() {
            let current = self
                .volatile_cb_addresses
                .get(&binding.buffer.id)
                .copied()
                .unwrap_or(GpuVirtualAddress::NULL);
            if current != binding.gpu_address {
                unsafe {
                    active
                        .list
                        .set_graphics_root_constant_buffer(binding.root_parameter_index, current);
                }
                binding.gpu_address = current;
            }
        }
        self.any_volatile_cb_writes = false;
    }

    // Same polarity as the graphics path: patch only when writes happened.
    fn update_compute_volatile_buffers(&mut self) {
        if !self.any_volatile_cb_writes {
            return;
        }
        let active = self.active.as_mut().unwrap();
        for binding in self.current_compute_volatile_cbs.iter_mut() {
            let current = self
                .volatile_cb_addresses
                .get(&binding.buffer.id)
                .copied()
                .unwrap_or(GpuVirtualAddress::NULL);
            if current != binding.gpu_address {
                unsafe {
                    active
                        .list
                        .set_compute_root_constant_buffer(binding.root_parameter_index, current);
                }
                binding.gpu_address = current;
            }
        }
        self.any_volatile_cb_writes = false;
    }

    pub fn draw(&mut self, args: &DrawArguments) -> RhiResult<()> {
        self.check_open()?;
        if !self.graphics_state_valid {
            log::error!("draw without a valid graphics state");
            return Err(RhiError::StatePolicyViolation);
        }
        self.update_graphics_volatile_buffers();
        let active = self.active.as_mut().unwrap();
        unsafe { active.list.draw(args) };
        Ok(())
    }

    pub fn draw_indexed(&mut self, args: &DrawArguments) -> RhiResult<()> {
        self.check_open()?;
        if !self.graphics_state_valid {
            log::error!("draw without a valid graphics state");
            return Err(RhiError::StatePolicyViolation);
        }
        self.update_graphics_volatile_buffers();
        let active = self.active.as_mut().unwrap();
        unsafe { active.list.draw_indexed(args) };
        Ok(())
    }

    pub fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> RhiResult<()> {
        self.check_open()?;
        if !self.compute_state_valid {
            log::error!("dispatch without a valid compute state");
            return Err(RhiError::StatePolicyViolation);
        }
        self.update_compute_volatile_buffers();
        let active = self.active.as_mut().unwrap();
        unsafe { active.list.dispatch(groups_x, groups_y, groups_z) };
        Ok(())
    }

    pub fn set_push_constants(&mut self, data: &[u8]) -> RhiResult<()> {
        self.check_open()?;
        let root_signature = if self.graphics_state_valid {
            self.current_graphics
                .pipeline
                .as_ref()
                .map(|pipeline| pipeline.root_signature.clone())
        } else if self.compute_state_valid {
            self.current_compute
                .pipeline
                .as_ref()
                .map(|pipeline| pipeline.root_signature.clone())
        } else {
            None
        };
        let Some(root_signature) = root_signature else {
            log::error!("push constants set without a bound pipeline");
            return Err(RhiError::StatePolicyViolation);
        };
        let Some((root_index, size)) = root_signature.push_constants else {
            log::error!("the bound root layout has no push constants");
            return Err(RhiError::InvalidArgument);
        };
        if data.len() as u32 > size {
            log::error!(
                "push constant data of {} bytes exceeds the declared {} bytes",
                data.len(),
                size
            );
            return Err(RhiError::InvalidArgument);
        }

        let mut words = vec![0u32; (data.len() + 3) / 4];
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            words[i] = u32::from_le_bytes(bytes);
        }

        let active = self.active.as_mut().unwrap();
        unsafe {
            if self.graphics_state_valid {
                active.list.set_graphics_root_constants(root_index, &words);
            } else {
                active.list.set_compute_root_constants(root_index, &words);
            }
        }
        Ok(())
    }

    // ---- writes and copies ----------------------------------------------

    /// For volatile constant buffers: allocates a fresh upload version and
    /// records its GPU address for root-CBV patching. For everything else:
    /// stages the data and issues a buffer-region copy.
    pub fn write_buffer(
        &mut self,
        buffer: &Arc<Buffer<B>>,
        data: &[u8],
        dst_offset: u64,
    ) -> RhiResult<()> {
        self.check_open()?;
        if data.is_empty() {
            return Err(RhiError::InvalidArgument);
        }
        let allocation = self.upload.suballocate(
            data.len() as u64,
            CONSTANT_BUFFER_OFFSET_ALIGNMENT,
            self.recording_version,
        )?;
        allocation.write(data);
        self.reference_upload_chunk(&allocation.chunk);

        if buffer.desc().is_volatile {
            self.volatile_cb_addresses
                .insert(buffer.id, allocation.gpu_address());
            self.any_volatile_cb_writes = true;
            self.instance
                .as_mut()
                .unwrap()
                .refs
                .push(InstanceRef::Buffer(buffer.clone()));
            return Ok(());
        }

        self.require_buffer_state(buffer, ResourceStates::COPY_DEST)?;
        self.commit_barriers()?;
        let active = self.active.as_mut().unwrap();
        unsafe {
            active.list.copy_buffer_region(
                buffer.native()?,
                dst_offset,
                allocation.buffer(),
                allocation.offset(),
                data.len() as u64,
            );
        }
        Ok(())
    }

    /// Uploads one texture subresource through the ring: the data is laid
    /// out with the backend's row-pitch footprint, then placed-copied in.
    pub fn write_texture(
        &mut self,
        texture: &Arc<Texture<B>>,
        array_slice: u32,
        mip_level: u32,
        data: &[u8],
        row_pitch: u64,
        depth_pitch: u64,
    ) -> RhiResult<()> {
        self.check_open()?;
        let desc = texture.desc().clone();
        if mip_level >= desc.mip_levels || array_slice >= desc.array_size {
            log::error!(
                "write_texture out of range on '{}': mip {} slice {}",
                desc.name,
                mip_level,
                array_slice
            );
            return Err(RhiError::InvalidArgument);
        }
        self.require_texture_state(
            texture,
            TextureSubresourceSet::single(mip_level, array_slice),
            ResourceStates::COPY_DEST,
        )?;
        self.commit_barriers()?;

        let mut footprint = subresource_footprint(&desc, mip_level);
        let allocation = self.upload.suballocate(
            footprint.total_bytes(),
            TEXTURE_PLACEMENT_ALIGNMENT,
            self.recording_version,
        )?;
        self.reference_upload_chunk(&allocation.chunk);

        let rows = footprint.rows as u64;
        let copy_bytes = row_pitch.min(footprint.row_size_bytes) as usize;
        for depth_slice in 0..footprint.depth as u64 {
            for row in 0..rows {
                let src_offset = (row_pitch * row + depth_pitch * depth_slice) as usize;
                if src_offset + copy_bytes > data.len() {
                    log::error!("write_texture source data is too small");
                    return Err(RhiError::InvalidArgument);
                }
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr().add(src_offset),
                        allocation
                            .cpu_ptr()
                            .add((footprint.row_pitch * (row + depth_slice * rows)) as usize),
                        copy_bytes,
                    );
                }
            }
        }
        footprint.offset = allocation.offset();

        let active = self.active.as_mut().unwrap();
        unsafe {
            active.list.copy_texture_region(
                TextureCopyLocation::Subresource {
                    texture: texture.native()?,
                    subresource_index: subresource_index(mip_level, array_slice, &desc),
                },
                0,
                0,
                0,
                TextureCopyLocation::PlacedFootprint {
                    buffer: allocation.buffer(),
                    footprint,
                },
                None,
            );
        }
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        dst: &Arc<Buffer<B>>,
        dst_offset: u64,
        src: &Arc<Buffer<B>>,
        src_offset: u64,
        byte_size: u64,
    ) -> RhiResult<()> {
        self.check_open()?;
        self.require_buffer_state(dst, ResourceStates::COPY_DEST)?;
        self.require_buffer_state(src, ResourceStates::COPY_SOURCE)?;
        self.commit_barriers()?;
        let active = self.active.as_mut().unwrap();
        unsafe {
            active
                .list
                .copy_buffer_region(dst.native()?, dst_offset, src.native()?, src_offset, byte_size);
        }
        Ok(())
    }

    pub fn copy_texture(
        &mut self,
        dst: &Arc<Texture<B>>,
        dst_slice: &TextureSlice,
        src: &Arc<Texture<B>>,
        src_slice: &TextureSlice,
    ) -> RhiResult<()> {
        self.check_open()?;
        let resolved_dst = dst_slice.resolve(dst.desc());
        let resolved_src = src_slice.resolve(src.desc());

        self.require_texture_state(
            dst,
            TextureSubresourceSet::single(resolved_dst.mip_level, resolved_dst.array_slice),
            ResourceStates::COPY_DEST,
        )?;
        self.require_texture_state(
            src,
            TextureSubresourceSet::single(resolved_src.mip_level, resolved_src.array_slice),
            ResourceStates::COPY_SOURCE,
        )?;
        self.commit_barriers()?;

        let src_box = CopyBox {
            left: resolved_src.x,
            top: resolved_src.y,
            front: resolved_src.z,
            right: resolved_src.x + resolved_src.width,
            bottom: resolved_src.y + resolved_src.height,
            back: resolved_src.z + resolved_src.depth,
        };
        let active = self.active.as_mut().unwrap();
        unsafe {
            active.list.copy_texture_region(
                TextureCopyLocation::Subresource {
                    texture: dst.native()?,
                    subresource_index: subresource_index(
                        resolved_dst.mip_level,
                        resolved_dst.array_slice,
                        dst.desc(),
                    ),
                },
                resolved_dst.x,
                resolved_dst.y,
                resolved_dst.z,
                TextureCopyLocation::Subresource {
                    texture: src.native()?,
                    subresource_index: subresource_index(
                        resolved_src.mip_level,
                        resolved_src.array_slice,
                        src.desc(),
                    ),
                },
                Some(src_box),
            );
        }
        Ok(())
    }

    pub fn copy_texture_to_staging(
        &mut self,
        dst: &Arc<StagingTexture<B>>,
        dst_slice: &TextureSlice,
        src: &Arc<Texture<B>>,
        src_slice: &TextureSlice,
    ) -> RhiResult<()> {
        self.check_open()?;
        let resolved_dst = dst_slice.resolve(dst.desc());
        let resolved_src = src_slice.resolve(src.desc());

        self.require_staging_texture_state(dst, ResourceStates::COPY_DEST)?;
        self.require_texture_state(
            src,
            TextureSubresourceSet::single(resolved_src.mip_level, resolved_src.array_slice),
            ResourceStates::COPY_SOURCE,
        )?;
        self.commit_barriers()?;

        let src_box = CopyBox {
            left: resolved_src.x,
            top: resolved_src.y,
            front: resolved_src.z,
            right: resolved_src.x + resolved_src.width,
            bottom: resolved_src.y + resolved_src.height,
            back: resolved_src.z + resolved_src.depth,
        };
        let footprint = dst.slice_region(&resolved_dst);
        let active = self.active.as_mut().unwrap();
        unsafe {
            active.list.copy_texture_region(
                TextureCopyLocation::PlacedFootprint {
                    buffer: dst.buffer.native()?,
                    footprint,
                },
                resolved_dst.x,
                resolved_dst.y,
                resolved_dst.z,
                TextureCopyLocation::Subresource {
                    texture: src.native()?,
                    subresource_index: subresource_index(
                        resolved_src.mip_level,
                        resolved_src.array_slice,
                        src.desc(),
                    ),
                },
                Some(src_box),
            );
        }
        Ok(())
    }

    pub fn copy_staging_to_texture(
        &mut self,
        dst: &Arc<Texture<B>>,
        dst_slice: &TextureSlice,
        src: &Arc<StagingTexture<B>>,
        src_slice: &TextureSlice,
    ) -> RhiResult<()> {
        self.check_open()?;
        let resolved_dst = dst_slice.resolve(dst.desc());
        let resolved_src = src_slice.resolve(src.desc());

        self.require_texture_state(
            dst,
            TextureSubresourceSet::single(resolved_dst.mip_level, resolved_dst.array_slice),
            ResourceStates::COPY_DEST,
        )?;
        self.require_staging_texture_state(src, ResourceStates::COPY_SOURCE)?;
        self.commit_barriers()?;

        let footprint = src.slice_region(&resolved_src);
        let active = self.active.as_mut().unwrap();
        unsafe {
            active.list.copy_texture_region(
                TextureCopyLocation::Subresource {
                    texture: dst.native()?,
                    subresource_index: subresource_index(
                        resolved_dst.mip_level,
                        resolved_dst.array_slice,
                        dst.desc(),
                    ),
                },
                resolved_dst.x,
                resolved_dst.y,
                resolved_dst.z,
                TextureCopyLocation::PlacedFootprint {
                    buffer: src.buffer.native()?,
                    footprint,
                },
                None,
            );
        }
        Ok(())
    }

    pub fn resolve_texture(
        &mut self,
        dst: &Arc<Texture<B>>,
        dst_subresources: TextureSubresourceSet,
        src: &Arc<Texture<B>>,
        src_subresources: TextureSubresourceSet,
    ) -> RhiResult<()> {
        self.check_open()?;
        let dst_set = dst_subresources.resolve(dst.desc(), false);
        let src_set = src_subresources.resolve(src.desc(), false);
        if dst_set.mip_level_count != src_set.mip_level_count
            || dst_set.array_slice_count != src_set.array_slice_count
        {
            log::error!("resolve_texture subresource sets do not match");
            return Err(RhiError::InvalidArgument);
        }

        self.require_texture_state(dst, dst_set, ResourceStates::RESOLVE_DEST)?;
        self.require_texture_state(src, src_set, ResourceStates::RESOLVE_SOURCE)?;
        self.commit_barriers()?;

        let format = dst.desc().format;
        let active = self.active.as_mut().unwrap();
        for slice in 0..dst_set.array_slice_count {
            for mip in 0..dst_set.mip_level_count {
                unsafe {
                    active.list.resolve_subresource(
                        dst.native()?,
                        subresource_index(
                            dst_set.base_mip_level + mip,
                            dst_set.base_array_slice + slice,
                            dst.desc(),
                        ),
                        src.native()?,
                        subresource_index(
                            src_set.base_mip_level + mip,
                            src_set.base_array_slice + slice,
                            src.desc(),
                        ),
                        format,
                    );
                }
            }
        }
        Ok(())
    }

    // ---- clears ---------------------------------------------------------

    pub fn clear_texture_float(
        &mut self,
        texture: &Arc<Texture<B>>,
        subresources: TextureSubresourceSet,
        color: Color,
    ) -> RhiResult<()> {
        self.check_open()?;
        let desc = texture.desc().clone();
        let info = format_info(desc.format);
        if info.has_depth || info.has_stencil || (!desc.is_render_target && !desc.is_uav) {
            log::error!(
                "clear_texture_float requires a render-target or UAV texture, '{}' is neither",
                desc.name
            );
            return Err(RhiError::InvalidArgument);
        }
        let subresources = subresources.resolve(&desc, false);

        if desc.is_render_target {
            self.require_texture_state(texture, subresources, ResourceStates::RENDER_TARGET)?;
            self.commit_barriers()?;
            for mip in subresources.base_mip_level
                ..subresources.base_mip_level + subresources.mip_level_count
            {
                let mip_set = TextureSubresourceSet {
                    base_mip_level: mip,
                    mip_level_count: 1,
                    base_array_slice: subresources.base_array_slice,
                    array_slice_count: subresources.array_slice_count,
                };
                let handle = texture.view_cpu_handle(
                    TextureViewType::RenderTarget,
                    Format::Unknown,
                    mip_set,
                    false,
                )?;
                let active = self.active.as_mut().unwrap();
                unsafe { active.list.clear_render_target(handle, color) };
            }
        } else {
            self.require_texture_state(texture, subresources, ResourceStates::UNORDERED_ACCESS)?;
            self.commit_barriers()?;
            self.commit_descriptor_heaps();
            for mip in subresources.base_mip_level
                ..subresources.base_mip_level + subresources.mip_level_count
            {
                let index = texture.clear_mip_uav_index(mip)?;
                let gpu_handle = self
                    .ctx
                    .heaps
                    .shader_resource
                    .gpu_handle_shader_visible(index);
                let cpu_handle = self.ctx.heaps.shader_resource.cpu_handle(index);
                let active = self.active.as_mut().unwrap();
                unsafe {
                    active.list.clear_texture_uav_float(
                        gpu_handle,
                        cpu_handle,
                        texture.native()?,
                        [color.r, color.g, color.b, color.a],
                    );
                }
            }
        }
        Ok(())
    }

    pub fn clear_texture_uint(
        &mut self,
        texture: &Arc<Texture<B>>,
        subresources: TextureSubresourceSet,
        value: u32,
    ) -> RhiResult<()> {
        self.check_open()?;
        let desc = texture.desc().clone();
        let info = format_info(desc.format);
        if info.has_depth || info.has_stencil || (!desc.is_render_target && !desc.is_uav) {
            log::error!(
                "clear_texture_uint requires a render-target or UAV texture, '{}' is neither",
                desc.name
            );
            return Err(RhiError::InvalidArgument);
        }
        let subresources = subresources.resolve(&desc, false);

        if desc.is_render_target {
            self.require_texture_state(texture, subresources, ResourceStates::RENDER_TARGET)?;
            self.commit_barriers()?;
            let float_value = value as f32;
            for mip in subresources.base_mip_level
                ..subresources.base_mip_level + subresources.mip_level_count
            {
                let mip_set = TextureSubresourceSet {
                    base_mip_level: mip,
                    mip_level_count: 1,
                    base_array_slice: subresources.base_array_slice,
                    array_slice_count: subresources.array_slice_count,
                };
                let handle = texture.view_cpu_handle(
                    TextureViewType::RenderTarget,
                    Format::Unknown,
                    mip_set,
                    false,
                )?;
                let active = self.active.as_mut().unwrap();
                unsafe {
                    active.list.clear_render_target(
                        handle,
                        Color::new(float_value, float_value, float_value, float_value),
                    );
                }
            }
        } else {
            self.require_texture_state(texture, subresources, ResourceStates::UNORDERED_ACCESS)?;
            self.commit_barriers()?;
            self.commit_descriptor_heaps();
            for mip in subresources.base_mip_level
                ..subresources.base_mip_level + subresources.mip_level_count
            {
                let index = texture.clear_mip_uav_index(mip)?;
                let gpu_handle = self
                    .ctx
                    .heaps
                    .shader_resource
                    .gpu_handle_shader_visible(index);
                let cpu_handle = self.ctx.heaps.shader_resource.cpu_handle(index);
                let active = self.active.as_mut().unwrap();
                unsafe {
                    active.list.clear_texture_uav_uint(
                        gpu_handle,
                        cpu_handle,
                        texture.native()?,
                        [value; 4],
                    );
                }
            }
        }
        Ok(())
    }

    pub fn clear_depth_stencil_texture(
        &mut self,
        texture: &Arc<Texture<B>>,
        subresources: TextureSubresourceSet,
        clear_depth: bool,
        depth: f32,
        clear_stencil: bool,
        stencil: u8,
    ) -> RhiResult<()> {
        self.check_open()?;
        if !clear_depth && !clear_stencil {
            return Err(RhiError::InvalidArgument);
        }
        let desc = texture.desc().clone();
        let info = format_info(desc.format);
        if !(info.has_depth || info.has_stencil) || !desc.is_depth_stencil {
            log::error!("'{}' is not a depth-stencil texture", desc.name);
            return Err(RhiError::InvalidArgument);
        }
        let subresources = subresources.resolve(&desc, false);

        self.require_texture_state(texture, subresources, ResourceStates::DEPTH_WRITE)?;
        self.commit_barriers()?;

        let mut flags = ClearFlags::DEPTH | ClearFlags::STENCIL;
        if !clear_depth {
            flags = ClearFlags::STENCIL;
        } else if !clear_stencil {
            flags = ClearFlags::DEPTH;
        }

        for mip in
            subresources.base_mip_level..subresources.base_mip_level + subresources.mip_level_count
        {
            let mip_set = TextureSubresourceSet {
                base_mip_level: mip,
                mip_level_count: 1,
                base_array_slice: subresources.base_array_slice,
                array_slice_count: subresources.array_slice_count,
            };
            let handle = texture.view_cpu_handle(
                TextureViewType::DepthStencil,
                Format::Unknown,
                mip_set,
                false,
            )?;
            let active = self.active.as_mut().unwrap();
            unsafe { active.list.clear_depth_stencil(handle, flags, depth, stencil) };
        }
        Ok(())
    }

    pub fn clear_buffer_uint(&mut self, buffer: &Arc<Buffer<B>>, value: u32) -> RhiResult<()> {
        self.check_open()?;
        if !buffer.desc().can_have_uavs {
            log::error!("clear_buffer_uint requires can_have_uavs on '{}'", buffer.desc().name);
            return Err(RhiError::InvalidArgument);
        }
        self.require_buffer_state(buffer, ResourceStates::UNORDERED_ACCESS)?;
        self.commit_barriers()?;
        self.commit_descriptor_heaps();

        let index = buffer.clear_uav_index()?;
        let gpu_handle = self
            .ctx
            .heaps
            .shader_resource
            .gpu_handle_shader_visible(index);
        let cpu_handle = self.ctx.heaps.shader_resource.cpu_handle(index);
        let active = self.active.as_mut().unwrap();
        unsafe {
            active
                .list
                .clear_buffer_uav_uint(gpu_handle, cpu_handle, buffer.native()?, [value; 4]);
        }
        Ok(())
    }

    // ---- queries and markers --------------------------------------------

    pub fn begin_timer_query(&mut self, query: &Arc<TimerQuery<B>>) -> RhiResult<()> {
        self.check_open()?;
        self.instance
            .as_mut()
            .unwrap()
            .timer_queries
            .push(query.clone());
        let active = self.active.as_mut().unwrap();
        unsafe {
            active
                .list
                .write_timestamp(&self.ctx.timer_queries.query_heap, query.begin_index());
        }
        Ok(())
    }

    /// Writes the end timestamp and resolves the pair into the CPU-readable
    /// buffer at `begin_index * 8` bytes.
    pub fn end_timer_query(&mut self, query: &Arc<TimerQuery<B>>) -> RhiResult<()> {
        self.check_open()?;
        self.instance
            .as_mut()
            .unwrap()
            .timer_queries
            .push(query.clone());
        let active = self.active.as_mut().unwrap();
        unsafe {
            active
                .list
                .write_timestamp(&self.ctx.timer_queries.query_heap, query.end_index());
            active.list.resolve_timestamps(
                &self.ctx.timer_queries.query_heap,
                query.begin_index(),
                2,
                &self.ctx.timer_queries.resolve_buffer,
                query.begin_index() as u64 * 8,
            );
        }
        Ok(())
    }

    pub fn begin_marker(&mut self, label: &str) -> RhiResult<()> {
        self.check_open()?;
        let active = self.active.as_mut().unwrap();
        unsafe { active.list.begin_marker(label) };
        Ok(())
    }

    pub fn end_marker(&mut self) -> RhiResult<()> {
        self.check_open()?;
        let active = self.active.as_mut().unwrap();
        unsafe { active.list.end_marker() };
        Ok(())
    }

    fn reference_upload_chunk(&mut self, chunk: &Arc<UploadChunk<B>>) {
        let changed = self
            .current_upload_chunk
            .as_ref()
            .map(|current| !Arc::ptr_eq(current, chunk))
            .unwrap_or(true);
        if changed {
            self.instance
                .as_mut()
                .unwrap()
                .upload_chunks
                .push(chunk.clone());
            self.current_upload_chunk = Some(chunk.clone());
        }
    }

    pub(crate) fn upload_manager_mut(&mut self) -> &mut UploadManager<B> {
        &mut self.upload
    }

    /// Total upload memory this recorder's ring has allocated so far.
    pub fn upload_allocated_bytes(&self) -> u64 {
        self.upload.allocated_memory()
    }

    /// Upload chunks currently reusable without waiting on a fence.
    pub fn upload_reusable_chunks(&mut self) -> usize {
        self.upload.reusable_chunks()
    }
}
