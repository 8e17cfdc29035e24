use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;

use kiln_core::gpu::Device as _;
use kiln_core::gpu::Fence as _;
use kiln_core::gpu::Queue as _;
use kiln_core::gpu::*;

use crate::AccelStruct;
use crate::BindingLayout;
use crate::BindingSet;
use crate::BindingSetDesc;
use crate::BindingSetHandle;
use crate::BindlessSet;
use crate::Buffer;
use crate::CommandList;
use crate::CommandListDesc;
use crate::CommandQueue;
use crate::ComputePipeline;
use crate::ComputePipelineDesc;
use crate::DescriptorHeaps;
use crate::EventQuery;
use crate::FrameBuffer;
use crate::FrameBufferDesc;
use crate::GraphicsPipeline;
use crate::GraphicsPipelineDesc;
use crate::Heap;
use crate::InputLayout;
use crate::LastUse;
use crate::RayTracingPipeline;
use crate::Sampler;
use crate::StagingTexture;
use crate::Texture;
use crate::TimerQuery;
use crate::TimerQueryPool;

/// Sizing knobs for the device's core services.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub rtv_heap_size: u32,
    pub dsv_heap_size: u32,
    pub srv_heap_size: u32,
    pub sampler_heap_size: u32,
    pub max_timer_queries: u32,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            rtv_heap_size: 1024,
            dsv_heap_size: 1024,
            srv_heap_size: 16384,
            sampler_heap_size: 2048,
            max_timer_queries: 256,
        }
    }
}

/// Shared innards of the device: the native device, the four descriptor
/// heaps, the per-queue fence state and the timer-query pool. Everything in
/// the crate reaches the backend through this.
pub(crate) struct DeviceContext<B: GpuBackend> {
    pub device: B::Device,
    pub heaps: DescriptorHeaps<B>,
    pub(crate) queues: [Option<CommandQueue<B>>; QUEUE_COUNT],
    pub(crate) timer_queries: TimerQueryPool<B>,
    removed: AtomicBool,
}

impl<B: GpuBackend> DeviceContext<B> {
    pub(crate) fn queue(&self, queue_type: QueueType) -> Option<&CommandQueue<B>> {
        self.queues[queue_type.index()].as_ref()
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

/// The assembly root: creates every first-class object, executes command
/// lists and orchestrates waits and garbage collection.
pub struct Device<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
}

impl<B: GpuBackend> Device<B> {
    pub fn new(native_device: B::Device, desc: &DeviceDesc) -> RhiResult<Self> {
        let heaps = DescriptorHeaps::new(
            &native_device,
            desc.rtv_heap_size,
            desc.dsv_heap_size,
            desc.srv_heap_size,
            desc.sampler_heap_size,
        )?;

        let mut queues: [Option<CommandQueue<B>>; QUEUE_COUNT] = [None, None, None];
        for queue_type in [QueueType::Graphics, QueueType::Compute, QueueType::Transfer] {
            if native_device.queue(queue_type).is_some() {
                let fence = unsafe { native_device.create_fence()? };
                queues[queue_type.index()] = Some(CommandQueue::new(queue_type, fence));
            }
        }

        let query_heap = unsafe { native_device.create_query_heap(desc.max_timer_queries * 2)? };
        let resolve_buffer = unsafe {
            native_device.create_buffer(&BufferDesc::read_back(
                desc.max_timer_queries as u64 * 2 * 8,
                "timer query resolve",
            ))?
        };
        let timer_queries =
            TimerQueryPool::new(query_heap, resolve_buffer, desc.max_timer_queries);

        Ok(Self {
            ctx: Arc::new(DeviceContext {
                device: native_device,
                heaps,
                queues,
                timer_queries,
                removed: AtomicBool::new(false),
            }),
        })
    }

    pub fn native_device(&self) -> &B::Device {
        &self.ctx.device
    }

    /// The device's four descriptor heaps, exposed for swap-chain glue and
    /// external suballocation.
    pub fn descriptor_heaps(&self) -> &DescriptorHeaps<B> {
        &self.ctx.heaps
    }

    // ---- resources ------------------------------------------------------

    pub fn create_texture(&self, desc: TextureDesc) -> RhiResult<Arc<Texture<B>>> {
        Texture::new(self.ctx.clone(), desc)
    }

    /// Wraps an externally-created native image, e.g. a swap-chain
    /// back-buffer. State is tracked like any other texture.
    pub fn create_texture_from_native(
        &self,
        native: B::Texture,
        desc: TextureDesc,
    ) -> Arc<Texture<B>> {
        Texture::from_native(self.ctx.clone(), desc, native)
    }

    pub fn create_buffer(&self, desc: BufferDesc) -> RhiResult<Arc<Buffer<B>>> {
        Buffer::new(self.ctx.clone(), desc)
    }

    pub fn create_buffer_from_native(&self, native: B::Buffer, desc: BufferDesc) -> Arc<Buffer<B>> {
        Buffer::from_native(self.ctx.clone(), desc, native)
    }

    pub fn create_staging_texture(
        &self,
        desc: TextureDesc,
        cpu_access: CpuAccessMode,
    ) -> RhiResult<Arc<StagingTexture<B>>> {
        StagingTexture::new(self.ctx.clone(), desc, cpu_access)
    }

    pub fn create_sampler(&self, desc: SamplerDesc) -> Arc<Sampler<B>> {
        Sampler::new(self.ctx.clone(), desc)
    }

    pub fn create_heap(&self, desc: HeapDesc) -> RhiResult<Arc<Heap<B>>> {
        Heap::new(&self.ctx, desc)
    }

    pub fn create_frame_buffer(&self, desc: FrameBufferDesc<B>) -> RhiResult<Arc<FrameBuffer<B>>> {
        FrameBuffer::new(desc)
    }

    // ---- binding system -------------------------------------------------

    pub fn create_binding_layout(&self, desc: BindingLayoutDesc) -> RhiResult<Arc<BindingLayout>> {
        BindingLayout::new_bound(desc)
    }

    pub fn create_bindless_layout(
        &self,
        desc: BindlessLayoutDesc,
    ) -> RhiResult<Arc<BindingLayout>> {
        BindingLayout::new_bindless(desc)
    }

    pub fn create_binding_set(
        &self,
        desc: BindingSetDesc<B>,
        layout: &Arc<BindingLayout>,
    ) -> RhiResult<Arc<BindingSet<B>>> {
        BindingSet::new(self.ctx.clone(), desc, layout)
    }

    pub fn create_bindless_set(
        &self,
        layout: &Arc<BindingLayout>,
        capacity: u32,
    ) -> RhiResult<Arc<BindlessSet<B>>> {
        BindlessSet::new(self.ctx.clone(), layout, capacity)
    }

    // ---- pipelines ------------------------------------------------------

    pub fn create_input_layout(
        &self,
        attributes: &[VertexAttributeDesc],
    ) -> RhiResult<Arc<InputLayout>> {
        InputLayout::new(attributes)
    }

    pub fn create_graphics_pipeline(
        &self,
        desc: GraphicsPipelineDesc,
        framebuffer: &Arc<FrameBuffer<B>>,
    ) -> RhiResult<Arc<GraphicsPipeline<B>>> {
        GraphicsPipeline::new(&self.ctx, desc, framebuffer)
    }

    pub fn create_compute_pipeline(
        &self,
        desc: ComputePipelineDesc,
    ) -> RhiResult<Arc<ComputePipeline<B>>> {
        ComputePipeline::new(&self.ctx, desc)
    }

    pub fn create_ray_tracing_pipeline(
        &self,
        desc: RayTracingPipelineDesc,
        global_layouts: &[Arc<BindingLayout>],
    ) -> RhiResult<Arc<RayTracingPipeline<B>>> {
        RayTracingPipeline::new(&self.ctx, desc, global_layouts)
    }

    pub fn create_accel_struct(&self, desc: AccelStructDesc) -> RhiResult<Arc<AccelStruct<B>>> {
        AccelStruct::new(&self.ctx, desc)
    }

    // ---- command lists --------------------------------------------------

    pub fn create_command_list(&self, desc: CommandListDesc) -> RhiResult<CommandList<B>> {
        CommandList::new(self.ctx.clone(), desc)
    }

    /// Submits closed command lists on one queue. Signals the queue fence
    /// at the new submission value and parks each list's instance until the
    /// fence observes it.
    pub fn execute_command_lists(
        &self,
        command_lists: &mut [&mut CommandList<B>],
        queue_type: QueueType,
    ) -> RhiResult<u64> {
        if self.ctx.is_removed() {
            log::error!("submit refused: the device was removed");
            return Err(RhiError::DeviceRemoved);
        }
        let Some(queue_state) = self.ctx.queue(queue_type) else {
            log::error!("device has no {:?} queue", queue_type);
            return Err(RhiError::InvalidArgument);
        };
        let native_queue = self.ctx.device.queue(queue_type).unwrap();

        let mut natives: SmallVec<[&B::CommandList; 8]> = SmallVec::new();
        for command_list in command_lists.iter() {
            if !command_list.is_closed() {
                log::error!("execute_command_lists requires closed command lists");
                return Err(RhiError::StatePolicyViolation);
            }
            natives.push(command_list.native_list().ok_or(RhiError::StatePolicyViolation)?);
        }

        unsafe { native_queue.execute(&natives) };
        drop(natives);

        let submitted = queue_state.last_submitted.fetch_add(1, Ordering::AcqRel) + 1;
        unsafe { native_queue.signal(&queue_state.fence, submitted) };

        {
            let mut in_flight = queue_state.in_flight.lock().unwrap();
            for command_list in command_lists.iter_mut() {
                in_flight.push_front(command_list.executed(submitted));
            }
        }

        if unsafe { self.ctx.device.device_removed() } {
            self.ctx.removed.store(true, Ordering::Release);
            log::error!("device removed during submission");
            return Err(RhiError::DeviceRemoved);
        }
        Ok(submitted)
    }

    /// Makes `wait_queue` wait for `signal_queue`'s fence to reach `value`
    /// before executing anything submitted later.
    pub fn queue_wait_for_command_list(
        &self,
        wait_queue: QueueType,
        signal_queue: QueueType,
        value: u64,
    ) -> RhiResult<()> {
        let Some(signal_state) = self.ctx.queue(signal_queue) else {
            return Err(RhiError::InvalidArgument);
        };
        if value > signal_state.last_submitted_value() {
            log::error!(
                "queue wait value {} is ahead of the {} submissions on the signal queue",
                value,
                signal_state.last_submitted_value()
            );
            return Err(RhiError::InvalidArgument);
        }
        let Some(wait_native) = self.ctx.device.queue(wait_queue) else {
            return Err(RhiError::InvalidArgument);
        };
        unsafe { wait_native.wait(&signal_state.fence, value) };
        Ok(())
    }

    /// Blocks until every queue has drained.
    pub fn wait_for_idle(&self) {
        for queue_state in self.ctx.queues.iter().flatten() {
            let submitted = queue_state.last_submitted_value();
            if queue_state.update_last_completed_value() < submitted {
                unsafe { queue_state.fence.await_value(submitted) };
                queue_state.update_last_completed_value();
            }
        }
    }

    /// Polls fences and releases every retired command-list instance along
    /// with the strong references it holds.
    pub fn collect_garbage(&self) {
        for queue_state in self.ctx.queues.iter().flatten() {
            queue_state.retire_completed_instances();
        }
    }

    pub fn queue_last_submitted(&self, queue_type: QueueType) -> u64 {
        self.ctx
            .queue(queue_type)
            .map(|queue| queue.last_submitted_value())
            .unwrap_or(0)
    }

    pub fn queue_last_completed(&self, queue_type: QueueType) -> u64 {
        self.ctx
            .queue(queue_type)
            .map(|queue| queue.update_last_completed_value())
            .unwrap_or(0)
    }

    pub fn instances_in_flight(&self, queue_type: QueueType) -> usize {
        self.ctx
            .queue(queue_type)
            .map(|queue| queue.instances_in_flight())
            .unwrap_or(0)
    }

    // ---- queries --------------------------------------------------------

    pub fn create_event_query(&self) -> Arc<EventQuery> {
        EventQuery::new()
    }

    /// Snapshots the queue's current submitted value into the query.
    pub fn set_event_query(&self, query: &EventQuery, queue_type: QueueType) -> RhiResult<()> {
        let Some(queue_state) = self.ctx.queue(queue_type) else {
            return Err(RhiError::InvalidArgument);
        };
        *query.state.lock().unwrap() = Some(LastUse {
            queue: queue_type,
            value: queue_state.last_submitted_value(),
        });
        Ok(())
    }

    pub fn poll_event_query(&self, query: &EventQuery) -> bool {
        let state = query.state.lock().unwrap();
        match *state {
            Some(use_point) => self
                .ctx
                .queue(use_point.queue)
                .map(|queue| queue.update_last_completed_value() >= use_point.value)
                .unwrap_or(true),
            None => false,
        }
    }

    pub fn wait_event_query(&self, query: &EventQuery) -> RhiResult<()> {
        let use_point = *query.state.lock().unwrap();
        let Some(use_point) = use_point else {
            log::error!("waiting on an event query that was never set");
            return Err(RhiError::UsageBug);
        };
        if let Some(queue_state) = self.ctx.queue(use_point.queue) {
            if queue_state.last_completed_value() < use_point.value {
                unsafe { queue_state.fence.await_value(use_point.value) };
                queue_state.update_last_completed_value();
            }
        }
        Ok(())
    }

    pub fn reset_event_query(&self, query: &EventQuery) {
        query.reset();
    }

    pub fn create_timer_query(&self) -> RhiResult<Arc<TimerQuery<B>>> {
        TimerQuery::new(self.ctx.clone())
    }

    pub fn poll_timer_query(&self, query: &TimerQuery<B>) -> bool {
        let fence_use = *query.fence_use.lock().unwrap();
        match fence_use {
            Some(use_point) => self
                .ctx
                .queue(use_point.queue)
                .map(|queue| queue.update_last_completed_value() >= use_point.value)
                .unwrap_or(true),
            None => false,
        }
    }

    pub fn reset_timer_query(&self, query: &TimerQuery<B>) {
        query.reset();
    }

    /// Blocks on the query's submission fence if needed, then reads both
    /// timestamps back and converts to seconds.
    pub fn timer_query_time(&self, query: &TimerQuery<B>) -> RhiResult<f32> {
        if !query.started.load(Ordering::Acquire) {
            log::error!("timer query time requested before the query was submitted");
            return Err(RhiError::UsageBug);
        }
        if query.resolved.load(Ordering::Acquire) {
            return Ok(*query.time.lock().unwrap());
        }

        let fence_use = *query.fence_use.lock().unwrap();
        if let Some(use_point) = fence_use {
            if let Some(queue_state) = self.ctx.queue(use_point.queue) {
                if queue_state.last_completed_value() < use_point.value {
                    unsafe { queue_state.fence.await_value(use_point.value) };
                    queue_state.update_last_completed_value();
                }
            }
        }

        let frequency = self
            .ctx
            .device
            .queue(QueueType::Graphics)
            .map(|queue| unsafe { queue.timestamp_frequency() })
            .unwrap_or(1);

        use kiln_core::gpu::Buffer as _;
        let byte_offset = query.begin_index() as u64 * 8;
        let mapped = unsafe { self.ctx.timer_queries.resolve_buffer.map(byte_offset, 16) }
            .ok_or(RhiError::NativeFailure)?;
        let (begin, end) = unsafe {
            let begin = (mapped as *const u64).read_unaligned();
            let end = (mapped.add(8) as *const u64).read_unaligned();
            (begin, end)
        };
        unsafe { self.ctx.timer_queries.resolve_buffer.unmap(byte_offset, 16) };

        let seconds = (end.saturating_sub(begin)) as f32 / frequency as f32;
        *query.time.lock().unwrap() = seconds;
        query.resolved.store(true, Ordering::Release);
        Ok(seconds)
    }

    pub(crate) fn context(&self) -> &Arc<DeviceContext<B>> {
        &self.ctx
    }
}

/// Helper for building the binding-set slot array of a pipeline state.
pub fn binding_sets<B: GpuBackend>(
    sets: impl IntoIterator<Item = BindingSetHandle<B>>,
) -> SmallVec<[BindingSetHandle<B>; MAX_BINDING_LAYOUTS]> {
    sets.into_iter().collect()
}
