use super::*;

/// View descriptions the device authors into descriptor slots.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureViewDesc {
    pub format: Format,
    pub dimension: TextureDimension,
    pub subresources: TextureSubresourceSet,
    pub is_read_only_dsv: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferViewDesc {
    pub view_type: ResourceViewType,
    pub format: Format,
    pub range: BufferRange,
    pub struct_stride: u32,
}

/// Lowered graphics pipeline handed to the backend: shader blobs, expanded
/// input elements and converted state, plus the target formats snapshot.
pub struct NativeGraphicsPipelineDesc<'a, B: GpuBackend> {
    pub root_layout: &'a B::RootLayout,
    pub vs: Option<&'a ShaderByteCode>,
    pub hs: Option<&'a ShaderByteCode>,
    pub ds: Option<&'a ShaderByteCode>,
    pub gs: Option<&'a ShaderByteCode>,
    pub ps: Option<&'a ShaderByteCode>,
    pub input_elements: &'a [InputElement],
    pub render_state: &'a RenderState,
    pub topology: PrimitiveTopology,
    pub rtv_formats: &'a [Format],
    pub dsv_format: Option<Format>,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub name: &'a str,
}

pub struct NativeComputePipelineDesc<'a, B: GpuBackend> {
    pub root_layout: &'a B::RootLayout,
    pub cs: &'a ShaderByteCode,
    pub name: &'a str,
}

/// The native device. All object creation and descriptor authoring funnels
/// through here; the safe layer on top owns lifetimes and validation.
pub trait Device<B: GpuBackend>: Send + Sync {
    unsafe fn create_texture(&self, desc: &TextureDesc) -> RhiResult<B::Texture>;
    unsafe fn create_placed_texture(
        &self,
        desc: &TextureDesc,
        heap: &B::Heap,
        offset: u64,
    ) -> RhiResult<B::Texture>;
    unsafe fn texture_memory_requirements(&self, desc: &TextureDesc) -> MemoryRequirements;

    unsafe fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<B::Buffer>;
    unsafe fn create_placed_buffer(
        &self,
        desc: &BufferDesc,
        heap: &B::Heap,
        offset: u64,
    ) -> RhiResult<B::Buffer>;
    unsafe fn buffer_memory_requirements(&self, desc: &BufferDesc) -> MemoryRequirements;

    unsafe fn create_heap(&self, desc: &HeapDesc) -> RhiResult<B::Heap>;

    unsafe fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<B::DescriptorHeap>;
    unsafe fn copy_descriptors(
        &self,
        kind: DescriptorHeapKind,
        dst: &B::DescriptorHeap,
        dst_index: u32,
        src: &B::DescriptorHeap,
        src_index: u32,
        count: u32,
    );

    unsafe fn create_texture_view(
        &self,
        handle: CpuDescriptorHandle,
        view_type: TextureViewType,
        texture: &B::Texture,
        desc: &TextureViewDesc,
    );
    unsafe fn create_buffer_view(
        &self,
        handle: CpuDescriptorHandle,
        buffer: &B::Buffer,
        desc: &BufferViewDesc,
    );
    unsafe fn create_null_view(
        &self,
        handle: CpuDescriptorHandle,
        view_type: ResourceViewType,
        format: Format,
    );
    unsafe fn create_sampler_view(&self, handle: CpuDescriptorHandle, desc: &SamplerDesc);

    unsafe fn create_root_layout(&self, desc: &RootLayoutDesc) -> RhiResult<B::RootLayout>;
    unsafe fn create_graphics_pipeline(
        &self,
        desc: &NativeGraphicsPipelineDesc<'_, B>,
    ) -> RhiResult<B::GraphicsPipeline>;
    unsafe fn create_compute_pipeline(
        &self,
        desc: &NativeComputePipelineDesc<'_, B>,
    ) -> RhiResult<B::ComputePipeline>;

    unsafe fn create_fence(&self) -> RhiResult<B::Fence>;
    unsafe fn create_command_allocator(&self, queue: QueueType) -> RhiResult<B::CommandAllocator>;
    unsafe fn create_command_list(
        &self,
        queue: QueueType,
        allocator: &B::CommandAllocator,
    ) -> RhiResult<B::CommandList>;
    unsafe fn create_query_heap(&self, timestamp_count: u32) -> RhiResult<B::QueryHeap>;

    fn queue(&self, queue: QueueType) -> Option<&B::Queue>;
    fn supports_ray_tracing(&self) -> bool;
    unsafe fn device_removed(&self) -> bool;
}
