use super::*;

/// A single barrier in backend terms, produced by the recorder's commit of
/// the state tracker's scratch list.
pub enum NativeBarrier<'a, B: GpuBackend> {
    TextureTransition {
        texture: &'a B::Texture,
        /// `None` covers all subresources.
        subresource: Option<u32>,
        before: ResourceStates,
        after: ResourceStates,
    },
    BufferTransition {
        buffer: &'a B::Buffer,
        before: ResourceStates,
        after: ResourceStates,
    },
    TextureUav {
        texture: &'a B::Texture,
    },
    BufferUav {
        buffer: &'a B::Buffer,
    },
}

pub enum TextureCopyLocation<'a, B: GpuBackend> {
    Subresource {
        texture: &'a B::Texture,
        subresource_index: u32,
    },
    PlacedFootprint {
        buffer: &'a B::Buffer,
        footprint: SubresourceFootprint,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyBox {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub address: GpuVirtualAddress,
    pub size_bytes: u32,
    pub stride_bytes: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const DEPTH   = 0b01;
        const STENCIL = 0b10;
    }
}

pub enum NativePipeline<'a, B: GpuBackend> {
    Graphics(&'a B::GraphicsPipeline),
    Compute(&'a B::ComputePipeline),
}

/// The native command list the recorder appends to. Everything here maps
/// 1:1 onto a D3D12 graphics command list; a Vulkan backend translates at
/// this boundary.
pub trait CommandList<B: GpuBackend>: Send {
    unsafe fn reset(&mut self, allocator: &B::CommandAllocator);
    unsafe fn close(&mut self);

    unsafe fn resource_barriers(&mut self, barriers: &[NativeBarrier<'_, B>]);

    unsafe fn set_descriptor_heaps(
        &mut self,
        srv_heap: &B::DescriptorHeap,
        sampler_heap: &B::DescriptorHeap,
    );
    unsafe fn set_graphics_root_layout(&mut self, layout: &B::RootLayout);
    unsafe fn set_compute_root_layout(&mut self, layout: &B::RootLayout);
    unsafe fn set_pipeline(&mut self, pipeline: NativePipeline<'_, B>);

    unsafe fn set_graphics_root_descriptor_table(
        &mut self,
        parameter_index: u32,
        handle: GpuDescriptorHandle,
    );
    unsafe fn set_compute_root_descriptor_table(
        &mut self,
        parameter_index: u32,
        handle: GpuDescriptorHandle,
    );
    unsafe fn set_graphics_root_constant_buffer(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    );
    unsafe fn set_compute_root_constant_buffer(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    );
    unsafe fn set_graphics_root_constants(&mut self, parameter_index: u32, data: &[u32]);
    unsafe fn set_compute_root_constants(&mut self, parameter_index: u32, data: &[u32]);

    unsafe fn set_render_targets(
        &mut self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    );
    unsafe fn set_viewports(&mut self, viewports: &[Viewport]);
    unsafe fn set_scissors(&mut self, scissors: &[Rect]);
    unsafe fn set_blend_constant(&mut self, color: Color);
    unsafe fn set_stencil_ref(&mut self, value: u8);
    unsafe fn set_primitive_topology(&mut self, topology: PrimitiveTopology);
    unsafe fn set_index_buffer(&mut self, address: GpuVirtualAddress, size_bytes: u32, format: Format);
    unsafe fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]);

    unsafe fn draw(&mut self, args: &DrawArguments);
    unsafe fn draw_indexed(&mut self, args: &DrawArguments);
    unsafe fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);

    unsafe fn copy_buffer_region(
        &mut self,
        dst: &B::Buffer,
        dst_offset: u64,
        src: &B::Buffer,
        src_offset: u64,
        byte_size: u64,
    );
    unsafe fn copy_texture_region(
        &mut self,
        dst: TextureCopyLocation<'_, B>,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: TextureCopyLocation<'_, B>,
        src_box: Option<CopyBox>,
    );
    unsafe fn resolve_subresource(
        &mut self,
        dst: &B::Texture,
        dst_subresource: u32,
        src: &B::Texture,
        src_subresource: u32,
        format: Format,
    );

    unsafe fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: Color);
    unsafe fn clear_depth_stencil(
        &mut self,
        view: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    );
    unsafe fn clear_texture_uav_float(
        &mut self,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        texture: &B::Texture,
        values: [f32; 4],
    );
    unsafe fn clear_texture_uav_uint(
        &mut self,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        texture: &B::Texture,
        values: [u32; 4],
    );
    unsafe fn clear_buffer_uav_uint(
        &mut self,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        buffer: &B::Buffer,
        values: [u32; 4],
    );

    unsafe fn write_timestamp(&mut self, heap: &B::QueryHeap, index: u32);
    unsafe fn resolve_timestamps(
        &mut self,
        heap: &B::QueryHeap,
        start_index: u32,
        count: u32,
        dst: &B::Buffer,
        dst_offset: u64,
    );

    unsafe fn begin_marker(&mut self, label: &str);
    unsafe fn end_marker(&mut self);
}
