use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use kiln_core::gpu::*;

use crate::NullBackend;
use crate::NullBuffer;
use crate::NullCommandAllocator;
use crate::NullQueryHeap;
use crate::NullTexture;

static TIMESTAMP_CLOCK: AtomicU64 = AtomicU64::new(1_000);

/// One recorded barrier, with resources flattened to their object ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedBarrier {
    TextureTransition {
        texture: u64,
        subresource: Option<u32>,
        before: ResourceStates,
        after: ResourceStates,
    },
    BufferTransition {
        buffer: u64,
        before: ResourceStates,
        after: ResourceStates,
    },
    TextureUav {
        texture: u64,
    },
    BufferUav {
        buffer: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCopyLocation {
    Subresource { texture: u64, subresource_index: u32 },
    PlacedFootprint { buffer: u64, offset: u64, row_pitch: u64 },
}

/// The replayable command stream a null command list records.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Close,
    ResourceBarriers(Vec<RecordedBarrier>),
    SetDescriptorHeaps {
        srv_heap: u64,
        sampler_heap: u64,
    },
    SetGraphicsRootLayout(u64),
    SetComputeRootLayout(u64),
    SetGraphicsPipeline(u64),
    SetComputePipeline(u64),
    SetGraphicsRootDescriptorTable {
        parameter_index: u32,
        handle: GpuDescriptorHandle,
    },
    SetComputeRootDescriptorTable {
        parameter_index: u32,
        handle: GpuDescriptorHandle,
    },
    SetGraphicsRootConstantBuffer {
        parameter_index: u32,
        address: GpuVirtualAddress,
    },
    SetComputeRootConstantBuffer {
        parameter_index: u32,
        address: GpuVirtualAddress,
    },
    SetGraphicsRootConstants {
        parameter_index: u32,
        words: Vec<u32>,
    },
    SetComputeRootConstants {
        parameter_index: u32,
        words: Vec<u32>,
    },
    SetRenderTargets {
        render_targets: Vec<CpuDescriptorHandle>,
        depth_stencil: Option<CpuDescriptorHandle>,
    },
    SetViewports(usize),
    SetScissors(usize),
    SetBlendConstant([f32; 4]),
    SetStencilRef(u8),
    SetPrimitiveTopology(PrimitiveTopology),
    SetIndexBuffer {
        address: GpuVirtualAddress,
        size_bytes: u32,
        format: Format,
    },
    SetVertexBuffers {
        start_slot: u32,
        count: usize,
    },
    Draw(DrawArguments),
    DrawIndexed(DrawArguments),
    Dispatch {
        groups_x: u32,
        groups_y: u32,
        groups_z: u32,
    },
    CopyBufferRegion {
        dst: u64,
        dst_offset: u64,
        src: u64,
        src_offset: u64,
        byte_size: u64,
    },
    CopyTextureRegion {
        dst: RecordedCopyLocation,
        src: RecordedCopyLocation,
    },
    ResolveSubresource {
        dst: u64,
        dst_subresource: u32,
        src: u64,
        src_subresource: u32,
    },
    ClearRenderTarget {
        view: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    ClearTextureUavFloat {
        texture: u64,
        values: [f32; 4],
    },
    ClearTextureUavUint {
        texture: u64,
        values: [u32; 4],
    },
    ClearBufferUavUint {
        buffer: u64,
        values: [u32; 4],
    },
    WriteTimestamp(u32),
    ResolveTimestamps {
        start_index: u32,
        count: u32,
        dst_offset: u64,
    },
    BeginMarker(String),
    EndMarker,
}

pub struct NullCommandList {
    commands: Vec<RecordedCommand>,
    reset_count: u64,
}

impl NullCommandList {
    pub(crate) fn new() -> Self {
        Self {
            commands: Vec::new(),
            reset_count: 0,
        }
    }

    /// Test helper: the commands recorded since the last reset.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    fn push(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }
}

impl CommandList<NullBackend> for NullCommandList {
    unsafe fn reset(&mut self, _allocator: &NullCommandAllocator) {
        self.commands.clear();
        self.reset_count += 1;
    }

    unsafe fn close(&mut self) {
        self.push(RecordedCommand::Close);
    }

    unsafe fn resource_barriers(&mut self, barriers: &[NativeBarrier<'_, NullBackend>]) {
        let recorded = barriers
            .iter()
            .map(|barrier| match barrier {
                NativeBarrier::TextureTransition {
                    texture,
                    subresource,
                    before,
                    after,
                } => RecordedBarrier::TextureTransition {
                    texture: texture.id,
                    subresource: *subresource,
                    before: *before,
                    after: *after,
                },
                NativeBarrier::BufferTransition {
                    buffer,
                    before,
                    after,
                } => RecordedBarrier::BufferTransition {
                    buffer: buffer.id,
                    before: *before,
                    after: *after,
                },
                NativeBarrier::TextureUav { texture } => RecordedBarrier::TextureUav {
                    texture: texture.id,
                },
                NativeBarrier::BufferUav { buffer } => RecordedBarrier::BufferUav {
                    buffer: buffer.id,
                },
            })
            .collect();
        self.push(RecordedCommand::ResourceBarriers(recorded));
    }

    unsafe fn set_descriptor_heaps(
        &mut self,
        srv_heap: &crate::NullDescriptorHeap,
        sampler_heap: &crate::NullDescriptorHeap,
    ) {
        self.push(RecordedCommand::SetDescriptorHeaps {
            srv_heap: srv_heap.id,
            sampler_heap: sampler_heap.id,
        });
    }

    unsafe fn set_graphics_root_layout(&mut self, layout: &crate::NullRootLayout) {
        self.push(RecordedCommand::SetGraphicsRootLayout(layout.id));
    }

    unsafe fn set_compute_root_layout(&mut self, layout: &crate::NullRootLayout) {
        self.push(RecordedCommand::SetComputeRootLayout(layout.id));
    }

    unsafe fn set_pipeline(&mut self, pipeline: NativePipeline<'_, NullBackend>) {
        match pipeline {
            NativePipeline::Graphics(p) => self.push(RecordedCommand::SetGraphicsPipeline(p.id)),
            NativePipeline::Compute(p) => self.push(RecordedCommand::SetComputePipeline(p.id)),
        }
    }

    unsafe fn set_graphics_root_descriptor_table(
        &mut self,
        parameter_index: u32,
        handle: GpuDescriptorHandle,
    ) {
        self.push(RecordedCommand::SetGraphicsRootDescriptorTable {
            parameter_index,
            handle,
        });
    }

    unsafe fn set_compute_root_descriptor_table(
        &mut self,
        parameter_index: u32,
        handle: GpuDescriptorHandle,
    ) {
        self.push(RecordedCommand::SetComputeRootDescriptorTable {
            parameter_index,
            handle,
        });
    }

    unsafe fn set_graphics_root_constant_buffer(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    ) {
        self.push(RecordedCommand::SetGraphicsRootConstantBuffer {
            parameter_index,
            address,
        });
    }

    unsafe fn set_compute_root_constant_buffer(
        &mut self,
        parameter_index: u32,
        address: GpuVirtualAddress,
    ) {
        self.push(RecordedCommand::SetComputeRootConstantBuffer {
            parameter_index,
            address,
        });
    }

    unsafe fn set_graphics_root_constants(&mut self, parameter_index: u32, data: &[u32]) {
        self.push(RecordedCommand::SetGraphicsRootConstants {
            parameter_index,
            words: data.to_vec(),
        });
    }

    unsafe fn set_compute_root_constants(&mut self, parameter_index: u32, data: &[u32]) {
        self.push(RecordedCommand::SetComputeRootConstants {
            parameter_index,
            words: data.to_vec(),
        });
    }

    unsafe fn set_render_targets(
        &mut self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        self.push(RecordedCommand::SetRenderTargets {
            render_targets: render_targets.to_vec(),
            depth_stencil,
        });
    }

    unsafe fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.push(RecordedCommand::SetViewports(viewports.len()));
    }

    unsafe fn set_scissors(&mut self, scissors: &[Rect]) {
        self.push(RecordedCommand::SetScissors(scissors.len()));
    }

    unsafe fn set_blend_constant(&mut self, color: Color) {
        self.push(RecordedCommand::SetBlendConstant([
            color.r, color.g, color.b, color.a,
        ]));
    }

    unsafe fn set_stencil_ref(&mut self, value: u8) {
        self.push(RecordedCommand::SetStencilRef(value));
    }

    unsafe fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.push(RecordedCommand::SetPrimitiveTopology(topology));
    }

    unsafe fn set_index_buffer(
        &mut self,
        address: GpuVirtualAddress,
        size_bytes: u32,
        format: Format,
    ) {
        self.push(RecordedCommand::SetIndexBuffer {
            address,
            size_bytes,
            format,
        });
    }

    unsafe fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.push(RecordedCommand::SetVertexBuffers {
            start_slot,
            count: views.len(),
        });
    }

    unsafe fn draw(&mut self, args: &DrawArguments) {
        self.push(RecordedCommand::Draw(*args));
    }

    unsafe fn draw_indexed(&mut self, args: &DrawArguments) {
        self.push(RecordedCommand::DrawIndexed(*args));
    }

    unsafe fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.push(RecordedCommand::Dispatch {
            groups_x,
            groups_y,
            groups_z,
        });
    }

    unsafe fn copy_buffer_region(
        &mut self,
        dst: &NullBuffer,
        dst_offset: u64,
        src: &NullBuffer,
        src_offset: u64,
        byte_size: u64,
    ) {
        // Executes immediately: the null "GPU" runs at record time.
        std::ptr::copy_nonoverlapping(
            src.data_ptr().add(src_offset as usize),
            dst.data_ptr().add(dst_offset as usize),
            byte_size as usize,
        );
        self.push(RecordedCommand::CopyBufferRegion {
            dst: dst.id,
            dst_offset,
            src: src.id,
            src_offset,
            byte_size,
        });
    }

    unsafe fn copy_texture_region(
        &mut self,
        dst: TextureCopyLocation<'_, NullBackend>,
        _dst_x: u32,
        _dst_y: u32,
        _dst_z: u32,
        src: TextureCopyLocation<'_, NullBackend>,
        _src_box: Option<CopyBox>,
    ) {
        let record = |location: TextureCopyLocation<'_, NullBackend>| match location {
            TextureCopyLocation::Subresource {
                texture,
                subresource_index,
            } => RecordedCopyLocation::Subresource {
                texture: texture.id,
                subresource_index,
            },
            TextureCopyLocation::PlacedFootprint { buffer, footprint } => {
                RecordedCopyLocation::PlacedFootprint {
                    buffer: buffer.id,
                    offset: footprint.offset,
                    row_pitch: footprint.row_pitch,
                }
            }
        };
        self.push(RecordedCommand::CopyTextureRegion {
            dst: record(dst),
            src: record(src),
        });
    }

    unsafe fn resolve_subresource(
        &mut self,
        dst: &NullTexture,
        dst_subresource: u32,
        src: &NullTexture,
        src_subresource: u32,
        _format: Format,
    ) {
        self.push(RecordedCommand::ResolveSubresource {
            dst: dst.id,
            dst_subresource,
            src: src.id,
            src_subresource,
        });
    }

    unsafe fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: Color) {
        self.push(RecordedCommand::ClearRenderTarget {
            view,
            color: [color.r, color.g, color.b, color.a],
        });
    }

    unsafe fn clear_depth_stencil(
        &mut self,
        view: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) {
        self.push(RecordedCommand::ClearDepthStencil {
            view,
            flags,
            depth,
            stencil,
        });
    }

    unsafe fn clear_texture_uav_float(
        &mut self,
        _gpu_handle: GpuDescriptorHandle,
        _cpu_handle: CpuDescriptorHandle,
        texture: &NullTexture,
        values: [f32; 4],
    ) {
        self.push(RecordedCommand::ClearTextureUavFloat {
            texture: texture.id,
            values,
        });
    }

    unsafe fn clear_texture_uav_uint(
        &mut self,
        _gpu_handle: GpuDescriptorHandle,
        _cpu_handle: CpuDescriptorHandle,
        texture: &NullTexture,
        values: [u32; 4],
    ) {
        self.push(RecordedCommand::ClearTextureUavUint {
            texture: texture.id,
            values,
        });
    }

    unsafe fn clear_buffer_uav_uint(
        &mut self,
        _gpu_handle: GpuDescriptorHandle,
        _cpu_handle: CpuDescriptorHandle,
        buffer: &NullBuffer,
        values: [u32; 4],
    ) {
        self.push(RecordedCommand::ClearBufferUavUint {
            buffer: buffer.id,
            values,
        });
    }

    unsafe fn write_timestamp(&mut self, heap: &NullQueryHeap, index: u32) {
        let tick = TIMESTAMP_CLOCK.fetch_add(1_000, Ordering::Relaxed);
        heap.timestamps.lock().unwrap()[index as usize] = tick;
        self.push(RecordedCommand::WriteTimestamp(index));
    }

    unsafe fn resolve_timestamps(
        &mut self,
        heap: &NullQueryHeap,
        start_index: u32,
        count: u32,
        dst: &NullBuffer,
        dst_offset: u64,
    ) {
        let timestamps = heap.timestamps.lock().unwrap();
        for i in 0..count {
            let value = timestamps[(start_index + i) as usize];
            let bytes = value.to_le_bytes();
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                dst.data_ptr().add((dst_offset + i as u64 * 8) as usize),
                8,
            );
        }
        self.push(RecordedCommand::ResolveTimestamps {
            start_index,
            count,
            dst_offset,
        });
    }

    unsafe fn begin_marker(&mut self, label: &str) {
        self.push(RecordedCommand::BeginMarker(label.to_string()));
    }

    unsafe fn end_marker(&mut self) {
        self.push(RecordedCommand::EndMarker);
    }
}
