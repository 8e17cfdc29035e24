use std::sync::Arc;

use smallvec::SmallVec;

use kiln_core::gpu::Device as _;
use kiln_core::gpu::*;

use crate::BindingLayout;
use crate::BindingLayoutArray;
use crate::DeviceContext;
use crate::FrameBuffer;
use crate::FrameBufferInfo;
use crate::RootSignature;

/// Expanded vertex-input description. Attributes with `array_size > 1`
/// unroll into consecutive semantic indices on the same semantic name; all
/// attributes sharing a buffer slot must agree on the element stride.
pub struct InputLayout {
    attributes: Vec<VertexAttributeDesc>,
    pub(crate) elements: Vec<InputElement>,
    pub(crate) slot_strides: [u32; MAX_VERTEX_ATTRIBUTES],
}

impl InputLayout {
    pub(crate) fn new(attributes: &[VertexAttributeDesc]) -> RhiResult<Arc<InputLayout>> {
        let mut elements = Vec::new();
        let mut slot_strides = [0u32; MAX_VERTEX_ATTRIBUTES];

        for attribute in attributes {
            if attribute.buffer_slot as usize >= MAX_VERTEX_ATTRIBUTES {
                log::error!(
                    "vertex attribute '{}' uses buffer slot {} beyond the limit",
                    attribute.name,
                    attribute.buffer_slot
                );
                return Err(RhiError::InvalidArgument);
            }
            let slot = attribute.buffer_slot as usize;
            if slot_strides[slot] == 0 {
                slot_strides[slot] = attribute.element_stride;
            } else if slot_strides[slot] != attribute.element_stride {
                log::error!(
                    "vertex attribute '{}' disagrees on the stride of buffer slot {}",
                    attribute.name,
                    attribute.buffer_slot
                );
                return Err(RhiError::InvalidArgument);
            }

            let element_size = attribute.format.byte_size() as u32;
            for index in 0..attribute.array_size.max(1) {
                elements.push(InputElement {
                    semantic_name: attribute.name.clone(),
                    semantic_index: index,
                    format: attribute.format,
                    buffer_slot: attribute.buffer_slot,
                    aligned_byte_offset: attribute.offset + index * element_size,
                    is_instanced: attribute.is_instanced,
                });
            }
        }

        Ok(Arc::new(InputLayout {
            attributes: attributes.to_vec(),
            elements,
            slot_strides,
        }))
    }

    pub fn attributes(&self) -> &[VertexAttributeDesc] {
        &self.attributes
    }

    pub(crate) fn slot_stride(&self, slot: u32) -> u32 {
        self.slot_strides[slot as usize]
    }
}

pub struct GraphicsPipelineDesc {
    pub vs: Option<ShaderByteCode>,
    pub hs: Option<ShaderByteCode>,
    pub ds: Option<ShaderByteCode>,
    pub gs: Option<ShaderByteCode>,
    pub ps: Option<ShaderByteCode>,
    pub input_layout: Option<Arc<InputLayout>>,
    pub render_state: RenderState,
    pub primitive_type: PrimitiveType,
    pub patch_control_points: u8,
    pub binding_layouts: BindingLayoutArray,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            vs: None,
            hs: None,
            ds: None,
            gs: None,
            ps: None,
            input_layout: None,
            render_state: RenderState::default(),
            primitive_type: PrimitiveType::TriangleList,
            patch_control_points: 0,
            binding_layouts: SmallVec::new(),
        }
    }
}

pub struct GraphicsPipeline<B: GpuBackend> {
    desc: GraphicsPipelineDesc,
    framebuffer_info: FrameBufferInfo,
    pub(crate) root_signature: Arc<RootSignature<B>>,
    pub(crate) native: B::GraphicsPipeline,
    pub(crate) topology: PrimitiveTopology,
    pub(crate) requires_blend_factor: bool,
}

impl<B: GpuBackend> GraphicsPipeline<B> {
    pub(crate) fn new(
        ctx: &Arc<DeviceContext<B>>,
        desc: GraphicsPipelineDesc,
        framebuffer: &FrameBuffer<B>,
    ) -> RhiResult<Arc<GraphicsPipeline<B>>> {
        let framebuffer_info = framebuffer.info().clone();

        let root_signature = RootSignature::build(
            ctx,
            &desc.binding_layouts,
            desc.input_layout.is_some(),
        )?;

        let mut render_state = desc.render_state.clone();
        let wants_depth = render_state.depth_stencil.depth_test_enable
            || render_state.depth_stencil.stencil_enable;
        if wants_depth && framebuffer_info.depth_format.is_none() {
            log::warn!(
                "depth/stencil is enabled but the frame buffer has no depth attachment; disabling"
            );
            render_state.depth_stencil.depth_test_enable = false;
            render_state.depth_stencil.depth_write_enable = false;
            render_state.depth_stencil.stencil_enable = false;
        }

        let topology = lower_primitive_topology(desc.primitive_type, desc.patch_control_points);
        let requires_blend_factor = render_state
            .blend
            .uses_constant_color(framebuffer_info.rtv_formats.len());

        let empty_elements: Vec<InputElement> = Vec::new();
        let native = unsafe {
            ctx.device.create_graphics_pipeline(&NativeGraphicsPipelineDesc {
                root_layout: &root_signature.native,
                vs: desc.vs.as_ref(),
                hs: desc.hs.as_ref(),
                ds: desc.ds.as_ref(),
                gs: desc.gs.as_ref(),
                ps: desc.ps.as_ref(),
                input_elements: desc
                    .input_layout
                    .as_ref()
                    .map(|layout| layout.elements.as_slice())
                    .unwrap_or(&empty_elements),
                render_state: &render_state,
                topology,
                rtv_formats: &framebuffer_info.rtv_formats,
                dsv_format: framebuffer_info.depth_format,
                sample_count: framebuffer_info.sample_count,
                sample_quality: framebuffer_info.sample_quality,
                name: "",
            })?
        };

        Ok(Arc::new(GraphicsPipeline {
            desc,
            framebuffer_info,
            root_signature,
            native,
            topology,
            requires_blend_factor,
        }))
    }

    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    pub fn framebuffer_info(&self) -> &FrameBufferInfo {
        &self.framebuffer_info
    }
}

pub struct ComputePipelineDesc {
    pub cs: ShaderByteCode,
    pub binding_layouts: BindingLayoutArray,
}

pub struct ComputePipeline<B: GpuBackend> {
    desc: ComputePipelineDesc,
    pub(crate) root_signature: Arc<RootSignature<B>>,
    pub(crate) native: B::ComputePipeline,
}

impl<B: GpuBackend> ComputePipeline<B> {
    pub(crate) fn new(
        ctx: &Arc<DeviceContext<B>>,
        desc: ComputePipelineDesc,
    ) -> RhiResult<Arc<ComputePipeline<B>>> {
        let root_signature = RootSignature::build(ctx, &desc.binding_layouts, false)?;
        let native = unsafe {
            ctx.device.create_compute_pipeline(&NativeComputePipelineDesc {
                root_layout: &root_signature.native,
                cs: &desc.cs,
                name: "",
            })?
        };
        Ok(Arc::new(ComputePipeline {
            desc,
            root_signature,
            native,
        }))
    }

    pub fn desc(&self) -> &ComputePipelineDesc {
        &self.desc
    }
}

/// Ray-tracing pipelines are part of the data model, but lowering their
/// shader records is a backend extension point. Backends without support
/// refuse creation.
pub struct RayTracingPipeline<B: GpuBackend> {
    desc: RayTracingPipelineDesc,
    #[allow(dead_code)]
    root_signature: Arc<RootSignature<B>>,
}

impl<B: GpuBackend> RayTracingPipeline<B> {
    pub(crate) fn new(
        ctx: &Arc<DeviceContext<B>>,
        desc: RayTracingPipelineDesc,
        global_layouts: &[Arc<BindingLayout>],
    ) -> RhiResult<Arc<RayTracingPipeline<B>>> {
        if !ctx.device.supports_ray_tracing() {
            log::error!("this backend does not support ray-tracing pipelines");
            return Err(RhiError::StatePolicyViolation);
        }
        let root_signature = RootSignature::build(ctx, global_layouts, false)?;
        Ok(Arc::new(RayTracingPipeline {
            desc,
            root_signature,
        }))
    }

    pub fn desc(&self) -> &RayTracingPipelineDesc {
        &self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_attributes_expand_semantic_indices() {
        let layout = InputLayout::new(&[
            VertexAttributeDesc {
                name: "POSITION".to_string(),
                format: Format::RGB32Float,
                offset: 0,
                array_size: 1,
                buffer_slot: 0,
                element_stride: 28,
                ..Default::default()
            },
            VertexAttributeDesc {
                name: "TEXCOORD".to_string(),
                format: Format::RG32Float,
                offset: 12,
                array_size: 2,
                buffer_slot: 0,
                element_stride: 28,
                ..Default::default()
            },
        ])
        .unwrap();

        assert_eq!(layout.elements.len(), 3);
        assert_eq!(layout.elements[1].semantic_name, "TEXCOORD");
        assert_eq!(layout.elements[1].semantic_index, 0);
        assert_eq!(layout.elements[2].semantic_index, 1);
        assert_eq!(layout.elements[2].aligned_byte_offset, 12 + 8);
        assert_eq!(layout.slot_stride(0), 28);
    }

    #[test]
    fn stride_mismatch_on_shared_slot_fails() {
        let result = InputLayout::new(&[
            VertexAttributeDesc {
                name: "POSITION".to_string(),
                format: Format::RGB32Float,
                element_stride: 24,
                ..Default::default()
            },
            VertexAttributeDesc {
                name: "NORMAL".to_string(),
                format: Format::RGB32Float,
                offset: 12,
                element_stride: 32,
                ..Default::default()
            },
        ]);
        assert_eq!(result.err(), Some(RhiError::InvalidArgument));
    }

    #[test]
    fn patch_topology_carries_control_points() {
        assert_eq!(
            lower_primitive_topology(PrimitiveType::PatchList, 3),
            PrimitiveTopology::PatchList { control_points: 3 }
        );
        assert_eq!(
            lower_primitive_topology(PrimitiveType::TriangleList, 3),
            PrimitiveTopology::TriangleList
        );
    }
}
