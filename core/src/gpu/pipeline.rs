use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    PatchList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColor,
    InvDstColor,
    SrcAlphaSaturate,
    ConstantColor,
    InvConstantColor,
    Src1Color,
    InvSrc1Color,
    Src1Alpha,
    InvSrc1Alpha,
}

impl BlendFactor {
    pub fn uses_constant_color(&self) -> bool {
        matches!(self, BlendFactor::ConstantColor | BlendFactor::InvConstantColor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED   = 0b0001;
        const GREEN = 0b0010;
        const BLUE  = 0b0100;
        const ALPHA = 0b1000;
        const ALL   = 0b1111;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetBlendDesc {
    pub blend_enabled: bool,
    pub src_blend: BlendFactor,
    pub dst_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_blend_alpha: BlendFactor,
    pub dst_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOp,
    pub color_mask: ColorMask,
}

impl Default for RenderTargetBlendDesc {
    fn default() -> Self {
        Self {
            blend_enabled: false,
            src_blend: BlendFactor::One,
            dst_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dst_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            color_mask: ColorMask::ALL,
        }
    }
}

impl RenderTargetBlendDesc {
    pub fn uses_constant_color(&self) -> bool {
        self.blend_enabled
            && (self.src_blend.uses_constant_color()
                || self.dst_blend.uses_constant_color()
                || self.src_blend_alpha.uses_constant_color()
                || self.dst_blend_alpha.uses_constant_color())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlendStateDesc {
    pub alpha_to_coverage: bool,
    pub targets: [RenderTargetBlendDesc; MAX_RENDER_TARGETS],
}

impl BlendStateDesc {
    pub fn uses_constant_color(&self, target_count: usize) -> bool {
        self.targets[..target_count.min(MAX_RENDER_TARGETS)]
            .iter()
            .any(|t| t.uses_constant_color())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub multisample_enable: bool,
    pub anti_aliased_line_enable: bool,
    pub conservative_raster_enable: bool,
    pub forced_sample_count: u32,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            scissor_enable: false,
            multisample_enable: false,
            anti_aliased_line_enable: false,
            conservative_raster_enable: false,
            forced_sample_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StencilOpDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: ComparisonFunc,
}

impl Default for StencilOpDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            func: ComparisonFunc::Always,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilDesc {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_ref_value: u8,
    /// When set, the stencil reference comes from `GraphicsState` instead of
    /// the pipeline.
    pub dynamic_stencil_ref: bool,
    pub front_face: StencilOpDesc,
    pub back_face: StencilOpDesc,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            stencil_ref_value: 0,
            dynamic_stencil_ref: false,
            front_face: StencilOpDesc::default(),
            back_face: StencilOpDesc::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderState {
    pub blend: BlendStateDesc,
    pub rasterizer: RasterizerDesc,
    pub depth_stencil: DepthStencilDesc,
}

/// One vertex attribute as authored by the caller; `array_size > 1` expands
/// into consecutive semantic indices on the same semantic name.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttributeDesc {
    pub name: String,
    pub format: Format,
    pub offset: u32,
    pub array_size: u32,
    pub buffer_slot: u32,
    pub element_stride: u32,
    pub is_instanced: bool,
}

impl Default for VertexAttributeDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            format: Format::Unknown,
            offset: 0,
            array_size: 1,
            buffer_slot: 0,
            element_stride: 0,
            is_instanced: false,
        }
    }
}

/// A fully expanded input element handed to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct InputElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: Format,
    pub buffer_slot: u32,
    pub aligned_byte_offset: u32,
    pub is_instanced: bool,
}

/// Backend-facing topology, with patch-control points folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    PatchList { control_points: u8 },
}

pub fn lower_primitive_topology(
    primitive: PrimitiveType,
    patch_control_points: u8,
) -> PrimitiveTopology {
    match primitive {
        PrimitiveType::PointList => PrimitiveTopology::PointList,
        PrimitiveType::LineList => PrimitiveTopology::LineList,
        PrimitiveType::LineStrip => PrimitiveTopology::LineStrip,
        PrimitiveType::TriangleList => PrimitiveTopology::TriangleList,
        PrimitiveType::TriangleStrip => PrimitiveTopology::TriangleStrip,
        PrimitiveType::PatchList => PrimitiveTopology::PatchList {
            control_points: patch_control_points,
        },
    }
}
