use smallvec::SmallVec;

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelStructKind {
    BottomLevel,
    TopLevel,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccelStructBuildFlags: u32 {
        const ALLOW_UPDATE      = 1 << 0;
        const ALLOW_COMPACTION  = 1 << 1;
        const PREFER_FAST_TRACE = 1 << 2;
        const PREFER_FAST_BUILD = 1 << 3;
        const MINIMIZE_MEMORY   = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccelStructInstanceFlags: u32 {
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        const TRIANGLE_FRONT_CCW    = 1 << 1;
        const FORCE_OPAQUE          = 1 << 2;
        const FORCE_NON_OPAQUE      = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccelStructTriangleGeometry {
    pub vertex_format: Format,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub vertex_offset: u64,
    pub index_format: Format,
    pub index_count: u32,
    pub index_offset: u64,
    pub is_opaque: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelStructInstanceDesc {
    pub transform: [f32; 12],
    pub instance_id: u32,
    pub instance_mask: u8,
    pub instance_contribution_to_hit_group_index: u32,
    pub flags: AccelStructInstanceFlags,
    pub blas_address: GpuVirtualAddress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccelStructDesc {
    pub name: String,
    pub kind: AccelStructKind,
    pub build_flags: AccelStructBuildFlags,
    /// Top-level: maximum instance count. Bottom-level: unused.
    pub max_instances: u32,
    pub geometries: Vec<AccelStructTriangleGeometry>,
}

impl Default for AccelStructDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: AccelStructKind::BottomLevel,
            build_flags: AccelStructBuildFlags::default(),
            max_instances: 0,
            geometries: Vec::new(),
        }
    }
}

/// One record of a ray-tracing pipeline: an entry point plus the layouts its
/// local root arguments use.
#[derive(Debug, Clone)]
pub struct RayTracingShaderDesc {
    pub shader: ShaderByteCode,
    pub export_name: String,
}

#[derive(Debug, Clone)]
pub struct RayTracingHitGroupDesc {
    pub export_name: String,
    pub closest_hit: Option<ShaderByteCode>,
    pub any_hit: Option<ShaderByteCode>,
    pub intersection: Option<ShaderByteCode>,
    pub is_procedural: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RayTracingPipelineDesc {
    pub shaders: Vec<RayTracingShaderDesc>,
    pub hit_groups: Vec<RayTracingHitGroupDesc>,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

pub type ShaderTableEntryArray = SmallVec<[String; 4]>;

/// CPU-side description of a shader binding table; the recorder materializes
/// it into upload memory at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct ShaderTableDesc {
    pub ray_generation: String,
    pub miss_shaders: ShaderTableEntryArray,
    pub hit_groups: ShaderTableEntryArray,
    pub callable_shaders: ShaderTableEntryArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchRaysArguments {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}
