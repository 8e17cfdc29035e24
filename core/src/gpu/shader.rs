use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderType {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
    RayGeneration,
    AnyHit,
    ClosestHit,
    Miss,
    Intersection,
    Callable,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX       = 1 << 0;
        const HULL         = 1 << 1;
        const DOMAIN       = 1 << 2;
        const GEOMETRY     = 1 << 3;
        const PIXEL        = 1 << 4;
        const COMPUTE      = 1 << 5;
        const RAY_TRACING  = 1 << 6;
        const ALL          = 0x7f;
    }
}

impl Default for ShaderStageFlags {
    fn default() -> Self {
        ShaderStageFlags::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderDesc {
    pub shader_type: ShaderType,
    pub entry: String,
    pub debug_name: String,
}

impl ShaderDesc {
    pub fn new(shader_type: ShaderType, entry: &str) -> Self {
        Self {
            shader_type,
            entry: entry.to_string(),
            debug_name: String::new(),
        }
    }
}

/// An opaque compiled shader blob. The core never inspects the bytes.
#[derive(Debug, Clone)]
pub struct ShaderByteCode {
    desc: ShaderDesc,
    bytes: Arc<[u8]>,
    offset: usize,
    length: usize,
}

impl ShaderByteCode {
    pub fn new(desc: ShaderDesc, bytes: &[u8]) -> Self {
        let length = bytes.len();
        Self {
            desc,
            bytes: Arc::from(bytes),
            offset: 0,
            length,
        }
    }

    pub fn desc(&self) -> &ShaderDesc {
        &self.desc
    }

    pub fn shader_type(&self) -> ShaderType {
        self.desc.shader_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.length]
    }
}

/// A shader library: one blob carrying several entry points. `shader` hands
/// out sub-views over the shared bytes.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    bytes: Arc<[u8]>,
}

impl ShaderLibrary {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn shader(&self, entry: &str, shader_type: ShaderType) -> ShaderByteCode {
        ShaderByteCode {
            desc: ShaderDesc::new(shader_type, entry),
            bytes: self.bytes.clone(),
            offset: 0,
            length: self.bytes.len(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
