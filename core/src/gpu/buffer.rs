use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CpuAccessMode {
    #[default]
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub name: String,

    pub byte_size: u64,
    /// Non-zero marks the buffer as structured.
    pub struct_stride: u32,
    /// Typed-buffer element format.
    pub format: Format,

    /// Upload-ring backed; contents are valid only for the recording that
    /// wrote them.
    pub is_volatile: bool,

    pub can_have_uavs: bool,
    pub is_vertex_buffer: bool,
    pub is_index_buffer: bool,
    pub is_constant_buffer: bool,
    pub is_indirect_argument: bool,
    pub is_shader_binding_table: bool,
    pub is_accel_struct_storage: bool,

    pub is_virtual: bool,

    pub initial_state: ResourceStates,
    pub cpu_access: CpuAccessMode,

    /// Upper bound of concurrently live volatile versions.
    pub max_versions: u32,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            byte_size: 0,
            struct_stride: 0,
            format: Format::Unknown,
            is_volatile: false,
            can_have_uavs: false,
            is_vertex_buffer: false,
            is_index_buffer: false,
            is_constant_buffer: false,
            is_indirect_argument: false,
            is_shader_binding_table: false,
            is_accel_struct_storage: false,
            is_virtual: false,
            initial_state: ResourceStates::COMMON,
            cpu_access: CpuAccessMode::None,
            max_versions: 0,
        }
    }
}

impl BufferDesc {
    pub fn constant(byte_size: u64, is_volatile: bool, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size: crate::align_up_64(byte_size, CONSTANT_BUFFER_OFFSET_ALIGNMENT),
            is_volatile,
            is_constant_buffer: true,
            cpu_access: if is_volatile {
                CpuAccessMode::Write
            } else {
                CpuAccessMode::None
            },
            initial_state: ResourceStates::CONSTANT_BUFFER,
            ..Default::default()
        }
    }

    pub fn vertex(byte_size: u64, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            is_vertex_buffer: true,
            initial_state: ResourceStates::VERTEX_BUFFER,
            ..Default::default()
        }
    }

    pub fn index(byte_size: u64, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            is_index_buffer: true,
            initial_state: ResourceStates::INDEX_BUFFER,
            ..Default::default()
        }
    }

    pub fn structured(byte_size: u64, stride: u32, used_in_compute: bool, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            struct_stride: stride,
            initial_state: if used_in_compute {
                ResourceStates::NON_PIXEL_SHADER_RESOURCE
            } else {
                ResourceStates::PIXEL_SHADER_RESOURCE
            },
            ..Default::default()
        }
    }

    pub fn rw_structured(byte_size: u64, stride: u32, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            struct_stride: stride,
            can_have_uavs: true,
            initial_state: ResourceStates::UNORDERED_ACCESS,
            ..Default::default()
        }
    }

    pub fn read_back(byte_size: u64, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            cpu_access: CpuAccessMode::Read,
            initial_state: ResourceStates::COPY_DEST,
            ..Default::default()
        }
    }

    pub fn accel_struct(byte_size: u64, is_top_level: bool, name: &str) -> Self {
        Self {
            name: name.to_string(),
            byte_size,
            can_have_uavs: true,
            is_accel_struct_storage: true,
            initial_state: if is_top_level {
                ResourceStates::ACCEL_STRUCT_READ
            } else {
                ResourceStates::ACCEL_STRUCT_BUILD_BLAS
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    pub byte_offset: u64,
    pub byte_size: u64,
}

pub const ENTIRE_BUFFER_RANGE: BufferRange = BufferRange {
    byte_offset: 0,
    byte_size: u64::MAX,
};

impl BufferRange {
    pub fn new(byte_offset: u64, byte_size: u64) -> Self {
        Self {
            byte_offset,
            byte_size,
        }
    }

    pub fn resolve(&self, desc: &BufferDesc) -> BufferRange {
        let byte_offset = self.byte_offset.min(desc.byte_size);
        let byte_size = if self.byte_size == 0 {
            desc.byte_size - byte_offset
        } else {
            self.byte_size.min(desc.byte_size - byte_offset)
        };
        BufferRange {
            byte_offset,
            byte_size,
        }
    }

    pub fn is_entire_buffer(&self, desc: &BufferDesc) -> bool {
        self.byte_offset == 0
            && (self.byte_size == u64::MAX || self.byte_size == desc.byte_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_buffers_round_up_to_offset_alignment() {
        let desc = BufferDesc::constant(100, true, "cb");
        assert_eq!(desc.byte_size, 256);
        assert_eq!(desc.cpu_access, CpuAccessMode::Write);
        let desc = BufferDesc::constant(256, false, "cb");
        assert_eq!(desc.byte_size, 256);
        assert_eq!(desc.cpu_access, CpuAccessMode::None);
    }

    #[test]
    fn range_resolve_clamps_to_buffer() {
        let desc = BufferDesc::vertex(1000, "vb");
        let range = BufferRange::new(200, u64::MAX).resolve(&desc);
        assert_eq!(range.byte_offset, 200);
        assert_eq!(range.byte_size, 800);

        // A zero byte_size selects everything past the offset.
        let whole = BufferRange::default().resolve(&desc);
        assert_eq!(whole.byte_offset, 0);
        assert_eq!(whole.byte_size, 1000);

        let tail = BufferRange::new(400, 0).resolve(&desc);
        assert_eq!(tail.byte_offset, 400);
        assert_eq!(tail.byte_size, 600);

        assert!(ENTIRE_BUFFER_RANGE.is_entire_buffer(&desc));
    }
}
