use smallvec::SmallVec;

use super::*;

/// The kind of view a binding slot expects or a binding item authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceViewType {
    #[default]
    None,

    TextureSrv,
    TextureUav,
    TypedBufferSrv,
    TypedBufferUav,
    StructuredBufferSrv,
    StructuredBufferUav,
    RawBufferSrv,
    RawBufferUav,
    ConstantBuffer,
    VolatileConstantBuffer,

    Sampler,
    PushConstants,
    AccelStruct,
}

impl ResourceViewType {
    pub fn is_srv(&self) -> bool {
        matches!(
            self,
            ResourceViewType::TextureSrv
                | ResourceViewType::TypedBufferSrv
                | ResourceViewType::StructuredBufferSrv
                | ResourceViewType::RawBufferSrv
                | ResourceViewType::AccelStruct
        )
    }

    pub fn is_uav(&self) -> bool {
        matches!(
            self,
            ResourceViewType::TextureUav
                | ResourceViewType::TypedBufferUav
                | ResourceViewType::StructuredBufferUav
                | ResourceViewType::RawBufferUav
        )
    }

    /// Buffer SRV/UAV flavors collapse to one range kind each; everything
    /// else stands alone.
    pub fn normalized(&self) -> ResourceViewType {
        match self {
            ResourceViewType::TypedBufferSrv
            | ResourceViewType::StructuredBufferSrv
            | ResourceViewType::RawBufferSrv => ResourceViewType::TypedBufferSrv,
            ResourceViewType::TypedBufferUav
            | ResourceViewType::StructuredBufferUav
            | ResourceViewType::RawBufferUav => ResourceViewType::TypedBufferUav,
            other => *other,
        }
    }
}

/// One slot of a binding layout. `slot` is the shader register; for bindless
/// layouts it is reinterpreted as the register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutItem {
    pub slot: u32,
    pub view_type: ResourceViewType,
    /// Byte size; only meaningful for push constants.
    pub size: u16,
}

impl BindingLayoutItem {
    pub fn texture_srv(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::TextureSrv,
            size: 0,
        }
    }

    pub fn texture_uav(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::TextureUav,
            size: 0,
        }
    }

    pub fn typed_buffer_srv(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::TypedBufferSrv,
            size: 0,
        }
    }

    pub fn typed_buffer_uav(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::TypedBufferUav,
            size: 0,
        }
    }

    pub fn structured_buffer_srv(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::StructuredBufferSrv,
            size: 0,
        }
    }

    pub fn structured_buffer_uav(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::StructuredBufferUav,
            size: 0,
        }
    }

    pub fn raw_buffer_srv(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::RawBufferSrv,
            size: 0,
        }
    }

    pub fn raw_buffer_uav(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::RawBufferUav,
            size: 0,
        }
    }

    pub fn constant_buffer(slot: u32, is_volatile: bool) -> Self {
        Self {
            slot,
            view_type: if is_volatile {
                ResourceViewType::VolatileConstantBuffer
            } else {
                ResourceViewType::ConstantBuffer
            },
            size: 0,
        }
    }

    pub fn sampler(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::Sampler,
            size: 0,
        }
    }

    pub fn push_constants(slot: u32, byte_size: u16) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::PushConstants,
            size: byte_size,
        }
    }

    pub fn accel_struct(slot: u32) -> Self {
        Self {
            slot,
            view_type: ResourceViewType::AccelStruct,
            size: 0,
        }
    }
}

pub type BindingLayoutItemArray = SmallVec<[BindingLayoutItem; 16]>;

/// Shape of one bound binding space. Items of the same kind must be
/// slot-contiguous so they can merge into descriptor ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingLayoutDesc {
    pub visibility: ShaderStageFlags,
    pub register_space: u32,
    pub items: BindingLayoutItemArray,
}

impl Default for BindingLayoutDesc {
    fn default() -> Self {
        Self {
            visibility: ShaderStageFlags::ALL,
            register_space: 0,
            items: BindingLayoutItemArray::new(),
        }
    }
}

/// Shape of a bindless space: one unbounded range per item. Push constants
/// and volatile constant buffers are illegal here.
#[derive(Debug, Clone, PartialEq)]
pub struct BindlessLayoutDesc {
    pub visibility: ShaderStageFlags,
    pub first_slot: u32,
    pub items: BindingLayoutItemArray,
}

impl Default for BindlessLayoutDesc {
    fn default() -> Self {
        Self {
            visibility: ShaderStageFlags::ALL,
            first_slot: 0,
            items: BindingLayoutItemArray::new(),
        }
    }
}
