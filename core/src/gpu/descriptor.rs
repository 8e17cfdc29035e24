use super::*;

/// Raw descriptor / address handles. They are opaque integers the backend
/// hands out; the core only stores and forwards them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuDescriptorHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpuDescriptorHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpuVirtualAddress(pub u64);

impl GpuVirtualAddress {
    pub const NULL: GpuVirtualAddress = GpuVirtualAddress(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn offset(&self, bytes: u64) -> GpuVirtualAddress {
        GpuVirtualAddress(self.0 + bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    RenderTargetView,
    DepthStencilView,
    ShaderResourceView,
    Sampler,
}

/// A native descriptor heap: translates slot indices into handles.
pub trait DescriptorHeap {
    unsafe fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle;
    /// Only valid on shader-visible heaps.
    unsafe fn gpu_handle(&self, index: u32) -> GpuDescriptorHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeKind {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

/// One contiguous register range inside a descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRange {
    pub kind: DescriptorRangeKind,
    pub base_slot: u32,
    pub register_space: u32,
    /// `u32::MAX` marks an unbounded (bindless) range.
    pub count: u32,
    pub offset_in_table: u32,
}

impl DescriptorRange {
    pub fn is_unbounded(&self) -> bool {
        self.count == u32::MAX
    }
}

/// Root-layout IR handed to the backend. Mirrors a D3D12 root signature;
/// a Vulkan backend lowers tables to descriptor-set layouts and root CBVs
/// to dynamic uniform buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum RootParameter {
    Constants {
        slot: u32,
        register_space: u32,
        num_32bit_values: u32,
    },
    /// Static-data root CBV backing a volatile constant buffer.
    ConstantBufferView {
        slot: u32,
        register_space: u32,
    },
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootParameterDesc {
    pub parameter: RootParameter,
    pub visibility: ShaderStageFlags,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootLayoutDesc {
    pub parameters: Vec<RootParameterDesc>,
    pub allow_input_layout: bool,
}
