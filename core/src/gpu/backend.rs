use super::*;

/// The family of native types one backend provides. The device layer is
/// written once against this seam; D3D12 and Vulkan are both lowerings of
/// the same contract.
pub trait GpuBackend: 'static + Sized {
    type Device: Device<Self> + Send + Sync;
    type Queue: Queue<Self> + Send + Sync;
    type Fence: Fence + Send + Sync;
    type CommandAllocator: Send + Sync;
    type CommandList: CommandList<Self> + Send + Sync;
    type Texture: Send + Sync;
    type Buffer: Buffer + Send + Sync;
    type Sampler: Send + Sync;
    type Heap: Send + Sync;
    type DescriptorHeap: DescriptorHeap + Send + Sync;
    type RootLayout: Send + Sync;
    type GraphicsPipeline: Send + Sync;
    type ComputePipeline: Send + Sync;
    type QueryHeap: Send + Sync;

    fn name() -> &'static str;
}

/// A native buffer. Mapping is whole-resource with an offset window, the way
/// upload and readback heaps behave.
pub trait Buffer {
    unsafe fn map(&self, offset: u64, length: u64) -> Option<*mut u8>;
    unsafe fn unmap(&self, offset: u64, length: u64);
    fn gpu_address(&self) -> GpuVirtualAddress;
}
