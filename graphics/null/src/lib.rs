//! A headless backend. Nothing reaches a GPU: command lists record a
//! replayable stream, descriptor heaps retain the views authored into them,
//! fences are software timelines that complete at signal time. It exists so
//! the device layer has a conformance target that runs anywhere.

pub use self::command::*;
pub use self::descriptor::*;
pub use self::device::*;
pub use self::resource::*;
pub use self::sync::*;

mod command;
mod descriptor;
mod device;
mod resource;
mod sync;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use kiln_core::gpu::*;

pub struct NullBackend;

impl GpuBackend for NullBackend {
    type Device = NullDevice;
    type Queue = NullQueue;
    type Fence = NullFence;
    type CommandAllocator = NullCommandAllocator;
    type CommandList = NullCommandList;
    type Texture = NullTexture;
    type Buffer = NullBuffer;
    type Sampler = NullSampler;
    type Heap = NullHeap;
    type DescriptorHeap = NullDescriptorHeap;
    type RootLayout = NullRootLayout;
    type GraphicsPipeline = NullGraphicsPipeline;
    type ComputePipeline = NullComputePipeline;
    type QueryHeap = NullQueryHeap;

    fn name() -> &'static str {
        "Null"
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}
