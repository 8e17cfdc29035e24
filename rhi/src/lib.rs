pub use binding::*;
pub use command::*;
pub use descriptor::*;
pub use device::*;
pub use framebuffer::*;
pub use pipeline::*;
pub use query::*;
pub use queue::*;
pub use resource::*;
pub use rt::*;
pub use state_track::*;
pub use upload::*;

mod binding;
mod command;
mod descriptor;
mod device;
mod framebuffer;
mod pipeline;
mod query;
mod queue;
mod resource;
mod rt;
mod state_track;
mod upload;

pub use kiln_core::gpu;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Identity of one tracked resource. Ids are process-unique and never reused,
/// so tracker maps and volatile-CB maps can key on them without holding a
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl ResourceId {
    pub(crate) fn next() -> Self {
        ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}
