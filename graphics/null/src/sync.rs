use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use kiln_core::gpu::*;

use crate::next_object_id;
use crate::NullBackend;
use crate::NullCommandList;

/// A software timeline. Signals land immediately at submit time, so awaited
/// values are already visible; awaiting ahead of any signal force-completes
/// to keep the headless backend deadlock-free.
pub struct NullFence {
    pub(crate) id: u64,
    value: AtomicU64,
}

impl NullFence {
    pub(crate) fn new() -> Self {
        Self {
            id: next_object_id(),
            value: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn signal(&self, value: u64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }
}

impl Fence for NullFence {
    unsafe fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    unsafe fn await_value(&self, value: u64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }
}

/// Submission-order log entries, kept per queue so tests can assert on
/// cross-queue waits and signal ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Execute { list_count: usize },
    Signal { fence: u64, value: u64 },
    Wait { fence: u64, value: u64 },
}

pub struct NullQueue {
    queue_type: QueueType,
    events: Mutex<Vec<QueueEvent>>,
}

impl NullQueue {
    pub(crate) fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Test helper: snapshots the submission-order event log.
    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Queue<NullBackend> for NullQueue {
    unsafe fn execute(&self, command_lists: &[&NullCommandList]) {
        self.events.lock().unwrap().push(QueueEvent::Execute {
            list_count: command_lists.len(),
        });
    }

    unsafe fn signal(&self, fence: &NullFence, value: u64) {
        fence.signal(value);
        self.events.lock().unwrap().push(QueueEvent::Signal {
            fence: fence.id,
            value,
        });
    }

    unsafe fn wait(&self, fence: &NullFence, value: u64) {
        self.events.lock().unwrap().push(QueueEvent::Wait {
            fence: fence.id,
            value,
        });
    }

    unsafe fn timestamp_frequency(&self) -> u64 {
        1_000_000
    }
}
