use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use kiln_core::gpu::Fence as _;
use kiln_core::gpu::*;

use crate::CommandListInstance;

/// Per-queue fence and submission bookkeeping. `last_completed` is refreshed
/// lazily by polling the fence; reclamation everywhere keys off it.
pub struct CommandQueue<B: GpuBackend> {
    pub(crate) queue_type: QueueType,
    pub(crate) fence: B::Fence,
    pub(crate) last_submitted: AtomicU64,
    pub(crate) last_completed: AtomicU64,
    pub(crate) recording_counter: AtomicU64,
    pub(crate) in_flight: Mutex<VecDeque<CommandListInstance<B>>>,
}

impl<B: GpuBackend> CommandQueue<B> {
    pub(crate) fn new(queue_type: QueueType, fence: B::Fence) -> Self {
        Self {
            queue_type,
            fence,
            last_submitted: AtomicU64::new(0),
            last_completed: AtomicU64::new(0),
            recording_counter: AtomicU64::new(1),
            in_flight: Mutex::new(VecDeque::new()),
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn last_submitted_value(&self) -> u64 {
        self.last_submitted.load(Ordering::Acquire)
    }

    pub fn last_completed_value(&self) -> u64 {
        self.last_completed.load(Ordering::Acquire)
    }

    /// Polls the fence and advances the cached completed value.
    pub fn update_last_completed_value(&self) -> u64 {
        let observed = unsafe { self.fence.value() };
        self.last_completed.fetch_max(observed, Ordering::AcqRel);
        self.last_completed.load(Ordering::Acquire)
    }

    pub(crate) fn next_recording_id(&self) -> u64 {
        self.recording_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Drops every retired instance, releasing the strong references its
    /// recording held.
    pub(crate) fn retire_completed_instances(&self) {
        let completed = self.update_last_completed_value();
        let mut in_flight = self.in_flight.lock().unwrap();
        while let Some(instance) = in_flight.back() {
            if instance.submitted_value <= completed {
                in_flight.pop_back();
            } else {
                break;
            }
        }
    }

    pub fn instances_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}
