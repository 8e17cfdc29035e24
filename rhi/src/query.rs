use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use kiln_core::gpu::*;

use crate::DeviceContext;
use crate::LastUse;

/// Pool state behind the device's timestamp query heap: a slot bitmap plus
/// the CPU-readable resolve buffer timestamps land in.
pub(crate) struct TimerQueryPool<B: GpuBackend> {
    pub(crate) query_heap: B::QueryHeap,
    pub(crate) resolve_buffer: B::Buffer,
    slots: Mutex<Vec<bool>>,
}

impl<B: GpuBackend> TimerQueryPool<B> {
    pub(crate) fn new(query_heap: B::QueryHeap, resolve_buffer: B::Buffer, max_queries: u32) -> Self {
        Self {
            query_heap,
            resolve_buffer,
            slots: Mutex::new(vec![false; max_queries as usize]),
        }
    }

    fn allocate_slot(&self) -> Option<u32> {
        let mut slots = self.slots.lock().unwrap();
        let index = slots.iter().position(|used| !used)?;
        slots[index] = true;
        Some(index as u32)
    }

    fn release_slot(&self, slot: u32) {
        let mut slots = self.slots.lock().unwrap();
        slots[slot as usize] = false;
    }
}

/// A timestamp pair in the pooled query heap. `begin`/`end` writes bracket
/// the measured span; the elapsed time is read back after the fence.
pub struct TimerQuery<B: GpuBackend> {
    ctx: Arc<DeviceContext<B>>,
    slot: u32,
    pub(crate) started: AtomicBool,
    pub(crate) resolved: AtomicBool,
    pub(crate) time: Mutex<f32>,
    pub(crate) fence_use: Mutex<Option<LastUse>>,
}

impl<B: GpuBackend> TimerQuery<B> {
    pub(crate) fn new(ctx: Arc<DeviceContext<B>>) -> RhiResult<Arc<Self>> {
        let slot = ctx.timer_queries.allocate_slot().ok_or_else(|| {
            log::error!("timer query pool exhausted");
            RhiError::OutOfResources
        })?;
        Ok(Arc::new(Self {
            ctx,
            slot,
            started: AtomicBool::new(false),
            resolved: AtomicBool::new(false),
            time: Mutex::new(0.0),
            fence_use: Mutex::new(None),
        }))
    }

    pub(crate) fn begin_index(&self) -> u32 {
        self.slot * 2
    }

    pub(crate) fn end_index(&self) -> u32 {
        self.slot * 2 + 1
    }

    pub fn reset(&self) {
        self.started.store(false, Ordering::Release);
        self.resolved.store(false, Ordering::Release);
        *self.fence_use.lock().unwrap() = None;
    }
}

impl<B: GpuBackend> Drop for TimerQuery<B> {
    fn drop(&mut self) {
        self.ctx.timer_queries.release_slot(self.slot);
    }
}

/// Snapshots a queue's submitted fence value; polling compares it against
/// the fence's progress.
pub struct EventQuery {
    pub(crate) state: Mutex<Option<LastUse>>,
}

impl EventQuery {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(None),
        })
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap() = None;
    }
}
