//! Frame signal shared between the UI thread and everyone else.
//!
//! Render requests bump a `requested` generation. Every pass raises
//! `consumed` to the generation it picked up; only a pass that committed
//! also raises `committed`. A thread that asked for a render can block
//! until its generation is consumed and learn whether it committed.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Generations {
    requested: u64,
    consumed: u64,
    committed: u64,
    stopped: bool,
}

/// How a wait for a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Committed,
    /// The pass that picked up the generation failed.
    Failed,
    /// Timed out, or the loop stopped first.
    Pending,
}

#[derive(Debug, Default)]
pub(crate) struct FrameSignal {
    state: Mutex<Generations>,
    changed: Condvar,
}

impl FrameSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Ask for a render. Returns the generation a commit must reach.
    pub(crate) fn request(&self) -> u64 {
        let mut state = self.state.lock();
        state.requested += 1;
        let generation = state.requested;
        drop(state);
        self.changed.notify_all();
        generation
    }

    pub(crate) fn requested(&self) -> u64 {
        self.state.lock().requested
    }

    pub(crate) fn committed(&self) -> u64 {
        self.state.lock().committed
    }

    pub(crate) fn consumed(&self) -> u64 {
        self.state.lock().consumed
    }

    /// Requests no pass has picked up yet.
    pub(crate) fn pending(&self) -> u64 {
        let state = self.state.lock();
        state.requested.saturating_sub(state.consumed)
    }

    /// Mark every request up to `generation` as rendered.
    pub(crate) fn commit(&self, generation: u64) {
        let mut state = self.state.lock();
        state.committed = state.committed.max(generation);
        state.consumed = state.consumed.max(generation);
        drop(state);
        self.changed.notify_all();
    }

    /// Mark every request up to `generation` as picked up by a pass that
    /// did not commit.
    pub(crate) fn fail(&self, generation: u64) {
        let mut state = self.state.lock();
        state.consumed = state.consumed.max(generation);
        drop(state);
        self.changed.notify_all();
    }

    /// Block until a pass picks up `generation`, the loop stops, or
    /// `timeout` passes.
    pub(crate) fn wait_for_commit(&self, generation: u64, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.consumed < generation && !state.stopped {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if state.committed >= generation {
            WaitOutcome::Committed
        } else if state.consumed >= generation {
            WaitOutcome::Failed
        } else {
            WaitOutcome::Pending
        }
    }

    /// Block until a render is pending, the loop stops, or `timeout`
    /// passes.
    pub(crate) fn wait_for_request(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.requested <= state.consumed && !state.stopped {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    pub(crate) fn stop(&self) {
        self.state.lock().stopped = true;
        self.changed.notify_all();
    }

    /// Clear a previous stop so the loop can run again.
    pub(crate) fn resume(&self) {
        self.state.lock().stopped = false;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}
