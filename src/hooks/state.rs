//! State setters returned by `use_state`.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::stream::{SetOutcome, Stream};

/// Writes one state slot and asks for a render.
///
/// Setters are `Send + Sync` and may be called from any thread. A write
/// that leaves the value unchanged does nothing; any other write updates the
/// slot's stream and bumps the render trigger by exactly one. A debounced
/// slot bumps once per landed value instead of once per write.
pub struct SetState<T> {
    stream: Stream<T>,
    trigger: Stream<u64>,
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            trigger: self.trigger.clone(),
        }
    }
}

impl<T> fmt::Debug for SetState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetState")
            .field("stream", &self.stream)
            .finish()
    }
}

impl<T: Clone + PartialEq + Send + 'static> SetState<T> {
    pub(crate) fn new(stream: Stream<T>, trigger: Stream<u64>) -> Self {
        let landed = trigger.clone();
        stream.on_debounced(Arc::new(move || bump(&landed)));
        Self { stream, trigger }
    }

    /// Replace the value. Returns true if it changed.
    pub fn set(&self, value: T) -> bool {
        let outcome = self
            .stream
            .modify(|current| (current != Some(&value)).then_some(value));
        self.after_write(outcome)
    }

    /// Compute the next value from the current one. The read and the write
    /// are atomic, so concurrent updates from several threads all land.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let outcome = self.stream.modify(|current| {
            let current = current?;
            let next = f(current);
            (next != *current).then_some(next)
        });
        self.after_write(outcome)
    }

    /// Current value of the slot.
    pub fn get(&self) -> Option<T> {
        self.stream.get()
    }

    /// The stream backing this slot.
    pub fn stream(&self) -> &Stream<T> {
        &self.stream
    }

    fn after_write(&self, outcome: SetOutcome) -> bool {
        match outcome {
            SetOutcome::Delivered | SetOutcome::Coalesced => {
                bump(&self.trigger);
                true
            }
            // The render is requested once the value lands.
            SetOutcome::Debounced => true,
            SetOutcome::Unchanged | SetOutcome::Throttled | SetOutcome::Disposed => {
                trace!(stream = self.stream.name(), ?outcome, "state write skipped");
                false
            }
        }
    }
}

/// Increment a render trigger by one.
pub(crate) fn bump(trigger: &Stream<u64>) {
    trigger.modify(|n| Some(n.copied().unwrap_or(0) + 1));
}
