//! Reactive streams.
//!
//! Streams are the storage behind `use_state` and the bus that tells the
//! scheduler a render is needed. They are `Send + Sync`: any thread may
//! write, and subscribers run on the writing thread (or the timer thread for
//! debounced writes and interval ticks).

mod cell;
mod history;
mod operators;
mod timer;

pub use cell::{SetOutcome, Stream, StreamFault, StreamStats, Subscription, WeakStream};
pub use history::{ActionGuard, DEFAULT_HISTORY, HistoryStats, StateSnapshot, TimeTravel};
pub use timer::{CancelToken, schedule};
