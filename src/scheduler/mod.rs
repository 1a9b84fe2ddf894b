//! Render scheduling.
//!
//! The [`Runtime`] owns the hook store, the patcher and the renderer, and
//! lives on the UI thread. Other threads talk to it through a
//! [`RenderHandle`] or by writing state, which bumps the render trigger.

mod boundary;
mod expand;
mod frame;
mod runtime;

pub use boundary::{ErrorBoundary, ErrorRecord, ErrorSource, HandlerId};
pub use runtime::{PassReport, RenderHandle, Runtime, RuntimeStats, TickOutcome};
