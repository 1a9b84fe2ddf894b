//! Hooks: per-position state for components.
//!
//! Components receive a [`RenderContext`] and call hooks on it:
//!
//! ```ignore
//! let counter = ComponentRef::function("Counter", |ctx, _props| {
//!     let (count, set_count) = ctx.use_state(0)?;
//!     let clicked = Handler::new(move |_| { set_count.update(|n| n + 1); });
//!     Ok(Node::element("button").prop("label", count).prop("on_click", clicked))
//! });
//! ```

mod context;
mod effect;
mod provider;
mod refs;
mod state;
mod store;

pub use context::RenderContext;
pub use effect::{Cleanup, EffectResult};
pub use provider::{Context, create_context};
pub use refs::Ref;
pub use state::SetState;
pub use store::{DisposeReport, HookStore, RenderPath, SlotId};
