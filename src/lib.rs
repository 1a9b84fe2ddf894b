//! # spark-reconciler
//!
//! Retained-tree reconciliation for declarative UIs.
//!
//! Application code declares a tree of [`Node`]s built from primitive
//! elements and components. Components keep per-position state through
//! hooks; every state write schedules a render. A render expands the tree,
//! diffs it against the last committed one and hands the minimal patch set
//! to a [`Renderer`](renderer::Renderer) that owns the real widgets.
//!
//! ## Architecture
//!
//! ```text
//!  SetState / Stream ──► render trigger ──► Runtime::tick
//!                                              │
//!   declared tree ──► expand (hooks) ──► resolve styles ──► diff ──► patches
//!                                                                      │
//!                               effects ◄── commit ◄── Patcher ──► Renderer
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Values, keys, props and tree paths
//! - [`tree`] - Nodes, patches and the differ
//! - [`stream`] - Thread-safe reactive streams with debounce, throttle and time-travel history
//! - [`hooks`] - Hook store and the render context components see
//! - [`scheduler`] - The render runtime, frame coalescing, error boundary
//! - [`renderer`] - Renderer trait, patcher, memory and terminal renderers
//! - [`style`] - Class-string resolution against design tokens
//! - [`config`] - Runtime configuration

pub mod config;
pub mod error;
pub mod hooks;
pub mod renderer;
pub mod scheduler;
pub mod stream;
pub mod style;
pub mod tree;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{Error, RenderError, Result};
pub use hooks::{Context, Ref, RenderContext, SetState, create_context};
pub use renderer::{MemoryRenderer, Renderer, TerminalRenderer};
pub use scheduler::{ErrorBoundary, RenderHandle, Runtime, TickOutcome};
pub use stream::{StateSnapshot, Stream, StreamFault, Subscription, TimeTravel};
pub use style::{StyleResolver, StyleToken, UtilityStyleResolver};
pub use tree::{Component, ComponentRef, Node, Patch, PatchOp, diff};
pub use types::{Handler, Key, Path, PathSegment, Props, Value};
