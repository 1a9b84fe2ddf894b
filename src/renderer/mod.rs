//! Renderer collaborators.
//!
//! A [`Renderer`] materializes widgets. The crate never builds widgets
//! itself: the [`Patcher`] keeps a mirror of the committed tree, resolves
//! patch paths against it and turns each patch into renderer calls.
//!
//! Two reference renderers ship with the crate:
//!
//! - [`MemoryRenderer`] - widget arena with an operation log, for tests and
//!   headless use.
//! - [`TerminalRenderer`] - prints the widget tree as styled text lines.

mod memory;
mod patcher;
mod terminal;

pub use memory::{MemoryRenderer, RenderOp, WidgetId};
pub use patcher::{ApplyReport, NullRenderer, Patcher, apply_patches};
pub use terminal::{Attr, TerminalRenderer};

use crate::error::RenderError;
use crate::types::{Key, Props};

/// Where a new widget goes.
#[derive(Debug)]
pub struct Placement<'a, W> {
    /// Parent widget, `None` for the root.
    pub parent: Option<&'a W>,
    /// Position among the parent's children.
    pub index: usize,
    pub key: Option<&'a Key>,
}

/// Backend that owns concrete widgets.
///
/// The patcher calls these in patch application order. Widgets are created
/// parent first and destroyed children first.
pub trait Renderer {
    type Widget: Clone;

    fn create_widget(
        &mut self,
        tag: &str,
        props: &Props,
        placement: Placement<'_, Self::Widget>,
    ) -> Result<Self::Widget, RenderError>;

    fn destroy_widget(&mut self, widget: &Self::Widget) -> Result<(), RenderError>;

    fn update_widget(
        &mut self,
        widget: &Self::Widget,
        changed: &Props,
        removed: &[String],
    ) -> Result<(), RenderError>;

    /// Put `parent`'s children in `new_order`. Every child appears once.
    fn reorder_children(
        &mut self,
        parent: &Self::Widget,
        new_order: &[Self::Widget],
    ) -> Result<(), RenderError>;

    /// Called once after every patch of a pass was applied.
    fn flush(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}
