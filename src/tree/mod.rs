//! Render trees, patches and the differ.

mod differ;
mod node;
mod patch;

pub use differ::{DiffStats, Differ, diff, diff_props};
pub use node::{
    Component, ComponentFactory, ComponentRef, ERROR_TAG, FunctionComponent, Node, NodeKind,
    RenderFn, StatefulComponent,
};
pub use patch::{Patch, PatchKind, PatchKinds, PatchOp, sort_for_application};
