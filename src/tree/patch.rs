//! Patch model.
//!
//! A diff produces a flat list of [`Patch`]es. Patches carry no ordering
//! dependencies beyond the fixed category order:
//!
//! ```text
//! Remove -> Reorder/Move -> Create -> Update -> Replace
//! ```
//!
//! Removals free structural slots before moves reuse indices, creates exist
//! before updates target them, and replacements go last so they never race a
//! create of a child they would rebuild anyway.

use std::fmt;

use bitflags::bitflags;

use super::node::{Node, NodeKind};
use crate::types::{Key, Path, Props};

/// The edit to perform at a patch's path.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchOp {
    /// Insert `node` as child `index` of the path's parent.
    Create { node: Node, index: usize },
    /// Change props in place.
    Update { changed: Props, removed: Vec<String> },
    /// Swap the whole subtree.
    Replace { old: Node, new: Node },
    /// Drop the subtree.
    Remove { old: Node },
    /// Keyed child `key` of the list at the path moves from `from` to `to`.
    Move { key: Key, from: usize, to: usize },
    /// All keyed children of the list at the path take a new order.
    Reorder { old_order: Vec<Key>, new_order: Vec<Key> },
}

/// One edit addressed by a path from the root.
///
/// `Move` and `Reorder` address the parent list; every other op addresses
/// the affected node itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub path: Path,
    pub op: PatchOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatchKind {
    Remove,
    Move,
    Reorder,
    Create,
    Update,
    Replace,
}

impl PatchKind {
    pub const ALL: [PatchKind; 6] = [
        PatchKind::Remove,
        PatchKind::Move,
        PatchKind::Reorder,
        PatchKind::Create,
        PatchKind::Update,
        PatchKind::Replace,
    ];

    /// Application rank. Moves and reorders share a rank.
    pub fn rank(self) -> u8 {
        match self {
            PatchKind::Remove => 0,
            PatchKind::Move | PatchKind::Reorder => 1,
            PatchKind::Create => 2,
            PatchKind::Update => 3,
            PatchKind::Replace => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PatchKind::Remove => "remove",
            PatchKind::Move => "move",
            PatchKind::Reorder => "reorder",
            PatchKind::Create => "create",
            PatchKind::Update => "update",
            PatchKind::Replace => "replace",
        }
    }

    pub fn flag(self) -> PatchKinds {
        match self {
            PatchKind::Remove => PatchKinds::REMOVE,
            PatchKind::Move => PatchKinds::MOVE,
            PatchKind::Reorder => PatchKinds::REORDER,
            PatchKind::Create => PatchKinds::CREATE,
            PatchKind::Update => PatchKinds::UPDATE,
            PatchKind::Replace => PatchKinds::REPLACE,
        }
    }
}

bitflags! {
    /// Set of patch categories present in a patch list.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PatchKinds: u8 {
        const REMOVE = 1 << 0;
        const MOVE = 1 << 1;
        const REORDER = 1 << 2;
        const CREATE = 1 << 3;
        const UPDATE = 1 << 4;
        const REPLACE = 1 << 5;
        /// Patches that change the shape of the tree.
        const STRUCTURAL = Self::REMOVE.bits() | Self::MOVE.bits() | Self::REORDER.bits()
            | Self::CREATE.bits() | Self::REPLACE.bits();
    }
}

impl PatchKinds {
    pub fn of(patches: &[Patch]) -> Self {
        patches
            .iter()
            .fold(PatchKinds::empty(), |acc, p| acc | p.kind().flag())
    }
}

impl Patch {
    pub fn new(path: Path, op: PatchOp) -> Self {
        Self { path, op }
    }

    pub fn kind(&self) -> PatchKind {
        match self.op {
            PatchOp::Create { .. } => PatchKind::Create,
            PatchOp::Update { .. } => PatchKind::Update,
            PatchOp::Replace { .. } => PatchKind::Replace,
            PatchOp::Remove { .. } => PatchKind::Remove,
            PatchOp::Move { .. } => PatchKind::Move,
            PatchOp::Reorder { .. } => PatchKind::Reorder,
        }
    }

    /// True for patches that take a subtree out of the tree.
    pub fn removes_subtree(&self) -> bool {
        matches!(self.op, PatchOp::Remove { .. } | PatchOp::Replace { .. })
    }
}

/// Stable sort into application order. Patches of the same category keep
/// the order the differ produced them in.
pub fn sort_for_application(patches: &mut [Patch]) {
    patches.sort_by_key(|p| p.kind().rank());
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            PatchOp::Create { node, index } => {
                write!(f, "create {} [{index}] {}", self.path, describe(node))
            }
            PatchOp::Update { changed, removed } => {
                let names: Vec<&String> = changed.keys().collect();
                write!(f, "update {} changed={names:?} removed={removed:?}", self.path)
            }
            PatchOp::Replace { old, new } => {
                write!(f, "replace {} {} -> {}", self.path, describe(old), describe(new))
            }
            PatchOp::Remove { old } => write!(f, "remove {} {}", self.path, describe(old)),
            PatchOp::Move { key, from, to } => {
                write!(f, "move {} #{key} {from} -> {to}", self.path)
            }
            PatchOp::Reorder { new_order, .. } => {
                let keys: Vec<&str> = new_order.iter().map(Key::as_str).collect();
                write!(f, "reorder {} [{}]", self.path, keys.join(", "))
            }
        }
    }
}

fn describe(node: &Node) -> String {
    match &node.kind {
        NodeKind::Primitive(tag) => format!("<{tag}>"),
        NodeKind::Component(c) => format!("<{}/>", c.name()),
    }
}
