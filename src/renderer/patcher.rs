//! Patch application.
//!
//! The [`Patcher`] mirrors the committed widget tree so it can resolve patch
//! paths (key segments by key, index segments by position) and hand the
//! renderer concrete widgets.
//!
//! # Coordinates
//!
//! - `Remove` paths address the tree as it was before the pass. They are
//!   all resolved up front and applied deepest-last-index first, so one
//!   removal never shifts another's target.
//! - `Move` targets and the pre-pass index of every unmoved keyed child give
//!   the final order of a keyed list; `Reorder` gives it directly.
//! - `Create` inserts at its index, ascending, once retained children are in
//!   final order.
//! - `Update` and `Replace` resolve against the tree as it is at that point,
//!   which already has the final shape.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{Placement, Renderer};
use crate::error::{Error, RenderError, Result};
use crate::tree::{Node, NodeKind, Patch, PatchKind, PatchOp};
use crate::types::{Key, Path, PathSegment, Props};

struct Mounted<W> {
    widget: W,
    kind: NodeKind,
    key: Option<Key>,
    props: Props,
    children: Vec<Mounted<W>>,
}

impl<W> Mounted<W> {
    fn to_node(&self) -> Node {
        Node {
            kind: self.kind.clone(),
            props: self.props.clone(),
            children: self.children.iter().map(Mounted::to_node).collect(),
            key: self.key.clone(),
        }
    }
}

/// Result of applying one patch list.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub failures: Vec<Error>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn missing(&mut self, path: &Path, kind: PatchKind) {
        warn!(path = %path, op = kind.name(), "patch target not found");
        self.failures.push(Error::PatchTarget {
            path: path.clone(),
            op: kind.name(),
        });
    }

    fn renderer(&mut self, error: RenderError) {
        warn!(error = %error, "renderer call failed");
        self.failures.push(Error::Renderer(error));
    }
}

/// Mirror of the committed widget tree.
pub struct Patcher<W> {
    root: Option<Mounted<W>>,
}

impl<W: Clone> Default for Patcher<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Clone> Patcher<W> {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The committed tree as nodes.
    pub fn snapshot(&self) -> Option<Node> {
        self.root.as_ref().map(Mounted::to_node)
    }

    pub fn root_widget(&self) -> Option<&W> {
        self.root.as_ref().map(|m| &m.widget)
    }

    /// Widget at `path` in the committed tree.
    pub fn widget_at(&self, path: &Path) -> Option<&W> {
        let chain = self.resolve(path)?;
        self.at(&chain).map(|m| &m.widget)
    }

    /// Build widgets for `node` as the new root.
    pub fn mount<R: Renderer<Widget = W>>(&mut self, renderer: &mut R, node: &Node) -> Result<()> {
        if self.root.is_some() {
            return Err(Error::PatchTarget {
                path: Path::root(),
                op: PatchKind::Create.name(),
            });
        }
        self.root = Some(mount(renderer, node, None, 0)?);
        Ok(())
    }

    /// Destroy every widget.
    pub fn unmount<R: Renderer<Widget = W>>(&mut self, renderer: &mut R) -> ApplyReport {
        let mut report = ApplyReport::default();
        if let Some(root) = self.root.take() {
            for err in destroy(renderer, &root) {
                report.renderer(err);
            }
            report.applied += 1;
        }
        report
    }

    /// Apply a patch list. Patches are taken in category order whatever
    /// order they arrive in. Failures are collected; the remaining patches
    /// still apply.
    pub fn apply<R: Renderer<Widget = W>>(
        &mut self,
        renderer: &mut R,
        patches: &[Patch],
    ) -> ApplyReport {
        let mut ordered: Vec<&Patch> = patches.iter().collect();
        ordered.sort_by_key(|p| p.kind().rank());
        let mut report = ApplyReport::default();

        // Everything addressed in pre-pass coordinates is resolved first.
        let mut removals: Vec<(Vec<usize>, &Path)> = Vec::new();
        let mut old_positions: HashMap<&Path, HashMap<Key, usize>> = HashMap::new();
        for patch in &ordered {
            match &patch.op {
                PatchOp::Remove { .. } => match self.resolve(&patch.path) {
                    Some(chain) => removals.push((chain, &patch.path)),
                    None => report.missing(&patch.path, PatchKind::Remove),
                },
                PatchOp::Move { .. } if !old_positions.contains_key(&patch.path) => {
                    let parent = self.resolve(&patch.path).and_then(|c| self.at(&c));
                    if let Some(parent) = parent {
                        old_positions.insert(&patch.path, key_positions(&parent.children));
                    }
                }
                _ => {}
            }
        }

        self.apply_removals(renderer, removals, &mut report);
        self.apply_moves(renderer, &ordered, &old_positions, &mut report);

        let mut creates: Vec<&Patch> = ordered
            .iter()
            .copied()
            .filter(|p| p.kind() == PatchKind::Create)
            .collect();
        creates.sort_by_key(|p| match p.op {
            PatchOp::Create { index, .. } => index,
            _ => 0,
        });
        for patch in creates {
            if let PatchOp::Create { node, index } = &patch.op {
                self.apply_create(renderer, &patch.path, node, *index, &mut report);
            }
        }

        for patch in &ordered {
            match &patch.op {
                PatchOp::Update { changed, removed } => {
                    self.apply_update(renderer, &patch.path, changed, removed, &mut report)
                }
                PatchOp::Replace { new, .. } => {
                    self.apply_replace(renderer, &patch.path, new, &mut report)
                }
                _ => {}
            }
        }

        if let Err(err) = renderer.flush() {
            report.renderer(err);
        }
        debug!(
            patches = patches.len(),
            applied = report.applied,
            failures = report.failures.len(),
            "patches applied"
        );
        report
    }

    // -------------------------------------------------------------------------
    // phases
    // -------------------------------------------------------------------------

    fn apply_removals<R: Renderer<Widget = W>>(
        &mut self,
        renderer: &mut R,
        mut removals: Vec<(Vec<usize>, &Path)>,
        report: &mut ApplyReport,
    ) {
        // Descending lexicographic order: deeper nodes and later siblings go
        // first, so earlier chains stay valid.
        removals.sort_by(|a, b| b.0.cmp(&a.0));
        removals.dedup_by(|a, b| a.0 == b.0);

        for (chain, path) in removals {
            let removed = match chain.split_last() {
                None => self.root.take(),
                Some((&last, parent)) => self
                    .at_mut(parent)
                    .filter(|p| last < p.children.len())
                    .map(|p| p.children.remove(last)),
            };
            match removed {
                Some(mounted) => {
                    for err in destroy(renderer, &mounted) {
                        report.renderer(err);
                    }
                    report.applied += 1;
                }
                None => report.missing(path, PatchKind::Remove),
            }
        }
    }

    fn apply_moves<R: Renderer<Widget = W>>(
        &mut self,
        renderer: &mut R,
        ordered: &[&Patch],
        old_positions: &HashMap<&Path, HashMap<Key, usize>>,
        report: &mut ApplyReport,
    ) {
        let mut lists: Vec<&Path> = Vec::new();
        let mut targets: HashMap<&Path, HashMap<&Key, usize>> = HashMap::new();
        let mut orders: HashMap<&Path, &[Key]> = HashMap::new();
        let mut counts: HashMap<&Path, usize> = HashMap::new();

        for patch in ordered {
            let path = &patch.path;
            match &patch.op {
                PatchOp::Move { key, to, .. } => {
                    targets.entry(path).or_default().insert(key, *to);
                }
                PatchOp::Reorder { new_order, .. } => {
                    orders.insert(path, new_order);
                }
                _ => continue,
            }
            if !lists.contains(&path) {
                lists.push(path);
            }
            *counts.entry(path).or_default() += 1;
        }

        for path in lists {
            let count = counts.get(path).copied().unwrap_or(1);
            let kind = if orders.contains_key(path) {
                PatchKind::Reorder
            } else {
                PatchKind::Move
            };
            let Some(parent) = self.resolve(path).and_then(|c| self.at_mut(&c)) else {
                for _ in 0..count {
                    report.missing(path, kind);
                }
                continue;
            };

            let moved = targets.get(path);
            if let Some(moved) = moved {
                for key in moved.keys() {
                    if !parent.children.iter().any(|c| c.key.as_ref() == Some(*key)) {
                        report.missing(&path.child(Key::clone(key)), PatchKind::Move);
                    }
                }
            }

            let old = old_positions.get(path);
            let order = orders.get(path);
            let children = std::mem::take(&mut parent.children);
            let mut ranked: Vec<(usize, Mounted<W>)> = children
                .into_iter()
                .enumerate()
                .map(|(i, child)| {
                    let rank = match (&child.key, order) {
                        (Some(key), Some(order)) => {
                            order.iter().position(|k| k == key).unwrap_or(usize::MAX)
                        }
                        (Some(key), None) => moved
                            .and_then(|m| m.get(key).copied())
                            .or_else(|| old.and_then(|o| o.get(key).copied()))
                            .unwrap_or(i),
                        (None, _) => i,
                    };
                    (rank, child)
                })
                .collect();
            ranked.sort_by_key(|(rank, _)| *rank);
            parent.children = ranked.into_iter().map(|(_, child)| child).collect();

            let widgets: Vec<W> = parent.children.iter().map(|c| c.widget.clone()).collect();
            match renderer.reorder_children(&parent.widget, &widgets) {
                Ok(()) => report.applied += count,
                Err(err) => report.renderer(err),
            }
        }
    }

    fn apply_create<R: Renderer<Widget = W>>(
        &mut self,
        renderer: &mut R,
        path: &Path,
        node: &Node,
        index: usize,
        report: &mut ApplyReport,
    ) {
        let Some(parent_path) = path.parent() else {
            if self.root.is_some() {
                report.missing(path, PatchKind::Create);
                return;
            }
            match mount(renderer, node, None, 0) {
                Ok(root) => {
                    self.root = Some(root);
                    report.applied += 1;
                }
                Err(err) => report.renderer(err),
            }
            return;
        };

        let Some(parent) = self.resolve(&parent_path).and_then(|c| self.at_mut(&c)) else {
            report.missing(path, PatchKind::Create);
            return;
        };
        let index = index.min(parent.children.len());
        match mount(renderer, node, Some(&parent.widget), index) {
            Ok(child) => {
                parent.children.insert(index, child);
                report.applied += 1;
            }
            Err(err) => report.renderer(err),
        }
    }

    fn apply_update<R: Renderer<Widget = W>>(
        &mut self,
        renderer: &mut R,
        path: &Path,
        changed: &Props,
        removed: &[String],
        report: &mut ApplyReport,
    ) {
        let Some(target) = self.resolve(path).and_then(|c| self.at_mut(&c)) else {
            report.missing(path, PatchKind::Update);
            return;
        };
        for name in removed {
            target.props.remove(name);
        }
        target
            .props
            .extend(changed.iter().map(|(k, v)| (k.clone(), v.clone())));
        match renderer.update_widget(&target.widget, changed, removed) {
            Ok(()) => report.applied += 1,
            Err(err) => report.renderer(err),
        }
    }

    fn apply_replace<R: Renderer<Widget = W>>(
        &mut self,
        renderer: &mut R,
        path: &Path,
        new: &Node,
        report: &mut ApplyReport,
    ) {
        let Some(chain) = self.resolve(path) else {
            report.missing(path, PatchKind::Replace);
            return;
        };

        let Some((&index, parent_chain)) = chain.split_last() else {
            if let Some(old) = self.root.take() {
                for err in destroy(renderer, &old) {
                    report.renderer(err);
                }
            }
            match mount(renderer, new, None, 0) {
                Ok(root) => {
                    self.root = Some(root);
                    report.applied += 1;
                }
                Err(err) => report.renderer(err),
            }
            return;
        };

        let Some(parent) = self.at_mut(parent_chain) else {
            report.missing(path, PatchKind::Replace);
            return;
        };
        let old = parent.children.remove(index);
        for err in destroy(renderer, &old) {
            report.renderer(err);
        }
        match mount(renderer, new, Some(&parent.widget), index) {
            Ok(child) => {
                parent.children.insert(index, child);
                report.applied += 1;
            }
            Err(err) => report.renderer(err),
        }
    }

    // -------------------------------------------------------------------------
    // navigation
    // -------------------------------------------------------------------------

    /// Child positions from the root to the node at `path`.
    fn resolve(&self, path: &Path) -> Option<Vec<usize>> {
        let mut node = self.root.as_ref()?;
        let mut chain = Vec::with_capacity(path.len());
        for segment in path.segments() {
            let index = match segment {
                PathSegment::Key(key) => node
                    .children
                    .iter()
                    .position(|c| c.key.as_ref() == Some(key))?,
                PathSegment::Index(i) if *i < node.children.len() => *i,
                PathSegment::Index(_) => return None,
            };
            chain.push(index);
            node = &node.children[index];
        }
        Some(chain)
    }

    fn at(&self, chain: &[usize]) -> Option<&Mounted<W>> {
        let mut node = self.root.as_ref()?;
        for &i in chain {
            node = node.children.get(i)?;
        }
        Some(node)
    }

    fn at_mut(&mut self, chain: &[usize]) -> Option<&mut Mounted<W>> {
        let mut node = self.root.as_mut()?;
        for &i in chain {
            node = node.children.get_mut(i)?;
        }
        Some(node)
    }
}

fn key_positions<W>(children: &[Mounted<W>]) -> HashMap<Key, usize> {
    let mut positions = HashMap::with_capacity(children.len());
    for (i, child) in children.iter().enumerate() {
        if let Some(key) = &child.key {
            positions.entry(key.clone()).or_insert(i);
        }
    }
    positions
}

fn tag_of(node: &Node) -> &str {
    match &node.kind {
        NodeKind::Primitive(tag) => tag.as_ref(),
        NodeKind::Component(component) => component.name(),
    }
}

/// Create widgets for a subtree, parent first. On failure, widgets already
/// created for the subtree are destroyed again.
fn mount<R: Renderer>(
    renderer: &mut R,
    node: &Node,
    parent: Option<&R::Widget>,
    index: usize,
) -> std::result::Result<Mounted<R::Widget>, RenderError> {
    let widget = renderer.create_widget(
        tag_of(node),
        &node.props,
        Placement {
            parent,
            index,
            key: node.key.as_ref(),
        },
    )?;

    let mut children = Vec::with_capacity(node.children.len());
    for (i, child) in node.children.iter().enumerate() {
        match mount(renderer, child, Some(&widget), i) {
            Ok(mounted) => children.push(mounted),
            Err(err) => {
                let mut leaked: Vec<RenderError> = children
                    .iter()
                    .flat_map(|created| destroy(renderer, created))
                    .collect();
                if let Err(cleanup) = renderer.destroy_widget(&widget) {
                    leaked.push(cleanup);
                }
                for cleanup in &leaked {
                    warn!(error = %cleanup, "rollback of a partly mounted subtree failed");
                }
                return Err(err);
            }
        }
    }

    Ok(Mounted {
        widget,
        kind: node.kind.clone(),
        key: node.key.clone(),
        props: node.props.clone(),
        children,
    })
}

/// Destroy a subtree, children first.
fn destroy<R: Renderer>(renderer: &mut R, mounted: &Mounted<R::Widget>) -> Vec<RenderError> {
    let mut errors = Vec::new();
    for child in &mounted.children {
        errors.extend(destroy(renderer, child));
    }
    if let Err(err) = renderer.destroy_widget(&mounted.widget) {
        errors.push(err);
    }
    errors
}

// =============================================================================
// Null renderer
// =============================================================================

/// Renderer that keeps no widgets. Lets the patcher run as a pure tree
/// transformer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    type Widget = ();

    fn create_widget(
        &mut self,
        _tag: &str,
        _props: &Props,
        _placement: Placement<'_, ()>,
    ) -> std::result::Result<(), RenderError> {
        Ok(())
    }

    fn destroy_widget(&mut self, _widget: &()) -> std::result::Result<(), RenderError> {
        Ok(())
    }

    fn update_widget(
        &mut self,
        _widget: &(),
        _changed: &Props,
        _removed: &[String],
    ) -> std::result::Result<(), RenderError> {
        Ok(())
    }

    fn reorder_children(
        &mut self,
        _parent: &(),
        _new_order: &[()],
    ) -> std::result::Result<(), RenderError> {
        Ok(())
    }
}

/// Apply `patches` to a copy of `old` and return the resulting tree.
pub fn apply_patches(old: Option<&Node>, patches: &[Patch]) -> Result<Option<Node>> {
    let mut renderer = NullRenderer;
    let mut patcher = Patcher::new();
    if let Some(old) = old {
        patcher.mount(&mut renderer, old)?;
    }
    let report = patcher.apply(&mut renderer, patches);
    match report.failures.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(patcher.snapshot()),
    }
}
