//! In-memory renderer.
//!
//! Widgets live in an arena keyed by [`WidgetId`]. Every call is appended to
//! an operation log so tests can assert exactly what a pass touched.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{Placement, Renderer};
use crate::error::RenderError;
use crate::tree::{ERROR_TAG, Node};
use crate::types::{Key, Props};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(u64);

impl WidgetId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// One renderer call, as recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Create {
        id: WidgetId,
        tag: String,
        parent: Option<WidgetId>,
        index: usize,
    },
    Destroy {
        id: WidgetId,
    },
    Update {
        id: WidgetId,
        changed: Props,
        removed: Vec<String>,
    },
    Reorder {
        parent: WidgetId,
        order: Vec<WidgetId>,
    },
    Flush,
}

impl RenderOp {
    /// Widget the operation targets.
    pub fn target(&self) -> Option<WidgetId> {
        match self {
            RenderOp::Create { id, .. } | RenderOp::Destroy { id } | RenderOp::Update { id, .. } => {
                Some(*id)
            }
            RenderOp::Reorder { parent, .. } => Some(*parent),
            RenderOp::Flush => None,
        }
    }
}

#[derive(Debug, Clone)]
struct MemWidget {
    tag: String,
    key: Option<Key>,
    props: Props,
    parent: Option<WidgetId>,
    children: Vec<WidgetId>,
}

/// Arena-backed renderer with an operation log.
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    widgets: HashMap<WidgetId, MemWidget>,
    root: Option<WidgetId>,
    next_id: u64,
    ops: Vec<RenderOp>,
    known_tags: Option<HashSet<String>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject tags outside `tags`. The fallback tag is always accepted.
    pub fn with_known_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known: HashSet<String> = tags.into_iter().map(Into::into).collect();
        known.insert(ERROR_TAG.to_string());
        self.known_tags = Some(known);
        self
    }

    pub fn root(&self) -> Option<WidgetId> {
        self.root
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.len()
    }

    pub fn contains(&self, id: WidgetId) -> bool {
        self.widgets.contains_key(&id)
    }

    pub fn tag(&self, id: WidgetId) -> Option<&str> {
        self.widgets.get(&id).map(|w| w.tag.as_str())
    }

    pub fn props(&self, id: WidgetId) -> Option<&Props> {
        self.widgets.get(&id).map(|w| &w.props)
    }

    pub fn children(&self, id: WidgetId) -> &[WidgetId] {
        self.widgets
            .get(&id)
            .map(|w| w.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: WidgetId) -> Option<WidgetId> {
        self.widgets.get(&id).and_then(|w| w.parent)
    }

    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    /// Drain the operation log.
    pub fn take_ops(&mut self) -> Vec<RenderOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Rebuild the widget tree as nodes. Every widget becomes a primitive
    /// element, component widgets included.
    pub fn to_node(&self) -> Option<Node> {
        self.root.and_then(|id| self.node_of(id))
    }

    fn node_of(&self, id: WidgetId) -> Option<Node> {
        let widget = self.widgets.get(&id)?;
        let mut node = Node::element(&widget.tag).props(widget.props.clone());
        node.key = widget.key.clone();
        for child in &widget.children {
            node.children.push(self.node_of(*child)?);
        }
        Some(node)
    }

    fn get_mut(&mut self, id: WidgetId) -> Result<&mut MemWidget, RenderError> {
        self.widgets.get_mut(&id).ok_or(RenderError::StaleWidget)
    }
}

impl Renderer for MemoryRenderer {
    type Widget = WidgetId;

    fn create_widget(
        &mut self,
        tag: &str,
        props: &Props,
        placement: Placement<'_, WidgetId>,
    ) -> Result<WidgetId, RenderError> {
        if let Some(known) = &self.known_tags
            && !known.contains(tag)
        {
            return Err(RenderError::UnknownTag(tag.to_string()));
        }

        let id = WidgetId(self.next_id);
        let parent = placement.parent.copied();
        match parent {
            Some(parent) => {
                let parent = self.get_mut(parent)?;
                let index = placement.index.min(parent.children.len());
                parent.children.insert(index, id);
            }
            None => self.root = Some(id),
        }
        self.next_id += 1;

        self.widgets.insert(
            id,
            MemWidget {
                tag: tag.to_string(),
                key: placement.key.cloned(),
                props: props.clone(),
                parent,
                children: Vec::new(),
            },
        );
        self.ops.push(RenderOp::Create {
            id,
            tag: tag.to_string(),
            parent,
            index: placement.index,
        });
        Ok(id)
    }

    fn destroy_widget(&mut self, widget: &WidgetId) -> Result<(), RenderError> {
        let removed = self
            .widgets
            .remove(widget)
            .ok_or(RenderError::StaleWidget)?;
        match removed.parent {
            Some(parent) => {
                if let Some(parent) = self.widgets.get_mut(&parent) {
                    parent.children.retain(|c| c != widget);
                }
            }
            None => {
                if self.root == Some(*widget) {
                    self.root = None;
                }
            }
        }
        self.ops.push(RenderOp::Destroy { id: *widget });
        Ok(())
    }

    fn update_widget(
        &mut self,
        widget: &WidgetId,
        changed: &Props,
        removed: &[String],
    ) -> Result<(), RenderError> {
        let target = self.get_mut(*widget)?;
        for name in removed {
            target.props.remove(name);
        }
        target
            .props
            .extend(changed.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.ops.push(RenderOp::Update {
            id: *widget,
            changed: changed.clone(),
            removed: removed.to_vec(),
        });
        Ok(())
    }

    fn reorder_children(
        &mut self,
        parent: &WidgetId,
        new_order: &[WidgetId],
    ) -> Result<(), RenderError> {
        let target = self.get_mut(*parent)?;
        let mut current = target.children.clone();
        let mut proposed = new_order.to_vec();
        current.sort();
        proposed.sort();
        if current != proposed {
            return Err(RenderError::Backend(format!(
                "reorder of {parent} does not list its children"
            )));
        }
        target.children = new_order.to_vec();
        self.ops.push(RenderOp::Reorder {
            parent: *parent,
            order: new_order.to_vec(),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        self.ops.push(RenderOp::Flush);
        Ok(())
    }
}
