//! Render tree nodes and component references.
//!
//! A [`Node`] is either a primitive widget (identified by an opaque tag the
//! renderer understands) or a reference to a component that the scheduler
//! expands before diffing. Trees are rebuilt every pass and never mutated
//! after they are handed to the differ.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hooks::RenderContext;
use crate::types::{Key, Path, PathSegment, Props, Value};

/// Tag of the fallback node a failed component renders instead of its output.
pub const ERROR_TAG: &str = "error";

// =============================================================================
// Components
// =============================================================================

/// Render function of a function component.
pub type RenderFn = dyn Fn(&mut RenderContext<'_>, &Props) -> Result<Node>;

/// Factory building a stateful component instance on first mount.
pub type ComponentFactory = dyn Fn(&Props) -> Box<dyn Component>;

/// A stateful component. One instance lives per render position and is kept
/// across passes until the position is removed.
pub trait Component {
    fn render(&mut self, ctx: &mut RenderContext<'_>, props: &Props) -> Result<Node>;

    /// Called once, right after the instance is created.
    fn on_mount(&mut self) {}

    /// Called once, when the instance's position leaves the tree.
    fn on_unmount(&mut self) {}
}

#[derive(Clone)]
pub struct FunctionComponent {
    name: Arc<str>,
    render: Rc<RenderFn>,
}

#[derive(Clone)]
pub struct StatefulComponent {
    name: Arc<str>,
    factory: Rc<ComponentFactory>,
}

/// Tagged reference to a component: expansion switches on the variant.
#[derive(Clone)]
pub enum ComponentRef {
    Function(FunctionComponent),
    Stateful(StatefulComponent),
}

impl ComponentRef {
    pub fn function(
        name: impl AsRef<str>,
        render: impl Fn(&mut RenderContext<'_>, &Props) -> Result<Node> + 'static,
    ) -> Self {
        ComponentRef::Function(FunctionComponent {
            name: Arc::from(name.as_ref()),
            render: Rc::new(render),
        })
    }

    pub fn stateful(
        name: impl AsRef<str>,
        factory: impl Fn(&Props) -> Box<dyn Component> + 'static,
    ) -> Self {
        ComponentRef::Stateful(StatefulComponent {
            name: Arc::from(name.as_ref()),
            factory: Rc::new(factory),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            ComponentRef::Function(c) => &c.name,
            ComponentRef::Stateful(c) => &c.name,
        }
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        match self {
            ComponentRef::Function(c) => c.name.clone(),
            ComponentRef::Stateful(c) => c.name.clone(),
        }
    }

    /// Element referencing this component.
    pub fn element(&self) -> Node {
        Node::component(self.clone())
    }

    /// Identity of the component: equal for clones, distinct otherwise.
    pub(crate) fn identity(&self) -> usize {
        match self {
            ComponentRef::Function(c) => Rc::as_ptr(&c.render) as *const () as usize,
            ComponentRef::Stateful(c) => Rc::as_ptr(&c.factory) as *const () as usize,
        }
    }
}

impl FunctionComponent {
    pub(crate) fn call(&self, ctx: &mut RenderContext<'_>, props: &Props) -> Result<Node> {
        (self.render)(ctx, props)
    }
}

impl StatefulComponent {
    pub(crate) fn instantiate(&self, props: &Props) -> Box<dyn Component> {
        (self.factory)(props)
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.identity() == other.identity()
    }
}

impl Hash for ComponentRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        self.identity().hash(state);
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRef::Function(c) => write!(f, "Function({})", c.name),
            ComponentRef::Stateful(c) => write!(f, "Stateful({})", c.name),
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// What a node renders as.
#[derive(Clone, Debug, PartialEq, Hash)]
pub enum NodeKind {
    /// Opaque widget kind understood by the renderer.
    Primitive(Arc<str>),
    /// Component to expand before diffing.
    Component(ComponentRef),
}

#[derive(Clone, Debug, PartialEq, Hash)]
pub struct Node {
    pub kind: NodeKind,
    pub props: Props,
    pub children: Vec<Node>,
    pub key: Option<Key>,
}

impl Node {
    /// Primitive element with the given tag.
    pub fn element(tag: impl AsRef<str>) -> Self {
        Self {
            kind: NodeKind::Primitive(Arc::from(tag.as_ref())),
            props: Props::new(),
            children: Vec::new(),
            key: None,
        }
    }

    /// Element referencing a component.
    pub fn component(component: ComponentRef) -> Self {
        Self {
            kind: NodeKind::Component(component),
            props: Props::new(),
            children: Vec::new(),
            key: None,
        }
    }

    /// Fallback rendered in place of a component that failed.
    pub fn fallback(message: impl Into<String>) -> Self {
        Node::element(ERROR_TAG).prop("message", message.into())
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn props(mut self, props: Props) -> Self {
        self.props.extend(props);
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Tag of a primitive node.
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Primitive(tag) => Some(tag),
            NodeKind::Component(_) => None,
        }
    }

    pub fn is_component(&self) -> bool {
        matches!(self.kind, NodeKind::Component(_))
    }

    /// Two nodes can be diffed in place only when kind and key agree.
    pub fn is_compatible(&self, other: &Node) -> bool {
        self.kind == other.kind && self.key == other.key
    }

    /// Number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// True if any node in this subtree still references a component.
    pub fn contains_components(&self) -> bool {
        self.is_component() || self.children.iter().any(Node::contains_components)
    }

    /// Check this node's own shape and the keys of its direct children.
    pub fn validate_shallow(&self, path: &Path) -> Result<()> {
        if let NodeKind::Primitive(tag) = &self.kind {
            if tag.trim().is_empty() {
                return Err(invalid(path, "empty primitive tag"));
            }
        }

        let keyed = self.children.iter().filter(|c| c.key.is_some()).count();
        if keyed > 0 && keyed < self.children.len() {
            return Err(invalid(path, "children mix keyed and unkeyed nodes"));
        }

        let mut seen = HashSet::new();
        for child in &self.children {
            if let Some(key) = &child.key {
                if !seen.insert(key) {
                    return Err(invalid(path, format!("duplicate child key {key}")));
                }
            }
        }
        Ok(())
    }

    /// Check the whole subtree.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(&Path::root())
    }

    fn validate_at(&self, path: &Path) -> Result<()> {
        self.validate_shallow(path)?;
        for (i, child) in self.children.iter().enumerate() {
            child.validate_at(&path.child(PathSegment::for_child(i, child.key.as_ref())))?;
        }
        Ok(())
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidTree {
        path: path.clone(),
        reason: reason.into(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let node = Node::element("frame")
            .prop("padding", 4)
            .key("root")
            .child(Node::element("label").prop("text", "hi"));
        assert_eq!(node.tag(), Some("frame"));
        assert_eq!(node.key, Some(Key::from("root")));
        assert_eq!(node.count(), 2);
        assert!(!node.contains_components());
    }

    #[test]
    fn test_component_identity() {
        let a = ComponentRef::function("A", |_, _| Ok(Node::element("frame")));
        let b = ComponentRef::function("A", |_, _| Ok(Node::element("frame")));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.element().is_compatible(&a.element()));
        assert!(!a.element().is_compatible(&b.element()));
        assert_eq!(format!("{a:?}"), "Function(A)");
    }

    #[test]
    fn test_compatibility_requires_same_key() {
        let a = Node::element("label").key("a");
        let b = Node::element("label").key("b");
        assert!(!a.is_compatible(&b));
        assert!(a.is_compatible(&Node::element("label").key("a")));
    }

    #[test]
    fn test_validate_rejects_duplicate_keys() {
        let node = Node::element("list")
            .child(Node::element("item").key("a"))
            .child(Node::element("item").key("a"));
        let err = node.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidTree { .. }));
    }

    #[test]
    fn test_validate_rejects_mixed_keys_and_empty_tags() {
        let mixed = Node::element("list")
            .child(Node::element("item").key("a"))
            .child(Node::element("item"));
        assert!(mixed.validate().is_err());

        let nested = Node::element("frame").child(Node::element(" "));
        let Err(Error::InvalidTree { path, .. }) = nested.validate() else {
            panic!("expected invalid tree");
        };
        assert_eq!(path, Path::root().child(0));
    }

    #[test]
    fn test_fallback() {
        let node = Node::fallback("boom");
        assert_eq!(node.tag(), Some(ERROR_TAG));
        assert_eq!(node.props["message"], Value::from("boom"));
    }
}
