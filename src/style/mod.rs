//! Style resolution.
//!
//! Nodes may carry a `class` prop holding a whitespace-separated class
//! string. Before each diff the scheduler hands every such string to a
//! [`StyleResolver`] together with the current [`StyleToken`], merges the
//! resolved props over the node's own and drops `class`. Diffs therefore see
//! concrete values, never class names.

pub mod tokens;
mod utility;

pub use tokens::{Breakpoint, Palette, Theme};
pub use utility::UtilityStyleResolver;

use serde::{Deserialize, Serialize};

use crate::tree::Node;
use crate::types::{Props, Value};

/// Prop holding the class string.
pub const CLASS_PROP: &str = "class";

/// Environment a class string is resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StyleToken {
    pub breakpoint: Breakpoint,
    pub theme: Theme,
}

impl StyleToken {
    pub fn new(breakpoint: Breakpoint, theme: Theme) -> Self {
        Self { breakpoint, theme }
    }
}

/// Turns class strings into props.
pub trait StyleResolver {
    fn resolve(&self, classes: &str, token: &StyleToken) -> Props;
}

impl<F> StyleResolver for F
where
    F: Fn(&str, &StyleToken) -> Props,
{
    fn resolve(&self, classes: &str, token: &StyleToken) -> Props {
        self(classes, token)
    }
}

/// Resolve the `class` prop of every node in `node`, in place. Returns the
/// number of nodes that carried one.
pub fn resolve_tree(node: &mut Node, resolver: &dyn StyleResolver, token: &StyleToken) -> usize {
    let mut resolved = 0;
    if let Some(class) = node.props.remove(CLASS_PROP) {
        if let Value::Str(classes) = &class {
            let props = resolver.resolve(classes, token);
            node.props.extend(props);
        }
        resolved += 1;
    }
    for child in &mut node.children {
        resolved += resolve_tree(child, resolver, token);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(classes: &str, token: &StyleToken) -> Props {
        let mut props = Props::new();
        props.insert("resolved".into(), classes.into());
        props.insert("bp".into(), token.breakpoint.as_str().into());
        props
    }

    #[test]
    fn test_resolve_tree_replaces_class() {
        let mut tree = Node::element("frame")
            .prop("class", "a b")
            .prop("resolved", "explicit")
            .child(Node::element("label"))
            .child(Node::element("label").prop("class", "c"));
        let token = StyleToken::new(Breakpoint::Lg, Theme::Light);

        assert_eq!(resolve_tree(&mut tree, &echo, &token), 2);
        assert_eq!(tree.props.get("class"), None);
        assert_eq!(tree.props.get("resolved"), Some(&Value::from("a b")));
        assert_eq!(tree.props.get("bp"), Some(&Value::from("lg")));
        assert!(tree.children[0].props.is_empty());
        assert_eq!(
            tree.children[1].props.get("resolved"),
            Some(&Value::from("c"))
        );
    }

    #[test]
    fn test_non_string_class_is_dropped() {
        let mut tree = Node::element("frame").prop("class", 3);
        assert_eq!(resolve_tree(&mut tree, &echo, &StyleToken::default()), 1);
        assert!(tree.props.is_empty());
    }
}
