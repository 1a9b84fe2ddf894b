//! Component expansion.
//!
//! Turns a declared tree into a primitive-only tree by rendering every
//! component node through the [`RenderContext`].
//!
//! # Containment
//!
//! ```text
//! component fails (Err or panic) ──► fallback node in its place
//! primitive is malformed         ──► fallback node in its place
//! depth limit / no frame (fatal) ──► whole expansion fails
//! ```
//!
//! A fallback keeps the key of the node it replaces, so keyed siblings stay
//! keyed.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{trace, warn};

use crate::error::{Error, Result, panic_message};
use crate::hooks::{RenderContext, RenderPath};
use crate::tree::{ComponentRef, Node, NodeKind};
use crate::types::{Path, PathSegment, Props};

/// Expand `root`. Only fatal errors are returned; everything else is
/// contained in the context.
pub(crate) fn expand_root(ctx: &mut RenderContext<'_>, root: &Node) -> Result<Node> {
    expand(ctx, root, &Path::root())
}

fn expand(ctx: &mut RenderContext<'_>, node: &Node, path: &Path) -> Result<Node> {
    match &node.kind {
        NodeKind::Primitive(_) => expand_primitive(ctx, node, path),
        NodeKind::Component(component) => expand_component(ctx, component, node, path),
    }
}

fn expand_primitive(ctx: &mut RenderContext<'_>, node: &Node, path: &Path) -> Result<Node> {
    let mut children = Vec::with_capacity(node.children.len());
    for (i, child) in node.children.iter().enumerate() {
        let child_path = path.child(PathSegment::for_child(i, child.key.as_ref()));
        children.push(expand(ctx, child, &child_path)?);
    }

    let expanded = Node {
        kind: node.kind.clone(),
        props: node.props.clone(),
        children,
        key: node.key.clone(),
    };
    match expanded.validate_shallow(path) {
        Ok(()) => Ok(expanded),
        Err(err) => Ok(fallback(ctx, err, node)),
    }
}

fn expand_component(
    ctx: &mut RenderContext<'_>,
    component: &ComponentRef,
    node: &Node,
    path: &Path,
) -> Result<Node> {
    let render_path = ctx.path_for(path, component.name_arc());
    trace!(path = %render_path, "rendering component");
    ctx.enter(render_path.clone(), node.children.clone())?;

    // The frame stays pushed while the output expands so a component
    // rendering another at its root nests under it and self-reference
    // runs into the depth limit.
    let result = render(ctx, component, &node.props, &render_path)
        .and_then(|output| expand(ctx, &output, path));
    ctx.exit();

    match result {
        Ok(mut expanded) => {
            if node.key.is_some() {
                expanded.key = node.key.clone();
            }
            Ok(expanded)
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => Ok(fallback(ctx, err, node)),
    }
}

fn render(
    ctx: &mut RenderContext<'_>,
    component: &ComponentRef,
    props: &Props,
    path: &RenderPath,
) -> Result<Node> {
    let name = component.name();
    let caught = |payload: Box<dyn std::any::Any + Send>| {
        Err(Error::component(name, panic_message(payload.as_ref())))
    };

    match component {
        ComponentRef::Function(function) => {
            catch_unwind(AssertUnwindSafe(|| function.call(ctx, props))).unwrap_or_else(caught)
        }
        ComponentRef::Stateful(stateful) => {
            let identity = component.identity();
            let mut errors = Vec::new();
            let existing = ctx.store_mut().take_instance(path, identity, &mut errors);
            for err in errors {
                ctx.contain(err);
            }

            let mut instance = match existing {
                Some(instance) => instance,
                None => {
                    let built = catch_unwind(AssertUnwindSafe(|| {
                        let mut instance = stateful.instantiate(props);
                        instance.on_mount();
                        instance
                    }));
                    match built {
                        Ok(instance) => {
                            trace!(path = %path, "stateful component mounted");
                            instance
                        }
                        Err(payload) => return caught(payload),
                    }
                }
            };

            let output = catch_unwind(AssertUnwindSafe(|| instance.render(ctx, props)))
                .unwrap_or_else(caught);
            ctx.store_mut().put_instance(path, identity, instance);
            output
        }
    }
}

fn fallback(ctx: &mut RenderContext<'_>, err: Error, node: &Node) -> Node {
    warn!(error = %err, "rendering fallback");
    let mut replacement = Node::fallback(err.to_string());
    replacement.key = node.key.clone();
    ctx.contain(err);
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookStore;
    use crate::tree::{Component, ERROR_TAG};
    use crate::types::Value;

    fn expand_with(store: &mut HookStore, root: &Node, depth: usize) -> (Result<Node>, Vec<Error>) {
        let mut ctx = RenderContext::new(store, depth);
        let out = expand_root(&mut ctx, root);
        let (_, contained) = ctx.finish();
        (out, contained)
    }

    fn greeting() -> ComponentRef {
        ComponentRef::function("Greeting", |_ctx, props| {
            let name = props.get("name").and_then(|v| v.as_str()).unwrap_or("world");
            Ok(Node::element("label").prop("text", format!("hello {name}")))
        })
    }

    #[test]
    fn test_components_become_primitives() {
        let root = Node::element("frame")
            .child(greeting().element().prop("name", "ada"))
            .child(Node::element("label"));
        let mut store = HookStore::new();
        let (out, contained) = expand_with(&mut store, &root, 10);
        let out = out.unwrap();

        assert!(contained.is_empty());
        assert!(!out.contains_components());
        assert_eq!(out.children[0].props["text"], Value::from("hello ada"));
    }

    #[test]
    fn test_component_key_wins() {
        let root = Node::element("list").child(greeting().element().key("g"));
        let mut store = HookStore::new();
        let out = expand_with(&mut store, &root, 10).0.unwrap();
        assert_eq!(out.children[0].key.as_ref().map(|k| k.as_str()), Some("g"));
    }

    #[test]
    fn test_children_are_passed_through() {
        let wrapper = ComponentRef::function("Wrapper", |ctx, _props| {
            Ok(Node::element("panel").children(ctx.children().to_vec()))
        });
        let root = wrapper.element().child(greeting().element());
        let mut store = HookStore::new();
        let out = expand_with(&mut store, &root, 10).0.unwrap();
        assert_eq!(out.tag(), Some("panel"));
        assert_eq!(out.children[0].tag(), Some("label"));
    }

    #[test]
    fn test_failures_become_fallbacks() {
        let failing = ComponentRef::function("Failing", |_ctx, _props| {
            Err(Error::component("Failing", "no data"))
        });
        let panicking = ComponentRef::function("Panicking", |_ctx, _props| panic!("kaboom"));
        let root = Node::element("list")
            .child(failing.element().key("a"))
            .child(panicking.element().key("b"))
            .child(greeting().element().key("c"));
        let mut store = HookStore::new();
        let (out, contained) = expand_with(&mut store, &root, 10);
        let out = out.unwrap();

        assert_eq!(contained.len(), 2);
        assert_eq!(out.children[0].tag(), Some(ERROR_TAG));
        assert_eq!(out.children[0].key.as_ref().map(|k| k.as_str()), Some("a"));
        assert_eq!(
            out.children[1].props["message"],
            Value::from("component Panicking failed: kaboom")
        );
        assert_eq!(out.children[2].tag(), Some("label"));
        assert!(out.validate().is_ok());
    }

    #[test]
    fn test_invalid_primitive_is_contained() {
        let root = Node::element("frame").child(
            Node::element("list")
                .child(Node::element("item").key("x"))
                .child(Node::element("item").key("x")),
        );
        let mut store = HookStore::new();
        let (out, contained) = expand_with(&mut store, &root, 10);
        let out = out.unwrap();
        assert_eq!(out.children[0].tag(), Some(ERROR_TAG));
        assert!(matches!(contained[0], Error::InvalidTree { .. }));
    }

    #[test]
    fn test_self_reference_hits_depth_limit() {
        fn looping() -> ComponentRef {
            ComponentRef::function("Loop", |_ctx, _props| Ok(looping().element()))
        }
        let mut store = HookStore::new();
        let (out, _) = expand_with(&mut store, &looping().element(), 8);
        match out {
            Err(Error::ExpansionDepthExceeded { limit, .. }) => assert_eq!(limit, 8),
            other => panic!("expected depth error, got {other:?}"),
        }
    }

    #[test]
    fn test_stateful_instance_persists() {
        struct Counter {
            renders: u32,
        }
        impl Component for Counter {
            fn render(&mut self, _ctx: &mut RenderContext<'_>, _props: &Props) -> Result<Node> {
                self.renders += 1;
                Ok(Node::element("label").prop("renders", self.renders))
            }
        }
        let counter = ComponentRef::stateful("Counter", |_props| Box::new(Counter { renders: 0 }));
        let root = counter.element();

        let mut store = HookStore::new();
        expand_with(&mut store, &root, 10).0.unwrap();
        let out = expand_with(&mut store, &root, 10).0.unwrap();
        assert_eq!(out.props["renders"], Value::from(2u32));
        assert!(!store.is_empty());
    }
}
