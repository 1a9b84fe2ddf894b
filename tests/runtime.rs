//! End-to-end runtime behaviour: state from other threads, effects,
//! contexts, error containment and the render loop.
//!
//! Run with: cargo test --test runtime -- --nocapture

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use spark_reconciler::hooks::Ref;
use spark_reconciler::renderer::{MemoryRenderer, RenderOp, TerminalRenderer};
use spark_reconciler::scheduler::ErrorSource;
use spark_reconciler::style::{Breakpoint, Theme};
use spark_reconciler::tree::ERROR_TAG;
use spark_reconciler::{
    ComponentRef, Error, Node, Runtime, RuntimeConfig, SetState, StyleToken, UtilityStyleResolver,
    Value, create_context,
};

// =============================================================================
// HELPERS
// =============================================================================

fn config() -> RuntimeConfig {
    RuntimeConfig::default().with_frame_interval(Duration::ZERO)
}

fn runtime() -> Runtime<MemoryRenderer> {
    Runtime::new(MemoryRenderer::new(), config()).unwrap()
}

/// Slot the component under test publishes its setter into.
type Setter<T> = Rc<RefCell<Option<SetState<T>>>>;

fn counter(setter: &Setter<i64>) -> ComponentRef {
    let setter = setter.clone();
    ComponentRef::function("Counter", move |ctx, _props| {
        let (count, set) = ctx.use_state(0i64)?;
        *setter.borrow_mut() = Some(set);
        Ok(Node::element("label").prop("count", count))
    })
}

fn label_of(rt: &Runtime<MemoryRenderer>, path: &[usize]) -> Option<Value> {
    let mut node = rt.committed()?;
    for &i in path {
        node = node.children.get(i)?;
    }
    node.props.get("text").or_else(|| node.props.get("count")).cloned()
}

// =============================================================================
// STATE
// =============================================================================

#[test]
fn test_concurrent_updates_render_once() {
    let setter: Setter<i64> = Rc::new(RefCell::new(None));
    let mut rt = runtime();
    rt.mount(
        Node::element("frame")
            .child(Node::element("title").prop("text", "static"))
            .child(counter(&setter).element()),
    );
    rt.flush().unwrap();
    rt.renderer_mut().clear_ops();
    let passes_before = rt.stats().passes;

    let set = setter.borrow().clone().unwrap();
    let workers: Vec<_> = (0..3)
        .map(|_| {
            let set = set.clone();
            thread::spawn(move || set.update(|n| n + 1))
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }

    assert_eq!(rt.flush().unwrap(), 1);
    assert_eq!(rt.stats().passes, passes_before + 1);
    assert_eq!(label_of(&rt, &[1]), Some(Value::from(3i64)));

    let updates: Vec<_> = rt
        .renderer()
        .ops()
        .iter()
        .filter(|op| matches!(op, RenderOp::Update { .. }))
        .collect();
    assert_eq!(updates.len(), 1);
    let title = rt.renderer().children(rt.renderer().root().unwrap())[0];
    assert!(rt.renderer().ops().iter().all(|op| op.target() != Some(title)));
}

#[test]
fn test_debounced_state_renders_final_value() {
    let setter: Setter<i64> = Rc::new(RefCell::new(None));
    let mut rt = runtime();
    rt.mount(counter(&setter).element());
    rt.flush().unwrap();

    let set = setter.borrow().clone().unwrap();
    set.stream().set_debounce(Some(Duration::from_millis(30)));
    for n in 1..=5 {
        set.set(n);
    }
    assert!(!rt.is_dirty());

    thread::sleep(Duration::from_millis(200));
    assert!(rt.is_dirty());
    assert_eq!(rt.flush().unwrap(), 1);
    assert_eq!(label_of(&rt, &[]), Some(Value::from(5i64)));
}

#[test]
fn test_refs_keep_identity_across_passes() {
    let refs: Rc<RefCell<Vec<Ref<u32>>>> = Rc::new(RefCell::new(Vec::new()));
    let setter: Setter<i64> = Rc::new(RefCell::new(None));
    let component = {
        let refs = refs.clone();
        let setter = setter.clone();
        ComponentRef::function("Holder", move |ctx, _props| {
            let cell = ctx.use_ref(0u32)?;
            cell.with_mut(|n| *n += 1);
            refs.borrow_mut().push(cell);
            let (tick, set) = ctx.use_state(0i64)?;
            *setter.borrow_mut() = Some(set);
            Ok(Node::element("label").prop("tick", tick))
        })
    };

    let mut rt = runtime();
    rt.mount(component.element());
    rt.flush().unwrap();
    setter.borrow().clone().unwrap().set(1);
    rt.flush().unwrap();

    let refs = refs.borrow();
    assert_eq!(refs.len(), 2);
    assert!(refs[0].ptr_eq(&refs[1]));
    assert_eq!(refs[1].get(), Some(2));
}

// =============================================================================
// EFFECTS
// =============================================================================

#[test]
fn test_effects_run_after_commit_and_clean_up() {
    let log = Rc::new(RefCell::new(Vec::<String>::new()));
    let setter: Setter<i64> = Rc::new(RefCell::new(None));
    let show: Setter<bool> = Rc::new(RefCell::new(None));

    let child = {
        let log = log.clone();
        let setter = setter.clone();
        ComponentRef::function("Watcher", move |ctx, _props| {
            let (n, set) = ctx.use_state(0i64)?;
            *setter.borrow_mut() = Some(set);
            let log = log.clone();
            ctx.use_effect(
                move || {
                    log.borrow_mut().push(format!("run {n}"));
                    let log = log.clone();
                    Ok(Some(Box::new(move || log.borrow_mut().push(format!("cleanup {n}")))
                        as Box<dyn FnOnce()>))
                },
                Some(vec![Value::from(n)]),
            )?;
            Ok(Node::element("label").prop("count", n))
        })
    };
    let parent = {
        let show = show.clone();
        ComponentRef::function("Toggle", move |ctx, _props| {
            let (visible, set) = ctx.use_state(true)?;
            *show.borrow_mut() = Some(set);
            let mut frame = Node::element("frame");
            if visible {
                frame = frame.child(child.element());
            }
            Ok(frame)
        })
    };

    let mut rt = runtime();
    rt.mount(parent.element());
    rt.flush().unwrap();
    assert_eq!(*log.borrow(), vec!["run 0"]);

    // Unchanged deps: the effect stays put.
    rt.handle().request_render();
    rt.flush().unwrap();
    assert_eq!(log.borrow().len(), 1);

    setter.borrow().clone().unwrap().set(1);
    rt.flush().unwrap();
    assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1"]);

    show.borrow().clone().unwrap().set(false);
    rt.flush().unwrap();
    assert_eq!(log.borrow().last().map(String::as_str), Some("cleanup 1"));
    assert_eq!(rt.hooks().component_count(), 1);
}

#[test]
fn test_failing_effect_is_reported() {
    let component = ComponentRef::function("Broken", |ctx, _props| {
        ctx.use_effect(|| Err("disk full".into()), Some(vec![]))?;
        Ok(Node::element("label"))
    });
    let mut rt = runtime();
    rt.mount(component.element());
    rt.flush().unwrap();

    let record = rt.boundary().last().unwrap();
    assert_eq!(record.source, ErrorSource::Effect);
    assert!(record.message.contains("disk full"));
    assert_eq!(rt.renderer().widget_count(), 1);
}

// =============================================================================
// CONTEXT
// =============================================================================

#[test]
fn test_provider_change_rerenders_readers() {
    let theme = create_context("theme", String::from("light"));
    let setter: Setter<String> = Rc::new(RefCell::new(None));

    let reader = {
        let theme = theme.clone();
        ComponentRef::function("Reader", move |ctx, _props| {
            let value = ctx.use_context(&theme)?;
            Ok(Node::element("label").prop("text", value))
        })
    };
    let provider = {
        let theme = theme.clone();
        let setter = setter.clone();
        ComponentRef::function("Provider", move |ctx, _props| {
            let (value, set) = ctx.use_state(String::from("light"))?;
            *setter.borrow_mut() = Some(set);
            ctx.provide(&theme, value)?;
            Ok(Node::element("frame").children(ctx.children().to_vec()))
        })
    };

    let mut rt = runtime();
    rt.mount(provider.element().child(reader.element()));
    rt.flush().unwrap();
    assert_eq!(label_of(&rt, &[0]), Some(Value::from("light")));

    setter.borrow().clone().unwrap().set("dark".into());
    rt.flush().unwrap();
    assert_eq!(label_of(&rt, &[0]), Some(Value::from("dark")));
    assert!(!rt.is_dirty());

    assert_eq!(theme.get().as_deref(), Some("dark"));
}

#[test]
fn test_context_written_outside_render() {
    let locale = create_context("locale", String::from("en"));
    let reader = {
        let locale = locale.clone();
        ComponentRef::function("Greeting", move |ctx, _props| {
            let value = ctx.use_context(&locale)?;
            Ok(Node::element("label").prop("text", value))
        })
    };

    let mut rt = runtime();
    rt.mount(Node::element("frame").child(reader.element()));
    rt.flush().unwrap();
    assert_eq!(label_of(&rt, &[0]), Some(Value::from("en")));

    locale.set("fr".into());
    assert!(rt.is_dirty());
    rt.flush().unwrap();
    assert_eq!(label_of(&rt, &[0]), Some(Value::from("fr")));
}

// =============================================================================
// ERRORS
// =============================================================================

#[test]
fn test_component_failure_is_contained() {
    let healthy = Rc::new(Cell::new(false));
    let flaky = {
        let healthy = healthy.clone();
        ComponentRef::function("Flaky", move |_ctx, _props| {
            if healthy.get() {
                Ok(Node::element("label").prop("text", "ok"))
            } else {
                Err(Error::component("Flaky", "backend offline"))
            }
        })
    };

    let mut rt = runtime();
    rt.mount(
        Node::element("list")
            .child(Node::element("item").key("a").prop("text", "first"))
            .child(flaky.element().key("b"))
            .child(Node::element("item").key("c").prop("text", "last")),
    );
    rt.flush().unwrap();

    let root = rt.renderer().root().unwrap();
    let children = rt.renderer().children(root).to_vec();
    assert_eq!(children.len(), 3);
    assert_eq!(rt.renderer().tag(children[1]), Some(ERROR_TAG));
    assert_eq!(rt.renderer().tag(children[2]), Some("item"));
    let record = rt.boundary().last().unwrap();
    assert_eq!(record.source, ErrorSource::Expansion);
    assert!(!record.fatal);

    healthy.set(true);
    rt.handle().request_render();
    rt.flush().unwrap();
    let children = rt.renderer().children(root).to_vec();
    assert_eq!(rt.renderer().tag(children[1]), Some("label"));
    assert_eq!(rt.boundary().len(), 1);
}

#[test]
fn test_unknown_widget_kind_keeps_renderer_consistent() {
    let renderer = MemoryRenderer::new().with_known_tags(["frame", "label"]);
    let mut rt = Runtime::new(renderer, config()).unwrap();
    rt.mount(Node::element("frame").child(Node::element("label")));
    rt.flush().unwrap();
    assert!(rt.boundary().is_empty());

    rt.mount(
        Node::element("frame")
            .child(Node::element("label"))
            .child(Node::element("hologram")),
    );
    rt.flush().unwrap();

    assert_eq!(rt.renderer().widget_count(), 2);
    assert_eq!(rt.committed().map(|n| n.children.len()), Some(1));
    assert_eq!(rt.boundary().last().map(|r| r.source), Some(ErrorSource::Patch));
}

// =============================================================================
// RENDER LOOP
// =============================================================================

#[test]
fn test_background_thread_waits_for_commit() {
    let setter: Setter<i64> = Rc::new(RefCell::new(None));
    let mut rt = runtime();
    rt.mount(counter(&setter).element());
    rt.flush().unwrap();

    let set = setter.borrow().clone().unwrap();
    let handle = rt.handle();
    let waited = Arc::new(Mutex::new(None));
    let worker = {
        let waited = waited.clone();
        thread::spawn(move || {
            set.set(42);
            let result = handle.render_and_wait();
            *waited.lock() = Some(result.is_ok());
            handle.stop();
        })
    };

    rt.run();
    worker.join().unwrap();
    assert_eq!(*waited.lock(), Some(true));
    assert_eq!(label_of(&rt, &[]), Some(Value::from(42i64)));
}

#[test]
fn test_styles_follow_the_token() {
    let mut rt = runtime().with_style_resolver(UtilityStyleResolver::new());
    rt.mount(Node::element("panel").prop("class", "bg-white dark:bg-gray-900 p-2"));
    rt.flush().unwrap();

    let root = rt.renderer().root().unwrap();
    let bg = |rt: &Runtime<MemoryRenderer>| rt.renderer().props(root).and_then(|p| p.get("bg")).cloned();
    assert_eq!(bg(&rt), Some(Value::from("#ffffff")));
    assert_eq!(
        rt.renderer().props(root).and_then(|p| p.get("padx")),
        Some(&Value::Int(8))
    );

    rt.set_style_token(StyleToken::new(Breakpoint::Md, Theme::Dark));
    rt.flush().unwrap();
    assert_eq!(bg(&rt), Some(Value::from("#111827")));
}

#[test]
fn test_terminal_renderer_end_to_end() {
    let setter: Setter<i64> = Rc::new(RefCell::new(None));
    let renderer = TerminalRenderer::new(Vec::new()).with_clear(false);
    let mut rt = Runtime::new(renderer, config()).unwrap();
    let component = {
        let setter = setter.clone();
        ComponentRef::function("Clicks", move |ctx, _props| {
            let (n, set) = ctx.use_state(0i64)?;
            *setter.borrow_mut() = Some(set);
            Ok(Node::element("label").prop("text", format!("clicks: {n}")))
        })
    };
    rt.mount(Node::element("frame").child(component.element()));
    rt.flush().unwrap();
    setter.borrow().clone().unwrap().set(7);
    rt.flush().unwrap();

    assert_eq!(rt.renderer().frames(), 2);
    let out = String::from_utf8(rt.renderer().output().clone()).unwrap();
    assert!(out.contains("label clicks: 0"));
    assert!(out.ends_with("frame\r\n  label clicks: 7\r\n"));
}
