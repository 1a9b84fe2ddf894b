//! Hook state store.
//!
//! Slots are keyed by `(render path, slot id)`. The render path is the tree
//! position a component renders at plus the names of the components stacked
//! at that position (a component whose output root is another component
//! shares its position). Slots live until their component is disposed.
//!
//! # Architecture
//!
//! ```text
//! HookStore
//!   components: RenderPath -> ComponentSlots
//!                               slots: SlotId -> Slot (state | ref | effect | context)
//!                               instance: stateful component, if any
//!   trigger: Stream<u64>     bumped by every effective set_state
//!   pending: Vec<PendingEffect>
//! ```

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, trace};

use super::effect::{EffectRecord, PendingEffect};
use super::refs::RefSlot;
use crate::error::{Error, panic_message};
use crate::stream::{Stream, Subscription};
use crate::tree::Component;
use crate::types::Path;

// =============================================================================
// Addressing
// =============================================================================

/// Where a component renders: its tree position and the stack of components
/// rendering at that position, outermost first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderPath {
    tree: Path,
    components: Vec<Arc<str>>,
}

impl RenderPath {
    /// Path of a component rendering at `tree`.
    pub fn component(tree: Path, name: impl AsRef<str>) -> Self {
        Self {
            tree,
            components: vec![Arc::from(name.as_ref())],
        }
    }

    pub(crate) fn from_parts(tree: Path, components: Vec<Arc<str>>) -> Self {
        Self { tree, components }
    }

    /// Tree position of the component's output root.
    pub fn tree(&self) -> &Path {
        &self.tree
    }

    /// Name of the innermost component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|n| n.as_ref())
    }

    /// Path of a component rendered as this component's output root.
    pub fn nested(&self, name: Arc<str>) -> Self {
        let mut components = self.components.clone();
        components.push(name);
        Self {
            tree: self.tree.clone(),
            components,
        }
    }
}

impl fmt::Display for RenderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.tree)?;
        for (i, name) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(">")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Slot within one component: an explicit key or the hook call ordinal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotId {
    Key(String),
    Call(usize),
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Key(key) => f.write_str(key),
            SlotId::Call(n) => write!(f, "call#{n}"),
        }
    }
}

// =============================================================================
// Slots
// =============================================================================

/// Type-erased state stream.
pub(crate) trait StateSlot: Send {
    fn dispose(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Clone + Send + 'static> StateSlot for Stream<T> {
    fn dispose(&self) {
        Stream::dispose(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct ContextSlot {
    pub(crate) stream_id: u64,
    pub(crate) subscription: Subscription,
}

pub(crate) enum Slot {
    State(Box<dyn StateSlot>),
    Ref(Box<dyn RefSlot>),
    Effect(EffectRecord),
    Context(ContextSlot),
}

impl Slot {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Slot::State(_) => "state",
            Slot::Ref(_) => "ref",
            Slot::Effect(_) => "effect",
            Slot::Context(_) => "context",
        }
    }
}

struct Instance {
    identity: usize,
    component: Box<dyn Component>,
}

#[derive(Default)]
pub(crate) struct ComponentSlots {
    pub(crate) slots: HashMap<SlotId, Slot>,
    instance: Option<Instance>,
}

impl ComponentSlots {
    /// Release every resource held by this component.
    fn dispose(self, path: &RenderPath, errors: &mut Vec<Error>) {
        for (_, slot) in self.slots {
            match slot {
                Slot::State(stream) => stream.dispose(),
                Slot::Ref(cell) => cell.clear(),
                Slot::Effect(mut record) => errors.extend(record.run_cleanup(path)),
                Slot::Context(ctx) => ctx.subscription.unsubscribe(),
            }
        }
        if let Some(mut instance) = self.instance {
            let unmount = catch_unwind(AssertUnwindSafe(|| instance.component.on_unmount()));
            if let Err(payload) = unmount {
                errors.push(Error::component(
                    path.name().unwrap_or("?"),
                    format!("on_unmount panicked: {}", panic_message(payload.as_ref())),
                ));
            }
        }
    }
}

// =============================================================================
// HookStore
// =============================================================================

/// Outcome of a disposal sweep.
#[derive(Debug, Default)]
pub struct DisposeReport {
    pub components: usize,
    pub errors: Vec<Error>,
}

/// Per-runtime table of hook slots. Owned by the scheduler.
pub struct HookStore {
    components: HashMap<RenderPath, ComponentSlots>,
    trigger: Stream<u64>,
    pending: Vec<PendingEffect>,
}

impl HookStore {
    pub fn new() -> Self {
        Self {
            components: HashMap::new(),
            trigger: Stream::named("render-trigger", 0),
            pending: Vec::new(),
        }
    }

    /// The stream every effective `set_state` increments.
    pub fn trigger(&self) -> &Stream<u64> {
        &self.trigger
    }

    /// True when no component holds any slot or instance.
    pub fn is_empty(&self) -> bool {
        self.components
            .values()
            .all(|c| c.slots.is_empty() && c.instance.is_none())
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn slot_count(&self) -> usize {
        self.components.values().map(|c| c.slots.len()).sum()
    }

    pub fn contains(&self, path: &RenderPath) -> bool {
        self.components.contains_key(path)
    }

    pub fn pending_effects(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn component_mut(&mut self, path: &RenderPath) -> &mut ComponentSlots {
        if !self.components.contains_key(path) {
            trace!(path = %path, "new component slots");
        }
        self.components.entry(path.clone()).or_default()
    }

    pub(crate) fn queue_effect(&mut self, effect: PendingEffect) {
        self.pending.push(effect);
    }

    /// Drop effects queued by a pass that did not commit.
    pub(crate) fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Take the stateful instance at `path` if it was built by the component
    /// with this identity. An instance of another component is unmounted.
    pub(crate) fn take_instance(
        &mut self,
        path: &RenderPath,
        identity: usize,
        errors: &mut Vec<Error>,
    ) -> Option<Box<dyn Component>> {
        let slots = self.components.get_mut(path)?;
        let instance = slots.instance.take()?;
        if instance.identity == identity {
            return Some(instance.component);
        }
        let stale = ComponentSlots {
            slots: HashMap::new(),
            instance: Some(instance),
        };
        stale.dispose(path, errors);
        None
    }

    pub(crate) fn put_instance(
        &mut self,
        path: &RenderPath,
        identity: usize,
        component: Box<dyn Component>,
    ) {
        self.component_mut(path).instance = Some(Instance {
            identity,
            component,
        });
    }

    /// Run queued effects in queue order. Each failure is reported; the
    /// remaining effects still run.
    pub fn flush_effects(&mut self) -> Vec<Error> {
        let pending = std::mem::take(&mut self.pending);
        let mut errors = Vec::new();
        for effect in pending {
            let record = self
                .components
                .get_mut(&effect.path)
                .and_then(|c| c.slots.get_mut(&effect.slot));
            match record {
                Some(Slot::Effect(record)) => errors.extend(effect.run(record)),
                _ => debug!(path = %effect.path, "effect slot disposed before flush"),
            }
        }
        errors
    }

    /// Dispose every component at or below `prefix` that was not rendered
    /// in the current pass.
    pub fn dispose_subtree(&mut self, prefix: &Path, live: &HashSet<RenderPath>) -> DisposeReport {
        self.dispose_where(|path| path.tree().starts_with(prefix) && !live.contains(path))
    }

    /// Dispose every component that was not rendered in the current pass.
    pub fn sweep(&mut self, live: &HashSet<RenderPath>) -> DisposeReport {
        self.dispose_where(|path| !live.contains(path))
    }

    /// Dispose everything, e.g. when the runtime unmounts.
    pub fn clear(&mut self) -> DisposeReport {
        self.pending.clear();
        self.dispose_where(|_| true)
    }

    fn dispose_where(&mut self, doomed: impl Fn(&RenderPath) -> bool) -> DisposeReport {
        let paths: Vec<RenderPath> = self
            .components
            .keys()
            .filter(|p| doomed(p))
            .cloned()
            .collect();
        let mut report = DisposeReport::default();
        for path in paths {
            if let Some(slots) = self.components.remove(&path) {
                debug!(path = %path, slots = slots.slots.len(), "disposing component slots");
                slots.dispose(&path, &mut report.errors);
                report.components += 1;
            }
        }
        report
    }
}

impl Default for HookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::refs::Ref;

    fn path(tree: Path) -> RenderPath {
        RenderPath::component(tree, "Item")
    }

    fn with_state(store: &mut HookStore, at: &RenderPath) -> Stream<i32> {
        let stream = Stream::new(1);
        store
            .component_mut(at)
            .slots
            .insert(SlotId::Call(0), Slot::State(Box::new(stream.clone())));
        stream
    }

    #[test]
    fn test_render_path_display() {
        let p = RenderPath::component(Path::root().child(0), "App").nested(Arc::from("Inner"));
        assert_eq!(p.to_string(), "/0:App>Inner");
        assert_eq!(p.name(), Some("Inner"));
        assert_eq!(SlotId::Call(2).to_string(), "call#2");
    }

    #[test]
    fn test_dispose_subtree_matches_prefix() {
        let mut store = HookStore::new();
        let inside = path(Path::root().child("a").child(0));
        let outside = path(Path::root().child("b"));
        let inside_stream = with_state(&mut store, &inside);
        let outside_stream = with_state(&mut store, &outside);
        let cell = Ref::new(5);
        store
            .component_mut(&inside)
            .slots
            .insert(SlotId::Call(1), Slot::Ref(Box::new(cell.clone())));

        let report = store.dispose_subtree(&Path::root().child("a"), &HashSet::new());
        assert_eq!(report.components, 1);
        assert!(inside_stream.is_disposed());
        assert!(cell.is_cleared());
        assert!(!outside_stream.is_disposed());
        assert!(store.contains(&outside));
    }

    #[test]
    fn test_live_components_survive() {
        let mut store = HookStore::new();
        let p = path(Path::root());
        let stream = with_state(&mut store, &p);
        let live: HashSet<RenderPath> = [p.clone()].into_iter().collect();
        assert_eq!(store.dispose_subtree(&Path::root(), &live).components, 0);
        assert_eq!(store.sweep(&live).components, 0);
        assert!(!stream.is_disposed());
        assert_eq!(store.sweep(&HashSet::new()).components, 1);
        assert!(stream.is_disposed());
        assert!(store.is_empty());
    }

    #[test]
    fn test_context_subscription_cancelled_on_dispose() {
        let mut store = HookStore::new();
        let ctx = Stream::new("light");
        let p = path(Path::root());
        let subscription = ctx.subscribe(|_| {});
        store.component_mut(&p).slots.insert(
            SlotId::Call(0),
            Slot::Context(ContextSlot {
                stream_id: ctx.id(),
                subscription,
            }),
        );
        assert_eq!(ctx.subscriber_count(), 1);
        store.clear();
        assert_eq!(ctx.subscriber_count(), 0);
    }
}
