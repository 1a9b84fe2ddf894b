//! The render context threaded through component expansion.
//!
//! A [`RenderContext`] borrows the hook store for the length of one render
//! pass. Expansion pushes a frame for every component it renders; hooks
//! resolve their slot from the innermost frame and its call ordinal.
//!
//! Hooks must be called in the same order on every render of a component:
//! the n-th unkeyed hook call always maps to slot `call#n`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use super::effect::{EffectRecord, EffectResult, PendingEffect};
use super::provider::Context;
use super::refs::Ref;
use super::state::{SetState, bump};
use super::store::{ContextSlot, HookStore, RenderPath, Slot, SlotId};
use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::tree::Node;
use crate::types::{Path, Value};

struct Frame {
    path: RenderPath,
    ordinal: usize,
    children: Vec<Node>,
}

pub struct RenderContext<'a> {
    store: &'a mut HookStore,
    frames: Vec<Frame>,
    max_depth: usize,
    visited: HashSet<RenderPath>,
    contained: Vec<Error>,
}

impl<'a> RenderContext<'a> {
    pub fn new(store: &'a mut HookStore, max_depth: usize) -> Self {
        Self {
            store,
            frames: Vec::new(),
            max_depth,
            visited: HashSet::new(),
            contained: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // frames
    // -------------------------------------------------------------------------

    /// Number of component renders currently nested.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Render path of the component being rendered.
    pub fn render_path(&self) -> Option<&RenderPath> {
        self.frames.last().map(|f| &f.path)
    }

    /// Children passed to the component being rendered.
    pub fn children(&self) -> &[Node] {
        self.frames.last().map(|f| f.children.as_slice()).unwrap_or(&[])
    }

    /// Render path for a component about to render at `tree`.
    pub(crate) fn path_for(&self, tree: &Path, name: Arc<str>) -> RenderPath {
        match self.frames.last() {
            Some(parent) if parent.path.tree() == tree => parent.path.nested(name),
            _ => RenderPath::from_parts(tree.clone(), vec![name]),
        }
    }

    pub(crate) fn enter(&mut self, path: RenderPath, children: Vec<Node>) -> Result<()> {
        if self.frames.len() >= self.max_depth {
            return Err(Error::ExpansionDepthExceeded {
                limit: self.max_depth,
                path: path.to_string(),
            });
        }
        self.visited.insert(path.clone());
        self.frames.push(Frame {
            path,
            ordinal: 0,
            children,
        });
        Ok(())
    }

    pub(crate) fn exit(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn store_mut(&mut self) -> &mut HookStore {
        self.store
    }

    /// Record an error contained to one component.
    pub(crate) fn contain(&mut self, error: Error) {
        self.contained.push(error);
    }

    /// Components rendered so far and errors contained along the way.
    pub(crate) fn finish(self) -> (HashSet<RenderPath>, Vec<Error>) {
        (self.visited, self.contained)
    }

    fn slot(&mut self, hook: &'static str, key: Option<&str>) -> Result<(RenderPath, SlotId)> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(Error::NoRenderContext { hook })?;
        let ordinal = frame.ordinal;
        frame.ordinal += 1;
        let id = match key {
            Some(key) => SlotId::Key(key.to_string()),
            None => SlotId::Call(ordinal),
        };
        Ok((frame.path.clone(), id))
    }

    // -------------------------------------------------------------------------
    // hooks
    // -------------------------------------------------------------------------

    /// State slot at the next call ordinal.
    pub fn use_state<T>(&mut self, initial: T) -> Result<(T, SetState<T>)>
    where
        T: Clone + PartialEq + Send + 'static,
    {
        self.state_slot(None, initial)
    }

    /// State slot under an explicit key, stable even if hook order changes.
    pub fn use_state_keyed<T>(&mut self, key: &str, initial: T) -> Result<(T, SetState<T>)>
    where
        T: Clone + PartialEq + Send + 'static,
    {
        self.state_slot(Some(key), initial)
    }

    fn state_slot<T>(&mut self, key: Option<&str>, initial: T) -> Result<(T, SetState<T>)>
    where
        T: Clone + PartialEq + Send + 'static,
    {
        let (path, id) = self.slot("use_state", key)?;
        let trigger = self.store.trigger().clone();
        let component = self.store.component_mut(&path);

        let stream = match component.slots.get(&id) {
            Some(Slot::State(cell)) => cell
                .as_any()
                .downcast_ref::<Stream<T>>()
                .cloned()
                .ok_or_else(|| mismatch(&path, &id))?,
            Some(_) => return Err(mismatch(&path, &id)),
            None => {
                let stream = Stream::named(format!("state {path} {id}"), initial.clone());
                component
                    .slots
                    .insert(id, Slot::State(Box::new(stream.clone())));
                stream
            }
        };

        let value = stream.get().unwrap_or(initial);
        Ok((value, SetState::new(stream, trigger)))
    }

    /// Queue `effect` to run after this pass is applied.
    ///
    /// `deps`: `None` runs every pass, `Some(vec![])` runs once on mount,
    /// any other list runs when one of its values changed.
    pub fn use_effect(
        &mut self,
        effect: impl FnOnce() -> EffectResult + 'static,
        deps: Option<Vec<Value>>,
    ) -> Result<()> {
        let (path, id) = self.slot("use_effect", None)?;
        let component = self.store.component_mut(&path);
        let record = match component.slots.entry(id.clone()).or_insert_with(|| {
            Slot::Effect(EffectRecord::default())
        }) {
            Slot::Effect(record) => record,
            _ => return Err(mismatch(&path, &id)),
        };

        if record.should_run(deps.as_deref()) {
            trace!(path = %path, slot = %id, "effect queued");
            self.store.queue_effect(PendingEffect {
                path,
                slot: id,
                deps,
                run: Box::new(effect),
            });
        }
        Ok(())
    }

    /// Mutable cell returned unchanged on every render.
    pub fn use_ref<T: 'static>(&mut self, initial: T) -> Result<Ref<T>> {
        let (path, id) = self.slot("use_ref", None)?;
        let component = self.store.component_mut(&path);
        match component.slots.get(&id) {
            Some(Slot::Ref(cell)) => cell
                .as_any()
                .downcast_ref::<Ref<T>>()
                .cloned()
                .ok_or_else(|| mismatch(&path, &id)),
            Some(_) => Err(mismatch(&path, &id)),
            None => {
                let cell = Ref::new(initial);
                component.slots.insert(id, Slot::Ref(Box::new(cell.clone())));
                Ok(cell)
            }
        }
    }

    /// Current value of `context`. The component re-renders when it changes.
    pub fn use_context<T: Clone + Send + 'static>(&mut self, context: &Context<T>) -> Result<T> {
        let (path, id) = self.slot("use_context", None)?;
        let stream = context.stream();
        let trigger = self.store.trigger().clone();
        let component = self.store.component_mut(&path);

        match component.slots.get(&id) {
            Some(Slot::Context(slot)) if slot.stream_id == stream.id() => {}
            Some(_) => return Err(mismatch(&path, &id)),
            None => {
                let subscription = stream.subscribe(move |_: &T| bump(&trigger));
                component.slots.insert(
                    id,
                    Slot::Context(ContextSlot {
                        stream_id: stream.id(),
                        subscription,
                    }),
                );
            }
        }

        stream.get().ok_or_else(|| {
            Error::component(
                path.name().unwrap_or("?"),
                format!("context {} has no value", context.name()),
            )
        })
    }

    /// Provide a value for `context` while rendering. A no-op when the value
    /// is unchanged; otherwise every reader re-renders.
    pub fn provide<T>(&mut self, context: &Context<T>, value: T) -> Result<()>
    where
        T: Clone + PartialEq + Send + 'static,
    {
        if self.frames.is_empty() {
            return Err(Error::NoRenderContext { hook: "provide" });
        }
        context.set(value);
        Ok(())
    }
}

fn mismatch(path: &RenderPath, id: &SlotId) -> Error {
    Error::HookMismatch {
        path: path.to_string(),
        slot: id.to_string(),
    }
}
