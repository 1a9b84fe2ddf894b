//! Shared context values.
//!
//! A [`Context`] is a named stream with a default value. Components read it
//! with `use_context`, which also subscribes them so a change schedules a
//! render; a provider writes it during render with `provide`.

use std::fmt;
use std::sync::Arc;

use crate::stream::{SetOutcome, Stream};

pub struct Context<T> {
    name: Arc<str>,
    stream: Stream<T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            stream: self.stream.clone(),
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.name)
    }
}

/// Create a context holding `default` until something provides a value.
pub fn create_context<T: Clone + Send + 'static>(name: impl AsRef<str>, default: T) -> Context<T> {
    let name: Arc<str> = Arc::from(name.as_ref());
    Context {
        stream: Stream::named(format!("context {name}"), default),
        name,
    }
}

impl<T: Clone + Send + 'static> Context<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn get(&self) -> Option<T> {
        self.stream.get()
    }

    /// Set the value from outside a render. Subscribed components re-render.
    pub fn set(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let outcome = self
            .stream
            .modify(|current| (current != Some(&value)).then_some(value));
        matches!(outcome, SetOutcome::Delivered | SetOutcome::Coalesced)
    }

    pub fn stream(&self) -> &Stream<T> {
        &self.stream
    }
}
