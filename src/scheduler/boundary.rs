//! Error boundary: where contained errors end up.
//!
//! Every non-fatal error a pass contains (component failures, invalid
//! subtrees, effect failures, patch failures) and every fatal error that
//! aborts a pass is recorded here. The history is bounded; the oldest
//! records go first.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{error, warn};

use crate::error::Error;

/// Pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Expansion,
    Disposal,
    Patch,
    Effect,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub source: ErrorSource,
    /// Render or tree path the error names, if any.
    pub path: Option<String>,
    pub message: String,
    pub fatal: bool,
    /// Milliseconds since the Unix epoch.
    pub time_ms: u64,
    #[serde(skip)]
    pub error: Error,
}

impl ErrorRecord {
    fn new(source: ErrorSource, error: Error) -> Self {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            source,
            path: path_of(&error),
            message: error.to_string(),
            fatal: error.is_fatal(),
            time_ms,
            error,
        }
    }
}

fn path_of(error: &Error) -> Option<String> {
    match error {
        Error::ExpansionDepthExceeded { path, .. }
        | Error::HookMismatch { path, .. }
        | Error::EffectThrew { path, .. } => Some(path.clone()),
        Error::InvalidTree { path, .. } | Error::PatchTarget { path, .. } => {
            Some(path.to_string())
        }
        Error::Component { component, .. } => Some(component.clone()),
        _ => None,
    }
}

/// Opaque handle for removing an error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type ErrorHandler = Box<dyn Fn(&ErrorRecord)>;

pub struct ErrorBoundary {
    history: VecDeque<ErrorRecord>,
    capacity: usize,
    handlers: Vec<(HandlerId, ErrorHandler)>,
    next_handler: u64,
    total: u64,
}

impl ErrorBoundary {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            handlers: Vec::new(),
            next_handler: 0,
            total: 0,
        }
    }

    /// Call `handler` for every error reported from now on.
    pub fn on_error(&mut self, handler: impl Fn(&ErrorRecord) + 'static) -> HandlerId {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(h, _)| *h != id);
        self.handlers.len() != before
    }

    pub fn report(&mut self, source: ErrorSource, error: Error) {
        let record = ErrorRecord::new(source, error);
        if record.fatal {
            error!(source = ?source, error = %record.message, "render pass aborted");
        } else {
            warn!(source = ?source, error = %record.message, "error contained");
        }

        for (_, handler) in &self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&record))).is_err() {
                warn!("error handler panicked");
            }
        }

        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    pub fn report_all(&mut self, source: ErrorSource, errors: impl IntoIterator<Item = Error>) {
        for error in errors {
            self.report(source, error);
        }
    }

    /// Retained records, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.history.iter()
    }

    pub fn last(&self) -> Option<&ErrorRecord> {
        self.history.back()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Errors reported since creation, including ones no longer retained.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Default for ErrorBoundary {
    fn default() -> Self {
        Self::new(1000)
    }
}
