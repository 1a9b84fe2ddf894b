//! Error taxonomy.
//!
//! Fatal errors abort a render pass and leave the last committed tree on
//! screen. Everything else is contained to the component, effect or patch
//! that raised it.

use std::time::Duration;

use crate::types::Path;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{hook} called outside of a component render")]
    NoRenderContext { hook: &'static str },

    #[error("component expansion exceeded depth {limit} at {path} (self-referential component?)")]
    ExpansionDepthExceeded { limit: usize, path: String },

    #[error("invalid tree at {path}: {reason}")]
    InvalidTree { path: Path, reason: String },

    #[error("hook slot {slot} at {path} holds a different kind of state; hooks must be called in a stable order")]
    HookMismatch { path: String, slot: String },

    #[error("write to disposed stream {stream}")]
    StreamDisposedWrite { stream: String },

    #[error("effect at {path} failed: {message}")]
    EffectThrew { path: String, message: String },

    #[error("component {component} failed: {message}")]
    Component { component: String, message: String },

    #[error("patch target {path} not found for {op}")]
    PatchTarget { path: Path, op: &'static str },

    #[error("renderer error: {0}")]
    Renderer(#[from] RenderError),

    #[error("render pass for generation {generation} failed; the previous tree stays on screen")]
    PassFailed { generation: u64 },

    #[error("timed out after {waited:?} waiting for the UI thread to commit")]
    MarshalTimeout { waited: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("history export failed: {0}")]
    Export(String),
}

impl Error {
    /// Fatal errors abort the whole render pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoRenderContext { .. } | Error::ExpansionDepthExceeded { .. }
        )
    }

    /// Shorthand for a component failure carrying a message.
    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Failure reported by a renderer collaborator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("unknown widget kind {0:?}")]
    UnknownTag(String),

    #[error("widget no longer exists")]
    StaleWidget,

    #[error("{0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::NoRenderContext { hook: "use_state" }.is_fatal());
        assert!(
            Error::ExpansionDepthExceeded {
                limit: 3,
                path: "/".into()
            }
            .is_fatal()
        );
        assert!(
            !Error::InvalidTree {
                path: Path::root(),
                reason: "empty tag".into()
            }
            .is_fatal()
        );
        assert!(!Error::component("Counter", "boom").is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = Error::InvalidTree {
            path: Path::root().child(1),
            reason: "duplicate key a".into(),
        };
        assert_eq!(err.to_string(), "invalid tree at /1: duplicate key a");
        let err: Error = RenderError::UnknownTag("blink".into()).into();
        assert_eq!(err.to_string(), "renderer error: unknown widget kind \"blink\"");
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
