//! Effect records and the effect queue.
//!
//! `use_effect` never runs anything during render. It compares the
//! dependency list with the one stored at the effect's last run and queues
//! the effect when they differ. The scheduler flushes the queue after the
//! pass has been applied to the renderer.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{Error, panic_message};
use crate::types::Value;

use super::store::{RenderPath, SlotId};

/// Cleanup returned by an effect. Runs before the effect's next run and
/// when its component leaves the tree.
pub type Cleanup = Box<dyn FnOnce()>;

/// What an effect returns.
pub type EffectResult =
    std::result::Result<Option<Cleanup>, Box<dyn std::error::Error + Send + Sync>>;

pub(crate) type EffectFn = Box<dyn FnOnce() -> EffectResult>;

/// Stored state of one effect slot.
#[derive(Default)]
pub(crate) struct EffectRecord {
    pub(crate) deps: Option<Vec<Value>>,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) has_run: bool,
}

impl EffectRecord {
    /// Whether an effect with these deps must run this pass.
    pub(crate) fn should_run(&self, deps: Option<&[Value]>) -> bool {
        match deps {
            _ if !self.has_run => true,
            None => true,
            Some(deps) => self.deps.as_deref() != Some(deps),
        }
    }

    /// Run the stored cleanup, if any.
    pub(crate) fn run_cleanup(&mut self, path: &RenderPath) -> Option<Error> {
        let cleanup = self.cleanup.take()?;
        catch_unwind(AssertUnwindSafe(cleanup))
            .err()
            .map(|payload| Error::EffectThrew {
                path: path.to_string(),
                message: format!("cleanup panicked: {}", panic_message(payload.as_ref())),
            })
    }
}

/// An effect waiting for the end of the pass.
pub(crate) struct PendingEffect {
    pub(crate) path: RenderPath,
    pub(crate) slot: SlotId,
    pub(crate) deps: Option<Vec<Value>>,
    pub(crate) run: EffectFn,
}

impl PendingEffect {
    /// Run the effect against its record: previous cleanup first, then the
    /// effect body. Errors and panics are returned, never propagated.
    pub(crate) fn run(self, record: &mut EffectRecord) -> Vec<Error> {
        let mut errors = Vec::new();
        if let Some(err) = record.run_cleanup(&self.path) {
            errors.push(err);
        }

        record.deps = self.deps;
        record.has_run = true;

        let message = match catch_unwind(AssertUnwindSafe(self.run)) {
            Ok(Ok(cleanup)) => {
                record.cleanup = cleanup;
                return errors;
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        errors.push(Error::EffectThrew {
            path: self.path.to_string(),
            message,
        });
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Path;
    use std::cell::Cell;
    use std::rc::Rc;

    fn pending(deps: Option<Vec<Value>>, run: impl FnOnce() -> EffectResult + 'static) -> PendingEffect {
        PendingEffect {
            path: RenderPath::component(Path::root(), "Effects"),
            slot: SlotId::Call(0),
            deps,
            run: Box::new(run),
        }
    }

    #[test]
    fn test_should_run() {
        let mut record = EffectRecord::default();
        assert!(record.should_run(Some(&[])));
        record.has_run = true;
        record.deps = Some(vec![]);
        assert!(!record.should_run(Some(&[])));
        assert!(record.should_run(None));
        record.deps = Some(vec![Value::from(1)]);
        assert!(!record.should_run(Some(&[Value::from(1)])));
        assert!(record.should_run(Some(&[Value::from(2)])));
    }

    #[test]
    fn test_cleanup_runs_before_next_run() {
        let log = Rc::new(Cell::new(0));
        let mut record = EffectRecord::default();

        let l = log.clone();
        let errors = pending(None, move || {
            let l2 = l.clone();
            Ok(Some(Box::new(move || l2.set(l2.get() + 10)) as Cleanup))
        })
        .run(&mut record);
        assert!(errors.is_empty());
        assert_eq!(log.get(), 0);

        let errors = pending(None, || Ok(None)).run(&mut record);
        assert!(errors.is_empty());
        assert_eq!(log.get(), 10);
        assert!(record.cleanup.is_none());
    }

    #[test]
    fn test_errors_and_panics_are_reported() {
        let mut record = EffectRecord::default();
        let errors = pending(Some(vec![]), || Err("no backend".into())).run(&mut record);
        assert!(matches!(&errors[..], [Error::EffectThrew { message, .. }] if message == "no backend"));
        assert!(record.has_run);

        let errors = pending(None, || panic!("effect exploded")).run(&mut record);
        assert!(matches!(&errors[..], [Error::EffectThrew { message, .. }] if message.contains("exploded")));
    }
}
