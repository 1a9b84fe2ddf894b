//! Time-travel history of stream values.
//!
//! A [`TimeTravel`] log collects snapshots of values accepted by the streams
//! that record into it. A cursor walks the log with `undo`, `redo` and
//! `jump_to`; recording always appends and moves the cursor to the newest
//! snapshot, so walking back never loses later entries.
//!
//! # Architecture
//!
//! ```text
//! Stream::set ──commit──► recorder ──► TimeTravel::record ──► VecDeque<StateSnapshot>
//!                                                                  │
//!                                      undo / redo / jump_to ◄── cursor
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::cell::Stream;
use crate::error::{Error, Result};

/// Capacity of a log built with [`TimeTravel::default`].
pub const DEFAULT_HISTORY: usize = 1000;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One recorded value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub stream: String,
    pub value: serde_json::Value,
    /// Milliseconds since the Unix epoch of the latest write it stands for.
    pub time_ms: u64,
    /// Action the value was recorded under, if any.
    pub action: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl StateSnapshot {
    pub fn new(stream: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            stream: stream.into(),
            value,
            time_ms: now_ms(),
            action: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub size: usize,
    pub capacity: usize,
    pub current: Option<usize>,
    pub recorded: u64,
    pub compressed: u64,
    pub evicted: u64,
    pub actions: usize,
    pub enabled: bool,
    pub paused: bool,
    pub compression: bool,
}

struct Log {
    snapshots: VecDeque<StateSnapshot>,
    capacity: usize,
    current: Option<usize>,
    enabled: bool,
    paused: bool,
    compression: bool,
    recorded: u64,
    compressed: u64,
    evicted: u64,
}

impl Log {
    fn at(&self, index: usize) -> Option<StateSnapshot> {
        self.snapshots.get(index).cloned()
    }

    fn stats(&self) -> HistoryStats {
        let actions: BTreeSet<&str> = self
            .snapshots
            .iter()
            .filter_map(|s| s.action.as_deref())
            .collect();
        HistoryStats {
            size: self.snapshots.len(),
            capacity: self.capacity,
            current: self.current,
            recorded: self.recorded,
            compressed: self.compressed,
            evicted: self.evicted,
            actions: actions.len(),
            enabled: self.enabled,
            paused: self.paused,
            compression: self.compression,
        }
    }
}

#[derive(Serialize)]
struct Export<'a> {
    stats: HistoryStats,
    snapshots: &'a VecDeque<StateSnapshot>,
}

/// Shared, bounded log of stream snapshots. Cloning shares the same log.
#[derive(Clone)]
pub struct TimeTravel {
    log: Arc<Mutex<Log>>,
}

impl Default for TimeTravel {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl std::fmt::Debug for TimeTravel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeTravel").field("stats", &self.stats()).finish()
    }
}

impl TimeTravel {
    /// Log keeping at most `capacity` snapshots, oldest evicted first.
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log {
                snapshots: VecDeque::with_capacity(capacity.min(64)),
                capacity,
                current: None,
                enabled: true,
                paused: false,
                compression: true,
                recorded: 0,
                compressed: 0,
                evicted: 0,
            })),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.log.lock().enabled = enabled;
    }

    /// Fold a write into the previous snapshot when it repeats the same
    /// stream and value.
    pub fn set_compression(&self, compression: bool) {
        self.log.lock().compression = compression;
    }

    /// Append a snapshot and move the cursor onto it. Returns false when the
    /// log is disabled, paused or has no capacity.
    pub fn record(&self, snapshot: StateSnapshot) -> bool {
        let mut log = self.log.lock();
        if !log.enabled || log.paused || log.capacity == 0 {
            return false;
        }

        if log.compression
            && let Some(last) = log.snapshots.back_mut()
            && last.stream == snapshot.stream
            && last.value == snapshot.value
        {
            last.time_ms = snapshot.time_ms;
            log.compressed += 1;
            return true;
        }

        if log.snapshots.len() == log.capacity {
            log.snapshots.pop_front();
            log.evicted += 1;
        }
        log.snapshots.push_back(snapshot);
        log.current = Some(log.snapshots.len() - 1);
        log.recorded += 1;
        true
    }

    /// Step the cursor back one snapshot.
    pub fn undo(&self) -> Option<StateSnapshot> {
        let mut log = self.log.lock();
        let index = log.current.filter(|&i| i > 0)? - 1;
        log.current = Some(index);
        log.at(index)
    }

    /// Step the cursor forward one snapshot.
    pub fn redo(&self) -> Option<StateSnapshot> {
        let mut log = self.log.lock();
        let index = log.current? + 1;
        if index >= log.snapshots.len() {
            return None;
        }
        log.current = Some(index);
        log.at(index)
    }

    /// Move the cursor to `index` (oldest retained snapshot is 0).
    pub fn jump_to(&self, index: usize) -> Option<StateSnapshot> {
        let mut log = self.log.lock();
        if index >= log.snapshots.len() {
            debug!(index, size = log.snapshots.len(), "jump outside history ignored");
            return None;
        }
        log.current = Some(index);
        log.at(index)
    }

    /// Snapshot under the cursor.
    pub fn current(&self) -> Option<StateSnapshot> {
        let log = self.log.lock();
        log.current.and_then(|i| log.at(i))
    }

    /// Retained snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        self.log.lock().snapshots.iter().cloned().collect()
    }

    /// Retained snapshots recorded under `action`.
    pub fn action_group(&self, action: &str) -> Vec<StateSnapshot> {
        self.log
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.action.as_deref() == Some(action))
            .cloned()
            .collect()
    }

    /// Pause recording until the returned guard is finished or dropped.
    /// Only [`ActionGuard::finish`] leaves a completion marker.
    pub fn begin_action(&self, name: impl Into<String>) -> ActionGuard {
        self.log.lock().paused = true;
        ActionGuard {
            log: self.clone(),
            name: name.into(),
        }
    }

    pub fn clear(&self) {
        let mut log = self.log.lock();
        log.snapshots.clear();
        log.current = None;
    }

    pub fn stats(&self) -> HistoryStats {
        self.log.lock().stats()
    }

    /// The whole log and its stats as pretty-printed JSON.
    pub fn export_json(&self) -> Result<String> {
        let log = self.log.lock();
        serde_json::to_string_pretty(&Export {
            stats: log.stats(),
            snapshots: &log.snapshots,
        })
        .map_err(|e| Error::Export(e.to_string()))
    }

    /// Like [`TimeTravel::export_json`], written to `writer`.
    pub fn export_to(&self, writer: impl Write) -> Result<()> {
        let log = self.log.lock();
        serde_json::to_writer_pretty(
            writer,
            &Export {
                stats: log.stats(),
                snapshots: &log.snapshots,
            },
        )
        .map_err(|e| Error::Export(e.to_string()))
    }
}

/// Recording pause for the duration of a named action.
#[must_use = "dropping an ActionGuard resumes recording without a completion marker"]
pub struct ActionGuard {
    log: TimeTravel,
    name: String,
}

impl ActionGuard {
    /// Resume recording and log that the action completed.
    pub fn finish(self) {
        self.log.log.lock().paused = false;
        let marker = StateSnapshot::new(
            format!("action:{}", self.name),
            serde_json::json!({ "status": "completed" }),
        )
        .action(self.name.clone())
        .meta("type", "action_completion");
        self.log.record(marker);
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.log.log.lock().paused = false;
    }
}

// =============================================================================
// Stream hookup
// =============================================================================

impl<T: Clone + Send + Serialize + 'static> Stream<T> {
    /// Record every value this stream accepts into `log` from now on.
    pub fn record_into(&self, log: &TimeTravel) {
        let log = log.clone();
        let name = self.name().to_string();
        self.set_recorder(Arc::new(move |value: &T| match serde_json::to_value(value) {
            Ok(json) => {
                log.record(StateSnapshot::new(name.clone(), json));
            }
            Err(e) => warn!(stream = %name, error = %e, "value could not be recorded"),
        }));
    }
}
