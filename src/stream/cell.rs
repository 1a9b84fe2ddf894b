//! The stream cell.
//!
//! A [`Stream`] holds the latest value and a list of subscribers. Every
//! operation takes the stream's mutex, so `set`, `subscribe` and `dispose`
//! are mutually exclusive on one stream; subscribers themselves run with
//! the lock released.
//!
//! # Delivery
//!
//! Only one thread delivers for a given stream at a time. A value set while
//! a delivery is running is parked in a single pending slot; a newer value
//! overwrites it and the older one is dropped (latest value wins). The
//! delivering thread drains the slot before it returns, so values are seen
//! in `set` order and nothing is lost except overwritten intermediates.
//!
//! # Errors
//!
//! A subscriber that panics, or an operator that reports a failure, raises a
//! [`StreamFault`]. Handlers registered with [`Stream::catch_error`] see it;
//! without handlers the fault is only logged.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::timer::{self, CancelToken};
use crate::error::{Error, Result, panic_message};

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;
type FaultHandler = Arc<dyn Fn(&StreamFault) + Send + Sync>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Result of writing to a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// Subscribers were notified on this thread.
    Delivered,
    /// Another thread is delivering; the value was handed to it.
    Coalesced,
    /// Held until the debounce delay passes without another write.
    Debounced,
    /// Dropped because it arrived inside the throttle window.
    Throttled,
    /// A conditional write decided not to change the value.
    Unchanged,
    /// The stream is disposed; the write was dropped.
    Disposed,
}

/// Per-stream counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub sets: u64,
    pub deliveries: u64,
    pub dropped: u64,
    pub throttled: u64,
    pub debounced: u64,
    pub disposed_writes: u64,
    pub subscriber_panics: u64,
    pub faults: u64,
}

/// A failure raised while a stream was delivering or deriving a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFault {
    pub stream: String,
    pub message: String,
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle to a subscriber. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the subscriber for as long as the stream lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// Stream
// =============================================================================

struct State<T> {
    value: Option<T>,
    subscribers: Vec<(u64, Subscriber<T>)>,
    next_subscriber: u64,
    debounce: Option<Duration>,
    throttle: Option<Duration>,
    last_accepted: Option<Instant>,
    debounce_token: Option<CancelToken>,
    debounced: Option<T>,
    on_debounced: Option<Arc<dyn Fn() + Send + Sync>>,
    history: VecDeque<T>,
    history_capacity: usize,
    recorder: Option<Subscriber<T>>,
    fault_handlers: Vec<FaultHandler>,
    delivering: bool,
    pending: Option<T>,
    disposed: bool,
    upstream: Vec<Subscription>,
    stats: StreamStats,
}

struct Inner<T> {
    id: u64,
    name: String,
    state: Mutex<State<T>>,
}

/// A typed, subscribable value cell. Cloning shares the same cell.
pub struct Stream<T> {
    inner: Arc<Inner<T>>,
}

/// Non-owning handle to a stream.
pub struct WeakStream<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Clone for WeakStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakStream<T> {
    pub fn upgrade(&self) -> Option<Stream<T>> {
        self.inner.upgrade().map(|inner| Stream { inner })
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Stream<T> {
    /// Stream seeded with a value.
    pub fn new(value: T) -> Self {
        Self::build(None, Some(value))
    }

    /// Stream seeded with a value and a diagnostic name.
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self::build(Some(name.into()), Some(value))
    }

    /// Stream that has not emitted yet.
    pub fn empty() -> Self {
        Self::build(None, None)
    }

    pub(crate) fn build(name: Option<String>, value: Option<T>) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(Inner {
                id,
                name: name.unwrap_or_else(|| format!("stream#{id}")),
                state: Mutex::new(State {
                    value,
                    subscribers: Vec::new(),
                    next_subscriber: 0,
                    debounce: None,
                    throttle: None,
                    last_accepted: None,
                    debounce_token: None,
                    debounced: None,
                    on_debounced: None,
                    history: VecDeque::new(),
                    history_capacity: 0,
                    recorder: None,
                    fault_handlers: Vec::new(),
                    delivering: false,
                    pending: None,
                    disposed: false,
                    upstream: Vec::new(),
                    stats: StreamStats::default(),
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn downgrade(&self) -> WeakStream<T> {
        WeakStream {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Stream<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Latest accepted value.
    pub fn get(&self) -> Option<T> {
        self.lock().value.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn stats(&self) -> StreamStats {
        self.lock().stats.clone()
    }

    /// Hold writes until `delay` passes without another write.
    pub fn set_debounce(&self, delay: Option<Duration>) {
        self.lock().debounce = delay;
    }

    /// Call `hook` after each debounced value has landed and been delivered.
    pub(crate) fn on_debounced(&self, hook: Arc<dyn Fn() + Send + Sync>) {
        self.lock().on_debounced = Some(hook);
    }

    /// Drop writes arriving sooner than `delay` after the last accepted one.
    pub fn set_throttle(&self, delay: Option<Duration>) {
        self.lock().throttle = delay;
    }

    /// Keep the last `capacity` accepted values. Zero turns tracking off and
    /// forgets what was kept.
    pub fn track_history(&self, capacity: usize) -> Self {
        let mut state = self.lock();
        state.history_capacity = capacity;
        while state.history.len() > capacity {
            state.history.pop_front();
        }
        drop(state);
        self.clone()
    }

    /// Tracked values, oldest first.
    pub fn history(&self) -> Vec<T> {
        self.lock().history.iter().cloned().collect()
    }

    /// Call `recorder` with every accepted value. It runs under the stream
    /// lock and must not touch this stream.
    pub(crate) fn set_recorder(&self, recorder: Subscriber<T>) {
        self.lock().recorder = Some(recorder);
    }

    /// Call `handler` for every fault this stream raises from now on.
    pub fn catch_error(&self, handler: impl Fn(&StreamFault) + Send + Sync + 'static) -> Self {
        self.lock().fault_handlers.push(Arc::new(handler));
        self.clone()
    }

    /// Raise a fault on this stream.
    pub fn report_error(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.stats.faults += 1;
        let handlers = state.fault_handlers.clone();
        drop(state);
        self.raise(&handlers, message.into());
    }

    /// Write a value, subject to throttle and debounce gating.
    pub fn set(&self, value: T) -> SetOutcome {
        let state = self.lock();
        self.write(state, value)
    }

    /// Like [`Stream::set`] but reports a write to a disposed stream.
    pub fn try_set(&self, value: T) -> Result<SetOutcome> {
        match self.set(value) {
            SetOutcome::Disposed => Err(Error::StreamDisposedWrite {
                stream: self.inner.name.clone(),
            }),
            outcome => Ok(outcome),
        }
    }

    /// Atomic read-modify-write. `f` sees the latest written value (a
    /// debounced value still waiting to land counts) and returns the
    /// replacement, or `None` to leave the stream untouched. No other write
    /// can land between the read and the write.
    pub fn modify(&self, f: impl FnOnce(Option<&T>) -> Option<T>) -> SetOutcome {
        let state = self.lock();
        if state.disposed {
            return self.reject_disposed(state);
        }
        let latest = state.debounced.as_ref().or(state.value.as_ref());
        match f(latest) {
            Some(value) => self.write(state, value),
            None => SetOutcome::Unchanged,
        }
    }

    /// Register a callback for future values.
    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut state = self.lock();
        if state.disposed {
            debug!(stream = %self.inner.name, "subscribe on disposed stream");
            return Subscription { cancel: None };
        }
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push((id, Arc::new(f)));
        drop(state);

        // The handle keeps the stream alive, so chained operators built on
        // temporaries keep working.
        let inner = self.inner.clone();
        Subscription::new(move || {
            inner.state.lock().subscribers.retain(|(sid, _)| *sid != id);
        })
    }

    /// Tie an upstream subscription to this stream's lifetime.
    pub(crate) fn adopt(&self, subscription: Subscription) {
        let mut state = self.lock();
        if state.disposed {
            drop(state);
            drop(subscription);
            return;
        }
        state.upstream.push(subscription);
    }

    /// Dispose the stream: cancel its timer, drop its subscribers and detach
    /// it from upstream streams. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        if let Some(token) = state.debounce_token.take() {
            token.cancel();
        }
        state.debounced = None;
        state.on_debounced = None;
        state.recorder = None;
        state.fault_handlers.clear();
        state.pending = None;
        let subscribers = std::mem::take(&mut state.subscribers);
        let upstream = std::mem::take(&mut state.upstream);
        drop(state);

        // Unsubscribing upstream locks other streams; never do it under ours.
        drop(upstream);
        drop(subscribers);
        debug!(stream = %self.inner.name, "stream disposed");
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock()
    }

    fn reject_disposed<'a>(&'a self, mut state: MutexGuard<'a, State<T>>) -> SetOutcome {
        state.stats.disposed_writes += 1;
        drop(state);
        warn!(stream = %self.inner.name, "write to disposed stream dropped");
        SetOutcome::Disposed
    }

    fn write<'a>(&'a self, mut state: MutexGuard<'a, State<T>>, value: T) -> SetOutcome {
        if state.disposed {
            return self.reject_disposed(state);
        }
        state.stats.sets += 1;

        if let Some(delay) = state.throttle {
            let now = Instant::now();
            if let Some(last) = state.last_accepted {
                if now.duration_since(last) < delay {
                    state.stats.throttled += 1;
                    return SetOutcome::Throttled;
                }
            }
            state.last_accepted = Some(now);
        }

        if let Some(delay) = state.debounce {
            // A new write replaces the in-flight timer instead of layering.
            if let Some(previous) = state.debounce_token.take() {
                previous.cancel();
            }
            let token = CancelToken::new();
            state.debounce_token = Some(token.clone());
            state.debounced = Some(value);
            state.stats.debounced += 1;
            drop(state);

            let weak = self.downgrade();
            let fired = token.clone();
            timer::schedule(delay, token, move || {
                if let Some(stream) = weak.upgrade() {
                    stream.fire_debounce(&fired);
                }
            });
            return SetOutcome::Debounced;
        }

        self.commit(state, value)
    }

    fn fire_debounce(&self, token: &CancelToken) {
        let mut state = self.lock();
        // Checked again under the lock: dispose or a newer write may have
        // raced the timer thread.
        if state.disposed || token.is_cancelled() {
            return;
        }
        state.debounce_token = None;
        let hook = state.on_debounced.clone();
        if let Some(value) = state.debounced.take() {
            self.commit(state, value);
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    fn raise(&self, handlers: &[FaultHandler], message: String) {
        let fault = StreamFault {
            stream: self.inner.name.clone(),
            message,
        };
        if handlers.is_empty() {
            warn!(stream = %fault.stream, error = %fault.message, "unhandled stream fault");
            return;
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&fault))).is_err() {
                warn!(stream = %fault.stream, "stream error handler panicked");
            }
        }
    }

    fn commit<'a>(&'a self, mut state: MutexGuard<'a, State<T>>, value: T) -> SetOutcome {
        state.value = Some(value.clone());
        if state.history_capacity > 0 {
            if state.history.len() == state.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(value.clone());
        }
        if let Some(recorder) = &state.recorder {
            recorder(&value);
        }

        if state.delivering {
            if state.pending.replace(value).is_some() {
                state.stats.dropped += 1;
                debug!(stream = %self.inner.name, "undelivered value overwritten by a newer one");
            }
            return SetOutcome::Coalesced;
        }

        state.delivering = true;
        let mut next = value;
        loop {
            let subscribers: Vec<Subscriber<T>> =
                state.subscribers.iter().map(|(_, s)| s.clone()).collect();
            let handlers = state.fault_handlers.clone();
            state.stats.deliveries += 1;
            drop(state);

            let mut panics = Vec::new();
            for subscriber in &subscribers {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber(&next))) {
                    panics.push(panic_message(payload.as_ref()));
                }
            }
            let count = panics.len() as u64;
            if count > 0 {
                error!(stream = %self.inner.name, panics = count, "stream subscriber panicked");
                for message in panics {
                    self.raise(&handlers, message);
                }
            }

            state = self.lock();
            state.stats.subscriber_panics += count;
            state.stats.faults += count;
            if state.disposed {
                state.delivering = false;
                break;
            }
            match state.pending.take() {
                Some(value) => next = value,
                None => {
                    state.delivering = false;
                    break;
                }
            }
        }
        SetOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn recorder<T: Clone + Send + 'static>(stream: &Stream<T>) -> (Arc<Mutex<Vec<T>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = stream.subscribe(move |v: &T| sink.lock().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn test_set_and_get() {
        let stream = Stream::new(1);
        assert_eq!(stream.get(), Some(1));
        let (seen, _sub) = recorder(&stream);
        assert_eq!(stream.set(2), SetOutcome::Delivered);
        assert_eq!(stream.get(), Some(2));
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_unsubscribe() {
        let stream = Stream::new(0);
        let (seen, sub) = recorder(&stream);
        stream.set(1);
        sub.unsubscribe();
        stream.set(2);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let stream = Stream::new(0);
        {
            let _sub = stream.subscribe(|_| {});
            assert_eq!(stream.subscriber_count(), 1);
        }
        assert_eq!(stream.subscriber_count(), 0);
        stream.subscribe(|_| {}).detach();
        assert_eq!(stream.subscriber_count(), 1);
    }

    #[test]
    fn test_disposed_stream_drops_writes() {
        let stream = Stream::named("count", 0);
        let (seen, _sub) = recorder(&stream);
        stream.dispose();
        stream.dispose();
        assert_eq!(stream.set(5), SetOutcome::Disposed);
        assert_eq!(stream.get(), Some(0));
        assert!(seen.lock().is_empty());
        assert!(matches!(
            stream.try_set(6),
            Err(Error::StreamDisposedWrite { .. })
        ));
        assert_eq!(stream.stats().disposed_writes, 2);
    }

    #[test]
    fn test_modify_is_conditional() {
        let stream = Stream::new(3);
        assert_eq!(stream.modify(|v| v.map(|v| v + 1)), SetOutcome::Delivered);
        assert_eq!(stream.modify(|_| None), SetOutcome::Unchanged);
        assert_eq!(stream.get(), Some(4));
    }

    #[test]
    fn test_concurrent_modify_never_loses_increments() {
        let stream = Stream::new(0u64);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stream = stream.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        stream.modify(|v| v.map(|v| v + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stream.get(), Some(800));
    }

    #[test]
    fn test_reentrant_set_is_delivered_after_current() {
        let stream = Stream::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let weak = stream.downgrade();
        let _sub = stream.subscribe(move |v: &i32| {
            sink.lock().push(*v);
            if *v == 1 {
                if let Some(s) = weak.upgrade() {
                    assert_eq!(s.set(2), SetOutcome::Coalesced);
                }
            }
        });
        stream.set(1);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_throttle_drops_inside_window() {
        let stream = Stream::new(0);
        stream.set_throttle(Some(Duration::from_millis(200)));
        let (seen, _sub) = recorder(&stream);
        assert_eq!(stream.set(1), SetOutcome::Delivered);
        assert_eq!(stream.set(2), SetOutcome::Throttled);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(stream.get(), Some(1));
    }

    #[test]
    fn test_debounce_keeps_last_value() {
        let stream = Stream::new(0);
        stream.set_debounce(Some(Duration::from_millis(40)));
        let (tx, rx) = mpsc::channel();
        let _sub = stream.subscribe(move |v: &i32| {
            let _ = tx.send(*v);
        });
        for v in 1..=3 {
            assert_eq!(stream.set(v), SetOutcome::Debounced);
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(3));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_modify_sees_pending_debounced_value() {
        let stream = Stream::new(0);
        stream.set_debounce(Some(Duration::from_millis(20)));
        let changed = |next: i32| stream.modify(|v| (v != Some(&next)).then_some(next));
        assert_eq!(changed(1), SetOutcome::Debounced);
        assert_eq!(changed(0), SetOutcome::Debounced);
        assert_eq!(changed(0), SetOutcome::Unchanged);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(stream.get(), Some(0));
    }

    #[test]
    fn test_dispose_cancels_debounce() {
        let stream = Stream::new(0);
        stream.set_debounce(Some(Duration::from_millis(20)));
        let (seen, _sub) = recorder(&stream);
        stream.set(1);
        stream.dispose();
        thread::sleep(Duration::from_millis(80));
        assert!(seen.lock().is_empty());
        assert_eq!(stream.get(), Some(0));
    }

    #[test]
    fn test_subscriber_panic_is_contained() {
        let stream = Stream::new(0);
        let _bad = stream.subscribe(|_| panic!("subscriber failure"));
        let (seen, _sub) = recorder(&stream);
        stream.set(1);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(stream.stats().subscriber_panics, 1);
    }

    #[test]
    fn test_track_history_keeps_latest_values() {
        let stream = Stream::new(0).track_history(2);
        for v in 1..=3 {
            stream.set(v);
        }
        assert_eq!(stream.history(), vec![2, 3]);

        stream.track_history(1);
        assert_eq!(stream.history(), vec![3]);
        stream.track_history(0);
        stream.set(4);
        assert!(stream.history().is_empty());
    }

    #[test]
    fn test_catch_error_sees_subscriber_panic() {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let stream = Stream::named("clicks", 0).catch_error(move |f| sink.lock().push(f.clone()));
        let _bad = stream.subscribe(|v: &i32| {
            if *v == 2 {
                panic!("cannot handle two");
            }
        });
        stream.set(1);
        stream.set(2);

        let faults = faults.lock();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].stream, "clicks");
        assert_eq!(faults[0].message, "cannot handle two");
        assert_eq!(stream.stats().faults, 1);
    }

    #[test]
    fn test_report_error_reaches_every_handler() {
        let count = Arc::new(AtomicU64::new(0));
        let stream = Stream::new(0);
        for _ in 0..2 {
            let count = count.clone();
            stream.catch_error(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        stream.report_error("upstream gone");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        stream.dispose();
        stream.report_error("after dispose");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
