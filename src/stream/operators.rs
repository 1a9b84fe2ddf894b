//! Stream operators.
//!
//! Each operator returns a new stream subscribed to its source(s). The
//! derived stream owns the upstream subscriptions: disposing or dropping it
//! detaches it. A derived stream keeps its sources alive; sources hold
//! derived streams only weakly.

use std::fmt::Display;
use std::time::Duration;

use tracing::debug;

use super::cell::{Stream, Subscription, WeakStream};
use super::timer::{self, CancelToken};

impl<T: Clone + Send + 'static> Stream<T> {
    fn derive<U: Clone + Send + 'static>(
        &self,
        op: &str,
        initial: Option<U>,
        forward: impl Fn(&Stream<U>, &T) + Send + Sync + 'static,
    ) -> Stream<U> {
        let out = Stream::build(Some(format!("{}.{op}", self.name())), initial);
        let weak = out.downgrade();
        let sub = self.subscribe(move |value| {
            if let Some(out) = weak.upgrade() {
                forward(&out, value);
            }
        });
        out.adopt(sub);
        out
    }

    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> Stream<U> {
        let initial = self.get().map(|v| f(&v));
        self.derive("map", initial, move |out, v| {
            out.set(f(v));
        })
    }

    /// Like [`Stream::map`] for a fallible `f`. A failure is raised as a
    /// fault on the derived stream and nothing is emitted for that value.
    pub fn try_map<U: Clone + Send + 'static, E: Display>(
        &self,
        f: impl Fn(&T) -> Result<U, E> + Send + Sync + 'static,
    ) -> Stream<U> {
        let initial = self.get().and_then(|v| match f(&v) {
            Ok(u) => Some(u),
            Err(e) => {
                debug!(stream = %self.name(), error = %e, "initial value failed to map");
                None
            }
        });
        self.derive("try_map", initial, move |out, v| match f(v) {
            Ok(u) => {
                out.set(u);
            }
            Err(e) => out.report_error(e.to_string()),
        })
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Stream<T> {
        let initial = self.get().filter(|v| predicate(v));
        self.derive("filter", initial, move |out, v| {
            if predicate(v) {
                out.set(v.clone());
            }
        })
    }

    /// Suppress consecutive equal values.
    pub fn distinct(&self) -> Stream<T>
    where
        T: PartialEq,
    {
        self.derive("distinct", self.get(), |out, v| {
            out.modify(|current| (current != Some(v)).then(|| v.clone()));
        })
    }

    /// Fold every value into an accumulator, emitting each intermediate.
    pub fn scan<A: Clone + Send + 'static>(
        &self,
        seed: A,
        f: impl Fn(&A, &T) -> A + Send + Sync + 'static,
    ) -> Stream<A> {
        // The output is seeded, so the accumulator is always present.
        self.derive("scan", Some(seed), move |out, v| {
            out.modify(|acc| acc.map(|acc| f(acc, v)));
        })
    }

    /// Pairs of the latest values once both streams have a value, then on
    /// every emission of either.
    pub fn combine_latest<U: Clone + Send + 'static>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let initial = self.get().zip(other.get());
        let right = other.downgrade();
        let out = self.derive("combine_latest", initial, move |out, t| {
            if let Some(u) = right.upgrade().and_then(|s| s.get()) {
                out.set((t.clone(), u));
            }
        });

        let left = self.downgrade();
        let weak = out.downgrade();
        let sub = other.subscribe(move |u: &U| {
            let (Some(out), Some(t)) = (weak.upgrade(), left.upgrade().and_then(|s| s.get())) else {
                return;
            };
            out.set((t, u.clone()));
        });
        out.adopt(sub);
        out
    }

    /// Latest values of every stream, once all have a value.
    pub fn combine_latest_all(streams: &[Stream<T>]) -> Stream<Vec<T>> {
        let snapshot = |streams: &[Stream<T>]| -> Option<Vec<T>> {
            streams.iter().map(Stream::get).collect()
        };
        let out = Stream::build(Some("combine_latest_all".into()), snapshot(streams));
        let sources: Vec<_> = streams.iter().map(Stream::downgrade).collect();
        for stream in streams {
            let weak = out.downgrade();
            let sources = sources.clone();
            let sub = stream.subscribe(move |_: &T| {
                let Some(out) = weak.upgrade() else { return };
                let values: Option<Vec<T>> = sources
                    .iter()
                    .map(|s| s.upgrade().and_then(|s| s.get()))
                    .collect();
                if let Some(values) = values {
                    out.set(values);
                }
            });
            out.adopt(sub);
        }
        out
    }

    /// Emit only the last value of each burst, `delay` after the burst ends.
    pub fn debounce(&self, delay: Duration) -> Stream<T> {
        let out = self.derive("debounce", self.get(), |out, v| {
            out.set(v.clone());
        });
        out.set_debounce(Some(delay));
        out
    }

    /// Drop values arriving sooner than `delay` after the last accepted one.
    pub fn throttle(&self, delay: Duration) -> Stream<T> {
        let out = self.derive("throttle", self.get(), |out, v| {
            out.set(v.clone());
        });
        out.set_throttle(Some(delay));
        out
    }

    /// Values of both streams, interleaved as they arrive.
    pub fn merge(&self, other: &Stream<T>) -> Stream<T> {
        let out = self.derive("merge", self.get().or_else(|| other.get()), |out, v| {
            out.set(v.clone());
        });
        let weak = out.downgrade();
        let sub: Subscription = other.subscribe(move |v: &T| {
            if let Some(out) = weak.upgrade() {
                out.set(v.clone());
            }
        });
        out.adopt(sub);
        out
    }

    /// Run a side effect for each value and pass it through unchanged.
    pub fn tap(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Stream<T> {
        self.derive("tap", self.get(), move |out, v| {
            f(v);
            out.set(v.clone());
        })
    }

    /// Pair each value with the latest value of `other`. Only emissions of
    /// this stream produce output.
    pub fn with_latest_from<U: Clone + Send + 'static>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let initial = self.get().zip(other.get());
        let other = other.downgrade();
        self.derive("with_latest_from", initial, move |out, t| {
            if let Some(u) = other.upgrade().and_then(|s| s.get()) {
                out.set((t.clone(), u));
            }
        })
    }
}

// =============================================================================
// Sources
// =============================================================================

impl Stream<u64> {
    /// Stream counting up from `start`, one step every `period`, on the
    /// timer thread. Ticking stops once the stream is disposed or dropped.
    /// A zero period is treated as one millisecond.
    pub fn interval(name: impl Into<String>, period: Duration, start: u64) -> Stream<u64> {
        let stream = Stream::named(name, start);
        schedule_tick(stream.downgrade(), period.max(Duration::from_millis(1)));
        stream
    }
}

fn schedule_tick(weak: WeakStream<u64>, period: Duration) {
    timer::schedule(period, CancelToken::new(), move || {
        let Some(stream) = weak.upgrade() else { return };
        if stream.is_disposed() {
            return;
        }
        stream.modify(|v| v.map(|v| v.saturating_add(1)));
        schedule_tick(weak, period);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::mpsc;

    fn collect<T: Clone + Send + 'static>(stream: &Stream<T>) -> (Arc<Mutex<Vec<T>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = stream.subscribe(move |v: &T| sink.lock().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn test_map_and_filter() {
        let source = Stream::new(1);
        let doubled = source.map(|v| v * 2);
        let even = source.filter(|v| v % 2 == 0);
        assert_eq!(doubled.get(), Some(2));
        assert_eq!(even.get(), None);

        let (seen, _sub) = collect(&even);
        for v in 2..=5 {
            source.set(v);
        }
        assert_eq!(doubled.get(), Some(10));
        assert_eq!(*seen.lock(), vec![2, 4]);
    }

    #[test]
    fn test_distinct() {
        let source = Stream::new(0);
        let distinct = source.distinct();
        let (seen, _sub) = collect(&distinct);
        for v in [1, 1, 2, 2, 2, 1] {
            source.set(v);
        }
        assert_eq!(*seen.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn test_scan() {
        let source = Stream::new(0);
        let sum = source.scan(0, |acc, v| acc + v);
        for v in 1..=4 {
            source.set(v);
        }
        assert_eq!(sum.get(), Some(10));
    }

    #[test]
    fn test_combine_latest_waits_for_both() {
        let left: Stream<i32> = Stream::empty();
        let right: Stream<&'static str> = Stream::empty();
        let both = left.combine_latest(&right);
        let (seen, _sub) = collect(&both);

        left.set(1);
        assert!(seen.lock().is_empty());
        right.set("a");
        left.set(2);
        right.set("b");
        assert_eq!(*seen.lock(), vec![(1, "a"), (2, "a"), (2, "b")]);
    }

    #[test]
    fn test_combine_latest_all() {
        let streams = vec![Stream::new(1), Stream::new(2), Stream::empty()];
        let all = Stream::combine_latest_all(&streams);
        assert_eq!(all.get(), None);
        streams[2].set(3);
        assert_eq!(all.get(), Some(vec![1, 2, 3]));
        streams[0].set(9);
        assert_eq!(all.get(), Some(vec![9, 2, 3]));
    }

    #[test]
    fn test_with_latest_from_emits_on_self_only() {
        let clicks = Stream::new(0);
        let label = Stream::new("x");
        let tagged = clicks.with_latest_from(&label);
        let (seen, _sub) = collect(&tagged);
        label.set("y");
        assert!(seen.lock().is_empty());
        clicks.set(1);
        assert_eq!(*seen.lock(), vec![(1, "y")]);
    }

    #[test]
    fn test_merge_and_tap() {
        let a = Stream::new(0);
        let b = Stream::new(0);
        let tapped = Arc::new(Mutex::new(0));
        let counter = tapped.clone();
        let merged = a.merge(&b).tap(move |_| *counter.lock() += 1);
        let (seen, _sub) = collect(&merged);
        a.set(1);
        b.set(2);
        a.set(3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(*tapped.lock(), 3);
    }

    #[test]
    fn test_debounce_operator() {
        let source = Stream::new(0);
        let debounced = source.debounce(Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();
        let _sub = debounced.subscribe(move |v: &i32| {
            let _ = tx.send(*v);
        });
        source.set(1);
        source.set(2);
        source.set(3);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(3));
        assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
    }

    #[test]
    fn test_throttle_operator() {
        let source = Stream::new(0);
        let throttled = source.throttle(Duration::from_secs(5));
        let (seen, _sub) = collect(&throttled);
        source.set(1);
        source.set(2);
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_dispose_detaches_from_source() {
        let source = Stream::new(0);
        let mapped = source.map(|v| v + 1);
        assert_eq!(source.subscriber_count(), 1);
        mapped.dispose();
        assert_eq!(source.subscriber_count(), 0);

        let dropped = source.map(|v| v + 1);
        assert_eq!(source.subscriber_count(), 1);
        drop(dropped);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_try_map_raises_failures_on_output() {
        let source = Stream::new("1".to_string());
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let parsed = source
            .try_map(|s: &String| s.parse::<i32>())
            .catch_error(move |f| sink.lock().push(f.message.clone()));
        assert_eq!(parsed.get(), Some(1));

        source.set("x".into());
        assert_eq!(parsed.get(), Some(1));
        source.set("7".into());
        assert_eq!(parsed.get(), Some(7));
        assert_eq!(faults.lock().len(), 1);
        assert_eq!(parsed.stats().faults, 1);
    }

    #[test]
    fn test_interval_counts_until_disposed() {
        let ticks = Stream::interval("ticks", Duration::from_millis(5), 10);
        let (tx, rx) = mpsc::channel();
        let _sub = ticks.subscribe(move |v: &u64| {
            let _ = tx.send(*v);
        });
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(first > 10);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(first + 1));

        ticks.dispose();
        let stopped = ticks.get();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(ticks.get(), stopped);
    }
}
