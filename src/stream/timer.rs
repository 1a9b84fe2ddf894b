//! Shared background timer.
//!
//! One lazily started thread serves every debounce in the process. Each
//! scheduled callback carries a [`CancelToken`] that is checked when the
//! deadline passes, so cancelling a timer never has to touch the queue.
//!
//! # Architecture
//!
//! ```text
//! schedule() --push--> BinaryHeap<Entry> --wait_until(next deadline)--> timer thread
//!                                                                     |
//!                                               token cancelled? skip : run callback
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

/// Shared flag cancelling a timer or subscription.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Callback = Box<dyn FnOnce() + Send>;

struct Entry {
    deadline: Instant,
    seq: u64,
    token: CancelToken,
    callback: Callback,
}

// Reversed so the BinaryHeap pops the earliest deadline first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct Queue {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

struct TimerQueue {
    queue: Mutex<Queue>,
    wake: Condvar,
}

static TIMER: OnceLock<Arc<TimerQueue>> = OnceLock::new();

fn timer() -> &'static Arc<TimerQueue> {
    TIMER.get_or_init(|| {
        let queue = Arc::new(TimerQueue {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                seq: 0,
            }),
            wake: Condvar::new(),
        });
        let worker = queue.clone();
        let spawned = thread::Builder::new()
            .name("spark-timer".into())
            .spawn(move || worker.run());
        if let Err(e) = spawned {
            error!(error = %e, "failed to start timer thread");
        }
        queue
    })
}

impl TimerQueue {
    fn run(&self) {
        loop {
            let due = {
                let mut queue = self.queue.lock();
                loop {
                    let Some(next) = queue.heap.peek() else {
                        self.wake.wait(&mut queue);
                        continue;
                    };
                    let deadline = next.deadline;
                    if Instant::now() >= deadline {
                        break queue.heap.pop();
                    }
                    self.wake.wait_until(&mut queue, deadline);
                }
            };

            // Run outside the lock: callbacks may schedule new timers.
            if let Some(entry) = due {
                if entry.token.is_cancelled() {
                    trace!(seq = entry.seq, "timer cancelled before firing");
                } else {
                    (entry.callback)();
                }
            }
        }
    }
}

/// Run `callback` on the timer thread after `delay` unless `token` has been
/// cancelled by then.
pub fn schedule(delay: Duration, token: CancelToken, callback: impl FnOnce() + Send + 'static) {
    let timer = timer();
    let mut queue = timer.queue.lock();
    queue.seq += 1;
    let seq = queue.seq;
    queue.heap.push(Entry {
        deadline: Instant::now() + delay,
        seq,
        token,
        callback: Box::new(callback),
    });
    drop(queue);
    timer.wake.notify_one();
}
