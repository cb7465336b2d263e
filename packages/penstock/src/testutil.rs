//! Helpers for driving pipe pollables by hand in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Wake, Waker};

/// Waker that counts its wakes, for asserting exactly which transitions
/// signal which wait-sets.
pub(crate) struct TestWaker {
    counter: Arc<WakeCounter>,
    waker: Waker,
}

struct WakeCounter {
    wakes: AtomicUsize,
}

impl Wake for WakeCounter {
    fn wake(self: Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
    }
}

impl TestWaker {
    pub(crate) fn new() -> Self {
        let counter = Arc::new(WakeCounter { wakes: AtomicUsize::new(0) });
        let waker = Waker::from(counter.clone());
        TestWaker { counter, waker }
    }

    /// A polling context wrapping this waker.
    pub(crate) fn context(&self) -> Context<'_> {
        Context::from_waker(&self.waker)
    }

    /// How many times a wait-set has woken this poller.
    pub(crate) fn wake_count(&self) -> usize {
        self.counter.wakes.load(Ordering::Relaxed)
    }
}
