//! One-slot wait-sets for pollers parked on a pipe condition.

use std::task::{Context, Poll, Waker};

/// A one-slot registration of the poller interested in some condition.
///
/// The pipe is single-task cooperative: every pollable backed by one pipe is
/// driven within the same activity, so at most one poller is ever parked on a
/// given condition and a single waker slot suffices. Parking again replaces
/// the stored waker with the most recent one.
#[derive(Default)]
pub(super) struct WaitSlot {
    waker: Option<Waker>,
}

impl WaitSlot {
    /// park the current poller on this condition and report pending.
    pub(super) fn park<T>(&mut self, cx: &mut Context<'_>) -> Poll<T> {
        self.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// wake the parked poller, if any, leaving the slot empty.
    pub(super) fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    /// whether a poller is currently parked on this condition.
    pub(super) fn is_parked(&self) -> bool {
        self.waker.is_some()
    }
}
