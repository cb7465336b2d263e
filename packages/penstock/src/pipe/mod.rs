//! Implementation of the hand-off pipe.
//!
//! A pipe carries typed values from a producer to a consumer running inside
//! the same cooperative task, one value at a time. The basic architecture is
//! as such:
//!
//! pipe handles wrap around Rc<shared center state>
//!                                  |
//!        /-------------------------/
//!        v
//!     center state
//!        |
//!        |------ it contains the one-deep value slot and the single state
//!        |       enum which classifies, at every moment, whether a value is
//!        |       queued, whether either end has closed out, and whether the
//!        |       consumer is still holding a delivered value
//!        |
//!        |------ it contains three one-slot wait-sets (slot writable, value
//!        |       readable, closed/cancelled), each holding the waker of the
//!        |       one poller parked on that condition
//!        |
//!        \------ it contains the ordered interceptor list which rewrites or
//!                drops values on their way from push to next
//!
//! the organization of these modules is as such:
//!
//! ```text
//!      These are used like
//!      library utilities:
//!    /--------------------\
//!
//!      waiter<----------------center: All state transitions live here, as
//!                       |      ^      exhaustive matches over the one state
//!      interceptor<-----/      |      enum. Panicky and inconvenient.
//!                              |
//!                             mod (this file): handles and futures wrapping
//!                                  the center into a defensive public API.
//! ```
//!
//! The protocol, end to end: [`Sender::push`] deposits a value and then waits
//! for its acknowledgement; [`Receiver::next`] takes the value, runs it
//! through the interceptor chain, and hands the consumer a [`NextResult`];
//! dropping the `NextResult` acknowledges the value, which resolves the push
//! with `true` and reopens the slot. A push therefore resolves `true` only
//! once its value has actually been released by the consumer, and `false`
//! when delivery became impossible.
//!
//! The two ends terminate asymmetrically. A sender that is dropped (or
//! explicitly closed) half-closes cleanly: its writes are complete, and a
//! value still in flight stays observable to the receiver, with the final
//! transition to closed deferred to that value's acknowledgement. A receiver
//! that is dropped (or either end calling `close_with_error`) cancels: it is
//! abandoning outstanding data, so the pipe tears down immediately, pending
//! pushes resolve `false`, and a queued value is discarded.
//!
//! Everything here is single-task cooperative. The handles and futures hold
//! `Rc`s and so cannot leave the thread; more specifically, all pollables of
//! one pipe must be driven within the same task, because each wait-set
//! remembers only the most recently parked poller.

mod center;
mod interceptor;
mod waiter;

use self::center::Center;
use std::{
    cell::{Ref, RefMut},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

/// Create a pipe, returning its two ends.
pub fn pipe<T>() -> (Sender<T>, Receiver<T>) {
    let center = Rc::new(Center::new());
    (Sender { center: Some(center.clone()) }, Receiver { center: Some(center) })
}

/// The push end of a pipe.
///
/// Dropping a sender without an explicit close half-closes the pipe cleanly,
/// as if by [`close`](Sender::close).
///
/// Senders cannot leave their thread:
///
/// ```compile_fail
/// fn requires_send<T: Send>(_: T) {}
/// let (sender, _receiver) = penstock::pipe::<u32>();
/// requires_send(sender);
/// ```
pub struct Sender<T> {
    /// `Some` until an explicit close consumes it, so the drop guard fires
    /// the half-close transition exactly once.
    center: Option<Rc<Center<T>>>,
}

impl<T> Sender<T> {
    fn center(&self) -> &Rc<Center<T>> {
        // close and close_with_error consume the handle, so a live sender
        // always has its center
        self.center.as_ref().expect("sender used after close")
    }

    /// Push a single value into the pipe.
    ///
    /// The returned future resolves to `true` once the value has been
    /// delivered and acknowledged by the consumer, and to `false` if
    /// delivery is impossible (the pipe closed out or was cancelled before
    /// or during the attempt). It holds its own reference to the pipe, so
    /// it stays pollable even if this sender is dropped while it is in
    /// flight.
    ///
    /// Only one push may be in flight at a time: a second push cannot make
    /// progress past the empty slot until the first has resolved.
    pub fn push(&mut self, value: T) -> Push<T> {
        Push { center: self.center().clone(), value: Some(value) }
    }

    /// Resolves once the pipe is terminal from this end's perspective:
    /// `true` for cancellation, `false` for a clean close. A value still
    /// queued behind a half-close already reads as closed here.
    pub fn await_closed(&self) -> AwaitClosed<T> {
        AwaitClosed { center: self.center().clone(), end: End::Sender }
    }

    /// Half-close the pipe cleanly. A value still in flight remains
    /// observable to the receiver.
    pub fn close(mut self) {
        if let Some(center) = self.center.take() {
            center.mark_closed();
        }
    }

    /// Tear the pipe down abnormally. Pending pushes resolve `false` and
    /// pending reads observe cancellation.
    pub fn close_with_error(mut self) {
        if let Some(center) = self.center.take() {
            center.mark_cancelled();
        }
    }

    /// Attach a transform at the head of the interceptor chain. Stages
    /// prepended here run before any receiver-registered stage, most
    /// recently prepended first.
    pub fn prepend_interceptor(&mut self, transform: impl FnMut(T) -> Option<T> + 'static) {
        self.center().prepend_stage(Box::new(transform), None);
    }

    /// Per [`prepend_interceptor`](Sender::prepend_interceptor), but also
    /// runs `on_half_close` once if the pipe ends up closing cleanly.
    pub fn prepend_interceptor_with_cleanup(
        &mut self,
        transform: impl FnMut(T) -> Option<T> + 'static,
        on_half_close: impl FnOnce() + 'static,
    ) {
        self.center().prepend_stage(Box::new(transform), Some(Box::new(on_half_close)));
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if let Some(center) = self.center.take() {
            center.mark_closed();
        }
    }
}

/// The pull end of a pipe.
///
/// Dropping a receiver cancels the pipe: an abandoned read end means the
/// surrounding call is being torn down, so outstanding work is discarded
/// rather than quietly completed.
pub struct Receiver<T> {
    /// `Some` until an explicit close consumes it, so the drop guard fires
    /// the cancel transition exactly once.
    center: Option<Rc<Center<T>>>,
}

impl<T> Receiver<T> {
    fn center(&self) -> &Rc<Center<T>> {
        // close_with_error consumes the handle, so a live receiver always
        // has its center
        self.center.as_ref().expect("receiver used after close")
    }

    /// Receive a single value from the pipe.
    ///
    /// The returned future resolves to a [`NextResult`]: value-bearing if a
    /// value arrived (after the interceptor chain ran), value-less with
    /// [`cancelled`](NextResult::cancelled) `false` if the sender closed
    /// cleanly with nothing further queued, or value-less with `cancelled`
    /// `true` if the pipe was cancelled (including by an interceptor
    /// dropping this value).
    pub fn next(&mut self) -> Next<T> {
        Next { center: self.center().clone() }
    }

    /// Resolves once the pipe is terminal from this end's perspective:
    /// `true` for cancellation, `false` for a clean close. A value still
    /// queued keeps this pending until it has been read and acknowledged.
    pub fn await_closed(&self) -> AwaitClosed<T> {
        AwaitClosed { center: self.center().clone(), end: End::Receiver }
    }

    /// Resolves once the slot no longer holds a value awaiting a reader.
    pub fn await_empty(&self) -> AwaitEmpty<T> {
        AwaitEmpty { center: self.center().clone() }
    }

    /// Tear the pipe down abnormally. Pending pushes resolve `false` and
    /// pending reads observe cancellation.
    pub fn close_with_error(mut self) {
        if let Some(center) = self.center.take() {
            center.mark_cancelled();
        }
    }

    /// Attach a transform at the tail of the interceptor chain. Stages
    /// appended here run after every sender-registered stage, in append
    /// order.
    pub fn append_interceptor(&mut self, transform: impl FnMut(T) -> Option<T> + 'static) {
        self.center().append_stage(Box::new(transform), None);
    }

    /// Per [`append_interceptor`](Receiver::append_interceptor), but also
    /// runs `on_half_close` once if the pipe ends up closing cleanly.
    pub fn append_interceptor_with_half_close(
        &mut self,
        transform: impl FnMut(T) -> Option<T> + 'static,
        on_half_close: impl FnOnce() + 'static,
    ) {
        self.center().append_stage(Box::new(transform), Some(Box::new(on_half_close)));
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if let Some(center) = self.center.take() {
            center.mark_cancelled();
        }
    }
}

/// Future for pushing a value into a pipe. See [`Sender::push`].
///
/// Drives a two-phase protocol: deposit the held value into the slot, then
/// wait for the consumer's acknowledgement. If the future is dropped before
/// the deposit happened, the value is given back up with it and the pipe is
/// untouched.
pub struct Push<T> {
    center: Rc<Center<T>>,
    /// `Some` until the value has been deposited; afterwards the future is
    /// waiting for the acknowledgement.
    value: Option<T>,
}

impl<T> Unpin for Push<T> {}

impl<T> Future for Push<T> {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = &mut *self;
        if this.value.is_some() {
            match this.center.poll_push(&mut this.value, cx) {
                Poll::Ready(true) => {}
                Poll::Ready(false) => return Poll::Ready(false),
                Poll::Pending => return Poll::Pending,
            }
        }
        this.center.poll_ack(cx)
    }
}

/// Future for receiving a value from a pipe. See [`Receiver::next`].
pub struct Next<T> {
    center: Rc<Center<T>>,
}

impl<T> Unpin for Next<T> {}

impl<T> Future for Next<T> {
    type Output = NextResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<NextResult<T>> {
        let this = self.get_mut();
        match this.center.poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(value)) => match this.center.run_interceptors(value) {
                Some(value) => {
                    this.center.set_value(value);
                    Poll::Ready(NextResult {
                        center: Some(this.center.clone()),
                        cancelled: false,
                    })
                }
                None => {
                    // a stage dropped the value; the pipe is torn down
                    this.center.mark_cancelled();
                    Poll::Ready(NextResult { center: None, cancelled: true })
                }
            },
            Poll::Ready(None) => Poll::Ready(NextResult {
                center: None,
                cancelled: this.center.cancelled(),
            }),
        }
    }
}

/// A received value, scoped to the consumer's acknowledgement window.
///
/// While a value-bearing `NextResult` is alive the pipe stays in its
/// awaiting-acknowledgement state and the pending push stays unresolved.
/// Dropping it (or calling [`reset`](NextResult::reset)) emits the
/// acknowledgement that unblocks the sender. The value is only reachable by
/// borrowing from the handle, so it cannot be read past the
/// acknowledgement.
pub struct NextResult<T> {
    center: Option<Rc<Center<T>>>,
    cancelled: bool,
}

impl<T> NextResult<T> {
    /// Whether a value was received.
    pub fn has_value(&self) -> bool {
        self.center.is_some()
    }

    /// Borrow the received value.
    ///
    /// The borrow must be released before any other operation on the pipe
    /// runs. Panics if no value was received.
    pub fn value(&self) -> Ref<'_, T> {
        self.center.as_ref().expect("no value was received on this pipe").value()
    }

    /// Borrow the received value mutably.
    ///
    /// The borrow must be released before any other operation on the pipe
    /// runs. Panics if no value was received.
    pub fn value_mut(&mut self) -> RefMut<'_, T> {
        self.center.as_ref().expect("no value was received on this pipe").value_mut()
    }

    /// Whether the pipe terminated abnormally. Only meaningful on a
    /// value-less result: `false` there means a clean close with no more
    /// values coming.
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Acknowledge the value now instead of at drop. Afterwards
    /// [`has_value`](NextResult::has_value) reports `false`.
    pub fn reset(&mut self) {
        if let Some(center) = self.center.take() {
            center.ack_next();
        }
    }
}

impl<T> Drop for NextResult<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> std::fmt::Debug for NextResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextResult")
            .field("has_value", &self.has_value())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl<T> PartialEq for NextResult<T> {
    fn eq(&self, other: &Self) -> bool {
        self.has_value() == other.has_value() && self.cancelled == other.cancelled
    }
}

enum End {
    Sender,
    Receiver,
}

/// Future resolving once the pipe is terminal, from the perspective of the
/// end that created it. See [`Sender::await_closed`] and
/// [`Receiver::await_closed`].
pub struct AwaitClosed<T> {
    center: Rc<Center<T>>,
    end: End,
}

impl<T> Unpin for AwaitClosed<T> {}

impl<T> Future for AwaitClosed<T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        match this.end {
            End::Sender => this.center.poll_closed_for_sender(cx),
            End::Receiver => this.center.poll_closed_for_receiver(cx),
        }
    }
}

/// Future resolving once the slot no longer holds a value awaiting a
/// reader. See [`Receiver::await_empty`].
pub struct AwaitEmpty<T> {
    center: Rc<Center<T>>,
}

impl<T> Unpin for AwaitEmpty<T> {}

impl<T> Future for AwaitEmpty<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().center.poll_empty(cx)
    }
}
