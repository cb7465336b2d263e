//! Shared state machine backing one pipe.
//!
//! The center sits between a sender and a receiver and provides the one-deep
//! buffer of values. All pipe state lives here, behind a single `RefCell`:
//! the handles and futures in the parent module are thin wrappers that call
//! the narrow transition methods below. Every transition is decided by an
//! exhaustive match on the one state enum, and wakes exactly the wait-sets
//! whose pending condition just changed.
//!
//! Methods here are panicky where the parent module's types make misuse
//! unrepresentable; the parent module is the defensive layer.

use super::{
    interceptor::{HalfCloseHook, InterceptorList, Transform},
    waiter::WaitSlot,
};
use std::{
    cell::{Ref, RefCell, RefMut},
    task::{Context, Poll},
};

/// State of the value slot.
///
/// The dimensions in play (value present, sender open, receiver holding a
/// delivered value, cancelled) are encoded as one flat enum rather than
/// composed flags: it keeps every transition an exhaustive match and makes
/// the legal wake targets obvious.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum ValueState {
    /// No value is queued, sending is possible.
    Empty,
    /// A value has been pushed but not yet received.
    Ready,
    /// The value was received and is held by the consumer, ack pending.
    WaitingForAck,
    /// The consumer released the value; the pending push can observe
    /// success and clear back to Empty.
    Acked,
    /// Closed cleanly, no more values can flow.
    Closed,
    /// Closed cleanly, but one value is still queued to be received.
    ReadyClosed,
    /// Closed cleanly, but the consumer still holds the last value.
    WaitingForAckAndClosed,
    /// Closed abnormally; any in-flight value was discarded.
    Cancelled,
}

pub(super) struct Center<T> {
    state: RefCell<State<T>>,
}

struct State<T> {
    /// The one-deep slot. `Some` while a value is queued (`Ready`,
    /// `ReadyClosed`) and while a live [`super::NextResult`] is borrowing
    /// the delivered value (`WaitingForAck`, `WaitingForAckAndClosed`).
    value: Option<T>,
    value_state: ValueState,
    /// Pollers waiting for the slot to become writable.
    on_empty: WaitSlot,
    /// Pollers waiting for a value to read.
    on_full: WaitSlot,
    /// Pollers waiting for close or cancel notification.
    on_closed: WaitSlot,
    interceptors: InterceptorList<T>,
}

impl<T> State<T> {
    fn trace(&self, op: &str) {
        trace!(
            op,
            state = ?self.value_state,
            on_empty = self.on_empty.is_parked(),
            on_full = self.on_full.is_parked(),
            on_closed = self.on_closed.is_parked(),
        );
    }
}

impl<T> Center<T> {
    pub(super) fn new() -> Self {
        Center {
            state: RefCell::new(State {
                value: None,
                value_state: ValueState::Empty,
                on_empty: WaitSlot::default(),
                on_full: WaitSlot::default(),
                on_closed: WaitSlot::default(),
                interceptors: InterceptorList::default(),
            }),
        }
    }

    /// Try to move the held value into the slot.
    ///
    /// Takes from `value` and reports true if the value entered the pipe,
    /// reports false if the receive end is gone (leaving `value` in place),
    /// and parks on `on_empty` while the slot is occupied or awaiting
    /// reclamation.
    pub(super) fn poll_push(&self, value: &mut Option<T>, cx: &mut Context<'_>) -> Poll<bool> {
        let mut s = self.state.borrow_mut();
        s.trace("push");
        match s.value_state {
            ValueState::Closed
            | ValueState::ReadyClosed
            | ValueState::WaitingForAckAndClosed
            | ValueState::Cancelled => Poll::Ready(false),
            ValueState::Ready | ValueState::Acked | ValueState::WaitingForAck => {
                s.on_empty.park(cx)
            }
            ValueState::Empty => {
                s.value = Some(value.take().expect("push polled with no value to place"));
                s.value_state = ValueState::Ready;
                s.on_full.wake();
                Poll::Ready(true)
            }
        }
    }

    /// Wait for the pushed value to be acknowledged.
    ///
    /// True means the value was received (an ack ran, or the pipe closed
    /// cleanly after delivery); false means the pipe was cancelled.
    pub(super) fn poll_ack(&self, cx: &mut Context<'_>) -> Poll<bool> {
        let mut s = self.state.borrow_mut();
        s.trace("poll_ack");
        match s.value_state {
            ValueState::Closed => Poll::Ready(true),
            ValueState::Cancelled => Poll::Ready(false),
            ValueState::Acked => {
                s.value_state = ValueState::Empty;
                s.on_empty.wake();
                Poll::Ready(true)
            }
            // a push never polls for an ack while still holding its own
            // value, so Empty here means the center was transitioned
            // underneath us; park like the other not-yet arms.
            ValueState::Empty
            | ValueState::Ready
            | ValueState::ReadyClosed
            | ValueState::WaitingForAck
            | ValueState::WaitingForAckAndClosed => s.on_empty.park(cx),
        }
    }

    /// Try to take the queued value out of the slot.
    ///
    /// `None` means the send end is closed and no value remains, or the
    /// pipe was cancelled (distinguished via [`Center::cancelled`]).
    pub(super) fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut s = self.state.borrow_mut();
        s.trace("next");
        match s.value_state {
            ValueState::Empty
            | ValueState::Acked
            | ValueState::WaitingForAck
            | ValueState::WaitingForAckAndClosed => s.on_full.park(cx),
            ValueState::Ready => {
                s.value_state = ValueState::WaitingForAck;
                Poll::Ready(Some(s.value.take().expect("pipe Ready with an empty slot")))
            }
            ValueState::ReadyClosed => {
                s.value_state = ValueState::WaitingForAckAndClosed;
                Poll::Ready(Some(s.value.take().expect("pipe ReadyClosed with an empty slot")))
            }
            ValueState::Closed | ValueState::Cancelled => Poll::Ready(None),
        }
    }

    /// Acknowledge the delivered value, unblocking the pending push. If the
    /// pipe had been half-closed, this finalizes the transition to Closed.
    ///
    /// Panics if there is nothing outstanding to acknowledge: the caller
    /// (the parent module's scoped result handle) can only exist while a
    /// delivered value is in flight, so observing Empty or Acked here is a
    /// bug in reference or state handling.
    pub(super) fn ack_next(&self) {
        let (_released, stages) = {
            let mut s = self.state.borrow_mut();
            s.trace("ack_next");
            match s.value_state {
                ValueState::Ready | ValueState::WaitingForAck => {
                    s.value_state = ValueState::Acked;
                    let value = s.value.take();
                    s.on_empty.wake();
                    (value, None)
                }
                ValueState::ReadyClosed | ValueState::WaitingForAckAndClosed => {
                    s.value_state = ValueState::Closed;
                    let value = s.value.take();
                    let stages = s.interceptors.detach();
                    s.on_closed.wake();
                    s.on_empty.wake();
                    s.on_full.wake();
                    (value, Some(stages))
                }
                ValueState::Closed | ValueState::Cancelled => (None, None),
                state @ (ValueState::Empty | ValueState::Acked) => {
                    panic!("pipe acknowledged with nothing outstanding (state {state:?})")
                }
            }
        };
        // user code (half-close hooks, the value's destructor) runs only
        // after the state borrow is released
        if let Some(stages) = stages {
            stages.half_close();
        }
    }

    /// Half-close the pipe cleanly from the send side. A still-queued or
    /// still-held value remains observable to the receiver; the final
    /// transition to Closed then happens at its acknowledgement.
    pub(super) fn mark_closed(&self) {
        let stages = {
            let mut s = self.state.borrow_mut();
            s.trace("mark_closed");
            match s.value_state {
                ValueState::Empty | ValueState::Acked => {
                    s.value_state = ValueState::Closed;
                    let stages = s.interceptors.detach();
                    s.on_empty.wake();
                    s.on_full.wake();
                    s.on_closed.wake();
                    Some(stages)
                }
                ValueState::Ready => {
                    s.value_state = ValueState::ReadyClosed;
                    s.on_closed.wake();
                    None
                }
                ValueState::WaitingForAck => {
                    s.value_state = ValueState::WaitingForAckAndClosed;
                    s.on_closed.wake();
                    None
                }
                ValueState::ReadyClosed
                | ValueState::WaitingForAckAndClosed
                | ValueState::Closed
                | ValueState::Cancelled => None,
            }
        };
        if let Some(stages) = stages {
            stages.half_close();
        }
    }

    /// Terminate the pipe abnormally. A queued value is discarded; a value
    /// a live result handle is still borrowing stays in the slot until that
    /// handle goes away. Half-close hooks do not fire on this path.
    pub(super) fn mark_cancelled(&self) {
        let _discarded = {
            let mut s = self.state.borrow_mut();
            s.trace("mark_cancelled");
            match s.value_state {
                ValueState::Empty
                | ValueState::Acked
                | ValueState::Ready
                | ValueState::ReadyClosed
                | ValueState::WaitingForAck
                | ValueState::WaitingForAckAndClosed => {
                    let queued = matches!(
                        s.value_state,
                        ValueState::Ready | ValueState::ReadyClosed
                    );
                    let value = if queued { s.value.take() } else { None };
                    s.value_state = ValueState::Cancelled;
                    let stages = s.interceptors.detach();
                    s.on_empty.wake();
                    s.on_full.wake();
                    s.on_closed.wake();
                    Some((value, stages))
                }
                ValueState::Closed | ValueState::Cancelled => None,
            }
        };
    }

    /// Closed from the sender's perspective: a value still queued behind a
    /// half-close already reads as closed.
    pub(super) fn poll_closed_for_sender(&self, cx: &mut Context<'_>) -> Poll<bool> {
        let mut s = self.state.borrow_mut();
        s.trace("poll_closed_for_sender");
        match s.value_state {
            ValueState::Empty
            | ValueState::Acked
            | ValueState::Ready
            | ValueState::WaitingForAck => s.on_closed.park(cx),
            ValueState::ReadyClosed
            | ValueState::WaitingForAckAndClosed
            | ValueState::Closed => Poll::Ready(false),
            ValueState::Cancelled => Poll::Ready(true),
        }
    }

    /// Closed from the receiver's perspective: a value still queued behind
    /// a half-close keeps the pipe open until it has been read and acked.
    pub(super) fn poll_closed_for_receiver(&self, cx: &mut Context<'_>) -> Poll<bool> {
        let mut s = self.state.borrow_mut();
        s.trace("poll_closed_for_receiver");
        match s.value_state {
            ValueState::Empty
            | ValueState::Acked
            | ValueState::Ready
            | ValueState::ReadyClosed
            | ValueState::WaitingForAck
            | ValueState::WaitingForAckAndClosed => s.on_closed.park(cx),
            ValueState::Closed => Poll::Ready(false),
            ValueState::Cancelled => Poll::Ready(true),
        }
    }

    /// Ready once the slot no longer holds a value awaiting a reader.
    pub(super) fn poll_empty(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut s = self.state.borrow_mut();
        s.trace("poll_empty");
        match s.value_state {
            ValueState::Ready | ValueState::ReadyClosed => s.on_empty.park(cx),
            ValueState::Empty
            | ValueState::Acked
            | ValueState::WaitingForAck
            | ValueState::WaitingForAckAndClosed
            | ValueState::Closed
            | ValueState::Cancelled => Poll::Ready(()),
        }
    }

    pub(super) fn cancelled(&self) -> bool {
        self.state.borrow().value_state == ValueState::Cancelled
    }

    /// Run a received value through the interceptor chain.
    ///
    /// The list is detached while the stages run so a stage can touch the
    /// pipe without re-entering the state borrow; it is reattached
    /// afterwards unless the pipe went terminal in the meantime (the
    /// terminal transition already cleared the list).
    pub(super) fn run_interceptors(&self, value: T) -> Option<T> {
        let mut stages = self.state.borrow_mut().interceptors.detach();
        let out = stages.run(value);
        let mut s = self.state.borrow_mut();
        if !matches!(s.value_state, ValueState::Closed | ValueState::Cancelled) {
            s.interceptors = stages;
            return out;
        }
        drop(s);
        drop(stages);
        out
    }

    /// Attach a stage at the head of the chain. Discarded if the pipe is
    /// already terminal: the list is never mutated past that transition.
    pub(super) fn prepend_stage(
        &self,
        transform: Transform<T>,
        on_half_close: Option<HalfCloseHook>,
    ) {
        let mut s = self.state.borrow_mut();
        if matches!(s.value_state, ValueState::Closed | ValueState::Cancelled) {
            return;
        }
        s.interceptors.prepend(transform, on_half_close);
    }

    /// Attach a stage at the tail of the chain. Discarded if the pipe is
    /// already terminal.
    pub(super) fn append_stage(
        &self,
        transform: Transform<T>,
        on_half_close: Option<HalfCloseHook>,
    ) {
        let mut s = self.state.borrow_mut();
        if matches!(s.value_state, ValueState::Closed | ValueState::Cancelled) {
            return;
        }
        s.interceptors.append(transform, on_half_close);
    }

    /// Put the interceptor chain's output back in the slot for the result
    /// handle to borrow.
    pub(super) fn set_value(&self, value: T) {
        self.state.borrow_mut().value = Some(value);
    }

    pub(super) fn value(&self) -> Ref<'_, T> {
        Ref::map(self.state.borrow(), |s| {
            s.value.as_ref().expect("pipe value borrowed while the slot is empty")
        })
    }

    pub(super) fn value_mut(&self) -> RefMut<'_, T> {
        RefMut::map(self.state.borrow_mut(), |s| {
            s.value.as_mut().expect("pipe value borrowed while the slot is empty")
        })
    }

    #[cfg(test)]
    pub(super) fn value_state(&self) -> ValueState {
        self.state.borrow().value_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestWaker;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::task::Poll;

    /// drive a fresh center to the given state through the normal protocol
    fn center_in<T>(state: ValueState, value: impl Fn() -> T) -> Center<T> {
        let w = TestWaker::new();
        let center = Center::new();
        let place = |center: &Center<T>| {
            let mut v = Some(value());
            assert_eq!(center.poll_push(&mut v, &mut w.context()), Poll::Ready(true));
        };
        match state {
            ValueState::Empty => {}
            ValueState::Ready => place(&center),
            ValueState::WaitingForAck => {
                place(&center);
                assert!(matches!(center.poll_next(&mut w.context()), Poll::Ready(Some(_))));
            }
            ValueState::Acked => {
                place(&center);
                assert!(matches!(center.poll_next(&mut w.context()), Poll::Ready(Some(_))));
                center.ack_next();
            }
            ValueState::Closed => center.mark_closed(),
            ValueState::ReadyClosed => {
                place(&center);
                center.mark_closed();
            }
            ValueState::WaitingForAckAndClosed => {
                place(&center);
                assert!(matches!(center.poll_next(&mut w.context()), Poll::Ready(Some(_))));
                center.mark_closed();
            }
            ValueState::Cancelled => center.mark_cancelled(),
        }
        assert_eq!(center.value_state(), state);
        center
    }

    #[test]
    fn push_into_empty_wakes_a_parked_reader() {
        let reader = TestWaker::new();
        let writer = TestWaker::new();
        let center = Center::new();

        assert_eq!(center.poll_next(&mut reader.context()), Poll::Pending);

        let mut v = Some(11);
        assert_eq!(center.poll_push(&mut v, &mut writer.context()), Poll::Ready(true));
        assert_eq!(v, None);
        assert_eq!(center.value_state(), ValueState::Ready);
        assert_eq!(reader.wake_count(), 1);

        assert_eq!(center.poll_next(&mut reader.context()), Poll::Ready(Some(11)));
        assert_eq!(center.value_state(), ValueState::WaitingForAck);
    }

    #[test]
    fn push_parks_while_the_slot_is_occupied_and_repolling_does_not_wake() {
        let w = TestWaker::new();
        let center = center_in(ValueState::Ready, || 1);

        let mut v = Some(2);
        assert_eq!(center.poll_push(&mut v, &mut w.context()), Poll::Pending);
        assert_eq!(v, Some(2));
        // parking is not a transition; nothing signals
        assert_eq!(center.poll_push(&mut v, &mut w.context()), Poll::Pending);
        assert_eq!(w.wake_count(), 0);
    }

    #[test]
    fn push_is_refused_in_every_closed_out_state() {
        for state in [
            ValueState::Closed,
            ValueState::ReadyClosed,
            ValueState::WaitingForAckAndClosed,
            ValueState::Cancelled,
        ] {
            let w = TestWaker::new();
            let center = center_in(state, || 1);
            let mut v = Some(9);
            assert_eq!(center.poll_push(&mut v, &mut w.context()), Poll::Ready(false));
            // a refused push keeps its value
            assert_eq!(v, Some(9));
        }
    }

    #[test]
    fn ack_clears_the_slot_and_unblocks_the_writer_side() {
        let writer = TestWaker::new();
        let center = center_in(ValueState::WaitingForAck, || 7);

        assert_eq!(center.poll_ack(&mut writer.context()), Poll::Pending);
        center.ack_next();
        assert_eq!(center.value_state(), ValueState::Acked);
        assert_eq!(writer.wake_count(), 1);

        assert_eq!(center.poll_ack(&mut writer.context()), Poll::Ready(true));
        assert_eq!(center.value_state(), ValueState::Empty);
    }

    #[test]
    fn poll_ack_resolves_terminal_states_immediately() {
        let w = TestWaker::new();
        assert_eq!(
            center_in(ValueState::Closed, || 0).poll_ack(&mut w.context()),
            Poll::Ready(true)
        );
        assert_eq!(
            center_in(ValueState::Cancelled, || 0).poll_ack(&mut w.context()),
            Poll::Ready(false)
        );
    }

    #[test]
    fn poll_ack_parks_on_the_defensive_empty_arm() {
        let w = TestWaker::new();
        let center = center_in(ValueState::Empty, || 0);
        assert_eq!(center.poll_ack(&mut w.context()), Poll::Pending);
    }

    #[test]
    #[should_panic(expected = "nothing outstanding")]
    fn ack_with_nothing_outstanding_is_fatal() {
        center_in(ValueState::Empty, || 0).ack_next();
    }

    #[test]
    #[should_panic(expected = "nothing outstanding")]
    fn double_ack_is_fatal() {
        let center = center_in(ValueState::Acked, || 0);
        center.ack_next();
    }

    #[test]
    fn half_close_with_a_value_queued_defers_the_final_transition() {
        let w = TestWaker::new();
        let center = center_in(ValueState::Ready, || 5);

        center.mark_closed();
        assert_eq!(center.value_state(), ValueState::ReadyClosed);

        // the queued value is still deliverable
        assert_eq!(center.poll_next(&mut w.context()), Poll::Ready(Some(5)));
        assert_eq!(center.value_state(), ValueState::WaitingForAckAndClosed);

        // its acknowledgement finalizes the close
        center.ack_next();
        assert_eq!(center.value_state(), ValueState::Closed);
    }

    #[test]
    fn close_and_cancel_are_idempotent_and_terminal_states_never_leave() {
        let closed = center_in(ValueState::Closed, || 0);
        closed.mark_closed();
        assert_eq!(closed.value_state(), ValueState::Closed);
        closed.mark_cancelled();
        assert_eq!(closed.value_state(), ValueState::Closed);

        let cancelled = center_in(ValueState::Cancelled, || 0);
        cancelled.mark_cancelled();
        assert_eq!(cancelled.value_state(), ValueState::Cancelled);
        cancelled.mark_closed();
        assert_eq!(cancelled.value_state(), ValueState::Cancelled);
    }

    #[test]
    fn cancel_discards_a_queued_value_immediately() {
        struct Tracked(Rc<Cell<bool>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let dropped2 = dropped.clone();
        let center = center_in(ValueState::Ready, move || Tracked(dropped2.clone()));

        center.mark_cancelled();
        assert!(dropped.get());
    }

    #[test]
    fn cancel_keeps_a_delivered_value_a_result_handle_is_borrowing() {
        let center = center_in(ValueState::WaitingForAck, || 0);
        center.set_value(42);

        center.mark_cancelled();
        assert_eq!(*center.value(), 42);
    }

    #[test]
    fn closed_polls_differ_per_end_while_a_value_is_queued() {
        let w = TestWaker::new();
        let center = center_in(ValueState::ReadyClosed, || 1);

        // the sender is done; the receiver still has the value coming
        assert_eq!(center.poll_closed_for_sender(&mut w.context()), Poll::Ready(false));
        assert_eq!(center.poll_closed_for_receiver(&mut w.context()), Poll::Pending);
    }

    #[test]
    fn cancellation_reads_as_true_from_both_ends() {
        let w = TestWaker::new();
        let center = center_in(ValueState::Cancelled, || 1);
        assert_eq!(center.poll_closed_for_sender(&mut w.context()), Poll::Ready(true));
        assert_eq!(center.poll_closed_for_receiver(&mut w.context()), Poll::Ready(true));
    }

    #[test]
    fn poll_empty_pends_only_while_a_value_awaits_a_reader() {
        let w = TestWaker::new();
        for state in [ValueState::Ready, ValueState::ReadyClosed] {
            let center = center_in(state, || 1);
            assert_eq!(center.poll_empty(&mut w.context()), Poll::Pending);
        }
        for state in [
            ValueState::Empty,
            ValueState::WaitingForAck,
            ValueState::Acked,
            ValueState::WaitingForAckAndClosed,
            ValueState::Closed,
            ValueState::Cancelled,
        ] {
            let center = center_in(state, || 1);
            assert_eq!(center.poll_empty(&mut w.context()), Poll::Ready(()));
        }
    }

    #[test]
    fn every_terminal_transition_wakes_all_three_wait_sets() {
        let on_empty = TestWaker::new();
        let on_full = TestWaker::new();
        let on_closed = TestWaker::new();
        let center = Center::<i32>::new();

        let mut v = Some(1);
        assert_eq!(center.poll_push(&mut v, &mut on_empty.context()), Poll::Ready(true));
        assert_eq!(center.poll_ack(&mut on_empty.context()), Poll::Pending);
        assert_eq!(center.poll_closed_for_receiver(&mut on_closed.context()), Poll::Pending);
        center.mark_cancelled();
        assert_eq!(on_empty.wake_count(), 1);
        assert_eq!(on_closed.wake_count(), 1);

        let center = Center::<i32>::new();
        assert_eq!(center.poll_next(&mut on_full.context()), Poll::Pending);
        center.mark_closed();
        assert_eq!(on_full.wake_count(), 1);
    }

    #[test]
    fn interceptor_registration_after_a_terminal_transition_is_discarded() {
        let center = center_in(ValueState::Cancelled, || 1);
        center.append_stage(Box::new(|_| panic!("stage ran on a cancelled pipe")), None);
        // nothing reattaches the stage; running the chain is the identity
        assert_eq!(center.run_interceptors(3), Some(3));
    }
}
