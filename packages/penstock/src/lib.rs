//! # Penstock: one-deep, ack-gated hand-off pipes for a single cooperative task.
//!
//! A penstock pipe carries typed values from one producer to one consumer
//! running inside the same cooperative task, the way an RPC stack threads
//! messages between the two halves of a call. It is deliberately not a
//! general channel: capacity is exactly one, both ends are single-owner, and
//! every hand-off completes a full acknowledgement round trip before the
//! next one may begin.
//!
//! Calling [`pipe`] creates a linked [`Sender`] / [`Receiver`] pair.
//! [`Sender::push`] returns a future that deposits a value and then waits;
//! [`Receiver::next`] returns a future that resolves to a [`NextResult`], a
//! scoped handle exposing the received value by borrow. Dropping the
//! `NextResult` acknowledges the value, which is what finally resolves the
//! push with `true`. A push resolves `false` when delivery is impossible:
//! the receiver was dropped, the pipe was cancelled, or an interceptor
//! dropped that particular value.
//!
//! Zero or more interceptor stages can be spliced into either end
//! ([`Sender::prepend_interceptor`], [`Receiver::append_interceptor`]); a
//! value is rewritten by each stage in order as it flows from push to next,
//! and a stage yielding `None` drops the value and cancels the pipe.
//!
//! Termination is asymmetric by design. Dropping or closing a sender
//! half-closes cleanly: a value still in flight stays readable, and the
//! receiver then observes an orderly end of stream. Dropping a receiver, or
//! calling `close_with_error` on either end, cancels: pending pushes
//! resolve `false`, a queued value is discarded, and both ends observe the
//! abnormal teardown (the receiver via [`NextResult::cancelled`], either
//! end via `await_closed`).
//!
//! Everything is single-threaded cooperative. The handles are `!Send`, and
//! all pollables of one pipe must be driven within the same task; there are
//! no locks or atomics anywhere on the hot path.
//!
//! ```
//! use futures::executor::LocalPool;
//! use futures::task::LocalSpawnExt;
//!
//! let mut pool = LocalPool::new();
//! let spawner = pool.spawner();
//! let (mut tx, mut rx) = penstock::pipe::<u32>();
//!
//! spawner.spawn_local(async move {
//!     // resolves true once the receiver has taken and released the value
//!     assert!(tx.push(7).await);
//!     // tx dropped here: a clean half-close
//! }).unwrap();
//!
//! spawner.spawn_local(async move {
//!     let first = rx.next().await;
//!     assert_eq!(*first.value(), 7);
//!     drop(first); // acknowledge, unblocking the sender
//!
//!     let end = rx.next().await;
//!     assert!(!end.has_value());
//!     assert!(!end.cancelled());
//! }).unwrap();
//!
//! pool.run();
//! ```

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod pipe;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::pipe::*;
