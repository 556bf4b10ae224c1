//! The cooperative single-threaded scheduler.
//!
//! A turn has no real concurrency: every awaitable the orchestration
//! context hands out either resolves immediately from already-known
//! history, or stays pending for the rest of the turn (nothing new arrives
//! mid-turn — the turn's entire input is fixed up front). Driving the
//! user's `run` future to its first suspension point is therefore a single
//! poll with a waker that does nothing, repeated only as a safety margin
//! against a future that (incorrectly) schedules its own wake-up.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;

/// Drive `future` until it completes or can make no further progress this
/// turn. Returns `Some(output)` if it completed, `None` if it suspended.
pub(crate) fn drain<F>(mut future: Pin<Box<F>>) -> Option<F::Output>
where
    F: Future + ?Sized,
{
    let waker = noop_waker_ref();
    let mut cx = Context::from_waker(waker);

    match future.as_mut().poll(&mut cx) {
        Poll::Ready(output) => Some(output),
        // Every awaitable the context hands out resolves synchronously from
        // already-known history or stays pending for the rest of the turn;
        // a second poll right now cannot change the answer.
        Poll::Pending => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_the_output_of_a_future_that_completes_immediately() {
        let future = Box::pin(async { 7 });
        assert_eq!(drain(future), Some(7));
    }

    #[test]
    fn drain_returns_none_for_a_future_that_never_wakes_itself() {
        let future: Pin<Box<dyn Future<Output = ()>>> = Box::pin(std::future::pending());
        assert_eq!(drain(future), None);
    }
}
