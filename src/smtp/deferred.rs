//-
// Copyright (c) 2026, The Postern Authors
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Postern. If not, see <http://www.gnu.org/licenses/>.

//! A policy decision which may not be known yet.
//!
//! Some decisions (whether to accept a recipient, whether to enter the
//! message body, whether to accept a completed message) may depend on slow
//! external work. The policy returns a [`Deferred`] for these; if the answer
//! is already known it uses [`Deferred::resolved`] (or `bool::into`),
//! otherwise it creates a pair with [`deferred`], keeps the [`Resolver`], and
//! resolves it later from wherever the work completes.
//!
//! The engine waits on the `Deferred` without blocking. Each `Resolver` can be
//! resolved at most once, which is enforced by `resolve_success` and
//! `resolve_failure` consuming it.

use std::future::Future;
use std::pin::Pin;
use std::task;

use tokio::sync::oneshot;

/// Creates an unresolved decision and the handle used to resolve it.
pub fn deferred() -> (Resolver, Deferred) {
    let (tx, rx) = oneshot::channel();
    (
        Resolver(tx),
        Deferred {
            state: State::Pending(rx),
        },
    )
}

/// The engine's half of a policy decision.
///
/// As a `Future`, it completes with `true` on success and `false` on failure.
/// If the `Resolver` is dropped without resolving, the decision is treated as
/// a failure.
#[derive(Debug)]
#[must_use]
pub struct Deferred {
    state: State,
}

#[derive(Debug)]
enum State {
    Resolved(bool),
    Pending(oneshot::Receiver<bool>),
    /// The resolver went away without answering.
    Abandoned,
}

/// The policy's half of a decision; see [`deferred`].
#[derive(Debug)]
pub struct Resolver(oneshot::Sender<bool>);

impl Deferred {
    /// A decision which is already known.
    pub fn resolved(success: bool) -> Self {
        Self {
            state: State::Resolved(success),
        }
    }

    /// Checks whether the decision is known, without waiting.
    ///
    /// Returns `Some(true)` on success, `Some(false)` on failure or if the
    /// resolver was dropped, and `None` if the decision is still pending.
    pub fn try_outcome(&mut self) -> Option<bool> {
        match self.state {
            State::Resolved(success) => Some(success),
            State::Abandoned => Some(false),
            State::Pending(ref mut rx) => match rx.try_recv() {
                Ok(success) => {
                    self.state = State::Resolved(success);
                    Some(success)
                },
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = State::Abandoned;
                    Some(false)
                },
            },
        }
    }

    /// Whether the resolver was dropped without resolving the decision.
    pub fn is_abandoned(&self) -> bool {
        matches!(self.state, State::Abandoned)
    }

    /// Invokes exactly one of `on_success` or `on_failure` once the decision
    /// is known.
    ///
    /// If the decision is already known, the continuation runs immediately
    /// and the returned future is already complete. Dropping the returned
    /// future before then discards both continuations without running either.
    pub fn then<R>(
        mut self,
        on_success: impl FnOnce() -> R,
        on_failure: impl FnOnce() -> R,
    ) -> Then<R, impl FnOnce(bool) -> R> {
        let continuation = move |success: bool| {
            if success {
                on_success()
            } else {
                on_failure()
            }
        };

        match self.try_outcome() {
            Some(success) => Then::Done(Some(continuation(success))),
            None => Then::Waiting(self, Some(continuation)),
        }
    }
}

impl From<bool> for Deferred {
    fn from(success: bool) -> Self {
        Self::resolved(success)
    }
}

impl Future for Deferred {
    type Output = bool;

    fn poll(
        self: Pin<&mut Self>,
        ctx: &mut task::Context<'_>,
    ) -> task::Poll<bool> {
        let this = self.get_mut();
        match this.state {
            State::Resolved(success) => task::Poll::Ready(success),
            State::Abandoned => task::Poll::Ready(false),
            State::Pending(ref mut rx) => match Pin::new(rx).poll(ctx) {
                task::Poll::Pending => task::Poll::Pending,
                task::Poll::Ready(Ok(success)) => {
                    this.state = State::Resolved(success);
                    task::Poll::Ready(success)
                },
                task::Poll::Ready(Err(_)) => {
                    this.state = State::Abandoned;
                    task::Poll::Ready(false)
                },
            },
        }
    }
}

/// Future returned by [`Deferred::then`].
pub enum Then<R, F> {
    Done(Option<R>),
    Waiting(Deferred, Option<F>),
}

// Neither the result nor the continuation is ever pinned.
impl<R, F> Unpin for Then<R, F> {}

impl<R, F: FnOnce(bool) -> R> Future for Then<R, F> {
    type Output = R;

    fn poll(
        self: Pin<&mut Self>,
        ctx: &mut task::Context<'_>,
    ) -> task::Poll<R> {
        match self.get_mut() {
            Then::Done(result) => task::Poll::Ready(
                result.take().expect("Then polled after completion"),
            ),
            Then::Waiting(deferred, continuation) => {
                let task::Poll::Ready(success) = Pin::new(deferred).poll(ctx)
                else {
                    return task::Poll::Pending;
                };

                let continuation =
                    continuation.take().expect("Then polled after completion");
                task::Poll::Ready(continuation(success))
            },
        }
    }
}

impl Resolver {
    pub fn resolve_success(self) {
        self.resolve(true)
    }

    pub fn resolve_failure(self) {
        self.resolve(false)
    }

    pub fn resolve(self, success: bool) {
        // If the engine has gone away, the connection was closed and nobody
        // cares about the outcome any more.
        let _ = self.0.send(success);
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn resolved_is_immediately_known() {
        assert_eq!(Some(true), Deferred::resolved(true).try_outcome());
        assert_eq!(Some(false), Deferred::from(false).try_outcome());
    }

    #[test]
    fn pending_until_resolved() {
        let (resolver, mut deferred) = deferred();
        assert_eq!(None, deferred.try_outcome());
        assert_eq!(None, deferred.try_outcome());
        resolver.resolve_failure();
        assert_eq!(Some(false), deferred.try_outcome());
        // The outcome is remembered
        assert_eq!(Some(false), deferred.try_outcome());
        assert!(!deferred.is_abandoned());
    }

    #[test]
    fn dropped_resolver_is_failure() {
        let (resolver, mut deferred) = deferred();
        drop(resolver);
        assert_eq!(Some(false), deferred.try_outcome());
        assert!(deferred.is_abandoned());
    }

    #[tokio::test]
    async fn awaits_late_resolution() {
        let (resolver, deferred) = deferred();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            resolver.resolve_success();
        });
        assert!(deferred.await);
        handle.await.unwrap();
    }

    #[test]
    fn then_runs_synchronously_when_known() {
        let calls = Cell::new(0);
        let then = Deferred::resolved(true).then(
            || calls.set(calls.get() + 1),
            || panic!("failure continuation invoked"),
        );
        assert_eq!(1, calls.get());
        block_on(then);
        assert_eq!(1, calls.get());
    }

    #[tokio::test]
    async fn then_runs_exactly_one_continuation() {
        let (resolver, deferred) = deferred();
        let then = deferred.then(|| "accepted", || "rejected");
        resolver.resolve_failure();
        assert_eq!("rejected", then.await);
    }

    #[tokio::test]
    async fn dropping_then_discards_continuations() {
        let called = Cell::new(false);
        let (resolver, deferred) = deferred();
        let then = deferred.then(|| called.set(true), || called.set(true));
        drop(then);
        resolver.resolve_success();
        tokio::task::yield_now().await;
        assert!(!called.get());
    }

    fn block_on<F: Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }
}
