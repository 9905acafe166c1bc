//! Graceful shutdown coordination.
//!
//! A [`ShutdownController`] counts the units of work that are still running,
//! broadcasts a one-shot quit signal to all of them and lets the orchestrating
//! task wait for the count to drop back to zero, bounded by a [`Deadline`].
//!
//! The controller never logs; everything it knows is returned to the caller.

mod deadline;
mod derived;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;
use tokio::{select, sync::watch};
use tokio_util::sync::CancellationToken;

pub use self::{
    deadline::{Deadline, Expiry},
    derived::DerivedToken,
};

/// Mismatched `add`/`done` pairing in caller code.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("negative pending work counter ({pending} {delta:+})")]
    NegativeCounter { pending: usize, delta: isize },
    #[error("pending work counter overflow ({pending} {delta:+})")]
    Overflow { pending: usize, delta: isize },
}

/// A shutdown gave up before all registered work finished.
///
/// The controller stays in the quitting state; work that is still running
/// keeps draining.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("shutdown {reason} with {pending} unit(s) of work still running")]
pub struct ShutdownError {
    pub reason: Expiry,
    pub pending: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Running,
    Quitting,
    Drained,
}

/// Pending count plus the number of times it has dropped to zero.
///
/// Waiters compare `drains` against the value they subscribed with, so a
/// crossing that is immediately followed by another `add` still wakes them.
#[derive(Debug, Default)]
struct Counter {
    pending: usize,
    drains: u64,
}

#[derive(Debug)]
struct Inner {
    counter: watch::Sender<Counter>,
    quitting: AtomicBool,
    drained: AtomicBool,
    quit: CancellationToken,
}

/// Tracks in-flight work and coordinates its graceful termination.
///
/// Cloning is cheap and every clone refers to the same counter and quit
/// signal. Independent controllers do not interact.
#[derive(Clone, Debug)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (counter, _) = watch::channel(Counter::default());

        ShutdownController {
            inner: Arc::new(Inner {
                counter,
                quitting: AtomicBool::new(false),
                drained: AtomicBool::new(false),
                quit: CancellationToken::new(),
            }),
        }
    }

    /// Adds `delta`, which may be negative, to the pending work counter and
    /// returns the new count. On failure the counter is left untouched.
    pub fn try_add(&self, delta: isize) -> Result<usize, UsageError> {
        let inner = &*self.inner;
        let mut result = Ok(0);

        inner.counter.send_if_modified(|counter| {
            match counter.pending.checked_add_signed(delta) {
                Some(updated) => {
                    let crossed = updated == 0 && counter.pending != 0;
                    counter.pending = updated;
                    result = Ok(updated);
                    if crossed {
                        counter.drains = counter.drains.wrapping_add(1);
                        if inner.quitting.load(Ordering::SeqCst) {
                            inner.drained.store(true, Ordering::SeqCst);
                        }
                    }
                    // only zero crossings are interesting to waiters
                    crossed
                }
                None if delta < 0 => {
                    result = Err(UsageError::NegativeCounter {
                        pending: counter.pending,
                        delta,
                    });
                    false
                }
                None => {
                    result = Err(UsageError::Overflow {
                        pending: counter.pending,
                        delta,
                    });
                    false
                }
            }
        });

        result
    }

    /// Adds `delta`, which may be negative, to the pending work counter.
    ///
    /// # Panics
    ///
    /// Panics if the counter would become negative. That always means a
    /// unit of work was marked done more often than it was added.
    pub fn add(&self, delta: isize) {
        if let Err(e) = self.try_add(delta) {
            panic!("{e}");
        }
    }

    /// Marks one unit of work as finished.
    pub fn done(&self) {
        self.add(-1);
    }

    pub fn pending(&self) -> usize {
        self.inner.counter.borrow().pending
    }

    /// Registers one unit of work. Dropping the token marks it as done.
    pub fn token(&self) -> ShutdownToken {
        self.add(1);
        ShutdownToken {
            controller: self.clone(),
        }
    }

    /// Waits until no work is pending. Returns immediately if nothing is.
    ///
    /// A drop to zero that happens after the call releases the waiter even if
    /// new work is added before it gets to run.
    pub async fn wait_zero(&self) {
        let mut counter = self.inner.counter.subscribe();
        let start = counter.borrow_and_update().drains;
        // The sender lives in `self.inner`, so the channel can't close here.
        let _ = counter
            .wait_for(|counter| counter.pending == 0 || counter.drains != start)
            .await;
    }

    /// Broadcasts the quit signal. Returns `true` only for the call that
    /// actually flipped it; later calls are no-ops.
    pub fn request_quit(&self) -> bool {
        let inner = &*self.inner;

        if inner
            .quitting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        inner.quit.cancel();
        if inner.counter.borrow().pending == 0 {
            inner.drained.store(true, Ordering::SeqCst);
        }
        true
    }

    pub fn is_quitting(&self) -> bool {
        self.inner.quitting.load(Ordering::SeqCst)
    }

    pub fn quit_requested(&self) -> QuitSignal {
        QuitSignal(self.inner.quit.clone())
    }

    pub fn state(&self) -> State {
        let inner = &*self.inner;

        if !inner.quitting.load(Ordering::SeqCst) {
            State::Running
        } else if inner.drained.load(Ordering::SeqCst) || inner.counter.borrow().pending == 0
        {
            State::Drained
        } else {
            State::Quitting
        }
    }

    /// Requests quit, then waits for all pending work to finish or for
    /// `deadline` to fire, whichever comes first.
    ///
    /// If no work is pending the shutdown succeeds even when the deadline
    /// has already expired.
    pub async fn shutdown(&self, deadline: Deadline) -> Result<(), ShutdownError> {
        self.request_quit();

        select! {
            biased;
            () = self.wait_zero() => Ok(()),
            reason = deadline.expired() => Err(ShutdownError {
                reason,
                pending: self.pending(),
            }),
        }
    }
}

/// Level-triggered view of the quit signal.
#[derive(Clone, Debug)]
pub struct QuitSignal(CancellationToken);

impl QuitSignal {
    pub fn is_requested(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once quit has been requested, immediately if it already was.
    pub async fn requested(&self) {
        self.0.cancelled().await
    }
}

/// One registered unit of work.
///
/// Dropping the token marks the unit as done.
#[derive(Debug)]
pub struct ShutdownToken {
    controller: ShutdownController,
}

impl ShutdownToken {
    pub async fn wait_for_shutdown(&self) {
        self.controller.inner.quit.cancelled().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.controller.is_quitting()
    }

    pub fn controller(&self) -> &ShutdownController {
        &self.controller
    }
}

impl Drop for ShutdownToken {
    fn drop(&mut self) {
        self.controller.done();
    }
}


#[cfg(test)]
mod proptests {
    use proptest::{collection::vec, prelude::*};
    use proptest_derive::Arbitrary;

    use super::*;

    #[derive(Debug, Copy, Clone, Arbitrary)]
    enum Step {
        Add(#[proptest(strategy = "1..4isize")] isize),
        Done,
    }

    proptest! {
        #[test]
        fn counter_follows_model(steps in vec(Step::arbitrary(), 0..200)) {
            let controller = ShutdownController::new();
            let mut model: isize = 0;

            for step in steps {
                let delta = match step {
                    Step::Add(n) => n,
                    Step::Done => -1,
                };

                match controller.try_add(delta) {
                    Ok(pending) => {
                        model += delta;
                        prop_assert_eq!(pending as isize, model);
                    }
                    Err(UsageError::NegativeCounter { pending, .. }) => {
                        prop_assert_eq!(model + delta, -1);
                        prop_assert_eq!(pending as isize, model);
                    }
                    Err(e) => prop_assert!(false, "unexpected {e}"),
                }
                prop_assert_eq!(controller.pending() as isize, model);
            }
        }

        #[test]
        fn drains_after_matching_dones(adds in vec(1..8isize, 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            rt.block_on(async {
                let controller = ShutdownController::new();
                let total: isize = adds.iter().sum();
                for n in &adds {
                    controller.add(*n);
                }
                controller.request_quit();

                for left in (0..total).rev() {
                    prop_assert_eq!(controller.state(), State::Quitting);
                    controller.done();
                    prop_assert_eq!(controller.pending() as isize, left);
                }

                prop_assert_eq!(controller.state(), State::Drained);
                let drained = tokio::time::timeout(
                    std::time::Duration::from_millis(10),
                    controller.shutdown(Deadline::none()),
                ).await;
                prop_assert_eq!(drained, Ok(Ok(())));
                Ok(())
            })?;
        }
    }
}
