use std::{future::pending, time::Duration};

use thiserror::Error;
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

/// Why a [`Deadline`] fired.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Expiry {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("canceled")]
    Canceled,
}

/// Bound on how long a shutdown is willing to wait.
///
/// A deadline is a point in time, an explicit cancellation token, both or
/// neither. `Deadline::none()` never fires.
#[derive(Clone, Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    /// Fires once `timeout` has elapsed from now. Timeouts too large to be
    /// represented never fire.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            cancel: None,
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            cancel: None,
        }
    }

    pub fn cancelled_by(token: CancellationToken) -> Self {
        Self::none().with_cancel(token)
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Non-blocking check. Cancellation is reported before an elapsed
    /// instant when both apply.
    pub fn check(&self) -> Option<Expiry> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Some(Expiry::Canceled);
        }
        match self.at {
            Some(at) if at <= Instant::now() => Some(Expiry::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the deadline fires. Pending forever for `Deadline::none()`.
    pub async fn expired(&self) -> Expiry {
        if let Some(expiry) = self.check() {
            return expiry;
        }

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let timeout = async {
            match self.at {
                Some(at) => sleep_until(at).await,
                None => pending().await,
            }
        };

        select! {
            biased;
            () = cancelled => Expiry::Canceled,
            () = timeout => Expiry::DeadlineExceeded,
        }
    }
}

impl From<Option<Duration>> for Deadline {
    fn from(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Deadline::none, Deadline::after)
    }
}
