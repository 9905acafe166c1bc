use tokio::{runtime::Handle, select, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use super::ShutdownController;

/// Cancellation scope bounded by both a parent token and a controller's
/// quit signal.
///
/// Inside a Tokio runtime a background listener forwards the parent's
/// cancellation, and it is aborted when this value is dropped. Outside one
/// the parent is checked whenever the `DerivedToken` itself is queried or
/// awaited. Clones of [`DerivedToken::token`] always follow the quit signal,
/// but only see the parent through the listener or a query on this value.
#[derive(Debug)]
pub struct DerivedToken {
    token: CancellationToken,
    parent: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl DerivedToken {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        if self.parent.is_cancelled() {
            self.token.cancel();
        }
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        select! {
            biased;
            () = self.token.cancelled() => {},
            () = self.parent.cancelled() => self.token.cancel(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for DerivedToken {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl ShutdownController {
    /// Returns a token that is cancelled as soon as `parent` is cancelled or
    /// quit is requested on this controller, whichever happens first.
    ///
    /// Works from plain threads too; see [`DerivedToken`] for how the parent
    /// is followed without a runtime.
    pub fn derive(&self, parent: &CancellationToken) -> DerivedToken {
        let token = self.inner.quit.child_token();
        if parent.is_cancelled() {
            token.cancel();
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) if !token.is_cancelled() => runtime,
            _ => {
                return DerivedToken {
                    token,
                    parent: parent.clone(),
                    listener: None,
                }
            }
        };

        let listener = runtime.spawn({
            let parent = parent.clone();
            let token = token.clone();
            async move {
                select! {
                    () = parent.cancelled() => token.cancel(),
                    () = token.cancelled() => {},
                }
            }
        });

        DerivedToken {
            token,
            parent: parent.clone(),
            listener: Some(listener),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;

    #[tokio::test]
    async fn cancelled_at_creation_after_quit() {
        let controller = ShutdownController::new();
        controller.request_quit();

        let derived = controller.derive(&CancellationToken::new());
        assert!(derived.is_cancelled());
        assert!(derived.listener.is_none());
    }

    #[tokio::test]
    async fn cancelled_at_creation_with_cancelled_parent() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();
        parent.cancel();

        let derived = controller.derive(&parent);
        assert!(derived.is_cancelled());
        assert!(!controller.is_quitting());
    }

    #[tokio::test]
    async fn cancelled_on_quit() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();
        let derived = controller.derive(&parent);
        assert!(!derived.is_cancelled());

        controller.request_quit();
        timeout(Duration::from_millis(100), derived.cancelled())
            .await
            .unwrap();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_by_parent_without_quit() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();
        let derived = controller.derive(&parent);

        parent.cancel();
        timeout(Duration::from_millis(100), derived.cancelled())
            .await
            .unwrap();
        assert!(!controller.is_quitting());
    }

    #[tokio::test]
    async fn own_cancel_does_not_touch_parent() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();
        let derived = controller.derive(&parent);

        derived.cancel();
        assert!(derived.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!controller.is_quitting());
    }

    #[test]
    fn works_without_runtime() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();

        let by_parent = controller.derive(&parent);
        let by_quit = controller.derive(&CancellationToken::new());
        assert!(by_parent.listener.is_none());
        assert!(!by_parent.is_cancelled());

        parent.cancel();
        assert!(by_parent.is_cancelled());
        assert!(by_parent.token().is_cancelled());
        assert!(!by_quit.is_cancelled());

        std::thread::scope(|s| {
            s.spawn(|| controller.request_quit());
        });
        assert!(by_quit.is_cancelled());
    }

    #[test]
    fn awaited_later_follows_parent() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();
        let derived = controller.derive(&parent);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let cancel = parent.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            });
            timeout(Duration::from_millis(200), derived.cancelled())
                .await
                .unwrap();
        });
        assert!(derived.token().is_cancelled());
        assert!(!controller.is_quitting());
    }

    #[tokio::test]
    async fn listener_exits_after_trigger() {
        let controller = ShutdownController::new();
        let mut derived = controller.derive(&CancellationToken::new());
        let listener = derived.listener.take().unwrap();

        controller.request_quit();
        timeout(Duration::from_millis(100), listener)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn listener_is_aborted_on_drop() {
        let controller = ShutdownController::new();
        let parent = CancellationToken::new();
        let mut derived = controller.derive(&parent);
        let listener = derived.listener.take().unwrap();
        let abort = listener.abort_handle();
        derived.listener = Some(listener);

        let token = derived.token().clone();
        drop(derived);
        sleep(Duration::from_millis(10)).await;

        assert!(abort.is_finished());
        parent.cancel();
        assert!(!token.is_cancelled());

        controller.request_quit();
        assert!(token.is_cancelled());
    }
}
