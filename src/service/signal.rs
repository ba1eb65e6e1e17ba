// Per-call abort signal
// Author: kelexine (https://github.com/kelexine)

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable abort flag shared between a caller and the call it started.
///
/// Once aborted it stays aborted.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`abort`](Self::abort) has been called on any clone.
    pub async fn aborted(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_abort_wakes_waiters_on_clones() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        assert!(!signal.is_aborted());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.abort();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.aborted())
            .await
            .unwrap();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn test_already_aborted_resolves_immediately() {
        let signal = AbortSignal::new();
        signal.abort();
        signal.aborted().await;
        assert!(signal.is_aborted());
    }
}
