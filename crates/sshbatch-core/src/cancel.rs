//! Cooperative cancellation flag

use tokio_util::sync::CancellationToken;

/// Set-once flag shared between the consumer and a run
///
/// Only the consumer sets it; the runner and its stream readers only read
/// it. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; returns `false` if it was already requested
    pub fn cancel(&self) -> bool {
        let first = !self.token.is_cancelled();
        self.token.cancel();
        first
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_set_once() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.clone().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_set() {
        let signal = CancellationSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already cancelled");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let signal = CancellationSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken")
            .unwrap();
    }
}
