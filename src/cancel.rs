// Cooperative cancellation for retry loops
// A `CancelHandle` flips a watch channel; every `CancelSignal` clone observes it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{StoreError, StoreResult};

/// Sender side, owned by whoever may abandon the operation
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiver side, handed to retrying components
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/signal pair
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the handle is dropped first
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Fail fast if cancellation was already requested
pub(crate) fn check(signal: Option<&CancelSignal>) -> StoreResult<()> {
    match signal {
        Some(s) if s.is_cancelled() => Err(StoreError::Cancelled),
        _ => Ok(()),
    }
}

/// Sleep for `delay` unless cancelled first
pub(crate) async fn sleep(signal: Option<&CancelSignal>, delay: Duration) -> StoreResult<()> {
    match signal {
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
        Some(s) => tokio::select! {
            _ = s.cancelled() => Err(StoreError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
    }
}

/// Drive `fut` to completion unless cancelled first
pub(crate) async fn run<T, F>(signal: Option<&CancelSignal>, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match signal {
        None => fut.await,
        Some(s) => tokio::select! {
            biased;
            _ = s.cancelled() => Err(StoreError::Cancelled),
            result = fut => result,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_observes_cancel() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        assert!(check(Some(&signal)).is_ok());

        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(handle.signal().is_cancelled());
        assert_eq!(check(Some(&signal)), Err(StoreError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let (handle, signal) = cancel_pair();
        let sleeper = tokio::spawn(async move { sleep(Some(&signal), Duration::from_secs(60)).await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();

        assert_eq!(sleeper.await.unwrap(), Err(StoreError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_never_cancels() {
        let (handle, signal) = cancel_pair();
        drop(handle);
        assert!(sleep(Some(&signal), Duration::from_millis(10)).await.is_ok());
        assert_eq!(run(Some(&signal), async { Ok(3) }).await, Ok(3));
    }
}
