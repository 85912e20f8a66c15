// Deadline adapter for key-value backends
// Bounds every backend call so a stalled connection surfaces as a retryable backend error.

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::contracts::KeyValueBackend;
use crate::error::{StoreError, StoreResult};

/// Backend wrapper applying a per-call timeout
pub struct TimeoutBackend<B> {
    inner: B,
    timeout: Duration,
}

impl<B: KeyValueBackend> TimeoutBackend<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    key,
                    timeout_ms = self.timeout.as_millis(),
                    "Backend call timed out"
                );
                Err(StoreError::backend(
                    operation,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        }
    }
}

#[async_trait]
impl<B: KeyValueBackend> KeyValueBackend for TimeoutBackend<B> {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.bounded("set", key, self.inner.set(key, value)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Bytes,
    ) -> StoreResult<bool> {
        self.bounded(
            "compare_and_set",
            key,
            self.inner.compare_and_set(key, expected, value),
        )
        .await
    }
}
