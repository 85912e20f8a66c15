// Error Taxonomy and Recovery
// Every storage operation reports failures through `StoreError`; `wrap_recover_async` is the
// single place where foreign errors and panics are converted into that shape.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;

/// Outcome of a storage operation
pub type StoreResult<T> = Result<T, StoreError>;

/// Typed failures surfaced by the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Entity not found: {id}")]
    NotFound { id: String },

    #[error("Entity already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Too many concurrent updates on {key} after {attempts} attempts, please retry")]
    ConcurrencyConflict { key: String, attempts: u32 },

    #[error("Backend {operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Callback panicked: {message}")]
    CallbackPanicked { message: String },
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn backend(operation: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: message.to_string(),
        }
    }

    pub fn codec(message: impl std::fmt::Display) -> Self {
        Self::Codec {
            message: message.to_string(),
        }
    }

    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Backend { .. } | StoreError::ConcurrencyConflict { .. }
        )
    }

    /// Stable label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::AlreadyExists { .. } => "already_exists",
            StoreError::ConcurrencyConflict { .. } => "concurrency_conflict",
            StoreError::Backend { .. } => "backend",
            StoreError::Codec { .. } => "codec",
            StoreError::Cancelled => "cancelled",
            StoreError::CallbackPanicked { .. } => "callback_panicked",
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store_err) => store_err,
            Err(other) => StoreError::backend("call", format!("{other:#}")),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a synchronous action and normalize its failure (error or panic) into a `StoreError`
pub fn wrap_recover<T, E, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> Result<T, E>,
    E: Into<StoreError>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => Err(StoreError::CallbackPanicked {
            message: panic_message(payload),
        }),
    }
}

/// Async counterpart of [`wrap_recover`]
pub async fn wrap_recover_async<T, E, Fut>(fut: Fut) -> StoreResult<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<StoreError>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => Err(StoreError::CallbackPanicked {
            message: panic_message(payload),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(StoreError::backend("get", "connection reset").is_retryable());
        assert!(StoreError::ConcurrencyConflict {
            key: "user:a".into(),
            attempts: 5
        }
        .is_retryable());

        assert!(!StoreError::not_found("a").is_retryable());
        assert!(!StoreError::codec("bad json").is_retryable());
        assert!(!StoreError::Cancelled.is_retryable());
        assert!(!StoreError::AlreadyExists { id: "a".into() }.is_retryable());
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_kind() {
        let err: anyhow::Error = StoreError::not_found("abc").into();
        let back: StoreError = err.into();
        assert_eq!(back, StoreError::not_found("abc"));

        let foreign = anyhow::anyhow!("socket closed");
        let converted: StoreError = foreign.into();
        assert_eq!(converted.kind(), "backend");
    }

    #[test]
    fn test_wrap_recover_catches_panic() {
        let result: StoreResult<u32> = wrap_recover(|| -> StoreResult<u32> {
            panic!("gold amount must be positive");
        });
        match result {
            Err(StoreError::CallbackPanicked { message }) => {
                assert!(message.contains("gold amount"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrap_recover_async_passes_values_through() {
        let ok = wrap_recover_async(async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = wrap_recover_async(async { Err::<u32, _>(anyhow::anyhow!("timeout")) }).await;
        assert!(matches!(err, Err(StoreError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_wrap_recover_async_catches_panic() {
        let result = wrap_recover_async(async {
            if true {
                panic!("boom");
            }
            Ok::<u32, StoreError>(1)
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), "callback_panicked");
    }
}
