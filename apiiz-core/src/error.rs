use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Hook invoked by error-aware leaves before an error is propagated or dismissed.
pub type ErrorHook = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// Failure channel shared by every dispatcher.
///
/// Errors are cloneable because a single batch or debounce outcome is
/// delivered to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Arc<dyn StdError + Send + Sync>>,
    },

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    Rejected(String),

    #[error("batch resolver returned {actual} results for {expected} keys")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("no batch result matched key at position {position}")]
    Missing { position: usize },

    #[error("call was cancelled")]
    Cancelled,

    #[error("dispatcher panicked: {0}")]
    Panicked(String),

    #[error("payload decode error: {0}")]
    Decode(String),

    #[error("pending call was dropped before it settled")]
    Dropped,

    #[error("no Tokio runtime available to schedule {0}")]
    NoRuntime(&'static str),

    #[error("unknown dispatcher: {0}")]
    UnknownDispatcher(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl ApiError {
    pub fn rejected(message: impl Into<String>) -> Self {
        ApiError::Rejected(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ApiError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ApiError::Transport {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ApiError::Config(message.into())
    }

    /// Build a `Panicked` error from a payload caught by `catch_unwind`.
    pub fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ApiError::Panicked(message)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Other(Arc::new(err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = ApiError::transport_with("request failed", io);
        assert!(err.to_string().contains("request failed"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("reset by peer"));
    }

    #[test]
    fn test_clone_preserves_variant() {
        let err = ApiError::BatchMismatch {
            expected: 3,
            actual: 2,
        };
        let cloned = err.clone();
        assert!(matches!(
            cloned,
            ApiError::BatchMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(
            cloned.to_string(),
            "batch resolver returned 2 results for 3 keys"
        );
    }

    #[test]
    fn test_panicked_payloads() {
        let err = ApiError::panicked(Box::new("boom"));
        assert_eq!(err.to_string(), "dispatcher panicked: boom");

        let err = ApiError::panicked(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "dispatcher panicked: owned boom");

        let err = ApiError::panicked(Box::new(42u8));
        assert!(matches!(err, ApiError::Panicked(ref m) if m == "non-string panic payload"));
    }

    #[test]
    fn test_conversions() {
        let err: ApiError = anyhow::anyhow!("custom failure").into();
        assert_eq!(err.to_string(), "custom failure");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ApiError = json_err.into();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
