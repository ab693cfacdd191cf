use thiserror::Error;

/// Failure of a single logical upstream request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("throttled by upstream after {attempts} attempts")]
    Throttled { attempts: u32 },
    #[error("upstream returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode upstream response: {message}")]
    Decode { message: String },
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

impl ApiError {
    /// Whether a caller above the executor could reasonably try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Throttled { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Throttled { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Transport(format!("request timed out: {}", e))
        } else if e.is_decode() {
            ApiError::Decode {
                message: e.to_string(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Returned by the catalog resolver when no metric matches. A value, never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("metric not found: {name}")]
pub struct MetricNotFound {
    pub name: String,
}

/// The only failures that prevent a snapshot from being produced at all.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("metric catalog unavailable: {0}")]
    CatalogUnavailable(#[source] ApiError),
    #[error("deadline exceeded before the metric catalog loaded")]
    DeadlineExceeded,
    #[error("client configuration error: {0}")]
    Configuration(#[source] ApiError),
}

/// Failure of one snapshot part; rendered into the part's degraded reason.
#[derive(Debug, Error)]
pub enum PartError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    MetricNotFound(#[from] MetricNotFound),
    #[error("deadline exceeded")]
    DeadlineExceeded,
}
