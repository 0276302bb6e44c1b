use shared::error::ApiError;
use thiserror::Error;

/// Failure of a single Request Service call.
///
/// `Clone` so the original error can travel through broadcast notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request transport failed: {0}")]
    Transport(String),
    #[error("unexpected response status {0}")]
    Status(u16),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RequestError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RequestError::Status(status.as_u16())
        } else {
            RequestError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFlowError {
    #[error("auth flow coordinator has shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("institution search has shut down")]
    Closed,
}
