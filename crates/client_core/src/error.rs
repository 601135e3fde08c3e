use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced a reply envelope (network, HTTP status, decoding).
    #[error("request failed: {0}")]
    Transport(String),
    /// The server answered with `success: false`.
    #[error(transparent)]
    Rejected(ApiError),
    #[error("realtime channel: {0}")]
    Realtime(String),
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("no conversation is open")]
    NoOpenConversation,
    #[error("message is empty")]
    EmptyMessage,
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Realtime(value.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
