use thiserror::Error;

/// Failure taxonomy for a single conversation screen. Nothing here is
/// fatal to the process; every variant is scoped to one conversation.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")] Transport(
        #[from] tokio_tungstenite::tungstenite::Error,
    ),

    #[error("envelope codec error: {0}")] Codec(#[from] serde_json::Error),

    #[error("history load failed: {0}")] Bootstrap(#[from] reqwest::Error),

    #[error("conversation {0} not found")] ConversationNotFound(String),

    #[error("invalid channel url: {0}")] InvalidUrl(#[from] url::ParseError),

    #[error("geolocation error: {0}")] Geolocation(#[from] GeoError),

    #[error("upload failed: {0}")] Upload(String),

    #[error("channel is closed")]
    Closed,
}

/// Device geolocation failures. Permission problems halt sharing until the
/// user intervenes; the rest are retried on the next sampling tick.
#[derive(Debug, Clone, Error)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")] Unavailable(String),

    #[error("position request timed out")]
    Timeout,
}

impl GeoError {
    /// Permission errors are terminal for a sharing session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GeoError::PermissionDenied)
    }
}
