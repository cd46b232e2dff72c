/// Unified error type for everything that talks to the backtest service.
#[derive(Debug, Clone, PartialEq)]
pub enum HubError {
    /// Connection could not be opened, or broke mid-read.
    Transport(String),
    Timeout(String),
    /// The backend answered, but with a failure (HTTP status or envelope code).
    Upstream(String),
    /// The backend answered with something we could not read.
    Decode(String),
    /// Request rejected before it was sent.
    BadRequest(String),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport_error: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Upstream(msg) => write!(f, "upstream_error: {msg}"),
            Self::Decode(msg) => write!(f, "decode_error: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad_request: {msg}"),
        }
    }
}

impl std::error::Error for HubError {}

impl HubError {
    /// The one sentence a user should see for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) | Self::Timeout(_) => {
                "Could not connect to the backtest service. Please retry.".to_string()
            }
            Self::Upstream(msg) | Self::BadRequest(msg) => msg.clone(),
            Self::Decode(_) => "The backtest service returned an unreadable response.".to_string(),
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Upstream(format!("HTTP {status}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HubError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<url::ParseError> for HubError {
    fn from(e: url::ParseError) -> Self {
        Self::BadRequest(format!("invalid url: {e}"))
    }
}
