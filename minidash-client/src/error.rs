/// Why a single poll of the metrics endpoint produced no snapshot.
///
/// Every variant ends up as the same `Disconnected` transition; the distinction
/// only shapes the message shown next to the stale data.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request never produced a usable HTTP response.
    #[error("{0}")]
    Transport(String),
    /// A response arrived but its status is not a success.
    #[error("HTTP error: [{status}] {body}")]
    Protocol { status: u16, body: String },
    /// The body is not a metrics snapshot.
    #[error("invalid metrics payload: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FetchError {
    pub(crate) fn transport(msg: impl std::fmt::Display) -> Self {
        FetchError::Transport(msg.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Transport(format!("I/O error: {e}"))
    }
}

impl From<http::Error> for FetchError {
    fn from(e: http::Error) -> Self {
        FetchError::Transport(format!("HTTP error: {e}"))
    }
}

impl From<httparse::Error> for FetchError {
    fn from(e: httparse::Error) -> Self {
        FetchError::Transport(format!("HTTP error: malformed response ({e})"))
    }
}

impl From<tokio_native_tls::native_tls::Error> for FetchError {
    fn from(e: tokio_native_tls::native_tls::Error) -> Self {
        FetchError::Transport(format!("TLS error: {e}"))
    }
}
