//! Error types for outbound calls.

/// Why an outbound call produced no response.
///
/// A response with a non-2xx status is not an error; it is returned to the
/// caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No response arrived within the call timeout.
    #[error("upstream call timed out")]
    Timeout,

    /// The upstream refused or reset the connection before a response.
    #[error("could not connect to upstream: {0}")]
    ConnectFailed(String),

    /// The redirect limit was exceeded.
    #[error("too many redirects")]
    TooManyRedirects,

    /// The request could not be built (bad path, header or method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No upstream base URL is configured.
    #[error("no upstream configured")]
    NotConfigured,

    /// Any other transport failure. The request may have been sent.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl CallError {
    /// Reason string sent to clients in an `error` response.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectFailed(_) => "connect_failed",
            Self::TooManyRedirects => "too_many_redirects",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotConfigured => "not_configured",
            Self::Transport(_) => "upstream_error",
        }
    }

    /// Whether the request certainly never reached the upstream, so sending
    /// it again is safe.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectFailed(_))
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_redirect() {
            Self::TooManyRedirects
        } else if err.is_connect() {
            Self::ConnectFailed(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connect_failures_are_transient() {
        assert!(CallError::ConnectFailed("refused".into()).is_transient());
        assert!(!CallError::Timeout.is_transient());
        assert!(!CallError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn reasons_match_wire_vocabulary() {
        assert_eq!(CallError::Timeout.reason(), "timeout");
        assert_eq!(CallError::NotConfigured.reason(), "not_configured");
        assert_eq!(CallError::Transport(String::new()).reason(), "upstream_error");
    }
}
