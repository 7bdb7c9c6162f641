//! Error type definitions for the HLS proxy.
//!
//! Every component surfaces a categorized [`ProxyError`]; the web layer
//! translates it into an HTTP status and the wire envelope. The variant
//! set mirrors the client-visible error taxonomy, so the mapping stays
//! a straight match with no string inspection on the hot path.

use thiserror::Error;

/// Top-level proxy error type.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The caller-supplied URL is missing, unparseable, concatenated with
    /// another URL, or hides a nested/double-encoded URL in its query.
    #[error("Malformed URL: {reason}")]
    UrlMalformed { reason: String },

    /// Hostname rejected by the allowlist.
    #[error("Host not allowed: {host}")]
    HostNotAllowed { host: String },

    /// Throttler rejection; `retry_after` is whole seconds until the
    /// client's window frees up.
    #[error("Rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Upstream 401 or 403. Both fold into a client-facing 403 so the
    /// browser never raises its credential prompt.
    #[error("Upstream denied access with status {status}")]
    UpstreamDenied { status: u16 },

    /// Upstream 404.
    #[error("Upstream resource not found")]
    NotFound,

    /// Any other non-OK upstream status, passed through.
    #[error("Upstream responded with status {status}")]
    UpstreamStatus { status: u16 },

    /// Connection refusal, DNS failure or a broken upstream body.
    #[error("Upstream unreachable: {message}")]
    BadGateway { message: String },

    /// The upstream or total-request deadline elapsed.
    #[error("Deadline elapsed while contacting upstream")]
    Timeout,

    /// Unclassified fault.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    /// Stable wire code for the error envelope.
    pub fn code(&self) -> String {
        match self {
            Self::UrlMalformed { .. } => "URL_MALFORMED".to_string(),
            Self::HostNotAllowed { .. } => "HOST_NOT_ALLOWED".to_string(),
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED".to_string(),
            Self::UpstreamDenied { .. } => "UPSTREAM_403".to_string(),
            Self::NotFound => "NOT_FOUND".to_string(),
            Self::UpstreamStatus { status } => format!("UPSTREAM_{status}"),
            Self::BadGateway { .. } => "BAD_GATEWAY".to_string(),
            Self::Timeout => "TIMEOUT".to_string(),
            Self::Internal { .. } => "ERROR".to_string(),
        }
    }

    /// Create a malformed-URL error with a custom reason.
    pub fn url_malformed<S: Into<String>>(reason: S) -> Self {
        Self::UrlMalformed {
            reason: reason.into(),
        }
    }

    /// Create a host-not-allowed error.
    pub fn host_not_allowed<S: Into<String>>(host: S) -> Self {
        Self::HostNotAllowed { host: host.into() }
    }

    /// Create a bad-gateway error.
    pub fn bad_gateway<S: Into<String>>(message: S) -> Self {
        Self::BadGateway {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Upstream fetch failures carry their own category: timeouts map to the
/// 504 path, everything else (refused connection, DNS, aborted body) is a
/// bad gateway.
impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::BadGateway {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ProxyError::url_malformed("x").code(), "URL_MALFORMED");
        assert_eq!(ProxyError::host_not_allowed("h").code(), "HOST_NOT_ALLOWED");
        assert_eq!(
            ProxyError::RateLimited { retry_after: 3 }.code(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(
            ProxyError::UpstreamDenied { status: 401 }.code(),
            "UPSTREAM_403"
        );
        assert_eq!(
            ProxyError::UpstreamDenied { status: 403 }.code(),
            "UPSTREAM_403"
        );
        assert_eq!(
            ProxyError::UpstreamStatus { status: 503 }.code(),
            "UPSTREAM_503"
        );
        assert_eq!(ProxyError::Timeout.code(), "TIMEOUT");
        assert_eq!(ProxyError::internal("boom").code(), "ERROR");
    }
}
