//! Centralized error handling for the HLS proxy.
//!
//! All components return [`ProxyError`] values; the dispatcher owns the
//! translation into HTTP statuses and the JSON error envelope (see
//! `web::responses`).

pub mod types;

pub use types::*;

/// Convenience type alias for Results using ProxyError
pub type ProxyResult<T> = Result<T, ProxyError>;
