//! Utility modules for the HLS proxy
//!
//! This module contains reusable utilities that can be used
//! across different parts of the system.

pub mod request;
pub mod url;

// Re-export commonly used types for convenience
pub use request::{
    CONNECTION_SCHEME, client_identifier, derive_base_url, parse_header_overrides, repair_referer,
};
pub use url::UrlSafety;
