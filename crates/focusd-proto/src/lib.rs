//! # focusd hostname extraction
//!
//! Recovers the hostname a redirected flow is asking for, from either the
//! SNI extension of a TLS ClientHello or the `Host` header of an HTTP
//! request head. Both paths operate on the raw first bytes of the flow
//! with bounds checks before every read; nothing beyond the hostname is
//! parsed and no payload is decrypted.
//!
//! Extraction failure is meaningful to callers: the proxy treats any
//! error from this crate as a block verdict.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clienthello;
pub mod error;
pub mod http;
pub mod wire;

pub use clienthello::extract_sni;
pub use error::{Error, Result};
pub use http::{extract_host, MAX_HEAD_BYTES};

/// Lowercases a hostname and strips a single trailing dot.
pub(crate) fn normalize_hostname(host: &str) -> String {
    let host = host.strip_suffix('.').unwrap_or(host);
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_normalization() {
        assert_eq!(normalize_hostname("Example.COM."), "example.com");
        assert_eq!(normalize_hostname("example.com"), "example.com");
        // Only one trailing dot is stripped.
        assert_eq!(normalize_hostname("example.com.."), "example.com.");
    }
}
