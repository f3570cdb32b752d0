//! Extraction error types.

use thiserror::Error;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while extracting a hostname from a flow's first bytes.
///
/// Every variant is a block verdict for the caller: a flow whose hostname
/// cannot be recovered is treated the same as a blocked one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The first record is not a TLS handshake record.
    #[error("not a TLS handshake record (content type {content_type:#04x})")]
    NotHandshake {
        /// The record content type that was seen.
        content_type: u8,
    },

    /// The handshake message is not a ClientHello.
    #[error("not a ClientHello message (handshake type {handshake_type:#04x})")]
    NotClientHello {
        /// The handshake type that was seen.
        handshake_type: u8,
    },

    /// A well-formed ClientHello without a server_name extension.
    #[error("no SNI extension found")]
    NoSni,

    /// Truncated or overflowing length field at any parsing step.
    #[error("truncated or invalid data at offset {offset}")]
    InvalidData {
        /// Byte offset where parsing failed.
        offset: usize,
    },

    /// An HTTP request head without a Host header.
    #[error("no Host header found")]
    NoHostHeader,
}

impl Error {
    /// Creates a new `InvalidData` error.
    #[inline]
    pub fn invalid_data(offset: usize) -> Self {
        Self::InvalidData { offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            Error::NotHandshake { content_type: 0x17 }.to_string(),
            "not a TLS handshake record (content type 0x17)"
        );
        assert_eq!(
            Error::invalid_data(42).to_string(),
            "truncated or invalid data at offset 42"
        );
    }
}
