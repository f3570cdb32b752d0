//! Host extraction from an HTTP request head.

use crate::error::{Error, Result};
use crate::normalize_hostname;

/// Maximum bytes of a flow examined before a verdict.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Extracts the hostname from the first `Host` header of a request head.
///
/// `head` is everything read so far, ideally up to the blank line ending
/// the header block. Header names are matched case-insensitively and a
/// `:port` suffix is dropped from the value. The hostname comes back
/// lowercased with any trailing dot stripped.
pub fn extract_host(head: &[u8]) -> Result<String> {
    let mut lines = head.split(|&b| b == b'\n');

    // Request line carries no Host information.
    let _ = lines.next();

    for line in lines {
        let line = trim_ascii(line);
        if line.is_empty() {
            break;
        }

        if line.len() >= 5 && line[..5].eq_ignore_ascii_case(b"host:") {
            let value = trim_ascii(&line[5..]);
            let host = strip_port(value);
            if host.is_empty() {
                return Err(Error::NoHostHeader);
            }
            let host = std::str::from_utf8(host).map_err(|_| Error::NoHostHeader)?;
            return Ok(normalize_hostname(host));
        }
    }

    Err(Error::NoHostHeader)
}

/// Drops a trailing `:port` from a Host value, keeping IPv6 literals whole.
fn strip_port(value: &[u8]) -> &[u8] {
    if let Some(rest) = value.strip_prefix(b"[") {
        if let Some(end) = rest.iter().position(|&b| b == b']') {
            return &rest[..end];
        }
        return value;
    }

    match value.iter().position(|&b| b == b':') {
        Some(idx) => &value[..idx],
        None => value,
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
