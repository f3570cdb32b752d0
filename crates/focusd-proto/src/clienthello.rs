//! SNI extraction from a TLS ClientHello.
//!
//! Parses just enough of the first TLS record to recover the server name
//! the client asked for, without touching any encrypted payload. The
//! parser never reassembles records: a ClientHello split across TCP
//! segments beyond the first read fails extraction.

use crate::error::{Error, Result};
use crate::normalize_hostname;
use crate::wire::ByteReader;

/// TLS record content type for handshake messages.
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// Handshake message type for ClientHello.
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// Extension type for server_name (RFC 6066).
const EXTENSION_SERVER_NAME: u16 = 0x0000;

/// server_name entry type for a DNS hostname.
const SNI_TYPE_HOSTNAME: u8 = 0x00;

/// Extracts the Server Name Indication from the first bytes of a TLS flow.
///
/// `data` is whatever the initial read returned. The hostname comes back
/// lowercased with any trailing dot stripped.
pub fn extract_sni(data: &[u8]) -> Result<String> {
    if data.len() < 5 {
        return Err(Error::invalid_data(data.len()));
    }

    let mut r = ByteReader::new(data);
    let content_type = r.read_u8()?;
    r.skip(2)?; // legacy record version
    let record_len = r.read_u16()? as usize;

    if content_type != CONTENT_TYPE_HANDSHAKE {
        return Err(Error::NotHandshake { content_type });
    }

    // The whole record must be present; no reassembly.
    let record = r.read_bytes(record_len)?;

    let mut hs = ByteReader::new(record);
    let handshake_type = hs.read_u8()?;
    if handshake_type != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(Error::NotClientHello { handshake_type });
    }

    // A body length exceeding the record remainder means the ClientHello
    // continues in a later record.
    let body_len = hs.read_u24()?;
    let body = hs.read_bytes(body_len)?;

    let mut b = ByteReader::new(body);
    b.skip(2)?; // client version
    b.skip(32)?; // random

    let session_id_len = b.read_u8()? as usize;
    b.skip(session_id_len)?;

    let cipher_suites_len = b.read_u16()? as usize;
    b.skip(cipher_suites_len)?;

    let compression_len = b.read_u8()? as usize;
    b.skip(compression_len)?;

    let extensions_len = b.read_u16()? as usize;
    let extensions = b.read_bytes(extensions_len)?;

    let mut ext = ByteReader::new(extensions);
    while ext.remaining() >= 4 {
        let ext_type = ext.read_u16()?;
        let ext_len = ext.read_u16()? as usize;
        let ext_data = ext.read_bytes(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(ext_data);
        }
    }

    Err(Error::NoSni)
}

/// Parses the server_name extension payload.
///
/// Only the first list entry is considered; anything other than a
/// hostname entry is treated as no SNI.
fn parse_server_name(data: &[u8]) -> Result<String> {
    let mut r = ByteReader::new(data);

    r.skip(2)?; // server name list length

    let name_type = r.read_u8()?;
    if name_type != SNI_TYPE_HOSTNAME {
        return Err(Error::NoSni);
    }

    let name_len = r.read_u16()? as usize;
    let name = r.read_bytes(name_len)?;

    if name.is_empty() {
        return Err(Error::NoSni);
    }
    if !name.is_ascii() {
        return Err(Error::invalid_data(r.position()));
    }

    let hostname =
        std::str::from_utf8(name).map_err(|_| Error::invalid_data(r.position()))?;
    Ok(normalize_hostname(hostname))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal ClientHello record carrying the given extensions.
    fn client_hello_with_extensions(extensions: &[u8]) -> Vec<u8> {
        let mut body = vec![0x03, 0x03]; // client version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0x00); // session id length
        body.extend_from_slice(&[0x00, 0x02, 0x00, 0x2f]); // one cipher suite
        body.extend_from_slice(&[0x01, 0x00]); // null compression
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(extensions);

        let mut handshake = vec![HANDSHAKE_TYPE_CLIENT_HELLO];
        handshake.push((body.len() >> 16) as u8);
        handshake.push((body.len() >> 8) as u8);
        handshake.push(body.len() as u8);
        handshake.extend_from_slice(&body);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x03];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    fn sni_extension(hostname: &str) -> Vec<u8> {
        let mut entry = vec![SNI_TYPE_HOSTNAME];
        entry.extend_from_slice(&(hostname.len() as u16).to_be_bytes());
        entry.extend_from_slice(hostname.as_bytes());

        let mut list = (entry.len() as u16).to_be_bytes().to_vec();
        list.extend_from_slice(&entry);

        let mut ext = vec![0x00, 0x00];
        ext.extend_from_slice(&(list.len() as u16).to_be_bytes());
        ext.extend_from_slice(&list);
        ext
    }

    fn client_hello(hostname: &str) -> Vec<u8> {
        client_hello_with_extensions(&sni_extension(hostname))
    }

    #[test]
    fn extracts_hostname() {
        assert_eq!(extract_sni(&client_hello("example.com")).unwrap(), "example.com");
        assert_eq!(
            extract_sni(&client_hello("www.youtube.com")).unwrap(),
            "www.youtube.com"
        );
    }

    #[test]
    fn normalizes_case_and_trailing_dot() {
        assert_eq!(extract_sni(&client_hello("EXAMPLE.Org.")).unwrap(), "example.org");
    }

    #[test]
    fn sni_after_other_extensions() {
        // supported_groups padding before the server_name extension
        let mut extensions = vec![0x00, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1d];
        extensions.extend_from_slice(&sni_extension("example.com"));

        let hello = client_hello_with_extensions(&extensions);
        assert_eq!(extract_sni(&hello).unwrap(), "example.com");
    }

    #[test]
    fn empty_and_short_input() {
        assert_eq!(extract_sni(&[]), Err(Error::invalid_data(0)));
        assert_eq!(extract_sni(&[0x16, 0x03, 0x01]), Err(Error::invalid_data(3)));
    }

    #[test]
    fn rejects_non_handshake_record() {
        let data = [0x17, 0x03, 0x03, 0x00, 0x04, 0xde, 0xad, 0xbe, 0xef];
        assert_eq!(
            extract_sni(&data),
            Err(Error::NotHandshake { content_type: 0x17 })
        );
    }

    #[test]
    fn rejects_non_client_hello() {
        // ServerHello handshake type inside a handshake record
        let data = [0x16, 0x03, 0x03, 0x00, 0x04, 0x02, 0x00, 0x00, 0x00];
        assert_eq!(
            extract_sni(&data),
            Err(Error::NotClientHello { handshake_type: 0x02 })
        );
    }

    #[test]
    fn missing_sni_extension() {
        let hello = client_hello_with_extensions(&[]);
        assert_eq!(extract_sni(&hello), Err(Error::NoSni));

        // Extensions present, none of them server_name.
        let hello =
            client_hello_with_extensions(&[0x00, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1d]);
        assert_eq!(extract_sni(&hello), Err(Error::NoSni));
    }

    #[test]
    fn truncated_record_fails() {
        let hello = client_hello("example.com");
        // Record length promises more than the buffer holds.
        assert!(matches!(
            extract_sni(&hello[..hello.len() - 10]),
            Err(Error::InvalidData { .. })
        ));
    }

    #[test]
    fn fragmented_client_hello_fails() {
        // Record header claims only the first 20 bytes of the handshake;
        // the handshake body length then overflows the record.
        let mut hello = client_hello("example.com");
        let short = 20u16;
        hello[3..5].copy_from_slice(&short.to_be_bytes());
        hello.truncate(5 + short as usize);

        assert!(matches!(extract_sni(&hello), Err(Error::InvalidData { .. })));
    }

    #[test]
    fn lying_extension_length_fails() {
        let mut ext = sni_extension("example.com");
        // Inflate the declared extension length past the actual payload.
        let lie = (ext.len() as u16 + 40).to_be_bytes();
        ext[2..4].copy_from_slice(&lie);

        let hello = client_hello_with_extensions(&ext);
        assert!(matches!(extract_sni(&hello), Err(Error::InvalidData { .. })));
    }

    #[test]
    fn non_hostname_entry_is_no_sni() {
        let mut entry = vec![0x01]; // unknown name type
        entry.extend_from_slice(&[0x00, 0x03, b'a', b'b', b'c']);
        let mut list = (entry.len() as u16).to_be_bytes().to_vec();
        list.extend_from_slice(&entry);
        let mut ext = vec![0x00, 0x00];
        ext.extend_from_slice(&(list.len() as u16).to_be_bytes());
        ext.extend_from_slice(&list);

        let hello = client_hello_with_extensions(&ext);
        assert_eq!(extract_sni(&hello), Err(Error::NoSni));
    }

    #[test]
    fn stall_prefix_is_invalid() {
        // The first five bytes of a record whose body never arrives.
        assert!(matches!(
            extract_sni(&[0x16, 0x03, 0x01, 0x00, 0xff]),
            Err(Error::InvalidData { .. })
        ));
    }
}
