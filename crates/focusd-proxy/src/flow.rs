//! Per-connection flow handling.
//!
//! A redirected flow arrives with its original destination already
//! recovered. The handler reads just enough to classify the flow, asks
//! the blocklist for a verdict, and either answers with a protocol-
//! appropriate rejection or splices the flow to where it was going, with
//! the already-consumed prefix replayed byte-exact.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use focusd_filter::Blocklist;
use focusd_proto::MAX_HEAD_BYTES;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{ProxyConfig, ProxyError, Result};

/// TLS alert record sent to blocked HTTPS flows: fatal handshake_failure.
const TLS_ALERT: [u8; 7] = [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28];

/// Response sent to blocked HTTP flows.
const HTTP_FORBIDDEN: &str = "HTTP/1.1 403 Forbidden\r\n\
Content-Type: text/html\r\n\
Connection: close\r\n\
\r\n\
<html><body><h1>403 Forbidden</h1><p>Blocked by focusd</p></body></html>";

/// Write window for rejection closers.
const CLOSER_TIMEOUT: Duration = Duration::from_secs(1);

/// Which protocol convention a listener speaks, chosen by port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowProtocol {
    /// Plain HTTP; hostname comes from the Host header.
    Http,
    /// TLS; hostname comes from the ClientHello SNI.
    Https,
}

impl fmt::Display for FlowProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowProtocol::Http => f.write_str("HTTP"),
            FlowProtocol::Https => f.write_str("HTTPS"),
        }
    }
}

/// Outcome of a handled flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Spliced to the original destination until EOF.
    Allowed,
    /// Rejected, either by rule match or fail-closed extraction.
    Blocked,
    /// Ended before a classification was possible (EOF, stall).
    Aborted,
}

/// Drives one redirected flow to completion.
///
/// `dst` is the destination the client originally dialed. The blocklist
/// decision is made strictly before any upstream connection exists: a
/// flow that cannot be classified is rejected, never forwarded.
pub async fn serve_flow(
    mut client: TcpStream,
    dst: SocketAddr,
    proto: FlowProtocol,
    rules: &Blocklist,
    cfg: &ProxyConfig,
) -> Result<Verdict> {
    let head = match timeout(cfg.read_timeout, read_head(&mut client, proto)).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => return Err(ProxyError::Io(e)),
        Err(_) => {
            debug!(protocol = %proto, dst = %dst, "read deadline expired before classification");
            return Ok(Verdict::Aborted);
        }
    };

    if head.is_empty() {
        return Ok(Verdict::Aborted);
    }

    let extracted = match proto {
        FlowProtocol::Https => focusd_proto::extract_sni(&head),
        FlowProtocol::Http => focusd_proto::extract_host(&head),
    };

    let host = match extracted {
        Ok(host) => host,
        Err(e) => {
            // Unknown hostname means no decision is possible; fail closed.
            info!(protocol = %proto, host = "unknown", dst = %dst, error = %e, "blocked");
            send_closer(&mut client, proto).await;
            return Ok(Verdict::Blocked);
        }
    };

    if rules.matches(&host) {
        info!(protocol = %proto, host = %host, dst = %dst, "blocked");
        send_closer(&mut client, proto).await;
        return Ok(Verdict::Blocked);
    }

    info!(protocol = %proto, host = %host, dst = %dst, "allowed");

    let upstream = match connect_marked(dst, cfg.egress_mark, cfg.connect_timeout).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(protocol = %proto, host = %host, dst = %dst, error = %e, "upstream connect failed");
            return Err(e);
        }
    };

    forward(client, upstream, &head, cfg.splice_timeout).await?;
    Ok(Verdict::Allowed)
}

/// Reads the bytes a verdict will be based on, at most 16 KiB.
///
/// TLS classification uses the initial read only (no record reassembly);
/// HTTP reads until the blank line ending the header block, EOF, or the
/// ceiling.
async fn read_head(stream: &mut TcpStream, proto: FlowProtocol) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    let mut total = 0;

    loop {
        let n = stream.read(&mut buf[total..]).await?;
        total += n;

        if n == 0 || total == MAX_HEAD_BYTES {
            break;
        }
        match proto {
            FlowProtocol::Https => break,
            FlowProtocol::Http => {
                if has_header_end(&buf[..total]) {
                    break;
                }
            }
        }
    }

    buf.truncate(total);
    Ok(buf)
}

fn has_header_end(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

/// Sends the protocol-appropriate rejection and closes the write side.
async fn send_closer(stream: &mut TcpStream, proto: FlowProtocol) {
    let closer: &[u8] = match proto {
        FlowProtocol::Https => &TLS_ALERT,
        FlowProtocol::Http => HTTP_FORBIDDEN.as_bytes(),
    };

    let _ = timeout(CLOSER_TIMEOUT, stream.write_all(closer)).await;
    let _ = stream.shutdown().await;
}

/// Opens the upstream connection with the proxy-egress mark set.
///
/// The mark is applied before connect so the very first SYN is exempt
/// from the interception rules. A mark of zero leaves the socket
/// unmarked.
async fn connect_marked(dst: SocketAddr, mark: u32, deadline: Duration) -> Result<TcpStream> {
    let socket = match dst {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    if mark != 0 {
        socket2::SockRef::from(&socket)
            .set_mark(mark)
            .map_err(|source| ProxyError::UpstreamConnect { addr: dst, source })?;
    }

    match timeout(deadline, socket.connect(dst)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::UpstreamConnect { addr: dst, source }),
        Err(_) => Err(ProxyError::UpstreamConnectTimeout { addr: dst }),
    }
}

/// Replays the consumed prefix, then splices both half-duplexes.
///
/// Each direction runs under its own deadline and closes the peer's
/// write side once its source reaches EOF.
async fn forward(
    client: TcpStream,
    mut upstream: TcpStream,
    head: &[u8],
    splice_timeout: Duration,
) -> Result<()> {
    upstream.write_all(head).await?;

    let (mut client_rd, mut client_wr) = client.into_split();
    let (mut upstream_rd, mut upstream_wr) = upstream.into_split();

    let client_to_upstream = async {
        let copied = timeout(splice_timeout, tokio::io::copy(&mut client_rd, &mut upstream_wr)).await;
        let _ = upstream_wr.shutdown().await;
        copied
    };

    let upstream_to_client = async {
        let copied = timeout(splice_timeout, tokio::io::copy(&mut upstream_rd, &mut client_wr)).await;
        let _ = client_wr.shutdown().await;
        copied
    };

    let (up, down) = tokio::join!(client_to_upstream, upstream_to_client);
    for (direction, result) in [("client->upstream", up), ("upstream->client", down)] {
        match result {
            Ok(Ok(bytes)) => debug!(direction, bytes, "splice finished"),
            Ok(Err(e)) => debug!(direction, error = %e, "splice ended with error"),
            Err(_) => debug!(direction, "splice deadline expired"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_end_detection() {
        assert!(has_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(has_header_end(b"GET / HTTP/1.1\nHost: x\n\n"));
        assert!(!has_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n"));
        assert!(!has_header_end(b""));
    }

    #[test]
    fn tls_alert_is_a_fatal_alert_record() {
        assert_eq!(TLS_ALERT.len(), 7);
        assert_eq!(TLS_ALERT[0], 0x15, "content type must be alert");
        assert_eq!(u16::from_be_bytes([TLS_ALERT[3], TLS_ALERT[4]]), 2);
        assert_eq!(TLS_ALERT[5], 0x02, "alert level must be fatal");
    }

    #[test]
    fn forbidden_response_shape() {
        assert!(HTTP_FORBIDDEN.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(HTTP_FORBIDDEN.contains("Connection: close"));
        assert!(HTTP_FORBIDDEN.contains("\r\n\r\n"));
    }
}
