//! # focusd transparent proxy
//!
//! Terminates redirected HTTP and HTTPS flows on two loopback ports,
//! recovers each flow's original destination from kernel socket metadata,
//! classifies it by hostname (Host header or SNI, no decryption), and
//! either rejects it or splices it onward without rewriting payload.
//!
//! The listeners carry `IP_TRANSPARENT` so the kernel will hand them
//! flows addressed elsewhere; upstream sockets carry the proxy-egress
//! mark so the interception rules leave them alone.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use focusd_filter::Blocklist;
use socket2::{Domain, Socket, Type};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub mod flow;

pub use flow::{serve_flow, FlowProtocol, Verdict};

/// Default loopback port for intercepted HTTP.
pub const HTTP_PORT: u16 = 50080;

/// Default loopback port for intercepted HTTPS.
pub const HTTPS_PORT: u16 = 50443;

/// Default mark for the proxy's own upstream sockets.
pub const DEFAULT_EGRESS_MARK: u32 = 50;

/// Proxy error types.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A transparent listener could not be bound.
    #[error("failed to bind transparent listener on port {port}: {source}")]
    Bind {
        /// Loopback port that failed to bind.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The kernel did not report an original destination for a flow.
    #[error("original destination unavailable: {0}")]
    OriginalDestination(#[source] std::io::Error),

    /// The upstream connection failed.
    #[error("failed to connect upstream {addr}: {source}")]
    UpstreamConnect {
        /// The recovered original destination.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The upstream connection did not complete in time.
    #[error("timed out connecting upstream {addr}")]
    UpstreamConnectTimeout {
        /// The recovered original destination.
        addr: SocketAddr,
    },

    /// Any other per-flow IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Tunables for the proxy data plane.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Loopback port receiving redirected HTTP flows.
    pub http_port: u16,

    /// Loopback port receiving redirected HTTPS flows.
    pub https_port: u16,

    /// Deadline for the classifying read.
    pub read_timeout: Duration,

    /// Deadline for the upstream connect.
    pub connect_timeout: Duration,

    /// Per-direction splice deadline.
    pub splice_timeout: Duration,

    /// How long in-flight handlers get to drain on stop.
    pub shutdown_grace: Duration,

    /// Mark set on upstream sockets; zero leaves them unmarked.
    pub egress_mark: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_port: HTTP_PORT,
            https_port: HTTPS_PORT,
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            splice_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(10),
            egress_mark: DEFAULT_EGRESS_MARK,
        }
    }
}

/// The running proxy: two transparent listeners plus their accept loops.
pub struct TransparentProxy {
    cfg: ProxyConfig,
    shutdown_tx: broadcast::Sender<()>,
    tracker: Arc<ConnTracker>,
    accept_handles: Vec<JoinHandle<()>>,
}

impl TransparentProxy {
    /// Binds both listeners and starts accepting redirected flows.
    ///
    /// The blocklist snapshot is shared read-only by every handler for
    /// the lifetime of this proxy instance.
    pub async fn start(cfg: ProxyConfig, rules: Arc<Blocklist>) -> Result<Self> {
        let http = bind_transparent(cfg.http_port)?;
        let https = bind_transparent(cfg.https_port)?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let tracker = Arc::new(ConnTracker::new());

        let mut accept_handles = Vec::with_capacity(2);
        for (listener, proto) in [(http, FlowProtocol::Http), (https, FlowProtocol::Https)] {
            accept_handles.push(tokio::spawn(accept_loop(
                listener,
                proto,
                rules.clone(),
                cfg.clone(),
                shutdown_tx.subscribe(),
                tracker.clone(),
            )));
        }

        info!(
            http_port = cfg.http_port,
            https_port = cfg.https_port,
            rules = rules.len(),
            "transparent proxy started"
        );

        Ok(Self {
            cfg,
            shutdown_tx,
            tracker,
            accept_handles,
        })
    }

    /// Stops accepting and drains in-flight handlers.
    ///
    /// Handlers get [`ProxyConfig::shutdown_grace`] to finish; whatever
    /// is still running after that is abandoned to die with its sockets.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.accept_handles {
            let _ = handle.await;
        }

        if timeout(self.cfg.shutdown_grace, self.tracker.drained())
            .await
            .is_err()
        {
            warn!(
                active = self.tracker.active(),
                "transparent proxy stopped with connections still in flight"
            );
        } else {
            info!("transparent proxy stopped");
        }
    }
}

/// Creates a loopback listener that accepts flows addressed elsewhere.
fn bind_transparent(port: u16) -> Result<TcpListener> {
    let bind = |port: u16| -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_ip_transparent(true)?;
        socket.set_nonblocking(true)?;

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        TcpListener::from_std(socket.into())
    };

    bind(port).map_err(|source| ProxyError::Bind { port, source })
}

/// Recovers the destination the client originally dialed.
fn original_destination(stream: &TcpStream) -> std::io::Result<SocketAddr> {
    let sock = socket2::SockRef::from(stream);
    let addr = sock.original_dst().or_else(|_| sock.original_dst_ipv6())?;

    addr.as_socket().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "original destination is not an IP address",
        )
    })
}

async fn accept_loop(
    listener: TcpListener,
    proto: FlowProtocol,
    rules: Arc<Blocklist>,
    cfg: ProxyConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
    tracker: Arc<ConnTracker>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let guard = tracker.track();
                        let rules = rules.clone();
                        let cfg = cfg.clone();
                        tokio::spawn(async move {
                            let _guard = guard;
                            handle_connection(stream, peer, proto, &rules, &cfg).await;
                        });
                    }
                    // Accept errors while shutting down are absorbed by
                    // the select arm above on the next pass.
                    Err(e) => debug!(protocol = %proto, error = %e, "accept error"),
                }
            }
        }
    }
    debug!(protocol = %proto, "listener closed");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    proto: FlowProtocol,
    rules: &Blocklist,
    cfg: &ProxyConfig,
) {
    let dst = match original_destination(&stream).map_err(ProxyError::OriginalDestination) {
        Ok(dst) => dst,
        Err(e) => {
            warn!(protocol = %proto, client = %peer, error = %e, "aborting flow");
            return;
        }
    };

    match flow::serve_flow(stream, dst, proto, rules, cfg).await {
        Ok(verdict) => debug!(protocol = %proto, client = %peer, dst = %dst, ?verdict, "flow finished"),
        Err(e) => info!(protocol = %proto, client = %peer, dst = %dst, error = %e, "flow ended with error"),
    }
}

/// Counts in-flight handlers so stop can drain them.
struct ConnTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ConnTracker {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn track(self: &Arc<Self>) -> ConnGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnGuard(self.clone())
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct ConnGuard(Arc<ConnTracker>);

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}
