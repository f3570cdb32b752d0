//! The focusd supervisor.
//!
//! Reads the persisted state, drives the sinkhole emitter, the firewall
//! controller, and the transparent proxy through apply/remove
//! transitions, refreshes the IP-drop set on a timer, and reacts to
//! signals: SIGHUP reloads, SIGINT/SIGTERM shut down cleanly.
//!
//! On clean shutdown the firewall rules and sinkhole file deliberately
//! persist while the state is enabled, so a daemon crash or restart
//! never opens a window with the blocker lifted.

use std::sync::Arc;

use anyhow::{Context, Result};
use focusd_config::Config;
use focusd_filter::Blocklist;
use focusd_netfilter::Firewall;
use focusd_proxy::{ProxyConfig, TransparentProxy};
use focusd_resolver::Resolver;
use focusd_sinkhole::SinkholeFile;
use focusd_state::StateFile;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// The long-running focusd daemon.
pub struct Daemon {
    cfg: Config,
    state: StateFile,
    resolver: Resolver,
    firewall: Firewall,
    sinkhole: SinkholeFile,
    proxy: Option<TransparentProxy>,
    /// Blocklist snapshot taken at the last apply; refresh ticks reuse it.
    domains: Vec<String>,
}

impl Daemon {
    /// Creates a daemon from a validated configuration.
    pub fn new(cfg: Config) -> Self {
        let sinkhole = SinkholeFile::new(cfg.dnsmasq_config_path.clone());
        Self {
            state: StateFile::default(),
            resolver: Resolver::new(),
            firewall: Firewall::new(focusd_proxy::HTTP_PORT, focusd_proxy::HTTPS_PORT),
            sinkhole,
            proxy: None,
            domains: Vec::new(),
            cfg,
        }
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn run(mut self) -> Result<()> {
        info!("focusd daemon starting");

        let enabled = self.state.load().context("checking state")?.is_enabled();
        if enabled {
            info!("blocking is enabled, applying rules");
            self.apply_rules().await.context("applying initial rules")?;
        } else {
            // A prior process may have left an installation behind.
            info!("blocking is disabled, ensuring rules are removed");
            self.remove_rules().await;
        }

        let mut sigint =
            signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("registering SIGHUP handler")?;

        let refresh = self.cfg.refresh_interval();
        let mut ticker = tokio::time::interval(refresh);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        info!(
            refresh_interval_secs = refresh.as_secs(),
            "daemon running"
        );

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading");
                    if let Err(e) = self.reload().await {
                        error!(error = %e, "reload failed");
                    }
                }
                _ = ticker.tick() => {
                    match self.state.load() {
                        Ok(state) if state.is_enabled() => {
                            info!("refreshing blocked IPs");
                            if let Err(e) = self.refresh_ip_drops().await {
                                warn!(error = %e, "refresh failed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "failed to read state"),
                    }
                }
            }
        }

        // Firewall rules and the sinkhole file stay installed; only the
        // proxy drains. Redirected flows are refused until the next start.
        if let Some(proxy) = self.proxy.take() {
            proxy.stop().await;
        }

        info!("focusd daemon stopped");
        Ok(())
    }

    /// Brings the full blocking installation up.
    ///
    /// Sinkhole and proxy failures are fatal; resolution and IP-drop
    /// failures are warnings, since those rules are a best-effort second
    /// line behind the proxy.
    async fn apply_rules(&mut self) -> Result<()> {
        let domains = self.cfg.load_blocklist().context("loading blocklist")?;
        info!(domains = domains.len(), "blocklist loaded");

        self.sinkhole
            .write(&domains)
            .context("writing sinkhole config")?;

        let ips = self.resolver.resolve(&domains).await;
        info!(addresses = ips.len(), "resolved blocklist addresses");
        if let Err(e) = self.firewall.install_ip_drops(&ips).await {
            warn!(error = %e, "failed to install ip drop rules");
        }

        // Restart the proxy so a reload picks up blocklist changes.
        if let Some(old) = self.proxy.take() {
            old.stop().await;
        }
        let rules = Arc::new(Blocklist::new(&domains));
        let proxy = TransparentProxy::start(ProxyConfig::default(), rules)
            .await
            .context("starting transparent proxy")?;
        self.proxy = Some(proxy);

        if let Err(e) = self.firewall.install_interception().await {
            // Interception without a live proxy would blackhole the host;
            // interception rules that failed half-way are torn back down.
            if let Some(proxy) = self.proxy.take() {
                proxy.stop().await;
            }
            let _ = self.firewall.remove_interception().await;
            return Err(e).context("installing interception rules");
        }

        self.domains = domains;
        Ok(())
    }

    /// Tears the blocking installation down; every step tolerates absence.
    async fn remove_rules(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            proxy.stop().await;
        }

        if let Err(e) = self.firewall.remove_interception().await {
            warn!(error = %e, "failed to remove interception rules");
        }
        if let Err(e) = self.firewall.remove_ip_drops().await {
            warn!(error = %e, "failed to remove ip drop rules");
        }
        if let Err(e) = self.sinkhole.remove() {
            warn!(error = %e, "failed to remove sinkhole config");
        }

        self.domains.clear();
        info!("all rules removed");
    }

    /// Re-resolves the blocklist snapshot and replaces the IP-drop set.
    async fn refresh_ip_drops(&mut self) -> Result<()> {
        let ips = self.resolver.resolve(&self.domains).await;
        self.firewall
            .install_ip_drops(&ips)
            .await
            .context("replacing ip drop set")?;

        info!(addresses = ips.len(), "ip drop set refreshed");
        Ok(())
    }

    /// Re-reads state and converges the installation to it.
    async fn reload(&mut self) -> Result<()> {
        let state = self.state.load().context("checking state")?;

        if state.is_enabled() {
            info!("reloading: blocking is enabled");
            self.apply_rules().await
        } else {
            info!("reloading: blocking is disabled");
            self.remove_rules().await;
            Ok(())
        }
    }
}
