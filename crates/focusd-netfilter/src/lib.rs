//! # focusd firewall control
//!
//! Owns every mutation of kernel packet-filter and policy-routing state.
//! Two independent installations are managed under stable names:
//!
//! - the *interception* table (`inet focusd_proxy`), which TPROXYs
//!   forwarded port-80/443 TCP into the local proxy, REDIRECTs
//!   locally-originated flows there, drops UDP/443 to force QUIC down to
//!   TCP, and marks packets for the policy route that makes them locally
//!   deliverable;
//! - the *IP-drop* table (`inet focusd`), a best-effort set of resolved
//!   blocklist addresses dropped on the output hook.
//!
//! All operations are convergent: installs atomically replace any prior
//! table of the same name, removals tolerate absence. Rulesets are built
//! as text and fed to `nft -f -`; policy routes go through `ip`/`ip -6`.

use std::net::IpAddr;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Mark applied by interception rules; keyed on by the policy route.
pub const INTERCEPT_MARK: u32 = 1;

/// Mark carried by the proxy's own upstream sockets; every chain returns
/// early when it sees this mark, which is what keeps the proxy's egress
/// from being re-intercepted.
pub const PROXY_EGRESS_MARK: u32 = 50;

/// Auxiliary route table holding the local-delivery route for marked
/// packets.
pub const ROUTE_TABLE: u32 = 100;

const INTERCEPT_TABLE: &str = "focusd_proxy";
const DROP_TABLE: &str = "focusd";

/// Firewall control error.
#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to feed ruleset to {program}: {source}")]
    Stdin {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for firewall operations.
pub type Result<T> = std::result::Result<T, FirewallError>;

/// Controller for the focusd packet-filter installations.
#[derive(Debug, Clone)]
pub struct Firewall {
    http_port: u16,
    https_port: u16,
}

impl Firewall {
    /// Creates a controller targeting the proxy's loopback ports.
    pub fn new(http_port: u16, https_port: u16) -> Self {
        Self {
            http_port,
            https_port,
        }
    }

    /// Installs the interception table and the policy route pair.
    pub async fn install_interception(&self) -> Result<()> {
        nft_apply(&interception_ruleset(self.http_port, self.https_port)).await?;
        install_policy_routes().await;
        debug!(
            http_port = self.http_port,
            https_port = self.https_port,
            "interception rules installed"
        );
        Ok(())
    }

    /// Removes the interception table and policy routes.
    ///
    /// An absent table or route is not an error.
    pub async fn remove_interception(&self) -> Result<()> {
        delete_table(INTERCEPT_TABLE).await;
        remove_policy_routes().await;
        Ok(())
    }

    /// Replaces the IP-drop installation with the given address set.
    ///
    /// Convergent via remove-then-reinstall: stale entries from a prior
    /// cycle never survive.
    pub async fn install_ip_drops(&self, ips: &[IpAddr]) -> Result<()> {
        nft_apply(&ip_drop_ruleset(ips)).await?;
        debug!(addresses = ips.len(), "ip drop rules installed");
        Ok(())
    }

    /// Removes the IP-drop table; absence is success.
    pub async fn remove_ip_drops(&self) -> Result<()> {
        delete_table(DROP_TABLE).await;
        Ok(())
    }
}

/// Renders the interception ruleset.
///
/// Three chains: prerouting TPROXY for forwarded traffic, a route-type
/// output chain marking locally-originated flows, and a NAT output chain
/// REDIRECTing them into the proxy. Loopback and RFC1918 destinations are
/// exempt, as is anything already carrying the proxy-egress mark.
/// The leading add/delete pair makes reinstallation atomic.
pub fn interception_ruleset(http_port: u16, https_port: u16) -> String {
    format!(
        r#"add table inet {table}
delete table inet {table}
table inet {table} {{
	chain prerouting {{
		type filter hook prerouting priority mangle; policy accept;

		ip daddr 127.0.0.0/8 return
		ip6 daddr ::1/128 return

		ip daddr 10.0.0.0/8 return
		ip daddr 172.16.0.0/12 return
		ip daddr 192.168.0.0/16 return

		tcp dport 80 tproxy ip to 127.0.0.1:{http} meta mark set {mark} accept
		tcp dport 80 tproxy ip6 to [::1]:{http} meta mark set {mark} accept

		tcp dport 443 tproxy ip to 127.0.0.1:{https} meta mark set {mark} accept
		tcp dport 443 tproxy ip6 to [::1]:{https} meta mark set {mark} accept

		udp dport 443 drop
	}}

	chain output {{
		type route hook output priority mangle; policy accept;

		meta mark {egress} return

		ip daddr 127.0.0.0/8 return
		ip6 daddr ::1/128 return

		ip daddr 10.0.0.0/8 return
		ip daddr 172.16.0.0/12 return
		ip daddr 192.168.0.0/16 return

		tcp dport 80 meta mark set {mark} accept
		tcp dport 443 meta mark set {mark} accept

		udp dport 443 drop
	}}

	chain output_nat {{
		type nat hook output priority -100; policy accept;

		meta mark {egress} return

		ip daddr 127.0.0.0/8 return
		ip6 daddr ::1/128 return

		ip daddr 10.0.0.0/8 return
		ip daddr 172.16.0.0/12 return
		ip daddr 192.168.0.0/16 return

		tcp dport 80 redirect to :{http}
		tcp dport 443 redirect to :{https}
	}}
}}
"#,
        table = INTERCEPT_TABLE,
        http = http_port,
        https = https_port,
        mark = INTERCEPT_MARK,
        egress = PROXY_EGRESS_MARK,
    )
}

/// Renders the IP-drop ruleset for a resolved address set.
///
/// Both address families are enforced through their own named set.
pub fn ip_drop_ruleset(ips: &[IpAddr]) -> String {
    let v4: Vec<String> = ips
        .iter()
        .filter(|ip| ip.is_ipv4())
        .map(ToString::to_string)
        .collect();
    let v6: Vec<String> = ips
        .iter()
        .filter(|ip| ip.is_ipv6())
        .map(ToString::to_string)
        .collect();

    let mut out = String::new();
    out.push_str(&format!("add table inet {DROP_TABLE}\n"));
    out.push_str(&format!("delete table inet {DROP_TABLE}\n"));
    out.push_str(&format!("table inet {DROP_TABLE} {{\n"));

    out.push_str("\tset blocked_ips {\n\t\ttype ipv4_addr\n");
    if !v4.is_empty() {
        out.push_str(&format!("\t\telements = {{ {} }}\n", v4.join(", ")));
    }
    out.push_str("\t}\n");

    out.push_str("\tset blocked_ips6 {\n\t\ttype ipv6_addr\n");
    if !v6.is_empty() {
        out.push_str(&format!("\t\telements = {{ {} }}\n", v6.join(", ")));
    }
    out.push_str("\t}\n");

    out.push_str("\tchain output {\n");
    out.push_str("\t\ttype filter hook output priority filter; policy accept;\n");
    out.push_str("\t\tip daddr @blocked_ips drop\n");
    out.push_str("\t\tip6 daddr @blocked_ips6 drop\n");
    out.push_str("\t}\n");
    out.push_str("}\n");
    out
}

/// Applies a ruleset with `nft -f -`.
async fn nft_apply(ruleset: &str) -> Result<()> {
    run("nft", &["-f", "-"], Some(ruleset)).await
}

/// Deletes a table by name; failure means it was not there.
async fn delete_table(name: &str) {
    if let Err(e) = run("nft", &["delete", "table", "inet", name], None).await {
        debug!(table = name, error = %e, "table not removed (likely absent)");
    }
}

/// Installs the fwmark policy rule and local-delivery route for both
/// address families. Errors are ignored: the rules may already exist.
async fn install_policy_routes() {
    let mark = INTERCEPT_MARK.to_string();
    let table = ROUTE_TABLE.to_string();

    let commands: [&[&str]; 4] = [
        &["ip", "rule", "add", "fwmark", mark.as_str(), "lookup", table.as_str()],
        &["ip", "route", "add", "local", "0.0.0.0/0", "dev", "lo", "table", table.as_str()],
        &["ip", "-6", "rule", "add", "fwmark", mark.as_str(), "lookup", table.as_str()],
        &["ip", "-6", "route", "add", "local", "::/0", "dev", "lo", "table", table.as_str()],
    ];

    for args in commands {
        if let Err(e) = run(args[0], &args[1..], None).await {
            debug!(error = %e, "policy route not added (may already exist)");
        }
    }
}

/// Removes the policy rules and routes; absence is expected on teardown.
async fn remove_policy_routes() {
    let mark = INTERCEPT_MARK.to_string();
    let table = ROUTE_TABLE.to_string();

    let commands: [&[&str]; 4] = [
        &["ip", "rule", "del", "fwmark", mark.as_str(), "lookup", table.as_str()],
        &["ip", "route", "del", "local", "0.0.0.0/0", "dev", "lo", "table", table.as_str()],
        &["ip", "-6", "rule", "del", "fwmark", mark.as_str(), "lookup", table.as_str()],
        &["ip", "-6", "route", "del", "local", "::/0", "dev", "lo", "table", table.as_str()],
    ];

    for args in commands {
        if let Err(e) = run(args[0], &args[1..], None).await {
            debug!(error = %e, "policy route not removed (likely absent)");
        }
    }
}

/// Runs an external command, optionally feeding stdin, capturing stderr.
async fn run(program: &str, args: &[&str], input: Option<&str>) -> Result<()> {
    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| FirewallError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if let Some(data) = input {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(data.as_bytes())
                .await
                .map_err(|source| FirewallError::Stdin {
                    program: program.to_string(),
                    source,
                })?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| FirewallError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let status = output
            .status
            .code()
            .map_or_else(|| "killed by signal".to_string(), |c| format!("exit {c}"));
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(program, %status, %stderr, "command failed");
        Err(FirewallError::CommandFailed {
            program: program.to_string(),
            status,
            stderr,
        })
    }
}
