//! # focusd domain resolution
//!
//! Maps the blocklist to the set of IP addresses it currently resolves
//! to, for the best-effort IP-drop rules. Resolution goes through the
//! system resolver (getaddrinfo via tokio's blocking pool); there is no
//! custom DNS path.

use std::collections::BTreeSet;
use std::net::IpAddr;

use tracing::{debug, warn};

/// Resolves blocklist domains through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct Resolver;

impl Resolver {
    /// Creates a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves every domain, plus a `www.` variant for domains lacking
    /// that prefix, and returns the deduplicated address set.
    ///
    /// Per-domain failure is a warning, not an error: a domain that does
    /// not resolve simply contributes no addresses this cycle. Failure of
    /// a synthesized `www.` variant is expected and stays quiet.
    pub async fn resolve(&self, domains: &[String]) -> Vec<IpAddr> {
        let mut addrs = BTreeSet::new();

        for domain in domains {
            for variant in domain_variants(domain) {
                match lookup(&variant).await {
                    Ok(ips) => addrs.extend(ips),
                    Err(e) if variant == *domain => {
                        warn!(domain = %variant, error = %e, "failed to resolve domain");
                    }
                    Err(e) => {
                        debug!(domain = %variant, error = %e, "www variant did not resolve");
                    }
                }
            }
        }

        addrs.into_iter().collect()
    }
}

/// Returns the name variants that participate in blocking for a domain.
pub fn domain_variants(domain: &str) -> Vec<String> {
    let mut variants = vec![domain.to_string()];
    if !domain.starts_with("www.") {
        variants.push(format!("www.{domain}"));
    }
    variants
}

async fn lookup(domain: &str) -> std::io::Result<Vec<IpAddr>> {
    let addrs = tokio::net::lookup_host((domain, 0)).await?;
    Ok(addrs.map(|sa| sa.ip()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_for_bare_domain() {
        assert_eq!(
            domain_variants("example.com"),
            vec!["example.com", "www.example.com"]
        );
    }

    #[test]
    fn variants_for_www_domain() {
        assert_eq!(domain_variants("www.example.com"), vec!["www.example.com"]);
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let resolver = Resolver::new();
        let ips = resolver.resolve(&["localhost".to_string()]).await;
        assert!(ips
            .iter()
            .any(|ip| ip.is_loopback()), "localhost should resolve to a loopback address");
    }

    #[tokio::test]
    async fn unresolvable_domain_contributes_nothing() {
        let resolver = Resolver::new();
        let ips = resolver
            .resolve(&["definitely-not-a-real-domain.invalid".to_string()])
            .await;
        assert!(ips.is_empty());
    }

    #[tokio::test]
    async fn results_are_deduplicated() {
        let resolver = Resolver::new();
        let domains = vec!["localhost".to_string(), "localhost".to_string()];
        let ips = resolver.resolve(&domains).await;

        let unique: BTreeSet<_> = ips.iter().collect();
        assert_eq!(unique.len(), ips.len());
    }
}
