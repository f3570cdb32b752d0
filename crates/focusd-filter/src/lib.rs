//! # focusd domain matching
//!
//! A [`Blocklist`] holds the normalized rule set the proxy consults for
//! every flow. Matching is exact-or-subdomain: host `h` matches rule `r`
//! when `h == r` or `h` ends with `"." + r`. A rule carrying a `www.`
//! prefix additionally participates through its bare form, so blocking
//! `www.example.com` also blocks `example.com` and every subdomain.
//!
//! No wildcards, no regex, no ordering. Duplicate rules are idempotent
//! and an empty rule set is a valid matcher that matches nothing.

#![warn(missing_docs)]

use std::collections::HashSet;

/// An immutable set of blocked domains.
///
/// Built once per rule install and shared read-only across connection
/// handlers.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    domains: HashSet<String>,
}

impl Blocklist {
    /// Builds a blocklist from raw rules.
    ///
    /// Rules are lowercased and lose a trailing dot; empty rules are
    /// dropped. `www.`-prefixed rules also register their bare form.
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut domains = HashSet::new();

        for rule in rules {
            let rule = normalize(rule.as_ref());
            if rule.is_empty() {
                continue;
            }

            if let Some(bare) = rule.strip_prefix("www.") {
                if !bare.is_empty() {
                    domains.insert(bare.to_string());
                }
            }
            domains.insert(rule);
        }

        Self { domains }
    }

    /// Checks whether a hostname is blocked.
    pub fn matches(&self, host: &str) -> bool {
        if self.domains.is_empty() {
            return false;
        }

        let host = normalize(host);
        let mut candidate = host.as_str();
        loop {
            if self.domains.contains(candidate) {
                return true;
            }
            // Walk up one label; suffix matches only at label boundaries.
            match candidate.find('.') {
                Some(pos) => candidate = &candidate[pos + 1..],
                None => return false,
            }
        }
    }

    /// Returns the number of distinct match targets.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if no rules are loaded.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

fn normalize(host: &str) -> String {
    let host = host.trim();
    let host = host.strip_suffix('.').unwrap_or(host);
    host.to_ascii_lowercase()
}
