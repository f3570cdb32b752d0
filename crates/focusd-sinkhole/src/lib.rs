//! # focusd DNS sinkhole emitter
//!
//! Produces the dnsmasq configuration that answers every blocked name —
//! including all subdomains — with `0.0.0.0`. The daemon writes this file
//! on apply and deletes it on remove; reloading the DNS server itself is
//! someone else's job.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Sinkhole emitter error.
#[derive(Error, Debug)]
pub enum SinkholeError {
    #[error("failed to write sinkhole config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove sinkhole config {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for sinkhole operations.
pub type Result<T> = std::result::Result<T, SinkholeError>;

/// Static header marking the file as machine-owned.
const HEADER: &str = "# focusd - DNS blocking configuration\n# Auto-generated - do not edit manually\n\n";

/// Writes and removes the dnsmasq sinkhole file at a fixed path.
#[derive(Debug, Clone)]
pub struct SinkholeFile {
    path: PathBuf,
}

impl SinkholeFile {
    /// Creates an emitter targeting `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders and atomically installs the sinkhole file for `domains`.
    ///
    /// The parent directory is created as needed. Emitting the same
    /// domains twice produces byte-identical files.
    pub fn write(&self, domains: &[String]) -> Result<()> {
        let contents = render(domains);

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| SinkholeError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        // Write-then-rename so a crashed write never leaves dnsmasq a
        // half-formed config.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|source| SinkholeError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), domains = domains.len(), "sinkhole config written");
        Ok(())
    }

    /// Removes the sinkhole file; an already-absent file is success.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SinkholeError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Returns true if the sinkhole file currently exists.
    pub fn is_installed(&self) -> bool {
        self.path.exists()
    }
}

/// Renders the sinkhole file contents for a rule set.
pub fn render(domains: &[String]) -> String {
    let mut out = String::from(HEADER);

    for domain in domains {
        // dnsmasq address=/d/ already covers subdomains; the www line is
        // kept explicit for rules that will also be matched bare.
        let _ = writeln!(out, "address=/{domain}/0.0.0.0");
        if !domain.starts_with("www.") {
            let _ = writeln!(out, "address=/www.{domain}/0.0.0.0");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_emits_base_and_www() {
        let out = render(&["youtube.com".to_string()]);
        assert!(out.contains("address=/youtube.com/0.0.0.0\n"));
        assert!(out.contains("address=/www.youtube.com/0.0.0.0\n"));
    }

    #[test]
    fn render_skips_www_variant_for_www_rule() {
        let out = render(&["www.reddit.com".to_string()]);
        assert!(out.contains("address=/www.reddit.com/0.0.0.0\n"));
        assert!(!out.contains("address=/www.www.reddit.com/"));
    }

    #[test]
    fn render_is_deterministic() {
        let domains = vec!["a.example".to_string(), "b.example".to_string()];
        assert_eq!(render(&domains), render(&domains));
    }

    #[test]
    fn header_is_static() {
        let out = render(&[]);
        assert_eq!(out, HEADER);
    }

    #[test]
    fn write_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sinkhole = SinkholeFile::new(dir.path().join("dnsmasq.conf"));

        sinkhole.write(&["example.com".to_string()]).unwrap();
        assert!(sinkhole.is_installed());

        let first = std::fs::read(sinkhole.path()).unwrap();
        sinkhole.write(&["example.com".to_string()]).unwrap();
        let second = std::fs::read(sinkhole.path()).unwrap();
        assert_eq!(first, second, "rewrites must be byte-identical");

        sinkhole.remove().unwrap();
        assert!(!sinkhole.is_installed());
    }

    #[test]
    fn remove_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let sinkhole = SinkholeFile::new(dir.path().join("missing.conf"));

        sinkhole.remove().unwrap();
        sinkhole.remove().unwrap();
    }

    #[test]
    fn write_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sinkhole = SinkholeFile::new(dir.path().join("nested/deeper/dnsmasq.conf"));

        sinkhole.write(&["example.com".to_string()]).unwrap();
        assert!(sinkhole.is_installed());
    }
}
