//! # focusd USB key authentication
//!
//! Toggling the blocker requires presenting a physical token: a file on
//! an external storage device whose SHA-256 digest matches the
//! preconfigured expectation. The expected digest lives in a text file in
//! `sha256sum` output format — the first whitespace-delimited field is
//! the lowercase hex digest.

use std::path::{Path, PathBuf};

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Authentication failure.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("cannot read expected token hash {path}: {source}")]
    HashFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token hash file {path} is empty or malformed")]
    HashFileMalformed { path: PathBuf },

    #[error("invalid key glob {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("no key file matching {pattern:?} found")]
    KeyNotFound { pattern: String },

    #[error("cannot read key file {path}: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key file does not match expected token")]
    DigestMismatch,
}

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Verifies the presence and digest of the USB key.
#[derive(Debug, Clone)]
pub struct KeyVerifier {
    key_glob: String,
    hash_path: PathBuf,
}

impl KeyVerifier {
    /// Creates a verifier for a key glob and an expected-digest file.
    pub fn new(key_glob: impl Into<String>, hash_path: impl Into<PathBuf>) -> Self {
        Self {
            key_glob: key_glob.into(),
            hash_path: hash_path.into(),
        }
    }

    /// Checks that a key file is present and carries the expected digest.
    pub fn verify(&self) -> Result<()> {
        let expected = self.read_expected_digest()?;
        let key_file = self.find_key_file()?;

        let contents = std::fs::read(&key_file).map_err(|source| AuthError::KeyUnreadable {
            path: key_file.clone(),
            source,
        })?;

        let actual = HEXLOWER.encode(&Sha256::digest(&contents));
        if actual != expected {
            return Err(AuthError::DigestMismatch);
        }

        Ok(())
    }

    /// Reads the expected digest: first field of the first line, lowercased.
    fn read_expected_digest(&self) -> Result<String> {
        let contents =
            std::fs::read_to_string(&self.hash_path).map_err(|source| AuthError::HashFileUnreadable {
                path: self.hash_path.clone(),
                source,
            })?;

        contents
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_ascii_lowercase)
            .filter(|digest| !digest.is_empty())
            .ok_or_else(|| AuthError::HashFileMalformed {
                path: self.hash_path.clone(),
            })
    }

    /// Locates the key file; with several matches the first one wins.
    fn find_key_file(&self) -> Result<PathBuf> {
        let matches = glob::glob(&self.key_glob).map_err(|source| AuthError::BadPattern {
            pattern: self.key_glob.clone(),
            source,
        })?;

        matches
            .filter_map(std::result::Result::ok)
            .next()
            .ok_or_else(|| AuthError::KeyNotFound {
                pattern: self.key_glob.clone(),
            })
    }
}

/// Computes the lowercase hex SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read(path)?;
    Ok(HEXLOWER.encode(&Sha256::digest(&contents)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_key(dir: &Path, contents: &[u8]) -> PathBuf {
        let path = dir.join("focusd.key");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn write_hash_file(dir: &Path, line: &str) -> PathBuf {
        let path = dir.join("token.sha256");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{line}").unwrap();
        path
    }

    #[test]
    fn accepts_matching_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path(), b"secret token\n");
        let digest = file_digest(&key).unwrap();
        let hash = write_hash_file(dir.path(), &format!("{digest}  focusd.key"));

        let verifier = KeyVerifier::new(key.to_string_lossy(), hash);
        verifier.verify().unwrap();
    }

    #[test]
    fn digest_comparison_is_case_insensitive_on_expectation() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path(), b"secret token\n");
        let digest = file_digest(&key).unwrap().to_ascii_uppercase();
        let hash = write_hash_file(dir.path(), &digest);

        let verifier = KeyVerifier::new(key.to_string_lossy(), hash);
        verifier.verify().unwrap();
    }

    #[test]
    fn rejects_wrong_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path(), b"wrong contents");
        let hash = write_hash_file(
            dir.path(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855  focusd.key",
        );

        let verifier = KeyVerifier::new(key.to_string_lossy(), hash);
        assert!(matches!(verifier.verify(), Err(AuthError::DigestMismatch)));
    }

    #[test]
    fn missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let hash = write_hash_file(dir.path(), "00  focusd.key");

        let pattern = dir.path().join("*.key");
        let verifier = KeyVerifier::new(pattern.to_string_lossy(), hash);
        assert!(matches!(verifier.verify(), Err(AuthError::KeyNotFound { .. })));
    }

    #[test]
    fn glob_pattern_finds_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path(), b"k");
        let digest = file_digest(&key).unwrap();
        let hash = write_hash_file(dir.path(), &digest);

        let pattern = dir.path().join("*.key");
        let verifier = KeyVerifier::new(pattern.to_string_lossy(), hash);
        verifier.verify().unwrap();
    }

    #[test]
    fn missing_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path(), b"k");

        let verifier = KeyVerifier::new(key.to_string_lossy(), dir.path().join("absent"));
        assert!(matches!(
            verifier.verify(),
            Err(AuthError::HashFileUnreadable { .. })
        ));
    }

    #[test]
    fn empty_hash_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path(), b"k");
        let hash = dir.path().join("token.sha256");
        std::fs::write(&hash, "").unwrap();

        let verifier = KeyVerifier::new(key.to_string_lossy(), hash);
        assert!(matches!(
            verifier.verify(),
            Err(AuthError::HashFileMalformed { .. })
        ));
    }
}
