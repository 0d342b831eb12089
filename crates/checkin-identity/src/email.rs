//! Email Normalization and Fingerprints

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{IdentityError, Result};

/// Trim and lowercase
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize and reject empty or structurally invalid addresses
pub fn parse_email(email: &str) -> Result<String> {
    let normalized = normalize_email(email);
    if normalized.is_empty() {
        return Err(IdentityError::InvalidEmail("email is required".into()));
    }
    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(normalized)
        }
        _ => Err(IdentityError::InvalidEmail("email is malformed".into())),
    }
}

/// Lowercase hex SHA-256 of a normalized email
///
/// The local user table is keyed by this value; raw emails are never stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailFingerprint(String);

impl EmailFingerprint {
    /// Fingerprint of `email` after normalization
    pub fn of(email: &str) -> Self {
        let digest = Sha256::digest(normalize_email(email).as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_email("  Student@ISCT.ac.jp \n"), "student@isct.ac.jp");
    }

    #[test]
    fn test_fingerprint_ignores_case_and_whitespace() {
        let a = EmailFingerprint::of("student@isct.ac.jp");
        let b = EmailFingerprint::of(" STUDENT@isct.ac.jp");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains("student"));
    }

    #[test]
    fn test_parse_email() {
        assert!(parse_email("").is_err());
        assert!(parse_email("   ").is_err());
        assert!(parse_email("no-at-sign").is_err());
        assert!(parse_email("@isct.ac.jp").is_err());
        assert!(parse_email("a@b@c").is_err());
        assert_eq!(parse_email(" A@isct.ac.jp").unwrap(), "a@isct.ac.jp");
    }
}
