//! Server Configuration

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use checkin_identity::normalize_email;

/// Which payment processor backs the server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorKind {
    Stripe,
    /// In-memory processor for local development
    Mock,
}

/// HTTP-level settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Upper bound on a request, including its outbound processor calls
    pub request_timeout: Duration,

    /// Normalized emails allowed to use listing endpoints
    pub admin_emails: HashSet<String>,

    pub processor: ProcessorKind,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

        let request_timeout = match std::env::var("REQUEST_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(
                secs.parse()
                    .context("REQUEST_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            Err(_) => Duration::from_secs(30),
        };

        let admin_emails = parse_admins(&std::env::var("ADMIN_EMAILS").unwrap_or_default());

        let processor = match std::env::var("PAYMENT_PROCESSOR").as_deref() {
            Ok("mock") => ProcessorKind::Mock,
            Ok("stripe") | Err(_) => ProcessorKind::Stripe,
            Ok(other) => anyhow::bail!("unknown PAYMENT_PROCESSOR {other:?}"),
        };

        Ok(Self {
            bind_addr,
            request_timeout,
            admin_emails,
            processor,
        })
    }
}

/// Comma-separated list; blanks dropped, entries normalized
pub fn parse_admins(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admins() {
        let admins = parse_admins(" Admin@isct.ac.jp, ,ops@isct.ac.jp ");
        assert_eq!(admins.len(), 2);
        assert!(admins.contains("admin@isct.ac.jp"));
        assert!(parse_admins("").is_empty());
    }
}
