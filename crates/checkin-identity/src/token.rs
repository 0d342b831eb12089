//! Identity Token Service
//!
//! Stateless HS256 tokens binding one verified institutional email to an
//! expiry. There is no server-side session and no nonce, so a token stays
//! usable until `exp`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::email::parse_email;
use crate::error::{IdentityError, Result};

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Normalized email
    pub email: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Token service configuration
#[derive(Clone)]
pub struct TokenConfig {
    /// HMAC signing secret
    pub secret: String,

    /// Token validity window
    pub ttl: Duration,

    /// Accepted email domain, without the `@`
    pub institutional_domain: String,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .field("institutional_domain", &self.institutional_domain)
            .finish()
    }
}

impl TokenConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::hours(2),
            institutional_domain: "isct.ac.jp".into(),
        }
    }

    /// Read `JWT_SECRET`, `JWT_EXPIRATION_HOURS` and `INSTITUTIONAL_EMAIL_DOMAIN`
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| IdentityError::Config("JWT_SECRET not set".into()))?;

        let mut config = Self::new(secret);

        if let Ok(hours) = std::env::var("JWT_EXPIRATION_HOURS") {
            let hours: i64 = hours.parse().map_err(|_| {
                IdentityError::Config("JWT_EXPIRATION_HOURS must be an integer".into())
            })?;
            config.ttl = ttl_from_hours(hours)?;
        }

        if let Ok(domain) = std::env::var("INSTITUTIONAL_EMAIL_DOMAIN") {
            config.institutional_domain = domain.trim().trim_start_matches('@').to_lowercase();
        }

        Ok(config)
    }
}

fn ttl_from_hours(hours: i64) -> Result<Duration> {
    Duration::try_hours(hours)
        .ok_or_else(|| IdentityError::Config(format!("JWT_EXPIRATION_HOURS {hours} out of range")))
}

/// Issued token and its embedded identity
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Token Service
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    domain_suffix: String,
}

impl TokenService {
    /// Build from configuration; an empty secret or non-positive TTL is rejected
    pub fn new(config: TokenConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(IdentityError::Config("token secret is empty".into()));
        }
        if config.ttl <= Duration::zero() {
            return Err(IdentityError::Config("token TTL must be positive".into()));
        }
        if Utc::now().checked_add_signed(config.ttl).is_none() {
            return Err(IdentityError::Config("token TTL out of range".into()));
        }
        if config.institutional_domain.is_empty() {
            return Err(IdentityError::Config("institutional domain is empty".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttl: config.ttl,
            domain_suffix: format!("@{}", config.institutional_domain),
        })
    }

    /// Issue a token for an institutional email
    pub fn issue_token(&self, email: &str) -> Result<IssuedToken> {
        self.issue_token_at(email, Utc::now())
    }

    fn issue_token_at(&self, email: &str, now: DateTime<Utc>) -> Result<IssuedToken> {
        let email = parse_email(email)?;
        if !email.ends_with(&self.domain_suffix) {
            return Err(IdentityError::InvalidEmail(format!(
                "email must be an {} address",
                self.domain_suffix.trim_start_matches('@')
            )));
        }

        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| IdentityError::Internal("token expiry out of range".into()))?;
        let claims = Claims {
            email: email.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Internal(format!("token encoding failed: {e}")))?;

        Ok(IssuedToken {
            token,
            email,
            expires_at,
        })
    }

    /// Validate a token and return its email
    ///
    /// Every failure collapses to [`IdentityError::Unauthorized`].
    pub fn validate_token(&self, token: &str) -> Result<String> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.email)
            .map_err(|e| {
                tracing::debug!(reason = ?e.kind(), "Token rejected");
                IdentityError::Unauthorized
            })
    }
}
