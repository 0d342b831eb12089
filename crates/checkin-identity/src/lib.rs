//! # checkin-identity
//!
//! Who is calling, and which processor customer are they?
//!
//! - [`TokenService`] issues and validates short-lived tokens for
//!   institutional emails.
//! - [`IdentityResolver`] maps a verified email to exactly one processor
//!   customer through the [`UserStore`] mapping table.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkin_identity::{CustomerProfile, IdentityResolver, TokenConfig, TokenService};
//!
//! let tokens = TokenService::new(TokenConfig::from_env()?)?;
//! let issued = tokens.issue_token("student@isct.ac.jp")?;
//!
//! let email = tokens.validate_token(&issued.token)?;
//! let resolution = resolver.resolve_or_create(&email, CustomerProfile::default()).await?;
//! ```

mod email;
mod error;
mod resolver;
mod store;
mod token;

pub use email::{EmailFingerprint, normalize_email, parse_email};
pub use error::{IdentityError, Result};
pub use resolver::{CustomerProfile, CustomerSelector, IdentityResolver, Resolution, ResolutionKind};
pub use store::{LocalUser, MemoryUserStore, StoreError, UserStore};
pub use token::{Claims, IssuedToken, TokenConfig, TokenService};
