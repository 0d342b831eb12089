//! Persistence Gateway
//!
//! One table: email fingerprint → processor customer ID, fingerprint unique.
//! Rows are written once and never updated or deleted by this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::email::EmailFingerprint;

/// Local mapping row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub fingerprint: EmailFingerprint,
    pub remote_customer_id: String,
    pub created_at: DateTime<Utc>,
}

impl LocalUser {
    pub fn new(fingerprint: EmailFingerprint, remote_customer_id: impl Into<String>) -> Self {
        Self {
            fingerprint,
            remote_customer_id: remote_customer_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Store failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row for this fingerprint already exists
    #[error("fingerprint already mapped: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// User store trait
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, fingerprint: &EmailFingerprint) -> Result<Option<LocalUser>, StoreError>;

    /// Insert a new row. Fails with [`StoreError::Conflict`] if the fingerprint exists.
    async fn insert(&self, user: LocalUser) -> Result<(), StoreError>;
}

/// In-memory user store (for development)
pub struct MemoryUserStore {
    users: RwLock<HashMap<EmailFingerprint, LocalUser>>,
    fail_inserts: AtomicBool,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            fail_inserts: AtomicBool::new(false),
        }
    }

    /// Make inserts fail as if the database were down
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, fingerprint: &EmailFingerprint) -> Result<Option<LocalUser>, StoreError> {
        Ok(self.users.read().await.get(fingerprint).cloned())
    }

    async fn insert(&self, user: LocalUser) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("inserts disabled".into()));
        }

        let mut users = self.users.write().await;
        if users.contains_key(&user.fingerprint) {
            return Err(StoreError::Conflict(user.fingerprint.to_string()));
        }
        users.insert(user.fingerprint.clone(), user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fingerprint_is_unique() {
        let store = MemoryUserStore::new();
        let fp = EmailFingerprint::of("student@isct.ac.jp");

        store.insert(LocalUser::new(fp.clone(), "cus_1")).await.unwrap();
        let err = store.insert(LocalUser::new(fp.clone(), "cus_2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let user = store.get(&fp).await.unwrap().unwrap();
        assert_eq!(user.remote_customer_id, "cus_1");
    }
}
