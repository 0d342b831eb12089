//! Identity Resolver
//!
//! Maps a verified email to exactly one processor customer.
//!
//! ```text
//!   local row? ──yes──▶ fetch mapped customer                  (Existing)
//!       │no
//!   processor search by email ──match──▶ adopt first match     (Adopted)
//!       │none
//!   create customer                                            (Created)
//!       │
//!   insert local row ──conflict──▶ undo our create, adopt winning row
//!       │failure
//!   delete the customer we created, report Internal
//! ```
//!
//! Resolution is serialized per fingerprint inside this process; the store's
//! uniqueness constraint covers concurrent writers elsewhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use checkin_billing::{BillingError, CustomerPatch, NewCustomer, PaymentProcessor, RemoteCustomer};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::email::{EmailFingerprint, parse_email};
use crate::error::{IdentityError, Result};
use crate::store::{LocalUser, StoreError, UserStore};

/// Optional attributes for a newly created customer
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustomerProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub institutional_id: Option<String>,
}

/// How a resolution was satisfied
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// A local mapping already existed
    Existing,
    /// An existing processor customer was mapped
    Adopted,
    /// A new processor customer was created and mapped
    Created,
}

/// Result of [`IdentityResolver::resolve_or_create`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub customer: RemoteCustomer,
    pub kind: ResolutionKind,
}

impl Resolution {
    /// True when this call wrote the local mapping
    pub fn created(&self) -> bool {
        !matches!(self.kind, ResolutionKind::Existing)
    }
}

/// Disjoint customer selector; exactly one key per lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CustomerSelector {
    CustomerId(String),
    Email(String),
    InstitutionalId(String),
}

impl CustomerSelector {
    /// Build from optional query values; blank values count as absent
    pub fn from_parts(
        customer_id: Option<String>,
        email: Option<String>,
        institutional_id: Option<String>,
    ) -> Result<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        match (
            present(customer_id),
            present(email),
            present(institutional_id),
        ) {
            (Some(id), None, None) => Ok(Self::CustomerId(id)),
            (None, Some(email), None) => Ok(Self::Email(email)),
            (None, None, Some(tag)) => Ok(Self::InstitutionalId(tag)),
            _ => Err(IdentityError::InvalidInput(
                "exactly one of customer_id, email or institutional_id is required".into(),
            )),
        }
    }
}

/// Identity Resolver
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
    processor: Arc<dyn PaymentProcessor>,
    locks: StdMutex<LockMap>,
}

type LockMap = HashMap<EmailFingerprint, Arc<Mutex<()>>>;

/// Handle on a per-fingerprint lock; dropping it prunes the entry once unused
struct LockLease<'a> {
    locks: &'a StdMutex<LockMap>,
    fingerprint: EmailFingerprint,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this lease are the only holders
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.fingerprint);
        }
    }
}

fn storage(err: StoreError) -> IdentityError {
    IdentityError::Storage(err.to_string())
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn UserStore>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self {
            store,
            processor,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Return the caller's customer, creating local and remote records at most once
    pub async fn resolve_or_create(
        &self,
        email: &str,
        profile: CustomerProfile,
    ) -> Result<Resolution> {
        let email = parse_email(email)?;
        let fingerprint = EmailFingerprint::of(&email);

        let lease = self.lease(&fingerprint);
        let _guard = lease.lock.lock().await;
        self.resolve_locked(&email, &fingerprint, profile).await
    }

    fn lease(&self, fingerprint: &EmailFingerprint) -> LockLease<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(fingerprint.clone())
            .or_default()
            .clone();
        LockLease {
            locks: &self.locks,
            fingerprint: fingerprint.clone(),
            lock,
        }
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn resolve_locked(
        &self,
        email: &str,
        fingerprint: &EmailFingerprint,
        profile: CustomerProfile,
    ) -> Result<Resolution> {
        if let Some(user) = self.store.get(fingerprint).await.map_err(storage)? {
            let customer = self.fetch_mapped(&user).await?;
            return Ok(Resolution {
                customer,
                kind: ResolutionKind::Existing,
            });
        }

        let matches = self.processor.search_customers_by_email(email).await?;
        if matches.len() > 1 {
            tracing::warn!(
                fingerprint = %fingerprint,
                count = matches.len(),
                "Several processor customers share one email, adopting the first"
            );
        }

        let (customer, kind) = match matches.into_iter().next() {
            Some(existing) => (existing, ResolutionKind::Adopted),
            None => {
                let created = self
                    .processor
                    .create_customer(NewCustomer {
                        email: email.to_string(),
                        name: profile.name,
                        institutional_id: profile.institutional_id,
                    })
                    .await?;
                (created, ResolutionKind::Created)
            }
        };

        match self
            .store
            .insert(LocalUser::new(fingerprint.clone(), &customer.id))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    fingerprint = %fingerprint,
                    customer_id = %customer.id,
                    kind = ?kind,
                    "Mapped user to processor customer"
                );
                Ok(Resolution { customer, kind })
            }
            Err(StoreError::Conflict(_)) => {
                self.reconcile_conflict(fingerprint, &customer, kind).await
            }
            Err(StoreError::Unavailable(reason)) => {
                if kind == ResolutionKind::Created {
                    self.compensate(fingerprint, &customer.id).await;
                }
                tracing::error!(
                    fingerprint = %fingerprint,
                    customer_id = %customer.id,
                    reason = %reason,
                    "Failed to persist user mapping"
                );
                Err(IdentityError::Internal(format!(
                    "failed to persist mapping for customer {}",
                    customer.id
                )))
            }
        }
    }

    /// Another writer mapped this fingerprint first; its row wins
    async fn reconcile_conflict(
        &self,
        fingerprint: &EmailFingerprint,
        ours: &RemoteCustomer,
        kind: ResolutionKind,
    ) -> Result<Resolution> {
        if kind == ResolutionKind::Created && !self.compensate(fingerprint, &ours.id).await {
            return Err(IdentityError::Internal(format!(
                "orphaned processor customer {} after mapping conflict",
                ours.id
            )));
        }

        let winner = self
            .store
            .get(fingerprint)
            .await
            .map_err(storage)?
            .ok_or_else(|| {
                IdentityError::Internal(format!("mapping conflict for {fingerprint} but no row"))
            })?;

        tracing::info!(
            fingerprint = %fingerprint,
            customer_id = %winner.remote_customer_id,
            "Adopted concurrent user mapping"
        );

        let customer = self.fetch_mapped(&winner).await?;
        Ok(Resolution {
            customer,
            kind: ResolutionKind::Existing,
        })
    }

    /// Best-effort delete of a customer we just created. Returns whether it succeeded.
    async fn compensate(&self, fingerprint: &EmailFingerprint, customer_id: &str) -> bool {
        match self.processor.delete_customer(customer_id).await {
            Ok(()) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    customer_id = %customer_id,
                    "Rolled back processor customer"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    fingerprint = %fingerprint,
                    customer_id = %customer_id,
                    error = %e,
                    "Rollback failed, processor customer is orphaned"
                );
                false
            }
        }
    }

    async fn fetch_mapped(&self, user: &LocalUser) -> Result<RemoteCustomer> {
        self.processor
            .get_customer(&user.remote_customer_id)
            .await
            .map_err(|e| match e {
                // A stale mapping is a processor-side inconsistency, not a missing caller
                BillingError::NotFound(msg) => IdentityError::from(BillingError::Upstream(
                    format!("mapped customer {} missing: {msg}", user.remote_customer_id),
                )),
                other => IdentityError::from(other),
            })
    }

    /// Processor customer ID mapped to `fingerprint`, if any
    pub async fn mapped_customer_id(&self, fingerprint: &EmailFingerprint) -> Result<Option<String>> {
        Ok(self
            .store
            .get(fingerprint)
            .await
            .map_err(storage)?
            .map(|u| u.remote_customer_id))
    }

    /// Like [`mapped_customer_id`](Self::mapped_customer_id), but unmapped is `NotFound`
    pub async fn require_customer_id(&self, fingerprint: &EmailFingerprint) -> Result<String> {
        self.mapped_customer_id(fingerprint)
            .await?
            .ok_or_else(|| IdentityError::NotFound("no customer registered for caller".into()))
    }

    /// Fetch a customer the caller owns
    ///
    /// Ownership mismatch is `Forbidden`; no match at all is `NotFound`.
    pub async fn lookup(
        &self,
        selector: CustomerSelector,
        caller: &EmailFingerprint,
    ) -> Result<RemoteCustomer> {
        let owned = self.mapped_customer_id(caller).await?;

        match selector {
            CustomerSelector::CustomerId(id) => {
                if owned.as_deref() != Some(id.as_str()) {
                    return Err(IdentityError::Forbidden(format!("customer {id}")));
                }
                Ok(self.processor.get_customer(&id).await?)
            }

            CustomerSelector::Email(email) => {
                let email = parse_email(&email)?;
                if EmailFingerprint::of(&email) != *caller {
                    return Err(IdentityError::Forbidden("email of another user".into()));
                }
                if let Some(id) = owned {
                    return Ok(self.processor.get_customer(&id).await?);
                }
                self.processor
                    .search_customers_by_email(&email)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| IdentityError::NotFound("no customer for email".into()))
            }

            CustomerSelector::InstitutionalId(tag) => {
                let matches = self.processor.search_customers_by_institutional_id(&tag).await?;
                if matches.is_empty() {
                    return Err(IdentityError::NotFound(format!("institutional id {tag}")));
                }
                matches
                    .into_iter()
                    .find(|c| owned.as_deref() == Some(c.id.as_str()))
                    .ok_or_else(|| IdentityError::Forbidden(format!("institutional id {tag}")))
            }
        }
    }

    /// Patch a customer; absent fields are left untouched
    pub async fn update(&self, customer_id: &str, patch: &CustomerPatch) -> Result<RemoteCustomer> {
        if customer_id.trim().is_empty() {
            return Err(IdentityError::InvalidInput("customer_id is required".into()));
        }
        if patch.is_empty() {
            return Ok(self.processor.get_customer(customer_id).await?);
        }

        let customer = self.processor.update_customer(customer_id, patch).await?;
        tracing::info!(customer_id = %customer_id, "Updated processor customer");
        Ok(customer)
    }

    /// Patch the caller's own customer
    pub async fn update_own(
        &self,
        caller: &EmailFingerprint,
        patch: &CustomerPatch,
    ) -> Result<RemoteCustomer> {
        let customer_id = self.require_customer_id(caller).await?;
        self.update(&customer_id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUserStore;
    use async_trait::async_trait;
    use checkin_billing::MockProcessor;

    const EMAIL: &str = "student@isct.ac.jp";

    fn setup() -> (Arc<MemoryUserStore>, Arc<MockProcessor>, Arc<IdentityResolver>) {
        let store = Arc::new(MemoryUserStore::new());
        let mock = Arc::new(MockProcessor::new());
        let resolver = Arc::new(IdentityResolver::new(store.clone(), mock.clone()));
        (store, mock, resolver)
    }

    fn remote(id: &str, email: &str, tag: Option<&str>) -> RemoteCustomer {
        RemoteCustomer {
            id: id.into(),
            email: Some(email.into()),
            name: None,
            institutional_id: tag.map(Into::into),
        }
    }

    #[tokio::test]
    async fn test_first_resolution_creates_once() {
        let (store, mock, resolver) = setup();

        let first = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap();
        assert_eq!(first.kind, ResolutionKind::Created);
        assert!(first.created());
        assert_eq!(first.customer.id, "cus_1");

        let second = resolver
            .resolve_or_create(" Student@ISCT.ac.jp", CustomerProfile::default())
            .await
            .unwrap();
        assert!(!second.created());
        assert_eq!(second.customer, first.customer);

        assert_eq!(store.len().await, 1);
        assert_eq!(mock.created_customer_count(), 1);
    }

    #[tokio::test]
    async fn test_profile_is_applied_on_create() {
        let (_, _, resolver) = setup();

        let resolution = resolver
            .resolve_or_create(
                EMAIL,
                CustomerProfile {
                    name: Some("Student".into()),
                    institutional_id: Some("trap_student".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(resolution.customer.email.as_deref(), Some(EMAIL));
        assert_eq!(resolution.customer.institutional_id.as_deref(), Some("trap_student"));
    }

    #[tokio::test]
    async fn test_adopts_first_existing_remote_customer() {
        let (store, mock, resolver) = setup();
        mock.insert_customer(remote("cus_old", EMAIL, None)).await;
        mock.insert_customer(remote("cus_dup", EMAIL, None)).await;

        let resolution = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap();

        assert_eq!(resolution.kind, ResolutionKind::Adopted);
        assert_eq!(resolution.customer.id, "cus_old");
        assert_eq!(mock.created_customer_count(), 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_create_one_customer() {
        let (store, mock, resolver) = setup();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    resolver
                        .resolve_or_create(EMAIL, CustomerProfile::default())
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().customer.id);
        }

        assert!(ids.iter().all(|id| id == "cus_1"));
        assert_eq!(mock.created_customer_count(), 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(resolver.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_on_existing_mapping_does_not_create() {
        let (store, mock, resolver) = setup();
        store
            .insert(LocalUser::new(EmailFingerprint::of(EMAIL), "cus_gone"))
            .await
            .unwrap();

        let err = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::Billing(BillingError::Upstream(_))));
        assert_eq!(mock.created_customer_count(), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_deletes_created_customer() {
        let (store, mock, resolver) = setup();
        store.set_fail_inserts(true);

        let err = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::Internal(_)));
        assert_eq!(mock.deleted_customers().await, vec!["cus_1".to_string()]);
        assert_eq!(mock.customer_count().await, 0);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_adopted_customer() {
        let (store, mock, resolver) = setup();
        mock.insert_customer(remote("cus_old", EMAIL, None)).await;
        store.set_fail_inserts(true);

        let err = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::Internal(_)));
        assert!(mock.deleted_customers().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_internal() {
        let (store, mock, resolver) = setup();
        store.set_fail_inserts(true);
        mock.set_fail_deletes(true);

        let err = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::Internal(_)));
        assert_eq!(mock.customer_count().await, 1);
    }

    /// Store where another writer always wins the insert race
    struct RacingStore {
        inner: MemoryUserStore,
        winner: String,
    }

    #[async_trait]
    impl UserStore for RacingStore {
        async fn get(
            &self,
            fingerprint: &EmailFingerprint,
        ) -> std::result::Result<Option<LocalUser>, StoreError> {
            self.inner.get(fingerprint).await
        }

        async fn insert(&self, user: LocalUser) -> std::result::Result<(), StoreError> {
            self.inner
                .insert(LocalUser::new(user.fingerprint.clone(), &self.winner))
                .await?;
            self.inner.insert(user).await
        }
    }

    #[tokio::test]
    async fn test_conflict_adopts_winner_and_undoes_create() {
        let mock = Arc::new(MockProcessor::new());
        mock.insert_customer(remote("cus_winner", "other@isct.ac.jp", None)).await;
        let store = Arc::new(RacingStore {
            inner: MemoryUserStore::new(),
            winner: "cus_winner".into(),
        });
        let resolver = IdentityResolver::new(store, mock.clone());

        let resolution = resolver
            .resolve_or_create(EMAIL, CustomerProfile::default())
            .await
            .unwrap();

        assert_eq!(resolution.customer.id, "cus_winner");
        assert_eq!(resolution.kind, ResolutionKind::Existing);
        assert_eq!(mock.deleted_customers().await, vec!["cus_1".to_string()]);
    }

    struct StalledStore;

    #[async_trait]
    impl UserStore for StalledStore {
        async fn get(
            &self,
            _fingerprint: &EmailFingerprint,
        ) -> std::result::Result<Option<LocalUser>, StoreError> {
            std::future::pending().await
        }

        async fn insert(&self, _user: LocalUser) -> std::result::Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_resolution_releases_lock() {
        let resolver = IdentityResolver::new(Arc::new(StalledStore), Arc::new(MockProcessor::new()));

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            resolver.resolve_or_create(EMAIL, CustomerProfile::default()),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(resolver.held_locks(), 0);
    }

    #[test]
    fn test_selector_requires_exactly_one() {
        assert!(CustomerSelector::from_parts(None, None, None).is_err());
        assert!(
            CustomerSelector::from_parts(Some("cus_1".into()), Some(EMAIL.into()), None).is_err()
        );
        assert_eq!(
            CustomerSelector::from_parts(Some("  ".into()), None, Some("trap".into())).unwrap(),
            CustomerSelector::InstitutionalId("trap".into())
        );
    }

    #[tokio::test]
    async fn test_lookup_ownership() {
        let (_, mock, resolver) = setup();
        let mine = resolver
            .resolve_or_create(
                EMAIL,
                CustomerProfile {
                    institutional_id: Some("trap_me".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .customer;
        mock.insert_customer(remote("cus_other", "other@isct.ac.jp", Some("trap_other")))
            .await;
        let caller = EmailFingerprint::of(EMAIL);

        let by_id = resolver
            .lookup(CustomerSelector::CustomerId(mine.id.clone()), &caller)
            .await
            .unwrap();
        assert_eq!(by_id, mine);

        let by_email = resolver
            .lookup(CustomerSelector::Email("STUDENT@isct.ac.jp".into()), &caller)
            .await
            .unwrap();
        assert_eq!(by_email, mine);

        let by_tag = resolver
            .lookup(CustomerSelector::InstitutionalId("trap_me".into()), &caller)
            .await
            .unwrap();
        assert_eq!(by_tag, mine);

        for selector in [
            CustomerSelector::CustomerId("cus_other".into()),
            CustomerSelector::Email("other@isct.ac.jp".into()),
            CustomerSelector::InstitutionalId("trap_other".into()),
        ] {
            let err = resolver.lookup(selector, &caller).await.unwrap_err();
            assert!(matches!(err, IdentityError::Forbidden(_)));
        }

        let err = resolver
            .lookup(CustomerSelector::InstitutionalId("trap_nobody".into()), &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_email_without_mapping() {
        let (_, _, resolver) = setup();
        let caller = EmailFingerprint::of(EMAIL);

        let err = resolver
            .lookup(CustomerSelector::Email(EMAIL.into()), &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_leaves_absent_fields() {
        let (_, _, resolver) = setup();
        resolver
            .resolve_or_create(
                EMAIL,
                CustomerProfile {
                    name: Some("Old".into()),
                    institutional_id: Some("trap_me".into()),
                },
            )
            .await
            .unwrap();
        let caller = EmailFingerprint::of(EMAIL);

        let updated = resolver
            .update_own(
                &caller,
                &CustomerPatch {
                    name: Some("New".into()),
                    institutional_id: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name.as_deref(), Some("New"));
        assert_eq!(updated.institutional_id.as_deref(), Some("trap_me"));
    }

    #[tokio::test]
    async fn test_update_own_requires_mapping() {
        let (_, _, resolver) = setup();
        let err = resolver
            .update_own(&EmailFingerprint::of(EMAIL), &CustomerPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }
}
