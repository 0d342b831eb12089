//! Remote Customer Records
//!
//! The processor-side billing party. The processor is the source of truth;
//! this crate only creates, searches and patches these records.

use serde::{Deserialize, Serialize};

/// Metadata key carrying the institutional id on processor customers
pub const INSTITUTIONAL_ID_METADATA_KEY: &str = "traQID";

/// Snapshot of a customer as held by the payment processor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCustomer {
    /// Processor customer ID (e.g. `cus_...`)
    pub id: String,

    /// Billing email
    #[serde(default)]
    pub email: Option<String>,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Institutional id tag from processor metadata
    #[serde(default)]
    pub institutional_id: Option<String>,
}

/// Parameters for creating a customer
#[derive(Clone, Debug, Default)]
pub struct NewCustomer {
    /// Normalized email
    pub email: String,
    pub name: Option<String>,
    pub institutional_id: Option<String>,
}

/// Partial update. Absent fields are left untouched remotely, never cleared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPatch {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub institutional_id: Option<String>,
}

impl CustomerPatch {
    /// True when the patch would not change anything
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.institutional_id.is_none()
    }

    /// Apply to a local snapshot (used by in-memory processors)
    pub fn apply_to(&self, customer: &mut RemoteCustomer) {
        if let Some(ref name) = self.name {
            customer.name = Some(name.clone());
        }
        if let Some(ref id) = self.institutional_id {
            customer.institutional_id = Some(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_leaves_absent_fields() {
        let mut customer = RemoteCustomer {
            id: "cus_1".into(),
            email: Some("student@isct.ac.jp".into()),
            name: Some("Old Name".into()),
            institutional_id: Some("trap_user".into()),
        };

        CustomerPatch {
            name: Some("New Name".into()),
            institutional_id: None,
        }
        .apply_to(&mut customer);

        assert_eq!(customer.name.as_deref(), Some("New Name"));
        assert_eq!(customer.institutional_id.as_deref(), Some("trap_user"));
    }

    #[test]
    fn test_empty_patch() {
        assert!(CustomerPatch::default().is_empty());
    }
}
