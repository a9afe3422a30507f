//! Canonical release model.
//!
//! These types are the normalized shape every upstream record is reconciled
//! into. Every field is always present: absent upstream values collapse to a
//! typed default (`""`, `0`, `[]`, or a sentinel string) so consumers never
//! have to deal with missing keys.
//!
//! Field names serialize in OCDS camelCase, so the persisted `raw_data`
//! column reads like the upstream payload it was built from.

use serde::{Deserialize, Serialize};

/// Loosely-typed upstream record. The upstream contract is variable, so the
/// raw payload stays a JSON tree until the normalizer shapes it.
pub type RawRecord = serde_json::Value;

/// A normalized procurement release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRelease {
    pub id: String,
    pub ocid: String,
    pub date: String,
    pub published_date: String,
    pub tag: Vec<String>,
    pub initiation_type: String,
    pub language: String,
    pub buyer: Buyer,
    pub tender: Tender,
    pub parties: Vec<Party>,
    pub awards: Vec<serde_json::Value>,
    pub contracts: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tender {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub procurement_method: String,
    pub procurement_method_details: String,
    pub main_procurement_category: String,
    pub submission_method: Vec<String>,
    pub submission_method_details: String,
    pub tender_period: Period,
    pub enquiry_period: Period,
    pub has_enquiries: bool,
    pub eligibility_criteria: String,
    pub award_criteria: String,
    pub award_criteria_details: String,
    pub value: Amount,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: String,
    pub name: String,
    pub identifier: Identifier,
    pub address: Address,
    pub contact_point: ContactPoint,
    /// Set semantics: deduplicated, first occurrence order preserved.
    pub roles: Vec<String>,
}

impl Party {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub scheme: String,
    pub id: String,
    pub legal_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub locality: String,
    pub region: String,
    pub country_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub name: String,
    pub email: String,
    pub telephone: String,
}

/// A tender document reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub document_type: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub date_published: String,
    pub date_modified: String,
    pub format: String,
    pub language: String,
}

/// Identity a release is persisted under.
///
/// Releases carrying an `ocid` get idempotent re-upsert guarantees. Releases
/// with only an internal `id` are keyed best-effort under a prefixed key
/// that can never collide with a real ocid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseKey {
    Ocid(String),
    Id(String),
}

impl ReleaseKey {
    /// The value stored in the unique key column.
    pub fn storage_key(&self) -> String {
        match self {
            ReleaseKey::Ocid(ocid) => ocid.clone(),
            ReleaseKey::Id(id) => format!("id:{}", id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReleaseKey::Ocid(_) => "ocid",
            ReleaseKey::Id(_) => "id",
        }
    }
}

impl CanonicalRelease {
    /// Whether the release carries the upstream natural key (`ocid`).
    pub fn has_natural_key(&self) -> bool {
        !self.ocid.is_empty()
    }

    /// Key used for persistence, or `None` when neither `ocid` nor `id` is known.
    pub fn storage_key(&self) -> Option<ReleaseKey> {
        if !self.ocid.is_empty() {
            Some(ReleaseKey::Ocid(self.ocid.clone()))
        } else if !self.id.is_empty() {
            Some(ReleaseKey::Id(self.id.clone()))
        } else {
            None
        }
    }

    /// First party holding the `buyer` role, if any.
    pub fn buyer_party(&self) -> Option<&Party> {
        self.parties.iter().find(|p| p.has_role("buyer"))
    }

    pub fn buyer_region(&self) -> Option<&str> {
        self.buyer_party().map(|p| p.address.region.as_str())
    }

    pub fn documents(&self) -> &[Document] {
        &self.tender.documents
    }
}
