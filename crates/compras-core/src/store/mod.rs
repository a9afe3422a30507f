//! Storage abstraction for compras-sync.
//!
//! The [`ReleaseStore`] trait defines every persistence operation the
//! ingestion pipeline and the query surfaces need, so the coordinator can be
//! driven against any backend.
//!
//! Every operation reports its own failure as a [`StoreError`] value. The
//! coordinator counts a failed upsert against the release it belongs to and
//! keeps going; nothing here is allowed to abort a batch.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CanonicalRelease, Document, Party};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The release carries neither `ocid` nor `id`, so it has no storage key.
    #[error("release has neither ocid nor id")]
    MissingKey,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored release could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A stored release row: the flattened query columns plus the full
/// canonical object in `raw_data`, which is the source of truth.
///
/// Flattened columns are `None` where the canonical value is empty (or a
/// zero amount).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRelease {
    /// Row UUID, referenced by `parties.release_id` / `documents.release_id`.
    pub id: String,
    /// Storage key: the ocid, or `id:<id>` for releases without one.
    pub ocid: String,
    /// `"ocid"` or `"id"`.
    pub key_kind: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_region: Option<String>,
    pub status: Option<String>,
    pub procurement_method: Option<String>,
    pub main_procurement_category: Option<String>,
    pub budget_amount: Option<f64>,
    pub currency: Option<String>,
    pub published_date: Option<String>,
    pub tender_start_date: Option<String>,
    pub tender_end_date: Option<String>,
    pub raw_data: CanonicalRelease,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query filters for [`ReleaseStore::search`].
///
/// Empty allow-lists and `None` bounds mean "no constraint". Dates are
/// inclusive and are matched against the published date OR the row's
/// creation time, so releases with no published date still show up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    /// Case-insensitive substring over title, description and buyer name.
    pub keyword: Option<String>,
    pub entities: Vec<String>,
    pub regions: Vec<String>,
    pub categories: Vec<String>,
    pub methods: Vec<String>,
    pub statuses: Vec<String>,
    pub min_budget: Option<f64>,
    pub max_budget: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Only releases whose tender status is `active`.
    pub is_active: bool,
    /// Only releases with at least one stored document.
    pub has_documents: bool,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl SearchFilters {
    /// 1-based page number.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * i64::from(self.page_size())
    }

    pub fn keyword(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub releases: Vec<PersistedRelease>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

impl SearchPage {
    pub fn new(releases: Vec<PersistedRelease>, total: i64, filters: &SearchFilters) -> Self {
        let size = i64::from(filters.page_size());
        let total_pages = u32::try_from((total.max(0) + size - 1) / size).unwrap_or(u32::MAX);
        Self {
            releases,
            total,
            page: filters.page(),
            total_pages,
        }
    }
}

/// Distinct non-null values per selector column, sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub entities: Vec<String>,
    pub regions: Vec<String>,
    pub categories: Vec<String>,
    pub methods: Vec<String>,
}

/// One row of an aggregate breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub value: String,
    pub count: i64,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_releases: i64,
    /// Releases persisted under a real ocid.
    pub ocid_keyed: i64,
    /// Releases persisted under the `id:` fallback key.
    pub id_keyed: i64,
    pub total_parties: i64,
    pub total_documents: i64,
    pub by_status: Vec<Breakdown>,
    pub by_category: Vec<Breakdown>,
    pub by_method: Vec<Breakdown>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Abstract persistence backend for canonical releases.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_release`](ReleaseStore::upsert_release) | Insert or overwrite a release by storage key |
/// | [`upsert_parties`](ReleaseStore::upsert_parties) | Upsert party side rows for a release |
/// | [`upsert_documents`](ReleaseStore::upsert_documents) | Upsert document side rows for a release |
/// | [`search`](ReleaseStore::search) | Filtered, paginated query |
/// | [`get_filter_options`](ReleaseStore::get_filter_options) | Distinct selector values |
/// | [`get_release`](ReleaseStore::get_release) | Fetch one release by storage key |
/// | [`count_releases`](ReleaseStore::count_releases) | Row count |
/// | [`stats`](ReleaseStore::stats) | Aggregate breakdowns |
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Insert a release, or overwrite every flattened column and `raw_data`
    /// of the existing row with the same storage key. `created_at` is kept
    /// on overwrite; `updated_at` is refreshed.
    async fn upsert_release(
        &self,
        release: &CanonicalRelease,
    ) -> Result<PersistedRelease, StoreError>;

    /// Upsert side rows keyed by `(release_id, party_id)`. Returns rows written.
    async fn upsert_parties(&self, release_id: &str, parties: &[Party])
        -> Result<usize, StoreError>;

    /// Upsert side rows keyed by `(release_id, document_id)`. Returns rows written.
    async fn upsert_documents(
        &self,
        release_id: &str,
        documents: &[Document],
    ) -> Result<usize, StoreError>;

    /// Ordered by `created_at` descending, ties broken by storage key.
    async fn search(&self, filters: &SearchFilters) -> Result<SearchPage, StoreError>;

    async fn get_filter_options(&self) -> Result<FilterOptions, StoreError>;

    async fn get_release(&self, key: &str) -> Result<Option<PersistedRelease>, StoreError>;

    async fn count_releases(&self) -> Result<i64, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_deserialize_from_camel_case_with_defaults() {
        let f: SearchFilters = serde_json::from_str(
            r#"{ "keyword": "  agua ", "regions": ["Santiago"], "startDate": "2024-01-01", "isActive": true }"#,
        )
        .unwrap();
        assert_eq!(f.keyword(), Some("agua"));
        assert_eq!(f.regions, vec!["Santiago"]);
        assert_eq!(f.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert!(f.is_active);
        assert!(!f.has_documents);
        assert_eq!(f.page(), 1);
        assert_eq!(f.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(f.offset(), 0);
    }

    #[test]
    fn pagination_is_clamped() {
        let f = SearchFilters {
            page: Some(0),
            page_size: Some(10_000),
            ..Default::default()
        };
        assert_eq!(f.page(), 1);
        assert_eq!(f.page_size(), MAX_PAGE_SIZE);

        let f = SearchFilters {
            page: Some(3),
            page_size: Some(10),
            ..Default::default()
        };
        assert_eq!(f.offset(), 20);
    }

    #[test]
    fn total_pages_rounds_up() {
        let f = SearchFilters {
            page_size: Some(10),
            ..Default::default()
        };
        assert_eq!(SearchPage::new(vec![], 0, &f).total_pages, 0);
        assert_eq!(SearchPage::new(vec![], 10, &f).total_pages, 1);
        assert_eq!(SearchPage::new(vec![], 11, &f).total_pages, 2);
    }

    #[test]
    fn blank_keyword_is_no_constraint() {
        let f = SearchFilters {
            keyword: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(f.keyword(), None);
    }
}
