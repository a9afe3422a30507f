//! # Compras Core
//!
//! I/O-free logic for compras-sync: the canonical release model, the
//! normalizer that reconciles heterogeneous upstream OCDS records into it,
//! and the storage abstraction used by the ingestion pipeline.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies.

pub mod models;
pub mod normalize;
pub mod store;

pub use models::{CanonicalRelease, RawRecord, ReleaseKey};
pub use normalize::{normalize, record_key, NormalizeError};
pub use store::{
    FilterOptions, PersistedRelease, ReleaseStore, SearchFilters, SearchPage, StoreError,
    StoreStats,
};
