//! # compras-sync
//!
//! Incremental ingestion of Dominican Republic public procurement releases
//! (OCDS) from the DGCP API into a local SQLite store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ DGCP API │──▶│ Coordinator │──▶│ Normalizer │──▶│  SQLite  │
//! └──────────┘   └─────────────┘   └────────────┘   └────┬─────┘
//!                                                        │
//!                                       ┌────────────────┤
//!                                       ▼                ▼
//!                                  ┌──────────┐    ┌──────────┐
//!                                  │   CLI    │    │   HTTP   │
//!                                  └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! compras init
//! compras sync --from 2024-01-01 --to 2024-01-31
//! compras search --keyword "medicamentos"
//! compras serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Source and coordinator error types |
//! | [`source`] | Remote release source (HTTP) |
//! | [`sqlite_store`] | SQLite release store |
//! | [`ingest`] | Ingestion coordinator |
//! | [`progress`] | Progress reporters |
//! | [`search`] | CLI search and filter listing |
//! | [`get`] | Release retrieval |
//! | [`stats`] | Database statistics |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//!
//! The canonical model, the normalizer and the store trait live in the
//! I/O-free `compras-core` crate.

pub mod config;
pub mod db;
pub mod error;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod server;
pub mod source;
pub mod sqlite_store;
pub mod stats;
