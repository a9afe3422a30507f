//! Ingestion coordinator.
//!
//! Drives a rate-limited, cancellable sync of a date range into a
//! [`ReleaseStore`]:
//!
//! 1. The requested range is split into consecutive fixed-width windows
//!    (one week by default), the last one clipped to the end date.
//! 2. Each window is listed page by page from the [`ReleaseSource`]. The
//!    first `detail_fanout` records of a page are enriched with their full
//!    detail record, a bounded number at a time; the rest are normalized
//!    from the summary alone.
//! 3. Every release is normalized and upserted (release, then parties and
//!    documents) independently. A failure is counted against that release
//!    and the run moves on. A failed window page becomes one error entry
//!    keyed `batch-<window start>`.
//! 4. The progress reporter sees a stats snapshot after every release.
//! 5. A fixed delay separates consecutive requests to the upstream. It is
//!    never skipped, not even when a stop has been requested.
//!
//! Only one run may be active per coordinator. Stopping is cooperative: the
//! flag is checked at window, page and release boundaries, and a stopped run
//! returns its stats normally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use compras_core::normalize::UNKNOWN_KEY;
use compras_core::store::{PersistedRelease, ReleaseStore};
use compras_core::{normalize, record_key, RawRecord};

use crate::config::Config;
use crate::error::{IngestError, ReleaseError};
use crate::progress::{ProgressMode, ProgressReporter};
use crate::source::{HttpReleaseSource, ReleaseSource};
use crate::sqlite_store::SqliteStore;
use crate::db;
use crate::stats::format_duration_ms;

/// Page size used by [`IngestionRequest::recent`].
pub const RECENT_BATCH_SIZE: u32 = 50;
/// Request delay used by [`IngestionRequest::recent`], in milliseconds.
pub const RECENT_DELAY_MS: u64 = 500;

/// What to ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRequest {
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    /// Upstream page size (`?limit=`). Defaults to `upstream.page_limit`.
    #[serde(default)]
    pub batch_size: Option<u32>,
    /// Milliseconds between upstream requests. Defaults to `ingest.delay_ms`.
    #[serde(default)]
    pub delay_between_requests: Option<u64>,
}

impl IngestionRequest {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            batch_size: None,
            delay_between_requests: None,
        }
    }

    /// The last `days` days up to and including `today`.
    pub fn recent(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self {
            start_date: start,
            end_date: today,
            batch_size: Some(RECENT_BATCH_SIZE),
            delay_between_requests: Some(RECENT_DELAY_MS),
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.end_date < self.start_date {
            return Err(IngestError::InvalidOptions(format!(
                "endDate {} is before startDate {}",
                self.end_date, self.start_date
            )));
        }
        if self.batch_size == Some(0) {
            return Err(IngestError::InvalidOptions(
                "batchSize must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tuning that comes from configuration rather than from the request.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub window_days: u32,
    pub page_limit: u32,
    pub delay: Duration,
    pub detail_fanout: usize,
    pub detail_concurrency: usize,
    pub max_pages_per_window: u32,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            window_days: 7,
            page_limit: 100,
            delay: Duration::from_millis(1000),
            detail_fanout: 20,
            detail_concurrency: 4,
            max_pages_per_window: 10,
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_days: config.ingest.window_days,
            page_limit: config.upstream.page_limit,
            delay: Duration::from_millis(config.ingest.delay_ms),
            detail_fanout: config.upstream.detail_fanout,
            detail_concurrency: config.upstream.detail_concurrency,
            max_pages_per_window: config.upstream.max_pages_per_window,
        }
    }
}

/// One inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Split `[start, end]` into consecutive, non-overlapping windows of `days`
/// days, the last one clipped to `end`.
pub fn plan_windows(start: NaiveDate, end: NaiveDate, days: u32) -> Vec<Window> {
    let width = u64::from(days.max(1));
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let window_end = cursor
            .checked_add_days(Days::new(width - 1))
            .map_or(end, |d| d.min(end));
        windows.push(Window {
            start: cursor,
            end: window_end,
        });
        match window_end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    windows
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionErrorEntry {
    pub key: String,
    pub error: String,
}

/// Counters for one run. Frozen (end time set) when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub errors: Vec<IngestionErrorEntry>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end.
    pub duration: Option<i64>,
}

impl IngestionStats {
    pub fn start() -> Self {
        Self {
            total_processed: 0,
            total_successful: 0,
            total_failed: 0,
            errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
        }
    }

    fn push_error(&mut self, key: impl Into<String>, error: impl ToString) {
        self.errors.push(IngestionErrorEntry {
            key: key.into(),
            error: error.to_string(),
        });
    }

    fn finish(&mut self) {
        if self.end_time.is_none() {
            let end = Utc::now();
            self.duration = Some((end - self.start_time).num_milliseconds());
            self.end_time = Some(end);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// The run was dropped or panicked before it could finish.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum IngestionState {
    Idle {
        #[serde(rename = "lastOutcome")]
        last_outcome: Option<RunOutcome>,
    },
    Running {
        #[serde(rename = "startedAt")]
        started_at: DateTime<Utc>,
        request: IngestionRequest,
    },
}

impl IngestionState {
    pub fn is_running(&self) -> bool {
        matches!(self, IngestionState::Running { .. })
    }
}

/// State plus the latest stats snapshot, as reported by [`IngestionCoordinator::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionStatus {
    #[serde(flatten)]
    pub state: IngestionState,
    pub stats: Option<IngestionStats>,
}

#[derive(Debug)]
struct Shared {
    state: IngestionState,
    latest: Option<IngestionStats>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Permission to run, obtained from [`IngestionCoordinator::begin`].
///
/// The coordinator stays `Running` while the ticket exists. A ticket that is
/// dropped without being executed to the end (cancelled task, panic) puts
/// the coordinator back to `Idle` with a `Failed` outcome.
pub struct RunTicket {
    request: IngestionRequest,
    shared: Arc<Mutex<Shared>>,
    finished: bool,
}

impl RunTicket {
    pub fn request(&self) -> &IngestionRequest {
        &self.request
    }

    fn complete(&mut self, outcome: RunOutcome, stats: &IngestionStats) {
        let mut shared = lock(&self.shared);
        shared.state = IngestionState::Idle {
            last_outcome: Some(outcome),
        };
        shared.latest = Some(stats.clone());
        self.finished = true;
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        if !self.finished {
            let mut shared = lock(&self.shared);
            shared.state = IngestionState::Idle {
                last_outcome: Some(RunOutcome::Failed),
            };
            if let Some(stats) = shared.latest.as_mut() {
                stats.finish();
            }
        }
    }
}

/// Single-run-at-a-time ingestion driver. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IngestionCoordinator {
    source: Arc<dyn ReleaseSource>,
    store: Arc<dyn ReleaseStore>,
    options: IngestOptions,
    shared: Arc<Mutex<Shared>>,
    cancel: Arc<AtomicBool>,
}

impl IngestionCoordinator {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        store: Arc<dyn ReleaseStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            source,
            store,
            options,
            shared: Arc::new(Mutex::new(Shared {
                state: IngestionState::Idle { last_outcome: None },
                latest: None,
            })),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> IngestionStatus {
        let shared = lock(&self.shared);
        IngestionStatus {
            state: shared.state.clone(),
            stats: shared.latest.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared).state.is_running()
    }

    /// Request a cooperative stop. Idempotent; a no-op when idle.
    pub fn stop(&self) {
        // Checked and set under the lock so a stop racing a finishing run
        // cannot leak into the next one: `begin` clears the flag under the
        // same lock.
        let shared = lock(&self.shared);
        if shared.state.is_running() {
            info!("stop requested");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    fn stop_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Validate `request` and move to `Running`.
    ///
    /// Fails with [`IngestError::AlreadyRunning`] while another run holds a
    /// ticket, without touching that run's stats.
    pub fn begin(&self, request: IngestionRequest) -> Result<RunTicket, IngestError> {
        request.validate()?;

        let mut shared = lock(&self.shared);
        if shared.state.is_running() {
            return Err(IngestError::AlreadyRunning);
        }
        shared.state = IngestionState::Running {
            started_at: Utc::now(),
            request: request.clone(),
        };
        shared.latest = Some(IngestionStats::start());
        self.cancel.store(false, Ordering::SeqCst);

        Ok(RunTicket {
            request,
            shared: Arc::clone(&self.shared),
            finished: false,
        })
    }

    /// Run to completion (or cancellation) and return the final stats.
    pub async fn run(
        &self,
        request: IngestionRequest,
        reporter: &dyn ProgressReporter,
    ) -> Result<IngestionStats, IngestError> {
        let ticket = self.begin(request)?;
        Ok(self.execute(ticket, reporter).await)
    }

    /// Ingest the last `days` days with the lighter "recent" batch settings.
    pub async fn sync_recent(
        &self,
        days: u32,
        reporter: &dyn ProgressReporter,
    ) -> Result<IngestionStats, IngestError> {
        let request = IngestionRequest::recent(days, Utc::now().date_naive());
        self.run(request, reporter).await
    }

    /// Execute a run started with [`begin`](Self::begin).
    pub async fn execute(
        &self,
        mut ticket: RunTicket,
        reporter: &dyn ProgressReporter,
    ) -> IngestionStats {
        let request = ticket.request().clone();
        let limit = request.batch_size.unwrap_or(self.options.page_limit).max(1);
        let delay = request
            .delay_between_requests
            .map(Duration::from_millis)
            .unwrap_or(self.options.delay);
        let windows = plan_windows(
            request.start_date,
            request.end_date,
            self.options.window_days,
        );

        info!(
            start_date = %request.start_date,
            end_date = %request.end_date,
            windows = windows.len(),
            limit,
            "ingestion started"
        );

        let mut stats = IngestionStats::start();
        self.publish(&stats);

        let mut cancelled = false;
        for (i, window) in windows.iter().enumerate() {
            if self.stop_requested() {
                cancelled = true;
                break;
            }
            if !self
                .ingest_window(window, limit, delay, &mut stats, reporter)
                .await
            {
                cancelled = true;
            }
            if i + 1 < windows.len() {
                tokio::time::sleep(delay).await;
            }
            if cancelled {
                break;
            }
        }

        stats.finish();
        let outcome = if cancelled {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };
        ticket.complete(outcome, &stats);

        info!(
            outcome = ?outcome,
            processed = stats.total_processed,
            successful = stats.total_successful,
            failed = stats.total_failed,
            duration_ms = stats.duration.unwrap_or(0),
            "ingestion finished"
        );
        stats
    }

    /// Returns `false` when a stop request cut the window short.
    async fn ingest_window(
        &self,
        window: &Window,
        limit: u32,
        delay: Duration,
        stats: &mut IngestionStats,
        reporter: &dyn ProgressReporter,
    ) -> bool {
        let mut page = 1u32;
        loop {
            if self.stop_requested() {
                return false;
            }
            debug!(window_start = %window.start, window_end = %window.end, page, "fetching window page");

            let listing = match self
                .source
                .fetch_window(window.start, window.end, page, limit)
                .await
            {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(window_start = %window.start, page, error = %e, "window fetch failed");
                    stats.push_error(format!("batch-{}", window.start.format("%Y-%m-%d")), e);
                    self.publish(stats);
                    reporter.report(stats);
                    return true;
                }
            };

            let total_pages = listing.pagination.total_pages;
            if !self.ingest_page(listing.releases, stats, reporter).await {
                return false;
            }
            if page >= total_pages || page >= self.options.max_pages_per_window {
                return true;
            }
            page += 1;
            tokio::time::sleep(delay).await;
        }
    }

    /// Enrich, normalize and store one page of summaries. Detail fetches run
    /// concurrently; stats and the stop check are handled one release at a
    /// time, in page order.
    async fn ingest_page(
        &self,
        summaries: Vec<RawRecord>,
        stats: &mut IngestionStats,
        reporter: &dyn ProgressReporter,
    ) -> bool {
        let fanout = self.options.detail_fanout;
        let source = &self.source;

        let enriched = stream::iter(summaries.into_iter().enumerate())
            .map(move |(i, summary)| async move {
                if i >= fanout {
                    return summary;
                }
                let Some(key) = detail_key(&summary) else {
                    return summary;
                };
                match source.fetch_detail(&key).await {
                    Ok(detail) => detail,
                    Err(e) => {
                        warn!(ocid = %key, error = %e, "detail fetch failed, using summary");
                        summary
                    }
                }
            })
            .buffered(self.options.detail_concurrency.max(1));
        let mut enriched = std::pin::pin!(enriched);

        while let Some(raw) = enriched.next().await {
            if self.stop_requested() {
                return false;
            }
            let key = record_key(&raw);
            stats.total_processed += 1;
            match self.store_release(&raw).await {
                Ok(_) => stats.total_successful += 1,
                Err(e) => {
                    warn!(ocid = %key, error = %e, "release failed");
                    stats.total_failed += 1;
                    stats.push_error(key, e);
                }
            }
            self.publish(stats);
            reporter.report(stats);
        }
        true
    }

    /// Normalize and persist one raw record. Side-row failures are logged
    /// and do not fail the release.
    async fn store_release(&self, raw: &RawRecord) -> Result<PersistedRelease, ReleaseError> {
        let release = normalize(raw)?;
        let persisted = self.store.upsert_release(&release).await?;

        if let Err(e) = self
            .store
            .upsert_parties(&persisted.id, &release.parties)
            .await
        {
            warn!(ocid = %persisted.ocid, error = %e, "party upsert failed");
        }
        if let Err(e) = self
            .store
            .upsert_documents(&persisted.id, release.documents())
            .await
        {
            warn!(ocid = %persisted.ocid, error = %e, "document upsert failed");
        }

        debug!(ocid = %persisted.ocid, "release stored");
        Ok(persisted)
    }

    /// Fetch, normalize and store a single release by ocid.
    pub async fn ingest_single(&self, ocid: &str) -> Result<PersistedRelease, ReleaseError> {
        let raw = self.source.fetch_detail(ocid).await?;
        self.store_release(&raw).await
    }

    fn publish(&self, stats: &IngestionStats) {
        lock(&self.shared).latest = Some(stats.clone());
    }
}

fn detail_key(summary: &RawRecord) -> Option<String> {
    let key = record_key(summary);
    if key == UNKNOWN_KEY {
        None
    } else {
        Some(key)
    }
}

/// Build a coordinator over the configured HTTP source and SQLite store.
pub async fn coordinator_from_config(config: &Config) -> Result<IngestionCoordinator> {
    let pool = db::connect(config).await?;
    coordinator_with_store(config, Arc::new(SqliteStore::new(pool)))
}

/// Build a coordinator over the configured HTTP source, writing into an
/// existing `store` (the server shares one pool between reads and ingestion).
pub fn coordinator_with_store(
    config: &Config,
    store: Arc<dyn ReleaseStore>,
) -> Result<IngestionCoordinator> {
    let source = HttpReleaseSource::new(&config.upstream)?;
    Ok(IngestionCoordinator::new(
        Arc::new(source),
        store,
        IngestOptions::from_config(config),
    ))
}

/// `compras sync` / `compras recent`: run with Ctrl-C wired to a cooperative
/// stop, then print the summary.
pub async fn run_sync(
    config: &Config,
    request: IngestionRequest,
    mode: ProgressMode,
) -> Result<()> {
    let coordinator = coordinator_from_config(config).await?;

    let ticket = coordinator.begin(request)?;
    let stopper = coordinator.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let reporter = mode.reporter();
    let result = coordinator.execute(ticket, reporter.as_ref()).await;
    ctrl_c.abort();

    let cancelled = matches!(
        coordinator.status().state,
        IngestionState::Idle {
            last_outcome: Some(RunOutcome::Cancelled)
        }
    );
    print_summary(&result, cancelled);
    Ok(())
}

/// `compras fetch <ocid>`.
pub async fn run_fetch(config: &Config, ocid: &str) -> Result<()> {
    let coordinator = coordinator_from_config(config).await?;
    let persisted = coordinator.ingest_single(ocid).await?;
    println!("fetched {}", persisted.ocid);
    println!("  id: {}", persisted.id);
    if let Some(title) = &persisted.title {
        println!("  title: {}", title);
    }
    println!("ok");
    Ok(())
}

fn print_summary(stats: &IngestionStats, cancelled: bool) {
    println!("sync{}", if cancelled { " (stopped)" } else { "" });
    println!("  processed: {}", stats.total_processed);
    println!("  successful: {}", stats.total_successful);
    println!("  failed: {}", stats.total_failed);
    if let Some(ms) = stats.duration {
        println!("  duration: {}", format_duration_ms(ms));
    }
    if !stats.errors.is_empty() {
        println!("  errors:");
        for entry in stats.errors.iter().take(20) {
            println!("    {}: {}", entry.key, entry.error);
        }
        if stats.errors.len() > 20 {
            println!("    ... and {} more", stats.errors.len() - 20);
        }
    }
    println!("ok");
}
