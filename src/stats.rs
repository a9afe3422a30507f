//! `compras stats`: what the local database holds.
//!
//! Release counts (split by ocid versus id fallback keys), side-table sizes,
//! and breakdowns by status, category and method.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use compras_core::store::{Breakdown, ReleaseStore};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = SqliteStore::new(pool.clone()).stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("compras database");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Releases:    {}", stats.total_releases);
    println!("    by ocid:   {}", stats.ocid_keyed);
    println!("    by id:     {}", stats.id_keyed);
    println!("  Parties:     {}", stats.total_parties);
    println!("  Documents:   {}", stats.total_documents);
    println!(
        "  Last update: {}",
        stats
            .last_updated
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    print_breakdown("By status", &stats.by_status);
    print_breakdown("By category", &stats.by_category);
    print_breakdown("By method", &stats.by_method);
    println!();

    pool.close().await;
    Ok(())
}

fn print_breakdown(title: &str, rows: &[Breakdown]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("  {}:", title);
    for row in rows.iter().take(10) {
        println!("    {:<48} {:>8}", row.value, row.count);
    }
}

/// `5242880` → `"5.0 MB"`.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Age of `ts` in the largest whole unit under a month ("3 hours ago"),
/// else the absolute time.
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let age = Utc::now() - ts;
    let plural = |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });

    match age {
        a if a < Duration::zero() || a >= Duration::days(30) => {
            ts.format("%Y-%m-%d %H:%M").to_string()
        }
        a if a < Duration::minutes(1) => "just now".to_string(),
        a if a < Duration::hours(1) => plural(a.num_minutes(), "min"),
        a if a < Duration::days(1) => plural(a.num_hours(), "hour"),
        a => plural(a.num_days(), "day"),
    }
}

/// Format a run duration: `"850ms"`, `"12.4s"`, `"3m 05s"`.
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 1000 {
        format!("{}ms", ms.max(0))
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_timestamps() {
        assert_eq!(format_ts_relative(Utc::now()), "just now");
        assert_eq!(
            format_ts_relative(Utc::now() - Duration::hours(3)),
            "3 hours ago"
        );
        assert_eq!(
            format_ts_relative(Utc::now() - Duration::days(1) - Duration::minutes(1)),
            "1 day ago"
        );
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration_ms(850), "850ms");
        assert_eq!(format_duration_ms(12_400), "12.4s");
        assert_eq!(format_duration_ms(185_000), "3m 05s");
    }
}
