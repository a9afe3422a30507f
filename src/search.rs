//! `compras search` and `compras filters`: paged queries over the store,
//! printed as a listing or as JSON.

use anyhow::Result;

use compras_core::store::{ReleaseStore, SearchFilters};

use crate::config::Config;
use crate::db;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

pub async fn run_search(config: &Config, filters: &SearchFilters, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let page = store.search(filters).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        pool.close().await;
        return Ok(());
    }

    if page.releases.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let offset = filters.offset();
    for (i, release) in page.releases.iter().enumerate() {
        println!(
            "{}. {}",
            offset + i as i64 + 1,
            release.title.as_deref().unwrap_or("(untitled)")
        );
        println!("    buyer: {}", release.buyer_name.as_deref().unwrap_or("-"));
        if let Some(region) = &release.buyer_region {
            println!("    region: {}", region);
        }
        println!(
            "    status: {}  method: {}",
            release.status.as_deref().unwrap_or("-"),
            release.procurement_method.as_deref().unwrap_or("-")
        );
        if let Some(amount) = release.budget_amount {
            println!(
                "    budget: {}",
                format_amount(amount, release.currency.as_deref().unwrap_or(""))
            );
        }
        if let Some(published) = &release.published_date {
            println!("    published: {}", published);
        }
        println!("    key: {}", release.ocid);
        println!();
    }
    println!(
        "page {} / {}  ({} releases)",
        page.page,
        page.total_pages,
        format_number(page.total.max(0) as u64)
    );

    pool.close().await;
    Ok(())
}

pub async fn run_filters(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let options = SqliteStore::new(pool.clone()).get_filter_options().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&options)?);
    } else {
        for (label, values) in [
            ("Entities", &options.entities),
            ("Regions", &options.regions),
            ("Categories", &options.categories),
            ("Methods", &options.methods),
        ] {
            println!("{} ({}):", label, values.len());
            for value in values {
                println!("  {}", value);
            }
            println!();
        }
    }

    pool.close().await;
    Ok(())
}

/// `1250000.5, "DOP"` → `"DOP 1,250,000.50"`.
pub fn format_amount(amount: f64, currency: &str) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let sign = if amount < 0.0 { "-" } else { "" };
    let formatted = format!("{}{}.{:02}", sign, format_number(cents / 100), cents % 100);
    if currency.is_empty() {
        formatted
    } else {
        format!("{} {}", currency, formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(1_250_000.5, "DOP"), "DOP 1,250,000.50");
        assert_eq!(format_amount(0.0, ""), "0.00");
        assert_eq!(format_amount(-12.345, "USD"), "USD -12.35");
    }
}
