//! SQLite-backed [`ReleaseStore`] implementation.
//!
//! Releases are upserted on their storage key (`releases.ocid`) with
//! `ON CONFLICT ... DO UPDATE ... RETURNING`, so one statement both writes
//! and hands back the persisted row. Flattened columns exist for querying;
//! `raw_data` keeps the full canonical object for lossless reads.

use async_trait::async_trait;
use chrono::{DateTime, Days, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use compras_core::models::{CanonicalRelease, Document, Party};
use compras_core::store::{
    Breakdown, FilterOptions, PersistedRelease, ReleaseStore, SearchFilters, SearchPage,
    StoreError, StoreStats,
};

const RELEASE_COLUMNS: &str = "id, ocid, key_kind, title, description, buyer_name, buyer_region, \
     status, procurement_method, main_procurement_category, budget_amount, currency, \
     published_date, tender_start_date, tender_end_date, raw_data, created_at, updated_at";

/// SQLite implementation of the [`ReleaseStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn distinct(&self, column: &str) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM releases WHERE {col} IS NOT NULL AND {col} != '' ORDER BY {col}",
            col = column
        );
        sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn breakdown(&self, column: &str) -> Result<Vec<Breakdown>, StoreError> {
        let sql = format!(
            "SELECT COALESCE({col}, '(none)') AS value, COUNT(*) AS count FROM releases \
             GROUP BY value ORDER BY count DESC, value ASC",
            col = column
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter()
            .map(|row| {
                Ok(Breakdown {
                    value: row.try_get("value").map_err(StoreError::backend)?,
                    count: row.try_get("count").map_err(StoreError::backend)?,
                })
            })
            .collect()
    }

    async fn count(&self, sql: &str) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)
    }
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(ts: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(StoreError::backend)
}

/// Empty strings are stored as NULL.
fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Keyword haystack: title, description and buyer name, Unicode-lowercased.
/// The keyword goes through the same `to_lowercase` before matching.
fn search_text(release: &CanonicalRelease) -> String {
    [
        release.tender.title.as_str(),
        release.tender.description.as_str(),
        release.buyer.name.as_str(),
    ]
    .join("\n")
    .to_lowercase()
}

fn row_to_release(row: &SqliteRow) -> Result<PersistedRelease, StoreError> {
    let get = |col: &str| -> Result<Option<String>, StoreError> {
        row.try_get(col).map_err(StoreError::backend)
    };
    let raw: String = row.try_get("raw_data").map_err(StoreError::backend)?;
    let created_at: String = row.try_get("created_at").map_err(StoreError::backend)?;
    let updated_at: String = row.try_get("updated_at").map_err(StoreError::backend)?;

    Ok(PersistedRelease {
        id: row.try_get("id").map_err(StoreError::backend)?,
        ocid: row.try_get("ocid").map_err(StoreError::backend)?,
        key_kind: row.try_get("key_kind").map_err(StoreError::backend)?,
        title: get("title")?,
        description: get("description")?,
        buyer_name: get("buyer_name")?,
        buyer_region: get("buyer_region")?,
        status: get("status")?,
        procurement_method: get("procurement_method")?,
        main_procurement_category: get("main_procurement_category")?,
        budget_amount: row.try_get("budget_amount").map_err(StoreError::backend)?,
        currency: get("currency")?,
        published_date: get("published_date")?,
        tender_start_date: get("tender_start_date")?,
        tender_end_date: get("tender_end_date")?,
        raw_data: serde_json::from_str(&raw)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Append the WHERE clause for `filters`. Shared by the count and page queries.
fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &SearchFilters) {
    qb.push(" WHERE 1 = 1");

    if let Some(keyword) = filters.keyword() {
        qb.push(" AND search_text LIKE ")
            .push_bind(format!("%{}%", escape_like(&keyword.to_lowercase())))
            .push(" ESCAPE '\\'");
    }

    push_in(qb, "buyer_name", &filters.entities);
    push_in(qb, "buyer_region", &filters.regions);
    push_in(qb, "main_procurement_category", &filters.categories);
    push_in(qb, "procurement_method", &filters.methods);
    push_in(qb, "status", &filters.statuses);

    if let Some(min) = filters.min_budget {
        qb.push(" AND budget_amount >= ").push_bind(min);
    }
    if let Some(max) = filters.max_budget {
        qb.push(" AND budget_amount <= ").push_bind(max);
    }

    // Releases without a published date are matched on their creation time.
    if let Some(start) = filters.start_date {
        let start = start.format("%Y-%m-%d").to_string();
        qb.push(" AND (published_date >= ")
            .push_bind(start.clone())
            .push(" OR created_at >= ")
            .push_bind(start)
            .push(")");
    }
    if let Some(end) = filters.end_date {
        // Inclusive end: compare against the start of the following day.
        let bound = end
            .checked_add_days(Days::new(1))
            .unwrap_or(end)
            .format("%Y-%m-%d")
            .to_string();
        qb.push(" AND (published_date < ")
            .push_bind(bound.clone())
            .push(" OR created_at < ")
            .push_bind(bound)
            .push(")");
    }

    if filters.is_active {
        qb.push(" AND status = 'active'");
    }
    if filters.has_documents {
        qb.push(" AND EXISTS (SELECT 1 FROM documents d WHERE d.release_id = releases.id)");
    }
}

fn push_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    qb.push(format!(" AND {} IN (", column));
    let mut list = qb.separated(", ");
    for value in values {
        list.push_bind(value.clone());
    }
    list.push_unseparated(")");
}

#[async_trait]
impl ReleaseStore for SqliteStore {
    async fn upsert_release(
        &self,
        release: &CanonicalRelease,
    ) -> Result<PersistedRelease, StoreError> {
        let key = release.storage_key().ok_or(StoreError::MissingKey)?;
        let raw_data = serde_json::to_string(release)?;
        let submission_method = serde_json::to_string(&release.tender.submission_method)?;
        let amount = Some(release.tender.value.amount).filter(|a| *a != 0.0);
        let now = now_ts();

        let sql = format!(
            r#"
            INSERT INTO releases (id, ocid, key_kind, release_id, title, description,
                                  buyer_name, buyer_region, status, procurement_method,
                                  procurement_method_details, main_procurement_category,
                                  submission_method, budget_amount, currency, published_date,
                                  tender_start_date, tender_end_date, raw_data,
                                  search_text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ocid) DO UPDATE SET
                key_kind = excluded.key_kind,
                release_id = excluded.release_id,
                title = excluded.title,
                description = excluded.description,
                buyer_name = excluded.buyer_name,
                buyer_region = excluded.buyer_region,
                status = excluded.status,
                procurement_method = excluded.procurement_method,
                procurement_method_details = excluded.procurement_method_details,
                main_procurement_category = excluded.main_procurement_category,
                submission_method = excluded.submission_method,
                budget_amount = excluded.budget_amount,
                currency = excluded.currency,
                published_date = excluded.published_date,
                tender_start_date = excluded.tender_start_date,
                tender_end_date = excluded.tender_end_date,
                raw_data = excluded.raw_data,
                search_text = excluded.search_text,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            RELEASE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(key.storage_key())
            .bind(key.kind())
            .bind(non_empty(&release.id))
            .bind(non_empty(&release.tender.title))
            .bind(non_empty(&release.tender.description))
            .bind(non_empty(&release.buyer.name))
            .bind(release.buyer_region().and_then(non_empty))
            .bind(non_empty(&release.tender.status))
            .bind(non_empty(&release.tender.procurement_method))
            .bind(non_empty(&release.tender.procurement_method_details))
            .bind(non_empty(&release.tender.main_procurement_category))
            .bind(submission_method)
            .bind(amount)
            .bind(non_empty(&release.tender.value.currency))
            .bind(non_empty(&release.published_date))
            .bind(non_empty(&release.tender.tender_period.start_date))
            .bind(non_empty(&release.tender.tender_period.end_date))
            .bind(raw_data)
            .bind(search_text(release))
            .bind(&now)
            .bind(&now)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        row_to_release(&row)
    }

    async fn upsert_parties(
        &self,
        release_id: &str,
        parties: &[Party],
    ) -> Result<usize, StoreError> {
        let now = now_ts();
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for (i, party) in parties.iter().enumerate() {
            // Parties without an upstream id are keyed by position.
            let party_id = if party.id.is_empty() {
                format!("#{}", i)
            } else {
                party.id.clone()
            };
            sqlx::query(
                r#"
                INSERT INTO parties (id, release_id, party_id, name, identifier_scheme,
                                     identifier_id, legal_name, roles, locality, region,
                                     country_name, contact_name, email, telephone,
                                     created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(release_id, party_id) DO UPDATE SET
                    name = excluded.name,
                    identifier_scheme = excluded.identifier_scheme,
                    identifier_id = excluded.identifier_id,
                    legal_name = excluded.legal_name,
                    roles = excluded.roles,
                    locality = excluded.locality,
                    region = excluded.region,
                    country_name = excluded.country_name,
                    contact_name = excluded.contact_name,
                    email = excluded.email,
                    telephone = excluded.telephone,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(release_id)
            .bind(party_id)
            .bind(non_empty(&party.name))
            .bind(non_empty(&party.identifier.scheme))
            .bind(non_empty(&party.identifier.id))
            .bind(non_empty(&party.identifier.legal_name))
            .bind(serde_json::to_string(&party.roles)?)
            .bind(non_empty(&party.address.locality))
            .bind(non_empty(&party.address.region))
            .bind(non_empty(&party.address.country_name))
            .bind(non_empty(&party.contact_point.name))
            .bind(non_empty(&party.contact_point.email))
            .bind(non_empty(&party.contact_point.telephone))
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(parties.len())
    }

    async fn upsert_documents(
        &self,
        release_id: &str,
        documents: &[Document],
    ) -> Result<usize, StoreError> {
        let now = now_ts();
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for (i, doc) in documents.iter().enumerate() {
            let document_id = if doc.id.is_empty() {
                format!("#{}", i)
            } else {
                doc.id.clone()
            };
            sqlx::query(
                r#"
                INSERT INTO documents (id, release_id, document_id, document_type, title,
                                       description, url, format, language, date_published,
                                       date_modified, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(release_id, document_id) DO UPDATE SET
                    document_type = excluded.document_type,
                    title = excluded.title,
                    description = excluded.description,
                    url = excluded.url,
                    format = excluded.format,
                    language = excluded.language,
                    date_published = excluded.date_published,
                    date_modified = excluded.date_modified,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(release_id)
            .bind(document_id)
            .bind(non_empty(&doc.document_type))
            .bind(non_empty(&doc.title))
            .bind(non_empty(&doc.description))
            .bind(non_empty(&doc.url))
            .bind(non_empty(&doc.format))
            .bind(non_empty(&doc.language))
            .bind(non_empty(&doc.date_published))
            .bind(non_empty(&doc.date_modified))
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(documents.len())
    }

    async fn search(&self, filters: &SearchFilters) -> Result<SearchPage, StoreError> {
        let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM releases");
        push_filters(&mut count_qb, filters);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM releases", RELEASE_COLUMNS));
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY created_at DESC, ocid ASC LIMIT ")
            .push_bind(i64::from(filters.page_size()))
            .push(" OFFSET ")
            .push_bind(filters.offset());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let releases = rows
            .iter()
            .map(row_to_release)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchPage::new(releases, total, filters))
    }

    async fn get_filter_options(&self) -> Result<FilterOptions, StoreError> {
        let (entities, regions, categories, methods) = tokio::try_join!(
            self.distinct("buyer_name"),
            self.distinct("buyer_region"),
            self.distinct("main_procurement_category"),
            self.distinct("procurement_method"),
        )?;
        Ok(FilterOptions {
            entities,
            regions,
            categories,
            methods,
        })
    }

    async fn get_release(&self, key: &str) -> Result<Option<PersistedRelease>, StoreError> {
        let sql = format!("SELECT {} FROM releases WHERE ocid = ?", RELEASE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(row_to_release).transpose()
    }

    async fn count_releases(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM releases").await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let total_releases = self.count_releases().await?;
        let id_keyed = self
            .count("SELECT COUNT(*) FROM releases WHERE key_kind = 'id'")
            .await?;
        let total_parties = self.count("SELECT COUNT(*) FROM parties").await?;
        let total_documents = self.count("SELECT COUNT(*) FROM documents").await?;

        let last_updated: Option<String> =
            sqlx::query_scalar("SELECT MAX(updated_at) FROM releases")
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::backend)?;

        Ok(StoreStats {
            total_releases,
            ocid_keyed: total_releases - id_keyed,
            id_keyed,
            total_parties,
            total_documents,
            by_status: self.breakdown("status").await?,
            by_category: self.breakdown("main_procurement_category").await?,
            by_method: self.breakdown("procurement_method").await?,
            last_updated: last_updated.as_deref().map(parse_ts).transpose()?,
        })
    }
}
