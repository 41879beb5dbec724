//! Catalog gateway
//!
//! Thin, typed access to the relational catalog (the historical `militaria`
//! table). All reads and writes the crawler performs go through here: the
//! per-pass snapshot, tile-driven availability updates, detail inserts and
//! changed-field updates, the absence sweep, and imagery bookkeeping.
//!
//! Connection-level failures are retried once after a liveness ping; the
//! pool replaces broken connections underneath.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::domain::product::{
    prices_equal, CatalogRow, CatalogSnapshot, ProductDraft, SnapshotRow,
};
use crate::infrastructure::config::DbCredentials;

/// Outcome of a changed-fields detail update.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetailUpdateOutcome {
    pub changed: bool,
    pub availability_flipped: bool,
    pub price_changed: bool,
}

#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    /// Connect with the pool bounds the deployment has always used.
    pub async fn connect(credentials: &DbCredentials) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(5)
            .max_connections(10)
            .connect(&credentials.connection_string())
            .await
            .context("Failed to initialize catalog connection pool")?;
        info!("Catalog connection pool initialized");
        Ok(Self { pool })
    }

    /// Liveness probe; the integrity worker calls this before batches.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn ping_and_log(&self) {
        if let Err(e) = self.ping().await {
            warn!("Catalog ping after connection error failed: {e}");
        }
    }

    /// Build the per-pass snapshot for one site: everything the tile differ
    /// needs, in one round trip.
    pub async fn load_snapshot(&self, site: &str) -> Result<CatalogSnapshot> {
        let rows = sqlx::query(
            r#"
            SELECT url, title, price::float8 AS price, available, description, price_history
            FROM militaria
            WHERE site = $1
            "#,
        )
        .bind(site)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = CatalogSnapshot::with_capacity(rows.len());
        for row in rows {
            let url: String = row.get("url");
            snapshot.insert(
                url,
                SnapshotRow {
                    title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
                    price: row.try_get("price")?,
                    available: row.try_get("available")?,
                    description: row.try_get("description")?,
                    price_history: row
                        .try_get::<Option<JsonValue>, _>("price_history")?
                        .unwrap_or_else(|| json!([])),
                },
            );
        }
        debug!("Snapshot for {site}: {} rows", snapshot.len());
        Ok(snapshot)
    }

    pub async fn fetch_row(&self, site: &str, url: &str) -> Result<Option<CatalogRow>> {
        let row = sqlx::query(
            r#"
            SELECT id::bigint AS id, url, title, description, price::float8 AS price,
                   available, date_sold, original_image_urls, s3_image_urls, price_history
            FROM militaria
            WHERE site = $1 AND url = $2
            "#,
        )
        .bind(site)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(CatalogRow {
                id: row.try_get("id")?,
                url: row.try_get("url")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                price: row.try_get("price")?,
                available: row.try_get("available")?,
                date_sold: row.try_get("date_sold")?,
                original_image_urls: row.try_get("original_image_urls")?,
                s3_image_urls: row.try_get("s3_image_urls")?,
                price_history: row.try_get("price_history")?,
            })),
            None => Ok(None),
        }
    }

    pub async fn product_id(&self, site: &str, url: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id::bigint AS id FROM militaria WHERE site = $1 AND url = $2")
            .bind(site)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Insert a freshly extracted product. Optional fields persist as NULL.
    pub async fn insert_product(&self, draft: &ProductDraft) -> Result<i64> {
        let now = Utc::now();
        let date_sold: Option<DateTime<Utc>> = (!draft.available).then_some(now);
        let categories = (!draft.categories.is_empty()).then(|| json!(draft.categories));

        let insert = sqlx::query(
            r#"
            INSERT INTO militaria
                (url, title, description, price, available, date, date_sold, site, currency,
                 conflict, nation, item_type, grade, extracted_id, categories_site_designated,
                 conflict_ai_generated, nation_ai_generated, item_type_ai_generated,
                 supergroup_ai_generated, openai_vector)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING id::bigint AS id
            "#,
        )
        .bind(&draft.url)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.price)
        .bind(draft.available)
        .bind(now)
        .bind(date_sold)
        .bind(&draft.site)
        .bind(&draft.currency)
        .bind(&draft.conflict)
        .bind(&draft.nation)
        .bind(&draft.item_type)
        .bind(&draft.grade)
        .bind(&draft.extracted_id)
        .bind(categories)
        .bind(&draft.conflict_ai)
        .bind(&draft.nation_ai)
        .bind(&draft.item_type_ai)
        .bind(&draft.supergroup_ai)
        .bind(&draft.embedding);

        let row = match insert.fetch_one(&self.pool).await {
            Ok(row) => row,
            Err(e) if is_connection_error(&e) => {
                self.ping_and_log().await;
                return Err(e).context("Insert failed twice; aborting this product");
            }
            Err(e) => return Err(e.into()),
        };
        let id: i64 = row.get("id");
        info!("Inserted product {} ({})", draft.url, id);
        Ok(id)
    }

    /// Flip availability for one URL. A true-to-false transition stamps
    /// `date_sold` when it is not already set.
    pub async fn update_availability(&self, site: &str, url: &str, available: bool) -> Result<()> {
        let result = self.try_update_availability(site, url, available).await;
        match result {
            Err(e) if is_connection_error(&e) => {
                self.ping_and_log().await;
                self.try_update_availability(site, url, available).await?;
                Ok(())
            }
            other => other.map_err(Into::into),
        }
    }

    async fn try_update_availability(
        &self,
        site: &str,
        url: &str,
        available: bool,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE militaria
            SET available = $3,
                date_modified = NOW(),
                date_sold = CASE
                    WHEN $3 = FALSE AND date_sold IS NULL THEN NOW()
                    ELSE date_sold
                END
            WHERE site = $1 AND url = $2
            "#,
        )
        .bind(site)
        .bind(url)
        .bind(available)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk true-to-false sweep used by the availability tracker.
    pub async fn mark_urls_sold(&self, site: &str, urls: &[String]) -> Result<u64> {
        if urls.is_empty() {
            return Ok(0);
        }
        let result = self.try_mark_urls_sold(site, urls).await;
        let affected = match result {
            Err(e) if is_connection_error(&e) => {
                self.ping_and_log().await;
                self.try_mark_urls_sold(site, urls).await?
            }
            other => other?,
        };
        info!("Marked {affected} rows sold for {site}");
        Ok(affected)
    }

    async fn try_mark_urls_sold(
        &self,
        site: &str,
        urls: &[String],
    ) -> std::result::Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE militaria
            SET available = FALSE,
                date_modified = NOW(),
                date_sold = COALESCE(date_sold, NOW())
            WHERE site = $1 AND url = ANY($2) AND available = TRUE
            "#,
        )
        .bind(site)
        .bind(urls)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Available/sold counts for the safety-gate arithmetic.
    pub async fn availability_counts(&self, site: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE available = TRUE)  AS available_count,
                COUNT(*) FILTER (WHERE available = FALSE) AS sold_count
            FROM militaria
            WHERE site = $1
            "#,
        )
        .bind(site)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("available_count"), row.get("sold_count")))
    }

    pub async fn available_urls(&self, site: &str) -> Result<Vec<String>> {
        let rows =
            sqlx::query("SELECT url FROM militaria WHERE site = $1 AND available = TRUE")
                .bind(site)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|row| row.get("url")).collect())
    }

    /// last-seen mode: stamp every URL found in the walk.
    pub async fn touch_last_seen(
        &self,
        site: &str,
        urls: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE militaria SET last_seen = $3 WHERE site = $1 AND url = ANY($2)")
            .bind(site)
            .bind(urls)
            .bind(seen_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// last-seen mode: everything still available that the walk did not
    /// touch goes to sold.
    pub async fn expire_stale_last_seen(
        &self,
        site: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE militaria
            SET available = FALSE,
                date_modified = NOW(),
                date_sold = COALESCE(date_sold, NOW())
            WHERE site = $1
              AND available = TRUE
              AND (last_seen IS NULL OR last_seen < $2)
            "#,
        )
        .bind(site)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_image_urls(
        &self,
        id: i64,
        original: &[String],
        uploaded: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE militaria
            SET original_image_urls = $2, s3_image_urls = $3, image_download_failed = FALSE
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(json!(original))
        .bind(json!(uploaded))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_thumbnail(&self, id: i64, thumbnail_url: &str) -> Result<()> {
        sqlx::query("UPDATE militaria SET s3_first_image_thumbnail = $2 WHERE id = $1")
            .bind(id)
            .bind(thumbnail_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Future passes skip imagery for this product entirely.
    pub async fn mark_image_download_failed(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE militaria SET image_download_failed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_requires_attention(&self, site: &str, url: &str) -> Result<()> {
        sqlx::query("UPDATE militaria SET requires_attention = TRUE WHERE site = $1 AND url = $2")
            .bind(site)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Imagery is complete when both URL lists exist and line up 1:1.
    pub async fn should_skip_image_upload(&self, site: &str, url: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT original_image_urls, s3_image_urls FROM militaria WHERE site = $1 AND url = $2",
        )
        .bind(site)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let originals: Option<JsonValue> = row.try_get("original_image_urls")?;
        let uploaded: Option<JsonValue> = row.try_get("s3_image_urls")?;
        Ok(image_lists_complete(originals.as_ref(), uploaded.as_ref()))
    }

    /// Changed-fields-only update for an existing product, one transaction.
    pub async fn apply_detail_update(
        &self,
        row: &CatalogRow,
        draft: &ProductDraft,
    ) -> Result<DetailUpdateOutcome> {
        let mut outcome = DetailUpdateOutcome::default();
        let mut tx = self.pool.begin().await?;

        if row.title.as_deref() != Some(draft.title.as_str()) {
            sqlx::query("UPDATE militaria SET title = $2 WHERE id = $1")
                .bind(row.id)
                .bind(&draft.title)
                .execute(&mut *tx)
                .await?;
            outcome.changed = true;
        }

        if draft.description.is_some() && row.description != draft.description {
            sqlx::query("UPDATE militaria SET description = $2 WHERE id = $1")
                .bind(row.id)
                .bind(&draft.description)
                .execute(&mut *tx)
                .await?;
            outcome.changed = true;
        }

        if draft.price.is_some() && !prices_equal(row.price, draft.price) {
            let mut history = row.price_history.clone().unwrap_or_else(|| json!([]));
            if let Some(entries) = history.as_array_mut() {
                entries.push(json!({
                    "price": draft.price,
                    "date": Utc::now().to_rfc3339(),
                }));
            }
            sqlx::query("UPDATE militaria SET price = $2, price_history = $3 WHERE id = $1")
                .bind(row.id)
                .bind(draft.price)
                .bind(history)
                .execute(&mut *tx)
                .await?;
            outcome.changed = true;
            outcome.price_changed = true;
        }

        if row.available != draft.available {
            sqlx::query("UPDATE militaria SET available = $2 WHERE id = $1")
                .bind(row.id)
                .bind(draft.available)
                .execute(&mut *tx)
                .await?;
            outcome.changed = true;
            outcome.availability_flipped = true;
            if !draft.available && row.date_sold.is_none() {
                sqlx::query("UPDATE militaria SET date_sold = NOW() WHERE id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        if outcome.changed {
            sqlx::query("UPDATE militaria SET date_modified = NOW() WHERE id = $1")
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Integrity repair: every sold row must carry a sold date.
    pub async fn repair_missing_date_sold(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE militaria SET date_sold = NOW() WHERE available = FALSE AND date_sold IS NULL",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Integrity sweep: flag rows whose imagery lists disagree in length.
    pub async fn flag_image_count_mismatch(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE militaria
            SET requires_attention = TRUE
            WHERE original_image_urls IS NOT NULL
              AND s3_image_urls IS NOT NULL
              AND jsonb_array_length(original_image_urls) <> jsonb_array_length(s3_image_urls)
              AND (requires_attention IS FALSE OR requires_attention IS NULL)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Both lists present, non-empty, and of equal length.
pub fn image_lists_complete(originals: Option<&JsonValue>, uploaded: Option<&JsonValue>) -> bool {
    match (
        originals.and_then(JsonValue::as_array),
        uploaded.and_then(JsonValue::as_array),
    ) {
        (Some(a), Some(b)) => !a.is_empty() && a.len() == b.len(),
        _ => false,
    }
}

fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_lists_complete_requires_matching_nonempty_lists() {
        let two = json!(["a", "b"]);
        let two_more = json!(["c", "d"]);
        let one = json!(["a"]);
        let empty = json!([]);
        assert!(image_lists_complete(Some(&two), Some(&two_more)));
        assert!(!image_lists_complete(Some(&two), Some(&one)));
        assert!(!image_lists_complete(Some(&empty), Some(&empty)));
        assert!(!image_lists_complete(Some(&two), None));
        assert!(!image_lists_complete(None, None));
    }
}
