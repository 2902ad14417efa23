use anyhow::{Context, Result};
use chrono::DateTime;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use tracing::{debug, error, instrument};

use crate::models::{sort_column, OriginKind, Record, RecordPage, RecordQuery, SortOrder};

const UPSERT_RECORD: &str = r#"
INSERT INTO records (
    id, display_name, owner_address, subject_address, category,
    verified, locked, origin_kind, score, weight, created_at, last_updated
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (id) DO UPDATE SET
    display_name = excluded.display_name,
    owner_address = excluded.owner_address,
    subject_address = excluded.subject_address,
    category = excluded.category,
    verified = excluded.verified,
    locked = excluded.locked,
    origin_kind = excluded.origin_kind,
    score = excluded.score,
    weight = excluded.weight,
    created_at = excluded.created_at,
    last_updated = excluded.last_updated
"#;

async fn upsert_one<'e, E>(executor: E, record: &Record, stamp: i64) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_RECORD)
        .bind(record.id as i64)
        .bind(&record.display_name)
        .bind(&record.owner_address)
        .bind(&record.subject_address)
        .bind(&record.category)
        .bind(record.verified)
        .bind(record.locked)
        .bind(record.origin_kind.as_str())
        .bind(record.score)
        .bind(record.weight)
        .bind(record.created_at.timestamp())
        .bind(stamp)
        .execute(executor)
        .await?;
    Ok(())
}

#[instrument(skip(pool, record), fields(id = record.id))]
pub async fn save_record(pool: &SqlitePool, record: &Record, stamp: i64) -> Result<()> {
    debug!("Saving record {} to database", record.id);
    upsert_one(pool, record, stamp).await.map_err(|e| {
        error!("Failed to save record {}: {}", record.id, e);
        anyhow::Error::from(e).context(format!("saving record {}", record.id))
    })
}

/// Write every record inside one transaction. `stamps` yields one write stamp per record.
#[instrument(skip(pool, records, stamps), fields(count = records.len()))]
pub async fn save_records(
    pool: &SqlitePool,
    records: &[Record],
    mut stamps: impl FnMut() -> i64,
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await.context("opening write transaction")?;
    for record in records {
        if let Err(e) = upsert_one(&mut *tx, record, stamps()).await {
            error!("Batch write failed at record {}: {}", record.id, e);
            // Dropping the transaction rolls back the whole batch
            return Err(anyhow::Error::from(e).context(format!("batch write failed at record {}", record.id)));
        }
    }
    tx.commit().await.context("committing batch write")?;

    debug!("Saved batch of {} records", records.len());
    Ok(())
}

#[instrument(skip(pool))]
pub async fn record_exists(pool: &SqlitePool, id: u64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM records WHERE id = ?")
        .bind(id as i64)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("checking record {}", id))?;
    Ok(found.is_some())
}

#[instrument(skip(pool))]
pub async fn get_record(pool: &SqlitePool, id: u64) -> Result<Option<Record>> {
    let row = sqlx::query_as::<_, RecordRow>("SELECT * FROM records WHERE id = ?")
        .bind(id as i64)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("fetching record {}", id))?;
    Ok(row.map(RecordRow::into_record))
}

#[instrument(skip(pool))]
pub async fn count_records(pool: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(pool)
        .await
        .context("counting records")?;
    Ok(count as u64)
}

#[instrument(skip(pool))]
pub async fn list_record_ids(pool: &SqlitePool) -> Result<Vec<u64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM records ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .context("listing record ids")?;
    Ok(ids.into_iter().map(|id| id as u64).collect())
}

#[instrument(skip(pool, hidden))]
pub async fn get_all_records(pool: &SqlitePool, hidden: &BTreeSet<u64>) -> Result<Vec<Record>> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM records");
    if !hidden.is_empty() {
        builder.push(" WHERE id NOT IN (");
        let mut separated = builder.separated(", ");
        for id in hidden {
            separated.push_bind(*id as i64);
        }
        separated.push_unseparated(")");
    }
    builder.push(" ORDER BY id ASC");

    let rows = builder
        .build_query_as::<RecordRow>()
        .fetch_all(pool)
        .await
        .context("listing all records")?;
    Ok(rows.into_iter().map(RecordRow::into_record).collect())
}

/// Overwrite the mutable fields of one record; `None` keeps the stored value.
/// Returns false when the id is not stored.
#[instrument(skip(pool))]
pub async fn update_scores(
    pool: &SqlitePool,
    id: u64,
    score: Option<f64>,
    weight: Option<f64>,
    stamp: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE records SET score = COALESCE(?, score), weight = COALESCE(?, weight), last_updated = ? WHERE id = ?",
    )
        .bind(score)
        .bind(weight)
        .bind(stamp)
        .bind(id as i64)
        .execute(pool)
        .await
        .with_context(|| format!("updating scores for record {}", id))?;
    Ok(result.rows_affected() > 0)
}

#[instrument(skip(pool))]
pub async fn max_last_updated(pool: &SqlitePool) -> Result<i64> {
    let max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(last_updated), 0) FROM records")
        .fetch_one(pool)
        .await
        .context("reading latest write stamp")?;
    Ok(max)
}

/// Substring pattern with `%`, `_` and the escape character taken literally
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_clause(builder: &mut QueryBuilder<'_, Sqlite>, started: &mut bool) {
    builder.push(if *started { " AND " } else { " WHERE " });
    *started = true;
}

/// Append the SQL-side predicates shared by the count and page queries
fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &RecordQuery, hidden: &BTreeSet<u64>) {
    let mut started = false;

    if !query.include_hidden && !hidden.is_empty() {
        push_clause(builder, &mut started);
        builder.push("id NOT IN (");
        let mut separated = builder.separated(", ");
        for id in hidden {
            separated.push_bind(*id as i64);
        }
        separated.push_unseparated(")");
    }

    // Cheap half of the spam heuristic; the repeated-character check runs after the query
    if !query.include_spam {
        push_clause(builder, &mut started);
        builder.push("LENGTH(TRIM(display_name)) > 1");
    }

    if let Some(category) = &query.filters.category {
        push_clause(builder, &mut started);
        builder.push("category = ").push_bind(category.clone());
    }

    if let Some(verified) = query.filters.verified {
        push_clause(builder, &mut started);
        builder.push("verified = ").push_bind(verified);
    }

    if let Some(search) = &query.filters.search {
        push_clause(builder, &mut started);
        builder
            .push("display_name LIKE ")
            .push_bind(like_pattern(search))
            .push(" ESCAPE '\\'");
    }
}

#[instrument(skip(pool, query, hidden), fields(page = query.page, limit = query.limit, sort = %query.sort))]
pub async fn query_records(
    pool: &SqlitePool,
    query: &RecordQuery,
    hidden: &BTreeSet<u64>,
    limit_cap: u32,
) -> Result<RecordPage> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, limit_cap.max(1));
    let column = sort_column(&query.sort);
    let order = SortOrder::parse(&query.order);
    let offset = (page as i64 - 1) * limit as i64;

    // Count and page read from the same snapshot
    let mut tx = pool.begin().await.context("opening read transaction")?;

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM records");
    push_filters(&mut count_builder, query, hidden);
    let total: i64 = count_builder
        .build_query_scalar::<i64>()
        .fetch_one(&mut *tx)
        .await
        .context("counting filtered records")?;

    let total_unfiltered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&mut *tx)
        .await
        .context("counting records")?;

    let mut page_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM records");
    push_filters(&mut page_builder, query, hidden);
    page_builder.push(format!(" ORDER BY {} {}, id ASC", column, order.as_sql()));
    page_builder.push(" LIMIT ").push_bind(limit as i64);
    page_builder.push(" OFFSET ").push_bind(offset);

    let rows = page_builder
        .build_query_as::<RecordRow>()
        .fetch_all(&mut *tx)
        .await
        .context("fetching record page")?;

    tx.commit().await.context("closing read transaction")?;

    let mut records: Vec<Record> = rows.into_iter().map(RecordRow::into_record).collect();
    if !query.include_spam {
        records.retain(|record| !record.looks_like_spam());
    }

    let total = total as u64;
    debug!("Query returned {} of {} matching records", records.len(), total);

    Ok(RecordPage {
        records,
        total,
        total_unfiltered: total_unfiltered as u64,
        page,
        pages: total.div_ceil(limit as u64),
        limit,
    })
}

// Helper struct for database queries
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    display_name: String,
    owner_address: String,
    subject_address: String,
    category: String,
    verified: bool,
    locked: bool,
    origin_kind: String,
    score: f64,
    weight: f64,
    created_at: i64,
    last_updated: i64,
}

impl RecordRow {
    fn into_record(self) -> Record {
        Record {
            id: self.id as u64,
            display_name: self.display_name,
            owner_address: self.owner_address,
            subject_address: self.subject_address,
            category: self.category,
            verified: self.verified,
            locked: self.locked,
            origin_kind: OriginKind::parse(&self.origin_kind),
            score: self.score,
            weight: self.weight,
            created_at: DateTime::from_timestamp(self.created_at, 0).unwrap_or_default(),
            last_updated: self.last_updated,
        }
    }
}
