//! The advertisement ledger: `published_batches` records which (autoretrieve,
//! window) pairs have been advertised to the indexer, and at what count.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
pub struct PublishedBatchRow {
    pub first_content_id: i64,
    pub count: i64,
}

/// Returns the ledger row for `(handle, first)`, if one exists.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn find(
    pool: &sqlx::PgPool,
    handle: &str,
    first: u64,
) -> sqlx::Result<Option<PublishedBatchRow>> {
    sqlx::query_as(
        r#"
        SELECT first_content_id, count
        FROM published_batches
        WHERE autoretrieve_handle = $1 AND first_content_id = $2
        "#,
    )
    .bind(handle)
    .bind(first as i64)
    .fetch_optional(pool)
    .await
}

/// Inserts a new ledger row. Callers must have already confirmed via `find`
/// that no row exists for `(handle, first)`; a race with another writer
/// surfaces here as a unique-constraint violation.
#[tracing::instrument(level = "info", err, skip(pool))]
pub async fn put(pool: &sqlx::PgPool, handle: &str, first: u64, count: u64) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO published_batches (autoretrieve_handle, first_content_id, count)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(handle)
    .bind(first as i64)
    .bind(count as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Updates the count of an existing ledger row in place.
#[tracing::instrument(level = "info", err, skip(pool))]
pub async fn update(
    pool: &sqlx::PgPool,
    handle: &str,
    first: u64,
    new_count: u64,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE published_batches
        SET count = $3, updated_at = now()
        WHERE autoretrieve_handle = $1 AND first_content_id = $2
        "#,
    )
    .bind(handle)
    .bind(first as i64)
    .bind(new_count as i64)
    .execute(pool)
    .await?;

    Ok(())
}
