//! Read-only access to the `objects` table: the append-only record of content
//! this system may advertise on behalf of registered autoretrieves.

/// Returns the highest `id` currently present in `objects`, or `None` if the
/// table is empty.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn fetch_high_watermark(pool: &sqlx::PgPool) -> sqlx::Result<Option<u64>> {
    let watermark: Option<i64> = sqlx::query_scalar(r#"SELECT max(id) FROM objects"#)
        .fetch_one(pool)
        .await?;

    Ok(watermark.map(|id| id as u64))
}

/// Returns the raw `cid` column for every object with `id` in
/// `[first, first + count)`, in whatever order the database returns them.
///
/// Rows are not filtered here: empty or malformed CID bytes are tolerated by
/// the caller, which is responsible for parsing them into multihashes.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn fetch_cids(
    pool: &sqlx::PgPool,
    first: u64,
    count: u64,
) -> sqlx::Result<Vec<Vec<u8>>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let first = first as i64;
    let last = first + (count as i64) - 1;

    sqlx::query_scalar(r#"SELECT cid FROM objects WHERE id BETWEEN $1 AND $2"#)
        .bind(first)
        .bind(last)
        .fetch_all(pool)
        .await
}
