//! Read-only access to the `autoretrieves` registration table.

use serde::Serialize;

/// A registered autoretrieve peer, exactly as stored by the registration
/// service. Address and public key parsing happen one layer up, since a
/// malformed row should be reported and skipped rather than fail the query.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AutoretrieveRow {
    pub handle: String,
    pub public_key: String,
    pub addresses: String,
    pub last_connection: chrono::DateTime<chrono::Utc>,
}

/// Returns every registered autoretrieve.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn list(pool: &sqlx::PgPool) -> sqlx::Result<Vec<AutoretrieveRow>> {
    sqlx::query_as(
        r#"
        SELECT handle, public_key, addresses, last_connection
        FROM autoretrieves
        "#,
    )
    .fetch_all(pool)
    .await
}
