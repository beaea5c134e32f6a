//! The per-peer advertisement ledger: a durable record of which (peer,
//! window) pairs have been advertised, and at what count.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A single ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub count: u64,
}

/// Durable mapping of `(autoretrieve_handle, first_object_id) -> count`.
///
/// Implementations must tolerate concurrent access from at most one
/// reconciliation loop plus external readers; the uniqueness of
/// `(handle, first)` is enforced by the backing store, so a `put` for an
/// entry that already exists is a programming error.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn find(&self, handle: &str, first: u64) -> Result<Option<LedgerEntry>, Error>;
    async fn put(&self, handle: &str, first: u64, count: u64) -> Result<(), Error>;
    async fn update(&self, handle: &str, first: u64, new_count: u64) -> Result<(), Error>;
}

/// A [`Ledger`] backed by the `published_batches` Postgres table.
pub struct PgLedger {
    pool: sqlx::PgPool,
}

impl PgLedger {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn find(&self, handle: &str, first: u64) -> Result<Option<LedgerEntry>, Error> {
        let row = publisher_sql::published_batches::find(&self.pool, handle, first).await?;
        Ok(row.map(|r| LedgerEntry {
            count: r.count as u64,
        }))
    }

    async fn put(&self, handle: &str, first: u64, count: u64) -> Result<(), Error> {
        publisher_sql::published_batches::put(&self.pool, handle, first, count).await?;
        Ok(())
    }

    async fn update(&self, handle: &str, first: u64, new_count: u64) -> Result<(), Error> {
        publisher_sql::published_batches::update(&self.pool, handle, first, new_count).await?;
        Ok(())
    }
}

/// Test-only in-memory ledger. Not gated behind `cfg(test)` so that it can
/// also be used from this crate's `tests/` integration suite.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// An in-memory [`Ledger`] for exercising the reconciliation loop without
    /// a database.
    #[derive(Default)]
    pub struct MockLedger {
        rows: Mutex<HashMap<(String, u64), u64>>,
    }

    impl MockLedger {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn snapshot(&self) -> HashMap<(String, u64), u64> {
            self.rows.lock().await.clone()
        }
    }

    #[async_trait]
    impl Ledger for MockLedger {
        async fn find(&self, handle: &str, first: u64) -> Result<Option<LedgerEntry>, Error> {
            Ok(self
                .rows
                .lock()
                .await
                .get(&(handle.to_string(), first))
                .map(|&count| LedgerEntry { count }))
        }

        async fn put(&self, handle: &str, first: u64, count: u64) -> Result<(), Error> {
            let mut rows = self.rows.lock().await;
            let key = (handle.to_string(), first);
            if rows.contains_key(&key) {
                panic!("put called for an existing ledger row: {handle} {first}");
            }
            rows.insert(key, count);
            Ok(())
        }

        async fn update(&self, handle: &str, first: u64, new_count: u64) -> Result<(), Error> {
            let mut rows = self.rows.lock().await;
            *rows
                .get_mut(&(handle.to_string(), first))
                .expect("update called for a missing ledger row") = new_count;
            Ok(())
        }
    }
}
