//! Lazy multihash iterator.
//!
//! A window's multihashes are loaded once, up front, and then handed out one
//! at a time. The sequence is finite and non-restartable: once exhausted, it
//! stays exhausted. It is handed to the engine on a pull, which may happen on
//! an arbitrary thread, at an arbitrary time, concurrently with the
//! reconciliation loop or other pulls — so construction does all I/O and
//! parsing, and the iterator itself touches nothing but an in-memory vector.

use cid::multihash::Multihash;

const DIGEST_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no multihashes for this window")]
    Empty,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A finite, non-restartable sequence of multihashes for a single batch
/// window, already loaded into memory.
pub struct MultihashIter {
    mhs: Vec<Multihash<DIGEST_SIZE>>,
    index: usize,
}

impl MultihashIter {
    /// Builds an iterator from the raw `cid` column values of a window's
    /// object rows. Empty values are tolerated and counted; malformed values
    /// are logged and skipped. Fails if nothing usable remains.
    pub fn from_raw_cids(raw_cids: Vec<Vec<u8>>) -> Result<Self, Error> {
        let mut mhs = Vec::with_capacity(raw_cids.len());
        let mut empty_count = 0usize;

        for raw in raw_cids {
            if raw.is_empty() {
                empty_count += 1;
                continue;
            }

            match cid::Cid::try_from(raw.as_slice()) {
                Ok(parsed) => mhs.push(*parsed.hash()),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse CID, skipping");
                }
            }
        }

        if empty_count != 0 {
            tracing::warn!(empty_count, "skipped empty CIDs while building iterator");
        }

        if mhs.is_empty() {
            return Err(Error::Empty);
        }

        Ok(Self { mhs, index: 0 })
    }

    /// Queries `objects` for the window `[first, first + count)` and builds
    /// an iterator from the returned CIDs.
    pub async fn open(
        pool: &sqlx::PgPool,
        first: u64,
        count: u64,
    ) -> Result<Self, Error> {
        let raw_cids = publisher_sql::objects::fetch_cids(pool, first, count).await?;
        Self::from_raw_cids(raw_cids)
    }

    /// Remaining multihashes, for diagnostics and tests.
    pub fn remaining(&self) -> usize {
        self.mhs.len() - self.index
    }
}

impl Iterator for MultihashIter {
    type Item = Multihash<DIGEST_SIZE>;

    fn next(&mut self) -> Option<Self::Item> {
        let mh = self.mhs.get(self.index).copied();
        if mh.is_some() {
            self.index += 1;
        }
        mh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cid_bytes() -> Vec<u8> {
        let digest = Multihash::<DIGEST_SIZE>::wrap(0x12, &[1, 2, 3, 4]).unwrap();
        cid::Cid::new_v1(0x55, digest).to_bytes()
    }

    #[test]
    fn skips_empty_and_stops_at_end() {
        let cids = vec![vec![], sample_cid_bytes(), vec![]];
        let mut iter = MultihashIter::from_raw_cids(cids).unwrap();

        assert_eq!(iter.remaining(), 1);
        assert!(iter.next().is_some());
        assert_eq!(iter.next(), None);
        // Further calls continue to signal end.
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn skips_malformed_cids() {
        let cids = vec![vec![0xff, 0x00], sample_cid_bytes()];
        let iter = MultihashIter::from_raw_cids(cids).unwrap();
        assert_eq!(iter.remaining(), 1);
    }

    #[test]
    fn fails_when_nothing_usable_remains() {
        let cids = vec![vec![], vec![0xff, 0x00]];
        assert!(matches!(
            MultihashIter::from_raw_cids(cids),
            Err(Error::Empty)
        ));
    }
}
