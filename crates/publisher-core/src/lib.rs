//! Reconciliation engine for the autoretrieve publisher: diffs the content
//! database against previously published advertisements and drives an
//! external publishing engine to converge the two.

pub mod config;
pub mod context_id;
pub mod engine;
pub mod ledger;
pub mod multihash_iter;
pub mod reconcile;
pub mod registry;

pub use config::Config;
pub use engine::{
    logging, AdCid, DbMultihashLister, EngineError, Metadata, MultihashLister, PublishingEngine,
};
pub use ledger::{Ledger, LedgerEntry, PgLedger};
pub use multihash_iter::MultihashIter;
pub use reconcile::{PgWatermarkSource, Reconciler, WatermarkSource};
pub use registry::{AddrInfo, Peer, PeerError, PgRegistry, Registry};
