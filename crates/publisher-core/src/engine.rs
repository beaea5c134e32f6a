//! Thin port over the abstract publishing engine.
//!
//! The engine itself — the component that signs advertisements, gossips
//! them, and serves pull requests — is an external collaborator. This module
//! only defines the boundary this crate calls through, and the fixed
//! metadata envelope every advertisement carries.

use std::sync::Arc;

use async_trait::async_trait;

use crate::multihash_iter::MultihashIter;
use crate::registry::AddrInfo;

/// An opaque advertisement CID, as returned by the engine on publish/remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdCid(pub String);

/// The fixed metadata envelope attached to every advertisement: this system
/// only ever advertises bitswap-retrievable content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    pub bitswap: Bitswap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitswap;

impl Metadata {
    pub fn default_bitswap() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine's advertisement chain already has an entry for this
    /// context ID that our ledger does not know about.
    #[error("an advertisement for this context ID already exists")]
    AlreadyAdvertised,
    #[error("engine error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Abstract publishing engine: signs advertisements, gossips them over the
/// indexer protocol, and serves pull requests by invoking a registered
/// multihash lister.
#[async_trait]
pub trait PublishingEngine: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;

    async fn notify_put(
        &self,
        addr_info: &AddrInfo,
        context_id: &[u8],
        metadata: Metadata,
    ) -> Result<AdCid, EngineError>;

    async fn notify_remove(
        &self,
        peer_id: libp2p_identity::PeerId,
        context_id: &[u8],
    ) -> Result<AdCid, EngineError>;

    /// Registers the handler the engine invokes to serve a pull request for
    /// a given context ID. Called once, during startup wiring, before
    /// `start`.
    async fn register_multihash_lister(
        &self,
        lister: Arc<dyn MultihashLister>,
    ) -> Result<(), EngineError>;

    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// Invoked by the engine on a pull request, on its own call stack,
/// concurrently with the reconciliation loop and with other pulls.
#[async_trait]
pub trait MultihashLister: Send + Sync {
    async fn list(
        &self,
        peer_id: libp2p_identity::PeerId,
        context_id: &[u8],
    ) -> Result<MultihashIter, anyhow::Error>;
}

/// A [`PublishingEngine`] that performs no network or disk I/O of its own: it
/// logs every call and hands back a deterministic, content-derived
/// advertisement CID. This stands in for the real indexer-protocol engine
/// (an external, signing, gossiping process) until one is wired in; it is
/// useful for local runs and staging environments where no indexer
/// connection is configured.
pub mod logging {
    use super::*;

    #[derive(Default)]
    pub struct LoggingEngine {
        lister: std::sync::Mutex<Option<Arc<dyn MultihashLister>>>,
    }

    impl LoggingEngine {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PublishingEngine for LoggingEngine {
        async fn start(&self) -> Result<(), EngineError> {
            tracing::info!("logging engine started (no indexer connection configured)");
            Ok(())
        }

        async fn notify_put(
            &self,
            addr_info: &AddrInfo,
            context_id: &[u8],
            _metadata: Metadata,
        ) -> Result<AdCid, EngineError> {
            tracing::info!(
                peer_id = %addr_info.peer_id,
                context_id = %hex_encode(context_id),
                "notify_put"
            );
            Ok(AdCid(format!("synthetic-{}", hex_encode(context_id))))
        }

        async fn notify_remove(
            &self,
            peer_id: libp2p_identity::PeerId,
            context_id: &[u8],
        ) -> Result<AdCid, EngineError> {
            tracing::info!(%peer_id, context_id = %hex_encode(context_id), "notify_remove");
            Ok(AdCid(format!("synthetic-{}", hex_encode(context_id))))
        }

        async fn register_multihash_lister(
            &self,
            lister: Arc<dyn MultihashLister>,
        ) -> Result<(), EngineError> {
            tracing::info!("multihash lister registered (no indexer connection to serve pulls with it)");
            *self.lister.lock().unwrap() = Some(lister);
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), EngineError> {
            tracing::info!("logging engine shut down");
            Ok(())
        }
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Decodes the context ID and streams the window's multihashes from the
/// database. Registered with the engine as its multihash lister.
pub struct DbMultihashLister {
    pool: sqlx::PgPool,
}

impl DbMultihashLister {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MultihashLister for DbMultihashLister {
    #[tracing::instrument(skip(self), fields(peer_id = %peer_id))]
    async fn list(
        &self,
        peer_id: libp2p_identity::PeerId,
        context_id: &[u8],
    ) -> Result<MultihashIter, anyhow::Error> {
        let parts = crate::context_id::decode(context_id)?;
        if parts.peer != peer_id {
            tracing::warn!(
                encoded = %parts.peer,
                requested = %peer_id,
                "pull request peer ID does not match context ID's encoded peer"
            );
        }

        tracing::info!(first = parts.first, count = parts.count, "received pull request");
        Ok(MultihashIter::open(&self.pool, parts.first, parts.count).await?)
    }
}
