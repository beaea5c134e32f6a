//! The reconciliation loop: the stateful engine that diffs the current set
//! of content batches against the set of previously published
//! advertisements and issues the minimal publish/remove/re-publish sequence
//! needed to converge.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libp2p_identity::PeerId;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::{EngineError, Metadata, PublishingEngine};
use crate::ledger::{self, Ledger};
use crate::registry::{self, Registry};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Watermark(#[from] sqlx::Error),
    #[error(transparent)]
    Registry(#[from] registry::Error),
    #[error(transparent)]
    Ledger(#[from] ledger::Error),
}

/// The highest object ID currently present in `objects`, fetched once per
/// tick. Abstracted so that the reconciliation algorithm can be exercised
/// without a database.
#[async_trait]
pub trait WatermarkSource: Send + Sync {
    async fn high_watermark(&self) -> Result<Option<u64>, sqlx::Error>;
}

pub struct PgWatermarkSource {
    pool: sqlx::PgPool,
}

impl PgWatermarkSource {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkSource for PgWatermarkSource {
    async fn high_watermark(&self) -> Result<Option<u64>, sqlx::Error> {
        publisher_sql::objects::fetch_high_watermark(&self.pool).await
    }
}

/// Ticker-driven controller that, for each live peer and each batch window
/// up to the current watermark, diffs ledger vs desired state and drives
/// the engine accordingly. No two ticks run concurrently by construction:
/// `run` awaits one tick to completion before waiting for the next.
pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    registry: Arc<dyn Registry>,
    watermark: Arc<dyn WatermarkSource>,
    engine: Arc<dyn PublishingEngine>,
    config: Config,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        registry: Arc<dyn Registry>,
        watermark: Arc<dyn WatermarkSource>,
        engine: Arc<dyn PublishingEngine>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            registry,
            watermark,
            engine,
            config,
        }
    }

    /// Starts the engine and then runs the ticker loop until `cancel` fires.
    /// Ticks that would overlap are dropped, not queued: a slow tick simply
    /// coalesces whatever ticks elapsed while it ran.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(err) = self.engine.start().await {
            tracing::error!(?err, "failed to start publishing engine");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.advertisement_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    tracing::info!("reconciliation loop cancelled");
                    break;
                }
            }

            tracing::info!("starting advertisement tick");
            if let Err(err) = self.tick(Utc::now()).await {
                tracing::error!(?err, "reconciliation tick failed; will retry next tick");
            }
        }
    }

    /// Runs a single reconciliation tick. Errors are tick-local: the loop
    /// that drives `tick` always proceeds to the next tick regardless of
    /// what this returns.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), Error> {
        let Some(watermark) = self.watermark.high_watermark().await? else {
            tracing::info!("objects table is empty, skipping tick");
            return Ok(());
        };

        let peers = self.registry.list().await?;
        let interval = self.config.interval_chrono();

        for peer in peers {
            if !self.config.advertise_offline && !peer.is_online(now, interval) {
                tracing::debug!(handle = %peer.handle, "skipping offline autoretrieve");
                continue;
            }

            self.reconcile_peer(&peer.handle, peer.addr_info.peer_id, &peer.addr_info, watermark)
                .await;
        }

        Ok(())
    }

    async fn reconcile_peer(
        &self,
        handle: &str,
        peer_id: PeerId,
        addr_info: &registry::AddrInfo,
        watermark: u64,
    ) {
        let mut first = 0u64;
        while first <= watermark {
            let remaining = watermark - first;
            let effective_count = remaining.min(self.config.batch_size);

            if let Err(err) = self
                .reconcile_window(handle, peer_id, addr_info, first, effective_count)
                .await
            {
                tracing::error!(handle, first, error = %err, "failed to reconcile window");
            }

            first = first.saturating_add(self.config.batch_size);
            if self.config.batch_size == 0 {
                break;
            }
        }
    }

    async fn reconcile_window(
        &self,
        handle: &str,
        peer_id: PeerId,
        addr_info: &registry::AddrInfo,
        first: u64,
        effective_count: u64,
    ) -> Result<(), Error> {
        // Context IDs always encode the configured batch size, not the
        // effective count: a partially filled final window re-uses the same
        // context ID when it is later republished at a larger fill.
        let context_id = crate::context_id::encode(peer_id, first, self.config.batch_size);

        match self.ledger.find(handle, first).await? {
            None => {
                self.publish_new_window(handle, addr_info, peer_id, &context_id, first, effective_count)
                    .await
            }
            Some(entry) if entry.count == effective_count => {
                tracing::debug!(handle, first, "batch already advertised, skipping");
                Ok(())
            }
            Some(_) => {
                self.republish_window(handle, addr_info, peer_id, &context_id, first, effective_count)
                    .await
            }
        }
    }

    async fn publish_new_window(
        &self,
        handle: &str,
        addr_info: &registry::AddrInfo,
        peer_id: PeerId,
        context_id: &[u8],
        first: u64,
        effective_count: u64,
    ) -> Result<(), Error> {
        match self
            .engine
            .notify_put(addr_info, context_id, Metadata::default_bitswap())
            .await
        {
            Ok(ad_cid) => {
                tracing::info!(handle, ?ad_cid, "published new batch");
                self.ledger.put(handle, first, effective_count).await?;
                Ok(())
            }
            Err(EngineError::AlreadyAdvertised) => {
                tracing::warn!(handle, "batch was unexpectedly already advertised, removing old batch");
                if let Err(err) = self.engine.notify_remove(peer_id, context_id).await {
                    tracing::error!(handle, error = %err, "failed to remove unexpected existing advertisement");
                }

                match self
                    .engine
                    .notify_put(addr_info, context_id, Metadata::default_bitswap())
                    .await
                {
                    Ok(ad_cid) => {
                        tracing::info!(handle, ?ad_cid, "published batch after repair");
                        self.ledger.put(handle, first, effective_count).await?;
                        Ok(())
                    }
                    Err(err) => {
                        tracing::error!(handle, error = %err, "failed to publish batch after repair, skipping window");
                        Ok(())
                    }
                }
            }
            Err(err) => {
                tracing::error!(handle, error = %err, "failed to publish batch, skipping window");
                Ok(())
            }
        }
    }

    async fn republish_window(
        &self,
        handle: &str,
        addr_info: &registry::AddrInfo,
        peer_id: PeerId,
        context_id: &[u8],
        first: u64,
        effective_count: u64,
    ) -> Result<(), Error> {
        if let Err(err) = self.engine.notify_remove(peer_id, context_id).await {
            tracing::warn!(handle, error = %err, "failed to remove stale batch, re-publishing anyway");
        }

        match self
            .engine
            .notify_put(addr_info, context_id, Metadata::default_bitswap())
            .await
        {
            Ok(ad_cid) => {
                tracing::info!(handle, ?ad_cid, "updated batch with new advertisement");
                self.ledger.update(handle, first, effective_count).await?;
                Ok(())
            }
            Err(err) => {
                tracing::error!(handle, error = %err, "failed to publish updated batch, skipping window");
                Ok(())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::ledger::mock::MockLedger;
    use std::sync::Mutex;

    fn test_peer(handle: &str, last_connection: DateTime<Utc>) -> publisher_sql::AutoretrieveRow {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let encoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(keypair.public().encode_protobuf())
        };
        publisher_sql::AutoretrieveRow {
            handle: handle.to_string(),
            public_key: encoded,
            addresses: "/ip4/127.0.0.1/tcp/4001".to_string(),
            last_connection,
        }
    }

    fn reconciler(
        watermark: Option<u64>,
        peers: Vec<publisher_sql::AutoretrieveRow>,
        engine: Arc<MockEngine>,
        config: Config,
    ) -> (Arc<Reconciler>, Arc<MockLedger>) {
        let ledger = Arc::new(MockLedger::new());
        let registry = Arc::new(MockRegistry(Mutex::new(peers)));
        let watermark_source = Arc::new(MockWatermarkSource(Mutex::new(watermark)));

        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            registry,
            watermark_source,
            engine,
            config,
        ));
        (reconciler, ledger)
    }

    fn small_batch_config() -> Config {
        Config {
            batch_size: 25_000,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn fresh_start_creates_one_ledger_row_per_window() {
        let now = Utc::now();
        let peers = vec![test_peer("peer-a", now)];
        let engine = Arc::new(MockEngine::default());
        let (reconciler, ledger) = reconciler(Some(60_000), peers, engine.clone(), small_batch_config());

        reconciler.tick(now).await.unwrap();

        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[&("peer-a".to_string(), 0)], 25_000);
        assert_eq!(snapshot[&("peer-a".to_string(), 25_000)], 25_000);
        assert_eq!(snapshot[&("peer-a".to_string(), 50_000)], 10_000);
        assert_eq!(engine.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stable_retick_issues_no_calls() {
        let now = Utc::now();
        let peers = vec![test_peer("peer-a", now)];
        let engine = Arc::new(MockEngine::default());
        let (reconciler, _ledger) = reconciler(Some(60_000), peers, engine.clone(), small_batch_config());

        reconciler.tick(now).await.unwrap();
        engine.calls.lock().unwrap().clear();

        reconciler.tick(now).await.unwrap();
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn growing_watermark_updates_partial_window_and_adds_new_one() {
        let now = Utc::now();
        let peers = vec![test_peer("peer-a", now)];
        let engine = Arc::new(MockEngine::default());
        let (reconciler, ledger) = reconciler(Some(60_000), peers.clone(), engine.clone(), small_batch_config());

        reconciler.tick(now).await.unwrap();

        // Grow the watermark and re-point the registry/watermark sources.
        let registry = Arc::new(MockRegistry(Mutex::new(peers)));
        let watermark_source = Arc::new(MockWatermarkSource(Mutex::new(Some(80_000))));
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            registry,
            watermark_source,
            engine.clone(),
            small_batch_config(),
        ));
        engine.calls.lock().unwrap().clear();

        reconciler.tick(now).await.unwrap();

        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[&("peer-a".to_string(), 50_000)], 25_000);
        assert_eq!(snapshot[&("peer-a".to_string(), 75_000)], 5_000);
        // First two windows were untouched.
        assert_eq!(snapshot[&("peer-a".to_string(), 0)], 25_000);
        assert_eq!(snapshot[&("peer-a".to_string(), 25_000)], 25_000);
    }

    #[tokio::test]
    async fn offline_peer_is_skipped_by_default() {
        let now = Utc::now();
        let peers = vec![test_peer("peer-a", now - chrono::Duration::minutes(30))];
        let engine = Arc::new(MockEngine::default());
        let (reconciler, ledger) = reconciler(Some(60_000), peers, engine.clone(), small_batch_config());

        reconciler.tick(now).await.unwrap();

        assert!(engine.calls.lock().unwrap().is_empty());
        assert!(ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn already_advertised_triggers_remove_then_retry_put() {
        let now = Utc::now();
        let peers = vec![test_peer("peer-a", now)];
        let engine = Arc::new(MockEngine {
            already_advertised_once: Mutex::new(true),
            ..Default::default()
        });
        let (reconciler, ledger) = reconciler(Some(10_000), peers, engine.clone(), small_batch_config());

        reconciler.tick(now).await.unwrap();

        let calls = engine.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3, "expected put, remove, retried put: {calls:?}");
        assert!(matches!(calls[0], EngineCall::NotifyPut { .. }));
        assert!(matches!(calls[1], EngineCall::NotifyRemove { .. }));
        assert!(matches!(calls[2], EngineCall::NotifyPut { .. }));
        // All three calls refer to the same window.
        assert_eq!(call_context_id(&calls[0]), call_context_id(&calls[1]));
        assert_eq!(call_context_id(&calls[0]), call_context_id(&calls[2]));

        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot[&("peer-a".to_string(), 0)], 10_000);
    }

    fn call_context_id(call: &EngineCall) -> &[u8] {
        match call {
            EngineCall::NotifyPut { context_id } => context_id,
            EngineCall::NotifyRemove { context_id } => context_id,
        }
    }
}
