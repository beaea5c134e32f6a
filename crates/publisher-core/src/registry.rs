//! Read-only view over registered autoretrieve peers.

use async_trait::async_trait;
use libp2p_identity::PeerId;
use multiaddr::Multiaddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors resolving a single peer's row into something the engine can dial.
/// These are reported and the peer is skipped for the tick; they never fail
/// the whole registry snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("invalid base64 public key: {0}")]
    InvalidPublicKeyEncoding(base64::DecodeError),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(libp2p_identity::DecodingError),
    #[error("invalid multiaddrs: {0:?}")]
    InvalidAddresses(Vec<String>),
}

/// A peer's dialable address set, as the engine needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

/// A registered autoretrieve, resolved into a dialable peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub handle: String,
    pub addr_info: AddrInfo,
    pub last_connection: chrono::DateTime<chrono::Utc>,
}

impl Peer {
    /// A peer is online if it connected within the last `interval`.
    pub fn is_online(&self, now: chrono::DateTime<chrono::Utc>, interval: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_connection) <= interval
    }
}

/// Resolves a registry row's base64 public key and comma-separated
/// multiaddrs into an [`AddrInfo`]. Any invalid multiaddr in the set reports
/// the whole peer as errored, matching the source's all-or-nothing handling.
pub fn resolve_addr_info(
    public_key_b64: &str,
    addresses: &str,
) -> Result<AddrInfo, PeerError> {
    use base64::Engine;

    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(public_key_b64)
        .map_err(PeerError::InvalidPublicKeyEncoding)?;
    let public_key =
        libp2p_identity::PublicKey::try_decode_protobuf(&key_bytes).map_err(PeerError::InvalidPublicKey)?;
    let peer_id = PeerId::from_public_key(&public_key);

    let mut parsed = Vec::new();
    let mut invalid = Vec::new();
    for addr_str in addresses.split(',') {
        match addr_str.parse::<Multiaddr>() {
            Ok(addr) => parsed.push(addr),
            Err(_) => invalid.push(addr_str.to_string()),
        }
    }
    if !invalid.is_empty() {
        return Err(PeerError::InvalidAddresses(invalid));
    }

    Ok(AddrInfo {
        peer_id,
        addresses: parsed,
    })
}

/// Resolves a single registry row into a [`Peer`], logging and returning
/// `None` on an unresolvable address — an unresolvable peer is skipped for
/// the tick, not a reason to fail the whole snapshot.
pub(crate) fn resolve_peer(row: &publisher_sql::AutoretrieveRow) -> Option<Peer> {
    match resolve_addr_info(&row.public_key, &row.addresses) {
        Ok(addr_info) => Some(Peer {
            handle: row.handle.clone(),
            addr_info,
            last_connection: row.last_connection,
        }),
        Err(err) => {
            tracing::error!(handle = %row.handle, error = %err, "failed to resolve autoretrieve address info");
            None
        }
    }
}

/// Read-only snapshot of registered autoretrieve peers.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn list(&self) -> Result<Vec<Peer>, Error>;
}

pub struct PgRegistry {
    pool: sqlx::PgPool,
}

impl PgRegistry {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Registry for PgRegistry {
    async fn list(&self) -> Result<Vec<Peer>, Error> {
        let rows = publisher_sql::autoretrieves::list(&self.pool).await?;
        Ok(rows.iter().filter_map(resolve_peer).collect())
    }
}
