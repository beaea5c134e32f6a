//! Context-ID codec.
//!
//! Binds a peer identity to a batch window in a byte string the engine
//! treats as opaque. The wire shape is a compatibility contract with
//! previously published advertisements and must stay bit-exact: bytes
//! `[0..8)` are `first` big-endian, `[8..16)` are `count` big-endian, and
//! the remainder is the peer ID's binary form. There is no length prefix.

use libp2p_identity::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("context ID is {0} bytes, must be at least 16")]
    TooShort(usize),
    #[error("failed to decode peer ID from context ID suffix")]
    InvalidPeerId(#[from] libp2p_identity::ParseError),
}

/// The decoded parts of a context ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextIdParts {
    pub peer: PeerId,
    pub first: u64,
    pub count: u64,
}

/// Encodes `(peer, first, count)` into its wire form. Fails only if the peer
/// ID cannot be marshaled, which does not happen for any `PeerId` obtained
/// through this crate's public-key decoding path.
pub fn encode(peer: PeerId, first: u64, count: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + 42);
    buf.extend_from_slice(&first.to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(&peer.to_bytes());
    buf
}

/// Decodes a context ID produced by [`encode`].
pub fn decode(context_id: &[u8]) -> Result<ContextIdParts, Error> {
    if context_id.len() < 16 {
        return Err(Error::TooShort(context_id.len()));
    }

    let first = u64::from_be_bytes(context_id[0..8].try_into().unwrap());
    let count = u64::from_be_bytes(context_id[8..16].try_into().unwrap());
    let peer = PeerId::from_bytes(&context_id[16..])?;

    Ok(ContextIdParts { peer, first, count })
}
