//! Test utilities associated with ids.

use bytes::Bytes;
use lodr_api::{Hash, PeerAddr, PeerId};

use crate::random_bytes;

/// Create a random hash.
pub fn random_hash() -> Hash {
    let mut out = [0; 32];
    out.copy_from_slice(&random_bytes(32));
    Hash(out)
}

/// Create a random peer id.
pub fn random_peer_id() -> PeerId {
    PeerId(Bytes::from(random_bytes(32)))
}

/// Create a random peer address.
pub fn random_peer_addr() -> PeerAddr {
    PeerAddr::from(format!("mem://{}", random_peer_id()))
}
