//! Types dealing with data identity or hashing.

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

/// A 32 byte sha2-256 digest.
///
/// Block hashes, trie node hashes, and every trusted root are [Hash]es.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Hash(pub [u8; 32]);

imp_deref!(Hash, [u8; 32]);
imp_from!(Hash, [u8; 32], b => Hash(b));

impl Hash {
    /// The all-zero hash.
    pub const ZERO: Hash = Hash([0; 32]);

    /// Digest arbitrary bytes.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        use sha2::{Digest, Sha256};
        Self(Sha256::digest(data.as_ref()).into())
    }

    /// Parse a hash from a byte slice that must be exactly 32 bytes long.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let out: [u8; 32] = data.try_into().ok()?;
        Some(Self(out))
    }

    /// Copy into an owned [bytes::Bytes].
    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(&self.0)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("0x")?;
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the first 4 bytes are plenty to tell hashes apart in logs
        f.write_str("Hash(0x")?;
        for b in self.0[..4].iter() {
            write!(f, "{b:02x}")?;
        }
        f.write_str("..)")
    }
}

/// Identifies a connected full node peer.
///
/// The bytes are whatever the transport uses as the peer's identity,
/// usually a public key. They are opaque to the retrieval core.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PeerId(
    #[serde(with = "crate::serde_bytes_base64")] pub bytes::Bytes,
);

imp_deref!(PeerId, bytes::Bytes);
imp_from!(PeerId, bytes::Bytes, b => PeerId(b));

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use base64::prelude::*;
        f.write_str(&BASE64_URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeerId(")?;
        std::fmt::Display::fmt(self, f)?;
        f.write_str(")")
    }
}

/// A dialable network address of a (potential) full node peer.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PeerAddr(pub std::sync::Arc<str>);

imp_deref!(PeerAddr, str);

impl From<&str> for PeerAddr {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for PeerAddr {
    fn from(s: String) -> Self {
        Self(s.into_boxed_str().into())
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerAddr({})", &self.0)
    }
}

/// Correlates a reply with the request that was dispatched to a peer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RequestId(pub u64);

imp_from!(RequestId, u64, v => RequestId(v));

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
