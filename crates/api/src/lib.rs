#![deny(missing_docs)]
//! LODR API contains the light client retrieval module traits and the basic
//! types required to define the api of those traits.
//!
//! A light client holds block headers and a handful of trusted section roots
//! only. Everything else is fetched on demand from full node peers and is
//! verified against one of those trusted roots before it is handed out.
//!
//! If you want to use the retrieval core itself, please see the lodr_core
//! crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub(crate) mod serde_bytes_base64 {
    pub fn serialize<S>(
        b: &bytes::Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::prelude::*;
        serializer.serialize_str(&BASE64_URL_SAFE_NO_PAD.encode(b))
    }

    pub fn deserialize<'de, D, T: From<bytes::Bytes>>(
        deserializer: D,
    ) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use base64::prelude::*;
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        BASE64_URL_SAFE_NO_PAD
            .decode(s)
            .map(|v| bytes::Bytes::copy_from_slice(&v).into())
            .map_err(serde::de::Error::custom)
    }
}

pub mod builder;
pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::{Hash, PeerAddr, PeerId, RequestId};

mod chain;
pub use chain::*;

pub mod trie;

pub mod protocol;

mod request;
pub use request::*;

pub mod peer_registry;
pub use peer_registry::*;

pub mod server_pool;
pub use server_pool::*;

pub mod transport;
pub use transport::*;

pub mod indexer;
pub use indexer::*;

pub mod item_store;
pub use item_store::*;

pub mod odr;
pub use odr::*;

/// The caller-side cancellation signal accepted by every retrieval.
pub use tokio_util::sync::CancellationToken;
