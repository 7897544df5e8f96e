#![deny(missing_docs)]
//! Light client on-demand retrieval core.
//!
//! Provides the production modules behind the lodr_api traits (peer
//! registry, server pool, verified item store and the retrieval entry
//! point) as well as in-memory stand-ins for the transport, the chain
//! indexer and a full node's chain for testing.

use lodr_api::{builder::Builder, config::Config};

/// Construct a production-ready default builder.
///
/// - `peer_registry` - The default peer registry is
///   [factories::MemPeerRegistryFactory].
/// - `server_pool` - The default server pool is
///   [factories::CoreServerPoolFactory].
/// - `item_store` - The default item store is
///   [factories::MemItemStoreFactory].
/// - `odr` - The default odr module is [factories::CoreOdrFactory].
pub fn default_builder() -> Builder {
    Builder {
        config: Config::default(),
        peer_registry: factories::MemPeerRegistryFactory::create(),
        server_pool: factories::CoreServerPoolFactory::create(),
        item_store: factories::MemItemStoreFactory::create(),
        odr: factories::CoreOdrFactory::create(),
    }
}

pub mod factories;
