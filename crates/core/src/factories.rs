//! Factories for generating instances of lodr modules.

pub mod mem_peer_registry;
pub use mem_peer_registry::MemPeerRegistryFactory;

pub mod core_server_pool;
pub use core_server_pool::CoreServerPoolFactory;

pub mod mem_item_store;
pub use mem_item_store::MemItemStoreFactory;

pub mod core_odr;
pub use core_odr::CoreOdrFactory;

mod mem_chain;
pub use mem_chain::*;

mod mem_transport;
pub use mem_transport::*;

mod mem_chain_indexer;
pub use mem_chain_indexer::*;
