//! The core on-demand retrieval module.
//!
//! Turns a caller's [Query] into a [Request] bound to a trusted root,
//! answers it from the verified item store when possible, and otherwise
//! hands it to the retrieve manager, which fetches it from peers through
//! the request distributor.
//!
//! Header-bound queries take their root straight from the header the caller
//! already trusts. Helper trie queries (canonical headers and bloom bits of
//! old sections) look up the section root at the chain indexer, and fail
//! with [LodrError::NoTrustedRoot] without any network traffic if the
//! indexer has no confirmed root yet.

use distributor::{Distributor, WakeOnChange};
use lodr_api::*;
use retrieve::RetrieveManager;
use router::ReplyRouter;
use std::sync::Arc;

mod distributor;
mod retrieve;
mod router;
mod verify;

/// CoreOdr configuration types.
pub mod config {
    /// Configuration parameters for [CoreOdrFactory](super::CoreOdrFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct CoreOdrConfig {
        /// Base time a peer gets to answer, scaled per request kind.
        /// Default: 3s.
        pub request_timeout_ms: u32,

        /// Maximum number of outstanding requests per peer. Default: 4.
        pub max_in_flight_per_peer: usize,

        /// How long a request that ran out of untried peers waits for a
        /// new eligible peer before giving up. Default: 1s.
        pub peer_wait_grace_ms: u32,

        /// Blocks per canonical hash trie section. Default: 32768.
        pub cht_section_size: u64,

        /// Blocks per bloom trie section. Default: 32768.
        pub bloom_trie_section_size: u64,
    }

    impl Default for CoreOdrConfig {
        fn default() -> Self {
            Self {
                request_timeout_ms: 3_000,
                max_in_flight_per_peer: 4,
                peer_wait_grace_ms: 1_000,
                cht_section_size: 32_768,
                bloom_trie_section_size: 32_768,
            }
        }
    }

    impl CoreOdrConfig {
        /// The base request timeout as a [std::time::Duration].
        pub fn request_timeout(&self) -> std::time::Duration {
            std::time::Duration::from_millis(self.request_timeout_ms as u64)
        }

        /// The peer wait grace as a [std::time::Duration].
        pub fn peer_wait_grace(&self) -> std::time::Duration {
            std::time::Duration::from_millis(self.peer_wait_grace_ms as u64)
        }
    }

    /// Module-level configuration for CoreOdr.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct CoreOdrModConfig {
        /// CoreOdr configuration.
        pub core_odr: CoreOdrConfig,
    }
}

pub use config::*;

/// A production-ready odr module.
#[derive(Debug)]
pub struct CoreOdrFactory {}

impl CoreOdrFactory {
    /// Construct a new CoreOdrFactory.
    pub fn create() -> DynOdrFactory {
        Arc::new(Self {})
    }
}

impl OdrFactory for CoreOdrFactory {
    fn default_config(&self, config: &mut lodr_api::config::Config) -> LodrResult<()> {
        config.set_module_config(&CoreOdrModConfig::default())?;
        Ok(())
    }

    fn validate_config(&self, config: &lodr_api::config::Config) -> LodrResult<()> {
        let config: CoreOdrModConfig = config.get_module_config()?;
        let config = config.core_odr;
        if config.request_timeout_ms == 0 {
            return Err(LodrError::other(
                "coreOdr.requestTimeoutMs must be positive",
            ));
        }
        if config.max_in_flight_per_peer == 0 {
            return Err(LodrError::other(
                "coreOdr.maxInFlightPerPeer must be positive",
            ));
        }
        if config.cht_section_size == 0 || config.bloom_trie_section_size == 0 {
            return Err(LodrError::other(
                "coreOdr section sizes must be positive",
            ));
        }
        Ok(())
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
        peer_registry: DynPeerRegistry,
        server_pool: DynServerPool,
        item_store: DynItemStore,
        transport: DynTransport,
        indexer: DynChainIndexer,
    ) -> BoxFut<'static, LodrResult<DynOdr>> {
        Box::pin(async move {
            let config: CoreOdrModConfig =
                builder.config.get_module_config()?;
            let out: DynOdr = Arc::new(CoreOdr::new(
                config.core_odr,
                peer_registry,
                server_pool,
                item_store,
                transport,
                indexer,
            ));
            Ok(out)
        })
    }
}

/// Keeps the server pool informed about peers coming and going.
#[derive(Debug)]
struct PoolFeed(DynServerPool);

impl PeerEventHandler for PoolFeed {
    fn peer_registered(&self, info: &PeerInfo) {
        if let Some(addr) = &info.addr {
            self.0.connected(addr);
        }
    }

    fn peer_removed(&self, info: &PeerInfo, reason: RemoveReason) {
        if let Some(addr) = &info.addr {
            self.0.disconnected(addr, reason == RemoveReason::Evicted);
        }
    }
}

#[derive(Debug)]
struct CoreOdr {
    config: CoreOdrConfig,
    manager: Arc<RetrieveManager>,
    indexer: DynChainIndexer,
}

impl CoreOdr {
    fn new(
        config: CoreOdrConfig,
        peer_registry: DynPeerRegistry,
        server_pool: DynServerPool,
        item_store: DynItemStore,
        transport: DynTransport,
        indexer: DynChainIndexer,
    ) -> Self {
        let router = Arc::new(ReplyRouter::default());
        transport.register_handler(router.clone());
        peer_registry.register_handler(router.clone());

        let (wake, wake_recv) = WakeOnChange::new();
        peer_registry.register_handler(Arc::new(wake));
        peer_registry.register_handler(Arc::new(PoolFeed(server_pool)));

        let dist = Arc::new(Distributor::new(
            peer_registry,
            transport,
            router,
            wake_recv,
            config.max_in_flight_per_peer,
            config.request_timeout(),
        ));
        let manager = Arc::new(RetrieveManager::new(
            dist,
            item_store,
            config.peer_wait_grace(),
        ));

        Self {
            config,
            manager,
            indexer,
        }
    }

    async fn section_root(
        &self,
        cancel: &CancellationToken,
        kind: HelperTrieKind,
        section: u64,
    ) -> LodrResult<Hash> {
        let found = tokio::select! {
            r = self.indexer.trusted_root(kind, section) => r?,
            _ = cancel.cancelled() => return Err(LodrError::Canceled),
        };
        match found {
            Some(r) if r.confirmed && r.section == section => Ok(r.root),
            _ => Err(LodrError::NoTrustedRoot { kind, section }),
        }
    }

    /// Bind a query to the trusted root it will be verified against.
    async fn to_request(
        &self,
        cancel: &CancellationToken,
        query: &Query,
    ) -> LodrResult<Request> {
        Ok(match query {
            Query::Headers {
                anchor,
                anchor_number,
                count,
            } => {
                // every count fits below the top block
                let available = anchor_number.saturating_add(1);
                if *count == 0 || *count > available {
                    return Err(LodrError::other(format!(
                        "invalid header range: {count} headers ending at {anchor_number}"
                    )));
                }
                Request::HeaderRange {
                    anchor: *anchor,
                    anchor_number: *anchor_number,
                    count: *count,
                }
            }
            Query::Body(header) => Request::Body {
                block_hash: header.hash(),
                block_number: header.number,
                transactions_root: header.transactions_root,
                ommers_hash: header.ommers_hash,
            },
            Query::Receipts(header) => Request::Receipts {
                block_hash: header.hash(),
                block_number: header.number,
                receipts_root: header.receipts_root,
            },
            Query::Account { header, key } => Request::StateProof {
                block_hash: header.hash(),
                block_number: header.number,
                root: header.state_root,
                key: key.clone(),
            },
            Query::Storage {
                header,
                storage_root,
                key,
            } => Request::StateProof {
                block_hash: header.hash(),
                block_number: header.number,
                root: *storage_root,
                key: key.clone(),
            },
            Query::Code { header, code_hash } => Request::Code {
                block_hash: header.hash(),
                block_number: header.number,
                code_hash: *code_hash,
            },
            Query::CanonicalHeader { number } => {
                let size = self.config.cht_section_size;
                let section = number / size;
                let min_head = section_end(section, size)?;
                let root = self
                    .section_root(cancel, HelperTrieKind::Cht, section)
                    .await?;
                Request::HelperTrieProof {
                    kind: HelperTrieKind::Cht,
                    section,
                    root,
                    key: cht_key(*number),
                    min_head,
                }
            }
            Query::BloomBits { bit, section } => {
                let size = self.config.bloom_trie_section_size;
                let min_head = section_end(*section, size)?;
                let root = self
                    .section_root(cancel, HelperTrieKind::BloomTrie, *section)
                    .await?;
                Request::HelperTrieProof {
                    kind: HelperTrieKind::BloomTrie,
                    section: *section,
                    root,
                    key: bloom_trie_key(*bit, *section),
                    min_head,
                }
            }
        })
    }
}

/// The last block number of `section`.
fn section_end(section: u64, size: u64) -> LodrResult<u64> {
    section
        .checked_add(1)
        .and_then(|n| n.checked_mul(size))
        .map(|n| n - 1)
        .ok_or_else(|| {
            LodrError::other(format!(
                "section {section} of size {size} is past the last block"
            ))
        })
}

impl Odr for CoreOdr {
    fn retrieve(
        &self,
        cancel: CancellationToken,
        query: Query,
    ) -> BoxFut<'_, LodrResult<Verified>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(LodrError::Canceled);
            }

            if let Query::Code { code_hash, .. } = &query {
                if *code_hash == Hash::digest(b"") {
                    return Ok(Verified::Code(bytes::Bytes::new()));
                }
            }

            let request = self.to_request(&cancel, &query).await?;
            self.manager.retrieve(cancel, request, verify::verify).await
        })
    }
}

#[cfg(test)]
mod test;
