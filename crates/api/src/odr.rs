//! On-demand retrieval related types.
//!
//! The [Odr] module is the entry point of the retrieval core. Callers
//! describe what they want in terms of data they already trust (a header,
//! a block number covered by a trusted section root) and receive data that
//! was proven against that trust, or an error.

use crate::*;
use bytes::Bytes;
use std::sync::Arc;

/// What a caller wants to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// `count` headers ending at a trusted header hash.
    Headers {
        /// Hash of the last header, already trusted by the caller.
        anchor: Hash,
        /// Number of the last header.
        anchor_number: u64,
        /// How many headers.
        count: u64,
    },

    /// The body of a trusted header's block.
    Body(Header),

    /// The receipts of a trusted header's block.
    Receipts(Header),

    /// A value of the state trie at a trusted header.
    Account {
        /// The trusted header.
        header: Header,
        /// The state trie key.
        key: Bytes,
    },

    /// A value of a contract storage trie at a trusted header.
    Storage {
        /// The trusted header.
        header: Header,
        /// The storage root, taken from an already verified account.
        storage_root: Hash,
        /// The storage trie key.
        key: Bytes,
    },

    /// Contract code at a trusted header.
    Code {
        /// The trusted header.
        header: Header,
        /// The code hash, taken from an already verified account.
        code_hash: Hash,
    },

    /// The canonical header at a block number older than the local header
    /// chain, proven through a canonical hash trie section.
    CanonicalHeader {
        /// The block number.
        number: u64,
    },

    /// Compressed bloom bits of one bloom bit index for one section,
    /// proven through a bloom trie section.
    BloomBits {
        /// The bloom bit index.
        bit: u16,
        /// The bloom bits section index.
        section: u64,
    },
}

fn unexpected(v: Verified) -> LodrError {
    LodrError::other(format!("unexpected verified item: {v:?}"))
}

/// Retrieves and verifies data on demand from full node peers.
pub trait Odr: 'static + Send + Sync + std::fmt::Debug {
    /// Retrieve the data described by `query`.
    ///
    /// Concurrent identical queries share a single network request. If the
    /// `cancel` token fires, only this caller stops waiting.
    fn retrieve(
        &self,
        cancel: CancellationToken,
        query: Query,
    ) -> BoxFut<'_, LodrResult<Verified>>;

    /// Retrieve a range of headers ending at a trusted hash.
    fn headers(
        &self,
        cancel: CancellationToken,
        anchor: Hash,
        anchor_number: u64,
        count: u64,
    ) -> BoxFut<'_, LodrResult<Vec<Header>>> {
        Box::pin(async move {
            let query = Query::Headers {
                anchor,
                anchor_number,
                count,
            };
            match self.retrieve(cancel, query).await? {
                Verified::Headers(h) => Ok(h),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve the body of a block.
    fn body(
        &self,
        cancel: CancellationToken,
        header: Header,
    ) -> BoxFut<'_, LodrResult<Body>> {
        Box::pin(async move {
            match self.retrieve(cancel, Query::Body(header)).await? {
                Verified::Body(b) => Ok(b),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve the receipts of a block.
    fn receipts(
        &self,
        cancel: CancellationToken,
        header: Header,
    ) -> BoxFut<'_, LodrResult<Vec<Bytes>>> {
        Box::pin(async move {
            match self.retrieve(cancel, Query::Receipts(header)).await? {
                Verified::Receipts(r) => Ok(r),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve an account, `None` if it provably does not exist.
    fn account(
        &self,
        cancel: CancellationToken,
        header: Header,
        key: Bytes,
    ) -> BoxFut<'_, LodrResult<Option<Bytes>>> {
        Box::pin(async move {
            match self.retrieve(cancel, Query::Account { header, key }).await?
            {
                Verified::State(v) => Ok(v),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve a storage slot, `None` if it provably does not exist.
    fn storage(
        &self,
        cancel: CancellationToken,
        header: Header,
        storage_root: Hash,
        key: Bytes,
    ) -> BoxFut<'_, LodrResult<Option<Bytes>>> {
        Box::pin(async move {
            let query = Query::Storage {
                header,
                storage_root,
                key,
            };
            match self.retrieve(cancel, query).await? {
                Verified::State(v) => Ok(v),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve contract code.
    fn code(
        &self,
        cancel: CancellationToken,
        header: Header,
        code_hash: Hash,
    ) -> BoxFut<'_, LodrResult<Bytes>> {
        Box::pin(async move {
            let query = Query::Code { header, code_hash };
            match self.retrieve(cancel, query).await? {
                Verified::Code(c) => Ok(c),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve a canonical header and its total difficulty.
    fn canonical_header(
        &self,
        cancel: CancellationToken,
        number: u64,
    ) -> BoxFut<'_, LodrResult<(Header, u128)>> {
        Box::pin(async move {
            let query = Query::CanonicalHeader { number };
            match self.retrieve(cancel, query).await? {
                Verified::CanonicalHeader {
                    header,
                    total_difficulty,
                } => Ok((header, total_difficulty)),
                oth => Err(unexpected(oth)),
            }
        })
    }

    /// Retrieve compressed bloom bits.
    fn bloom_bits(
        &self,
        cancel: CancellationToken,
        bit: u16,
        section: u64,
    ) -> BoxFut<'_, LodrResult<Bytes>> {
        Box::pin(async move {
            let query = Query::BloomBits { bit, section };
            match self.retrieve(cancel, query).await? {
                Verified::BloomBits(b) => Ok(b),
                oth => Err(unexpected(oth)),
            }
        })
    }
}

/// Trait-object [Odr].
pub type DynOdr = Arc<dyn Odr>;

/// A factory for constructing [Odr] instances.
pub trait OdrFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> LodrResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> LodrResult<()>;

    /// Construct an odr instance on top of the other modules.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        peer_registry: DynPeerRegistry,
        server_pool: DynServerPool,
        item_store: DynItemStore,
        transport: DynTransport,
        indexer: DynChainIndexer,
    ) -> BoxFut<'static, LodrResult<DynOdr>>;
}

/// Trait-object [OdrFactory].
pub type DynOdrFactory = Arc<dyn OdrFactory>;
