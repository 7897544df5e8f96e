//! Chain indexer related types.

use crate::*;
#[cfg(feature = "mockall")]
use mockall::automock;
use std::sync::Arc;

/// A helper trie section root as produced by the chain indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedRoot {
    /// The section index.
    pub section: u64,

    /// The section root.
    pub root: Hash,

    /// Only confirmed roots may be used to verify proofs.
    pub confirmed: bool,
}

/// Produces trusted helper trie section roots from the header chain.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait ChainIndexer: 'static + Send + Sync + std::fmt::Debug {
    /// The root of a helper trie section, if the indexer knows it.
    fn trusted_root(
        &self,
        kind: HelperTrieKind,
        section: u64,
    ) -> BoxFut<'_, LodrResult<Option<TrustedRoot>>>;
}

/// Trait-object [ChainIndexer].
pub type DynChainIndexer = Arc<dyn ChainIndexer>;
