//! A chain indexer backed by a map of section roots.

use super::MemChain;
use lodr_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The core stub chain indexer.
/// This is NOT a production module. It is for testing only.
/// It knows exactly the roots it was given.
#[derive(Debug, Default)]
pub struct MemChainIndexer(Mutex<HashMap<(HelperTrieKind, u64), TrustedRoot>>);

impl MemChainIndexer {
    /// Construct an indexer that knows no roots.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Construct an indexer with confirmed roots for every complete
    /// section of `chain`.
    pub fn from_chain(chain: &MemChain) -> Arc<Self> {
        let out = Self::create();
        for section in 0..chain.sections() {
            if let Some(root) = chain.cht_root(section) {
                out.set_root(HelperTrieKind::Cht, section, root, true);
            }
            if let Some(root) = chain.bloom_trie_root(section) {
                out.set_root(HelperTrieKind::BloomTrie, section, root, true);
            }
        }
        out
    }

    /// Set or replace the root of one section.
    pub fn set_root(
        &self,
        kind: HelperTrieKind,
        section: u64,
        root: Hash,
        confirmed: bool,
    ) {
        self.0.lock().unwrap().insert(
            (kind, section),
            TrustedRoot {
                section,
                root,
                confirmed,
            },
        );
    }
}

impl ChainIndexer for MemChainIndexer {
    fn trusted_root(
        &self,
        kind: HelperTrieKind,
        section: u64,
    ) -> BoxFut<'_, LodrResult<Option<TrustedRoot>>> {
        let out = self.0.lock().unwrap().get(&(kind, section)).copied();
        Box::pin(async move { Ok(out) })
    }
}
