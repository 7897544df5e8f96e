//! A memory-based, LRU bounded, verified item store.

use lodr_api::{config::Config, *};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// MemItemStore configuration types.
mod config {
    /// Configuration parameters for [MemItemStoreFactory](super::MemItemStoreFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemItemStoreConfig {
        /// The maximum number of items kept. The least recently used item
        /// is evicted first.
        ///
        /// Default: 4096.
        pub capacity: usize,
    }

    impl Default for MemItemStoreConfig {
        fn default() -> Self {
            Self { capacity: 4096 }
        }
    }

    /// Module-level configuration for MemItemStore.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemItemStoreModConfig {
        /// MemItemStore configuration.
        pub mem_item_store: MemItemStoreConfig,
    }
}

pub use config::*;

/// A memory-based item store factory.
#[derive(Debug)]
pub struct MemItemStoreFactory {}

impl MemItemStoreFactory {
    /// Construct a new MemItemStoreFactory.
    pub fn create() -> DynItemStoreFactory {
        let out: DynItemStoreFactory = Arc::new(Self {});
        out
    }
}

impl ItemStoreFactory for MemItemStoreFactory {
    fn default_config(&self, config: &mut Config) -> LodrResult<()> {
        config.set_module_config(&MemItemStoreModConfig::default())
    }

    fn validate_config(&self, config: &Config) -> LodrResult<()> {
        let config: MemItemStoreModConfig = config.get_module_config()?;
        if config.mem_item_store.capacity == 0 {
            return Err(LodrError::other(
                "memItemStore.capacity must be positive",
            ));
        }
        Ok(())
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, LodrResult<DynItemStore>> {
        Box::pin(async move {
            let config: MemItemStoreModConfig =
                builder.config.get_module_config()?;
            let out: DynItemStore =
                Arc::new(MemItemStore::new(config.mem_item_store)?);
            Ok(out)
        })
    }
}

struct MemItemStore(Mutex<lru::LruCache<RequestKey, Verified>>);

impl std::fmt::Debug for MemItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemItemStore")
            .field("len", &self.0.lock().unwrap().len())
            .finish()
    }
}

impl MemItemStore {
    fn new(config: MemItemStoreConfig) -> LodrResult<Self> {
        let capacity = NonZeroUsize::new(config.capacity).ok_or_else(|| {
            LodrError::other("memItemStore.capacity must be positive")
        })?;
        Ok(Self(Mutex::new(lru::LruCache::new(capacity))))
    }
}

impl ItemStore for MemItemStore {
    fn get(&self, key: &RequestKey) -> Option<Verified> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: RequestKey, item: Verified) {
        if let Some((evicted, _)) = self.0.lock().unwrap().push(key, item) {
            if evicted != key {
                tracing::trace!(%evicted, "item store evicted");
            }
        }
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
