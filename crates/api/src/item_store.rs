//! Verified item store related types.

use crate::*;
use std::sync::Arc;

/// A bounded store of items that already passed verification.
pub trait ItemStore: 'static + Send + Sync + std::fmt::Debug {
    /// Get a verified item.
    fn get(&self, key: &RequestKey) -> Option<Verified>;

    /// Store a verified item, possibly evicting older ones.
    fn put(&self, key: RequestKey, item: Verified);

    /// The number of stored items.
    fn len(&self) -> usize;

    /// True if the store holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait-object [ItemStore].
pub type DynItemStore = Arc<dyn ItemStore>;

/// A factory for constructing [ItemStore] instances.
pub trait ItemStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> LodrResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> LodrResult<()>;

    /// Construct an item store instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, LodrResult<DynItemStore>>;
}

/// Trait-object [ItemStoreFactory].
pub type DynItemStoreFactory = Arc<dyn ItemStoreFactory>;
