//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general lodr builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the builder.
    pub config: config::Config,

    /// The [PeerRegistryFactory] to be used for creating
    /// [PeerRegistry] instances.
    pub peer_registry: DynPeerRegistryFactory,

    /// The [ServerPoolFactory] to be used for creating
    /// [ServerPool] instances.
    pub server_pool: DynServerPoolFactory,

    /// The [ItemStoreFactory] to be used for creating
    /// [ItemStore] instances.
    pub item_store: DynItemStoreFactory,

    /// The [OdrFactory] to be used for creating [Odr] instances.
    pub odr: DynOdrFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn with_default_config(mut self) -> LodrResult<Self> {
        {
            let Self {
                config,
                peer_registry,
                server_pool,
                item_store,
                odr,
            } = &mut self;

            peer_registry.default_config(config)?;
            server_pool.default_config(config)?;
            item_store.default_config(config)?;
            odr.default_config(config)?;
        }

        Ok(self)
    }

    /// Ask every module factory to validate the current configuration.
    pub fn validate_config(&self) -> LodrResult<()> {
        self.peer_registry.validate_config(&self.config)?;
        self.server_pool.validate_config(&self.config)?;
        self.item_store.validate_config(&self.config)?;
        self.odr.validate_config(&self.config)?;

        Ok(())
    }

    /// Freeze the builder and construct every module on top of the given
    /// transport and chain indexer.
    pub async fn build(
        self,
        transport: DynTransport,
        indexer: DynChainIndexer,
    ) -> LodrResult<LightClient> {
        self.validate_config()?;

        let builder = Arc::new(self);

        let peer_registry =
            builder.peer_registry.create(builder.clone()).await?;
        let server_pool = builder.server_pool.create(builder.clone()).await?;
        let item_store = builder.item_store.create(builder.clone()).await?;
        let odr = builder
            .odr
            .create(
                builder.clone(),
                peer_registry.clone(),
                server_pool.clone(),
                item_store.clone(),
                transport,
                indexer,
            )
            .await?;

        Ok(LightClient {
            builder,
            peer_registry,
            server_pool,
            item_store,
            odr,
        })
    }
}

/// The assembled retrieval core.
#[derive(Debug, Clone)]
pub struct LightClient {
    /// The frozen builder the modules were created from.
    pub builder: Arc<Builder>,

    /// The peer registry. The networking layer registers and unregisters
    /// peers here and forwards head announcements.
    pub peer_registry: DynPeerRegistry,

    /// The server pool. The networking layer asks it what to dial.
    pub server_pool: DynServerPool,

    /// The verified item cache.
    pub item_store: DynItemStore,

    /// The retrieval entry point.
    pub odr: DynOdr,
}
