//! Server-pool related types.

use crate::*;
use std::sync::Arc;

/// Keeps track of full node addresses worth dialing.
///
/// The server pool is advisory. The networking layer asks it what to dial
/// next and reports back how that went. It never blocks a request.
pub trait ServerPool: 'static + Send + Sync + std::fmt::Debug {
    /// Add addresses learned from discovery or configuration.
    /// Already known addresses are left untouched.
    fn add_known(&self, addrs: Vec<PeerAddr>);

    /// Suggest the next address to dial, if any is dialable right now.
    /// The returned address is marked as dialing until
    /// [ServerPool::report_dial_result] is called for it.
    fn suggest(&self) -> Option<PeerAddr>;

    /// Report the result of dialing an address.
    fn report_dial_result(&self, addr: &PeerAddr, success: bool);

    /// A connection to this address was established.
    fn connected(&self, addr: &PeerAddr);

    /// A connection to this address was lost. If `evicted` is true the
    /// peer was dropped for misbehaving and is put on back-off.
    fn disconnected(&self, addr: &PeerAddr, evicted: bool);

    /// Known addresses, best first, excluding those currently on back-off.
    fn preferred(&self, limit: usize) -> Vec<PeerAddr>;
}

/// Trait-object [ServerPool].
pub type DynServerPool = Arc<dyn ServerPool>;

/// A factory for constructing [ServerPool] instances.
pub trait ServerPoolFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> LodrResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> LodrResult<()>;

    /// Construct a server pool instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, LodrResult<DynServerPool>>;
}

/// Trait-object [ServerPoolFactory].
pub type DynServerPoolFactory = Arc<dyn ServerPoolFactory>;
