//! Peer-registry related types.

use crate::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// What a connected full node peer told us about itself during the
/// handshake, plus its latest head announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The peer identity.
    pub id: PeerId,

    /// The address the peer was dialed at, if we dialed it.
    pub addr: Option<PeerAddr>,

    /// The retrieval protocol version the peer speaks.
    pub protocol_version: u32,

    /// The request kinds the peer is willing to serve.
    pub serves: HashSet<RequestKind>,

    /// The latest head the peer announced.
    pub head: HeadInfo,
}

impl PeerInfo {
    /// Can this peer serve the request at all?
    ///
    /// Checks the announced capability, the head and the protocol version.
    /// It says nothing about whether the peer has capacity right now.
    pub fn can_serve(&self, request: &Request) -> bool {
        let kind = request.kind();
        self.serves.contains(&kind)
            && self.protocol_version >= kind.min_protocol_version()
            && self.head.number >= request.min_head()
    }
}

/// A point-in-time view of a registered peer.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    /// The peer info.
    pub info: PeerInfo,

    /// The current score in `0.0..=1.0`. Higher is better.
    pub score: f64,

    /// The smoothed response latency.
    pub latency: Duration,

    /// How many requests are currently outstanding at this peer.
    pub in_flight: usize,
}

/// The outcome of one request dispatched to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    /// The peer answered with data that verified.
    Success {
        /// How long the peer took to answer.
        latency: Duration,
    },

    /// The peer did not answer in time.
    Timeout,

    /// The peer answered with data that failed verification.
    InvalidProof,

    /// The peer explicitly declined to serve the request.
    CannotServe,

    /// The request could not be delivered to the peer.
    Failed,

    /// We stopped waiting for reasons unrelated to the peer.
    /// This only releases the in-flight slot.
    Abandoned,
}

/// Why a peer left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// The transport reported the peer gone.
    Disconnected,

    /// The registry dropped the peer for misbehaviour or a poor score.
    Evicted,
}

/// Receives registry change notifications.
///
/// Handlers are always invoked outside of any registry lock, so they may
/// call back into the registry.
pub trait PeerEventHandler: 'static + Send + Sync + std::fmt::Debug {
    /// A peer was registered.
    fn peer_registered(&self, info: &PeerInfo) {
        let _ = info;
    }

    /// A peer was removed.
    fn peer_removed(&self, info: &PeerInfo, reason: RemoveReason) {
        let _ = (info, reason);
    }

    /// A peer announced a new head or finished a request, so it may now
    /// be eligible for more work.
    fn peer_updated(&self, peer: &PeerId) {
        let _ = peer;
    }
}

/// Trait-object [PeerEventHandler].
pub type DynPeerEventHandler = Arc<dyn PeerEventHandler>;

/// Tracks the set of currently connected full node peers along with their
/// capabilities, score and load.
pub trait PeerRegistry: 'static + Send + Sync + std::fmt::Debug {
    /// Register a newly connected peer. Registering a known peer replaces
    /// its info but keeps its statistics.
    fn register(&self, info: PeerInfo);

    /// Remove a peer that disconnected.
    fn unregister(&self, peer: &PeerId);

    /// Record a head announcement.
    fn announce_head(&self, peer: &PeerId, head: HeadInfo);

    /// Get a snapshot of a single peer.
    fn get(&self, peer: &PeerId) -> Option<PeerSnapshot>;

    /// Get up to `limit` peers accepted by `filter`, best first.
    fn best_peers(
        &self,
        filter: &dyn Fn(&PeerInfo) -> bool,
        limit: usize,
    ) -> Vec<PeerSnapshot>;

    /// Reserve an in-flight slot at a peer. Returns false if the peer is
    /// unknown or already has `max_in_flight` outstanding requests.
    fn try_begin_request(&self, peer: &PeerId, max_in_flight: usize) -> bool;

    /// Release the in-flight slot reserved with [PeerRegistry::try_begin_request]
    /// and feed the outcome into the peer's score.
    fn record_outcome(&self, peer: &PeerId, outcome: PeerOutcome);

    /// Register a change notification handler.
    fn register_handler(&self, handler: DynPeerEventHandler);

    /// The number of registered peers.
    fn len(&self) -> usize;

    /// True if no peer is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait-object [PeerRegistry].
pub type DynPeerRegistry = Arc<dyn PeerRegistry>;

/// A factory for constructing [PeerRegistry] instances.
pub trait PeerRegistryFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> LodrResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> LodrResult<()>;

    /// Construct a peer registry instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, LodrResult<DynPeerRegistry>>;
}

/// Trait-object [PeerRegistryFactory].
pub type DynPeerRegistryFactory = Arc<dyn PeerRegistryFactory>;
