//! A production-ready memory-based peer registry.

use lodr_api::{config::Config, *};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// MemPeerRegistry configuration types.
mod config {
    /// Configuration parameters for [MemPeerRegistryFactory](super::MemPeerRegistryFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemPeerRegistryConfig {
        /// Weight of a new latency sample in the moving average.
        ///
        /// Default: 0.2.
        pub latency_weight: f64,

        /// Weight of a new success/failure sample in the moving error rate.
        ///
        /// Default: 0.2.
        pub error_weight: f64,

        /// The latency at which a flawless peer scores 0.5.
        ///
        /// Default: 1000ms.
        pub latency_reference_ms: u32,

        /// Peers scoring below this are evicted once they have answered
        /// at least `min_samples` requests.
        ///
        /// Default: 0.1.
        pub min_score: f64,

        /// The number of outcomes needed before a peer can be evicted for
        /// its score.
        ///
        /// Default: 4.
        pub min_samples: u32,

        /// Peers are evicted after this many invalid proofs.
        ///
        /// Default: 3.
        pub max_invalid_proofs: u32,
    }

    impl Default for MemPeerRegistryConfig {
        fn default() -> Self {
            Self {
                latency_weight: 0.2,
                error_weight: 0.2,
                latency_reference_ms: 1000,
                min_score: 0.1,
                min_samples: 4,
                max_invalid_proofs: 3,
            }
        }
    }

    /// Module-level configuration for MemPeerRegistry.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemPeerRegistryModConfig {
        /// MemPeerRegistry configuration.
        pub mem_peer_registry: MemPeerRegistryConfig,
    }
}

pub use config::*;

/// A production-ready memory-based peer registry factory.
///
/// Peers only live here while they are connected, so there is nothing
/// to persist.
#[derive(Debug)]
pub struct MemPeerRegistryFactory {}

impl MemPeerRegistryFactory {
    /// Construct a new MemPeerRegistryFactory.
    pub fn create() -> DynPeerRegistryFactory {
        let out: DynPeerRegistryFactory = Arc::new(Self {});
        out
    }
}

impl PeerRegistryFactory for MemPeerRegistryFactory {
    fn default_config(&self, config: &mut Config) -> LodrResult<()> {
        config.set_module_config(&MemPeerRegistryModConfig::default())
    }

    fn validate_config(&self, config: &Config) -> LodrResult<()> {
        let config: MemPeerRegistryModConfig = config.get_module_config()?;
        let config = config.mem_peer_registry;

        for (name, w) in [
            ("latencyWeight", config.latency_weight),
            ("errorWeight", config.error_weight),
        ] {
            if !(w > 0.0 && w <= 1.0) {
                return Err(LodrError::other(format!(
                    "memPeerRegistry.{name} must be in (0, 1], got {w}"
                )));
            }
        }

        if config.latency_reference_ms == 0 {
            return Err(LodrError::other(
                "memPeerRegistry.latencyReferenceMs must be positive",
            ));
        }

        if config.max_invalid_proofs == 0 {
            return Err(LodrError::other(
                "memPeerRegistry.maxInvalidProofs must be positive",
            ));
        }

        if !(0.0..1.0).contains(&config.min_score) {
            return Err(LodrError::other(format!(
                "memPeerRegistry.minScore must be in [0, 1), got {}",
                config.min_score
            )));
        }

        Ok(())
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, LodrResult<DynPeerRegistry>> {
        Box::pin(async move {
            let config: MemPeerRegistryModConfig =
                builder.config.get_module_config()?;
            let out: DynPeerRegistry =
                Arc::new(MemPeerRegistry::new(config.mem_peer_registry));
            Ok(out)
        })
    }
}

pub(crate) struct MemPeerRegistry {
    inner: Mutex<Inner>,
    handlers: Mutex<Vec<DynPeerEventHandler>>,
}

impl std::fmt::Debug for MemPeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPeerRegistry").finish()
    }
}

impl MemPeerRegistry {
    pub fn new(config: MemPeerRegistryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::new(config)),
            handlers: Mutex::new(Vec::new()),
        }
    }

    // never call this while holding the inner lock
    fn handlers(&self) -> Vec<DynPeerEventHandler> {
        self.handlers.lock().unwrap().clone()
    }
}

impl PeerRegistry for MemPeerRegistry {
    fn register(&self, info: PeerInfo) {
        tracing::debug!(peer = ?info.id, head = info.head.number, "register peer");
        self.inner.lock().unwrap().register(info.clone());
        for h in self.handlers() {
            h.peer_registered(&info);
        }
    }

    fn unregister(&self, peer: &PeerId) {
        let removed = self.inner.lock().unwrap().peers.remove(peer);
        if let Some(record) = removed {
            tracing::debug!(?peer, "unregister peer");
            for h in self.handlers() {
                h.peer_removed(&record.info, RemoveReason::Disconnected);
            }
        }
    }

    fn announce_head(&self, peer: &PeerId, head: HeadInfo) {
        let known = match self.inner.lock().unwrap().peers.get_mut(peer) {
            Some(record) => {
                record.info.head = head;
                true
            }
            None => false,
        };
        if known {
            tracing::trace!(?peer, head = head.number, "head announced");
            for h in self.handlers() {
                h.peer_updated(peer);
            }
        }
    }

    fn get(&self, peer: &PeerId) -> Option<PeerSnapshot> {
        let lock = self.inner.lock().unwrap();
        lock.peers.get(peer).map(|r| r.snapshot(&lock.config))
    }

    fn best_peers(
        &self,
        filter: &dyn Fn(&PeerInfo) -> bool,
        limit: usize,
    ) -> Vec<PeerSnapshot> {
        self.inner.lock().unwrap().best_peers(filter, limit)
    }

    fn try_begin_request(&self, peer: &PeerId, max_in_flight: usize) -> bool {
        match self.inner.lock().unwrap().peers.get_mut(peer) {
            Some(record) if record.in_flight < max_in_flight => {
                record.in_flight += 1;
                true
            }
            _ => false,
        }
    }

    fn record_outcome(&self, peer: &PeerId, outcome: PeerOutcome) {
        let evicted = match self.inner.lock().unwrap().record_outcome(peer, outcome)
        {
            None => return,
            Some(evicted) => evicted,
        };

        let handlers = self.handlers();
        match evicted {
            Some(info) => {
                tracing::warn!(?peer, ?outcome, "evicting peer");
                for h in handlers {
                    h.peer_removed(&info, RemoveReason::Evicted);
                }
            }
            None => {
                for h in handlers {
                    h.peer_updated(peer);
                }
            }
        }
    }

    fn register_handler(&self, handler: DynPeerEventHandler) {
        self.handlers.lock().unwrap().push(handler);
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }
}

#[derive(Debug)]
struct PeerRecord {
    info: PeerInfo,
    seq: u64,
    latency_ms: Option<f64>,
    error_rate: f64,
    samples: u32,
    invalid_proofs: u32,
    in_flight: usize,
}

impl PeerRecord {
    fn score(&self, config: &MemPeerRegistryConfig) -> f64 {
        let reference = config.latency_reference_ms as f64;
        let latency = self.latency_ms.unwrap_or(0.0);
        (1.0 - self.error_rate) * reference / (reference + latency)
    }

    fn snapshot(&self, config: &MemPeerRegistryConfig) -> PeerSnapshot {
        PeerSnapshot {
            info: self.info.clone(),
            score: self.score(config),
            latency: Duration::from_secs_f64(
                self.latency_ms.unwrap_or(0.0) / 1000.0,
            ),
            in_flight: self.in_flight,
        }
    }
}

struct Inner {
    config: MemPeerRegistryConfig,
    peers: HashMap<PeerId, PeerRecord>,
    next_seq: u64,
}

impl Inner {
    fn new(config: MemPeerRegistryConfig) -> Self {
        Self {
            config,
            peers: HashMap::new(),
            next_seq: 0,
        }
    }

    fn register(&mut self, info: PeerInfo) {
        if let Some(record) = self.peers.get_mut(&info.id) {
            record.info = info;
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.peers.insert(
            info.id.clone(),
            PeerRecord {
                info,
                seq,
                latency_ms: None,
                error_rate: 0.0,
                samples: 0,
                invalid_proofs: 0,
                in_flight: 0,
            },
        );
    }

    fn best_peers(
        &self,
        filter: &dyn Fn(&PeerInfo) -> bool,
        limit: usize,
    ) -> Vec<PeerSnapshot> {
        let mut list: Vec<(f64, u64, PeerSnapshot)> = self
            .peers
            .values()
            .filter(|r| filter(&r.info))
            .map(|r| {
                let snapshot = r.snapshot(&self.config);
                let load_adjusted =
                    snapshot.score / (1.0 + r.in_flight as f64);
                (load_adjusted, r.seq, snapshot)
            })
            .collect();

        list.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.2.latency.cmp(&b.2.latency))
                .then(a.1.cmp(&b.1))
        });

        list.into_iter().take(limit).map(|(_, _, s)| s).collect()
    }

    /// Returns `None` for unknown peers, otherwise `Some(evicted_info)`.
    fn record_outcome(
        &mut self,
        peer: &PeerId,
        outcome: PeerOutcome,
    ) -> Option<Option<PeerInfo>> {
        let config = &self.config;
        let record = self.peers.get_mut(peer)?;
        record.in_flight = record.in_flight.saturating_sub(1);

        let ew = config.error_weight;
        match outcome {
            PeerOutcome::Abandoned => return Some(None),
            PeerOutcome::Success { latency } => {
                let sample = latency.as_secs_f64() * 1000.0;
                record.latency_ms = Some(match record.latency_ms {
                    None => sample,
                    Some(l) => {
                        l * (1.0 - config.latency_weight)
                            + sample * config.latency_weight
                    }
                });
                record.error_rate *= 1.0 - ew;
            }
            PeerOutcome::InvalidProof => {
                record.invalid_proofs += 1;
                record.error_rate = record.error_rate * (1.0 - ew) + ew;
            }
            PeerOutcome::Timeout
            | PeerOutcome::CannotServe
            | PeerOutcome::Failed => {
                record.error_rate = record.error_rate * (1.0 - ew) + ew;
            }
        }
        record.samples += 1;

        let evict = record.invalid_proofs >= config.max_invalid_proofs
            || (record.samples >= config.min_samples
                && record.score(config) < config.min_score);

        if evict {
            Some(self.peers.remove(peer).map(|r| r.info))
        } else {
            Some(None)
        }
    }
}
