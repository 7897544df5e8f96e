//! The core server pool implementation.
//!
//! Tracks full node addresses learned from discovery, configuration, or
//! from peers that connected to us, and decides which one to dial next.
//!
//! - An address is suggested at most once at a time: suggesting it marks
//!   it as dialing until the dial result is reported.
//! - A failed dial, or a connection that ended with the peer being evicted,
//!   puts the address on an exponential back-off.
//! - After `maxConsecutiveFailures` failed dials in a row the address is
//!   forgotten.
//! - Among the dialable addresses, the one with the best dial success ratio
//!   is preferred, then the one with the most successful dials, then the
//!   one known for the longest time.

use back_off::BackOffList;
use lodr_api::{config::Config, *};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

mod back_off;

/// CoreServerPool configuration types.
pub mod config {
    /// Configuration parameters for [CoreServerPoolFactory](super::CoreServerPoolFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct CoreServerPoolConfig {
        /// Duration of the first back-off interval. Default: 5s.
        pub first_back_off_interval_ms: u32,
        /// Upper bound of a back-off interval. Default: 10min.
        pub last_back_off_interval_ms: u32,
        /// Number of growing back-off intervals. Default: 8.
        pub num_back_off_intervals: usize,
        /// Forget an address after this many failed dials in a row.
        /// Default: 12.
        pub max_consecutive_failures: u32,
    }

    impl Default for CoreServerPoolConfig {
        fn default() -> Self {
            Self {
                first_back_off_interval_ms: 5_000,
                last_back_off_interval_ms: 600_000,
                num_back_off_intervals: 8,
                max_consecutive_failures: 12,
            }
        }
    }

    /// Module-level configuration for CoreServerPool.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct CoreServerPoolModConfig {
        /// CoreServerPool configuration.
        pub core_server_pool: CoreServerPoolConfig,
    }
}

use config::*;

/// A production-ready server pool.
#[derive(Debug)]
pub struct CoreServerPoolFactory {}

impl CoreServerPoolFactory {
    /// Construct a new CoreServerPoolFactory.
    pub fn create() -> DynServerPoolFactory {
        Arc::new(Self {})
    }
}

impl ServerPoolFactory for CoreServerPoolFactory {
    fn default_config(&self, config: &mut Config) -> LodrResult<()> {
        config.set_module_config(&CoreServerPoolModConfig::default())?;
        Ok(())
    }

    fn validate_config(&self, config: &Config) -> LodrResult<()> {
        let config: CoreServerPoolModConfig = config.get_module_config()?;
        let config = config.core_server_pool;
        if config.first_back_off_interval_ms > config.last_back_off_interval_ms
        {
            return Err(LodrError::other(
                "coreServerPool.firstBackOffIntervalMs must not exceed lastBackOffIntervalMs",
            ));
        }
        if config.max_consecutive_failures == 0 {
            return Err(LodrError::other(
                "coreServerPool.maxConsecutiveFailures must be positive",
            ));
        }
        Ok(())
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, LodrResult<DynServerPool>> {
        Box::pin(async move {
            let config: CoreServerPoolModConfig =
                builder.config.get_module_config()?;
            let out: DynServerPool =
                Arc::new(CoreServerPool::new(config.core_server_pool));
            Ok(out)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Known,
    Dialing,
    Connected,
}

#[derive(Debug)]
struct Candidate {
    seq: u64,
    dial_success: u32,
    dial_failure: u32,
    consecutive_failures: u32,
    state: CandidateState,
}

impl Candidate {
    // laplace smoothed, so a fresh address sits at 0.5
    fn success_ratio(&self) -> f64 {
        (self.dial_success as f64 + 1.0)
            / ((self.dial_success + self.dial_failure) as f64 + 2.0)
    }
}

#[derive(Debug)]
struct State {
    config: CoreServerPoolConfig,
    candidates: HashMap<PeerAddr, Candidate>,
    back_off_list: BackOffList,
    next_seq: u64,
}

impl State {
    fn insert(&mut self, addr: PeerAddr) -> &mut Candidate {
        let seq = self.next_seq;
        let candidate = self.candidates.entry(addr).or_insert_with(|| {
            Candidate {
                seq,
                dial_success: 0,
                dial_failure: 0,
                consecutive_failures: 0,
                state: CandidateState::Known,
            }
        });
        if candidate.seq == seq {
            self.next_seq += 1;
        }
        candidate
    }

    fn ranked(&self, pred: impl Fn(&Candidate) -> bool) -> Vec<PeerAddr> {
        let mut list: Vec<(&PeerAddr, &Candidate)> = self
            .candidates
            .iter()
            .filter(|(a, c)| pred(*c) && !self.back_off_list.is_on_back_off(*a))
            .collect();
        list.sort_by(|(_, a), (_, b)| {
            b.success_ratio()
                .total_cmp(&a.success_ratio())
                .then(b.dial_success.cmp(&a.dial_success))
                .then(a.seq.cmp(&b.seq))
        });
        list.into_iter().map(|(a, _)| a.clone()).collect()
    }
}

#[derive(Debug)]
pub(crate) struct CoreServerPool {
    state: Mutex<State>,
}

impl CoreServerPool {
    pub fn new(config: CoreServerPoolConfig) -> Self {
        let back_off_list = BackOffList::new(
            config.first_back_off_interval_ms,
            config.last_back_off_interval_ms,
            config.num_back_off_intervals,
        );
        Self {
            state: Mutex::new(State {
                config,
                candidates: HashMap::new(),
                back_off_list,
                next_seq: 0,
            }),
        }
    }
}

impl ServerPool for CoreServerPool {
    fn add_known(&self, addrs: Vec<PeerAddr>) {
        let mut lock = self.state.lock().unwrap();
        for addr in addrs {
            lock.insert(addr);
        }
    }

    fn suggest(&self) -> Option<PeerAddr> {
        let mut lock = self.state.lock().unwrap();
        let addr = lock
            .ranked(|c| c.state == CandidateState::Known)
            .into_iter()
            .next()?;
        if let Some(c) = lock.candidates.get_mut(&addr) {
            c.state = CandidateState::Dialing;
        }
        tracing::trace!(%addr, "suggest dial");
        Some(addr)
    }

    fn report_dial_result(&self, addr: &PeerAddr, success: bool) {
        let mut lock = self.state.lock().unwrap();
        let max_failures = lock.config.max_consecutive_failures;

        let forget = {
            let c = lock.insert(addr.clone());
            if success {
                c.dial_success += 1;
                c.consecutive_failures = 0;
                c.state = CandidateState::Connected;
                false
            } else {
                c.dial_failure += 1;
                c.consecutive_failures += 1;
                c.state = CandidateState::Known;
                c.consecutive_failures >= max_failures
            }
        };

        if success {
            lock.back_off_list.remove(addr);
        } else if forget {
            tracing::debug!(%addr, "forgetting unreachable server");
            lock.candidates.remove(addr);
            lock.back_off_list.remove(addr);
        } else {
            tracing::debug!(%addr, "dial failed, backing off");
            lock.back_off_list.back_off(addr);
        }
    }

    fn connected(&self, addr: &PeerAddr) {
        let mut lock = self.state.lock().unwrap();
        lock.insert(addr.clone()).state = CandidateState::Connected;
        lock.back_off_list.remove(addr);
    }

    fn disconnected(&self, addr: &PeerAddr, evicted: bool) {
        let mut lock = self.state.lock().unwrap();
        let Some(c) = lock.candidates.get_mut(addr) else {
            return;
        };
        c.state = CandidateState::Known;
        if evicted {
            tracing::debug!(%addr, "server evicted, backing off");
            lock.back_off_list.back_off(addr);
        }
    }

    fn preferred(&self, limit: usize) -> Vec<PeerAddr> {
        let lock = self.state.lock().unwrap();
        let mut list = lock.ranked(|_| true);
        list.truncate(limit);
        list
    }
}
