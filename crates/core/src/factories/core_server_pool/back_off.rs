use std::{
    collections::{hash_map::Entry, HashMap},
    time::{Duration, Instant},
};

use backon::BackoffBuilder;
use lodr_api::PeerAddr;

#[derive(Debug)]
pub struct BackOffList {
    pub(crate) state: HashMap<PeerAddr, BackOff>,
    first_back_off_interval_ms: u32,
    last_back_off_interval_ms: u32,
    num_back_off_intervals: usize,
}

impl BackOffList {
    pub fn new(
        first_back_off_interval_ms: u32,
        last_back_off_interval_ms: u32,
        num_back_off_intervals: usize,
    ) -> Self {
        Self {
            state: HashMap::new(),
            first_back_off_interval_ms,
            last_back_off_interval_ms,
            num_back_off_intervals,
        }
    }

    pub fn back_off(&mut self, addr: &PeerAddr) {
        match self.state.entry(addr.clone()) {
            Entry::Occupied(mut o) => {
                o.get_mut().back_off();
            }
            Entry::Vacant(v) => {
                v.insert(BackOff::new(
                    self.first_back_off_interval_ms,
                    self.last_back_off_interval_ms,
                    self.num_back_off_intervals,
                ));
            }
        }
    }

    pub fn is_on_back_off(&self, addr: &PeerAddr) -> bool {
        match self.state.get(addr) {
            Some(back_off) => back_off.is_on_back_off(),
            None => false,
        }
    }

    pub fn remove(&mut self, addr: &PeerAddr) {
        self.state.remove(addr);
    }
}

#[derive(Debug)]
pub(crate) struct BackOff {
    back_off: backon::ExponentialBackoff,
    pub(crate) current_interval: Duration,
    interval_start: Instant,
}

impl BackOff {
    pub fn new(
        first_back_off_interval_ms: u32,
        last_back_off_interval_ms: u32,
        num_back_off_intervals: usize,
    ) -> Self {
        let first = Duration::from_millis(first_back_off_interval_ms as u64);
        let mut back_off = backon::ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(first)
            .with_max_delay(Duration::from_millis(
                last_back_off_interval_ms as u64,
            ))
            .with_max_times(num_back_off_intervals)
            .build();
        let current_interval = back_off.next().unwrap_or(first);
        Self {
            back_off,
            current_interval,
            interval_start: Instant::now(),
        }
    }

    /// Start the next, longer, interval. Once the intervals are used up
    /// the last one is repeated.
    pub fn back_off(&mut self) {
        if let Some(interval) = self.back_off.next() {
            self.current_interval = interval;
        }
        self.interval_start = Instant::now();
    }

    pub fn is_on_back_off(&self) -> bool {
        self.interval_start.elapsed() < self.current_interval
    }
}
