//! Gossip cycle planning
//!
//! Every cycle pushes, pulls, pings, dispatches and purges. Every
//! `rotate_interval` the cycle additionally refreshes our identity values
//! and resamples the push active set.

/// One step of a gossip cycle, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    /// Resample push destinations
    Rotate,
    /// Re-sign own contact info, version and node instance with a new wallclock
    RefreshIdentity,
    Push,
    /// Pull requests, plus pings to unverified pull peers
    Pull,
    /// Pings to active-set peers
    Ping,
    Dispatch,
    Purge,
}

const SLOW_CYCLE: [CyclePhase; 7] = [
    CyclePhase::Rotate,
    CyclePhase::RefreshIdentity,
    CyclePhase::Push,
    CyclePhase::Pull,
    CyclePhase::Ping,
    CyclePhase::Dispatch,
    CyclePhase::Purge,
];

const FAST_CYCLE: [CyclePhase; 5] = [
    CyclePhase::Push,
    CyclePhase::Pull,
    CyclePhase::Ping,
    CyclePhase::Dispatch,
    CyclePhase::Purge,
];

#[derive(Debug)]
pub struct GossipScheduler {
    rotate_interval: u64,
    last_rotate: Option<u64>,
    num_cycles: u64,
}

impl GossipScheduler {
    pub fn new(rotate_interval: u64) -> Self {
        Self {
            rotate_interval,
            last_rotate: None,
            num_cycles: 0,
        }
    }

    /// Phases of the cycle starting at `now`.
    pub fn plan(&mut self, now: u64) -> &'static [CyclePhase] {
        self.num_cycles += 1;
        let due = match self.last_rotate {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.rotate_interval,
        };
        if due {
            self.last_rotate = Some(now);
            &SLOW_CYCLE
        } else {
            &FAST_CYCLE
        }
    }

    pub fn num_cycles(&self) -> u64 {
        self.num_cycles
    }
}
