//! Keeper health state.
//!
//! Counters are mutated by the orchestrator and executors and read by the
//! health logging loop. Everything is atomic; a snapshot is taken per tick
//! for structured logging.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::config::Mode;

/// Live health counters.
pub struct KeeperHealth {
    mode: Mode,
    running: AtomicBool,
    last_tick_unix: AtomicU64,
    monitored_vaults: AtomicU64,
    active_auctions: AtomicU64,
    liquidations: AtomicU64,
    bids: AtomicU64,
    peg_arbs: AtomicU64,
    errors: AtomicU64,
    /// Accumulated profit in gem units, scaled by 1e6 so it fits an
    /// integer counter without float CAS loops.
    profit_gem_micros: AtomicI64,
}

/// Point-in-time copy for logging.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub mode: Mode,
    pub running: bool,
    pub last_tick_unix: u64,
    pub monitored_vaults: u64,
    pub active_auctions: u64,
    pub liquidations: u64,
    pub bids: u64,
    pub peg_arbs: u64,
    pub errors: u64,
    pub profit_gem: f64,
}

impl KeeperHealth {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            running: AtomicBool::new(false),
            last_tick_unix: AtomicU64::new(0),
            monitored_vaults: AtomicU64::new(0),
            active_auctions: AtomicU64::new(0),
            liquidations: AtomicU64::new(0),
            bids: AtomicU64::new(0),
            peg_arbs: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            profit_gem_micros: AtomicI64::new(0),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn record_tick(&self, unix_now: u64) {
        self.last_tick_unix.store(unix_now, Ordering::Relaxed);
    }

    pub fn set_monitored_vaults(&self, count: u64) {
        self.monitored_vaults.store(count, Ordering::Relaxed);
    }

    pub fn set_active_auctions(&self, count: u64) {
        self.active_auctions.store(count, Ordering::Relaxed);
    }

    pub fn record_liquidation(&self) {
        self.liquidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bid(&self) {
        self.bids.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peg_arb(&self) {
        self.peg_arbs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Add realized profit in gem units. Negative deltas are recorded as
    /// is; the counter is net.
    pub fn add_profit_gem(&self, gem_units: f64) {
        let micros = (gem_units * 1e6) as i64;
        self.profit_gem_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            mode: self.mode,
            running: self.running.load(Ordering::Relaxed),
            last_tick_unix: self.last_tick_unix.load(Ordering::Relaxed),
            monitored_vaults: self.monitored_vaults.load(Ordering::Relaxed),
            active_auctions: self.active_auctions.load(Ordering::Relaxed),
            liquidations: self.liquidations.load(Ordering::Relaxed),
            bids: self.bids.load(Ordering::Relaxed),
            peg_arbs: self.peg_arbs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            profit_gem: self.profit_gem_micros.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let health = KeeperHealth::new(Mode::Full);
        health.set_running(true);
        health.record_tick(1_700_000_000);
        health.record_liquidation();
        health.record_bid();
        health.record_bid();
        health.record_error();
        health.add_profit_gem(1.25);
        health.add_profit_gem(-0.25);
        health.set_monitored_vaults(42);

        let snap = health.snapshot();
        assert!(snap.running);
        assert_eq!(snap.last_tick_unix, 1_700_000_000);
        assert_eq!(snap.liquidations, 1);
        assert_eq!(snap.bids, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.monitored_vaults, 42);
        assert!((snap.profit_gem - 1.0).abs() < 1e-9);
    }
}
