//! Tick loop and component wiring.
//!
//! The orchestrator owns the periodic tick, fans out to the monitors the
//! configured mode enables, and dispatches every executor strictly
//! sequentially within the tick so the wallet nonce never races. A tick
//! that overruns the interval is allowed; the next one starts right
//! after. SIGINT/SIGTERM stop new ticks, let the current one finish,
//! close the subscriptions, and exit cleanly.

use std::sync::Arc;
use std::time::Duration;

use keeper_chain::{EventListener, KeeperError};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auction_monitor::AuctionMonitor;
use crate::balance::VatBalanceManager;
use crate::config::KeeperConfig;
use crate::english_auctions::{DebtMonitor, SurplusMonitor};
use crate::executor::{DebtExecutor, LiquidationExecutor, SurplusExecutor, TakeExecutor};
use crate::health::KeeperHealth;
use crate::peg::PegArbService;
use crate::price::PriceService;
use crate::time_utils::current_unix;
use crate::vault_monitor::VaultMonitor;

/// Backoff ceiling for consecutive RPC failures.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// The keeper's top-level task.
pub struct Orchestrator {
    config: KeeperConfig,
    listener: Arc<EventListener>,
    vaults: Arc<VaultMonitor>,
    auctions: Arc<AuctionMonitor>,
    surplus: Arc<SurplusMonitor>,
    debt: Arc<DebtMonitor>,
    prices: Arc<PriceService>,
    balances: Arc<VatBalanceManager>,
    liquidation_executor: LiquidationExecutor,
    take_executor: TakeExecutor,
    surplus_executor: SurplusExecutor,
    debt_executor: DebtExecutor,
    health: Arc<KeeperHealth>,
    peg: Option<Arc<PegArbService>>,
    subscription_tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        config: KeeperConfig,
        listener: Arc<EventListener>,
        vaults: Arc<VaultMonitor>,
        auctions: Arc<AuctionMonitor>,
        surplus: Arc<SurplusMonitor>,
        debt: Arc<DebtMonitor>,
        prices: Arc<PriceService>,
        balances: Arc<VatBalanceManager>,
        liquidation_executor: LiquidationExecutor,
        take_executor: TakeExecutor,
        surplus_executor: SurplusExecutor,
        debt_executor: DebtExecutor,
        health: Arc<KeeperHealth>,
        peg: Option<Arc<PegArbService>>,
    ) -> Self {
        Self {
            config,
            listener,
            vaults,
            auctions,
            surplus,
            debt,
            prices,
            balances,
            liquidation_executor,
            take_executor,
            surplus_executor,
            debt_executor,
            health,
            peg,
            subscription_tasks: Vec::new(),
        }
    }

    /// Health counters, for an embedding health endpoint.
    pub fn health(&self) -> Arc<KeeperHealth> {
        self.health.clone()
    }

    /// Hydrate state and perform one-time on-chain authorizations.
    pub async fn bootstrap(&self) -> Result<(), KeeperError> {
        info!("Bootstrapping keeper state");

        if self.config.mode.runs_kick() {
            self.vaults
                .hydrate(&self.listener, self.config.frob_lookback_blocks)
                .await?;
            self.health
                .set_monitored_vaults(self.vaults.vault_count() as u64);
        }

        // The join adapter needs Vat authorization before it can exit the
        // keeper's internal balance. Idempotent, so just send it where
        // internal balance will be spent.
        if (self.config.mode.runs_bid() || self.config.debt_bidding_enabled)
            && !self.config.emergency_stop
        {
            if let Err(e) = self.balances.authorize_join().await {
                warn!(error = %e, "vat.hope(join) failed; exits will revert until it lands");
            }
        }

        info!("Bootstrap complete");
        Ok(())
    }

    /// Spawn the subscription tasks for the enabled monitors.
    fn spawn_listeners(&mut self) {
        if self.config.mode.runs_kick() {
            let monitor = self.vaults.clone();
            let listener = self.listener.clone();
            self.subscription_tasks
                .push(tokio::spawn(monitor.run_listener(listener)));
        }
        if self.config.mode.runs_bid() {
            let monitor = self.auctions.clone();
            let listener = self.listener.clone();
            self.subscription_tasks
                .push(tokio::spawn(monitor.run_listener(listener)));
        }
        // Flap/Flop inputs (sKLC, Vat balance) are disjoint from the
        // collateral pipeline, so their monitors run in every mode.
        let monitor = self.surplus.clone();
        let listener = self.listener.clone();
        self.subscription_tasks
            .push(tokio::spawn(monitor.run_listener(listener)));
        let monitor = self.debt.clone();
        let listener = self.listener.clone();
        self.subscription_tasks
            .push(tokio::spawn(monitor.run_listener(listener)));
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.spawn_listeners();
        self.health.set_running(true);
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            mode = ?self.config.mode,
            "Keeper loop started"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        let mut consecutive_rpc_failures: u32 = 0;

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, finishing current tick");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(()) => {
                            consecutive_rpc_failures = 0;
                        }
                        Err(e) if e.is_rpc() => {
                            consecutive_rpc_failures += 1;
                            self.health.record_error();
                            let backoff = rpc_backoff(consecutive_rpc_failures);
                            error!(
                                error = %e,
                                failures = consecutive_rpc_failures,
                                backoff_secs = backoff.as_secs(),
                                "Tick failed on RPC, backing off"
                            );
                            tokio::time::sleep(backoff).await;
                        }
                        Err(e) => {
                            self.health.record_error();
                            error!(error = %e, "Tick failed");
                        }
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One tick: scans and dispatches, strictly in sequence.
    async fn tick(&self) -> Result<(), KeeperError> {
        self.health.record_tick(current_unix());

        if self.config.mode.runs_kick() {
            let opportunities = self.vaults.scan(&self.config.collaterals).await;
            self.health
                .set_monitored_vaults(self.vaults.vault_count() as u64);
            if !opportunities.is_empty() {
                info!(count = opportunities.len(), "Dispatching liquidations");
                self.liquidation_executor.dispatch(opportunities).await;
            }
        }

        if self.config.mode.runs_bid() {
            let opportunities = self
                .auctions
                .scan(&self.prices, self.config.min_profit_bps)
                .await;
            self.health
                .set_active_auctions(self.auctions.active_count() as u64);
            if !opportunities.is_empty() {
                info!(count = opportunities.len(), "Dispatching takes");
                self.take_executor.dispatch(opportunities).await;
            }
        }

        // English auctions run in every mode; the profitable input comes
        // from configuration.
        let surplus_bids = self.surplus.scan(self.config.surplus_bidding_enabled).await;
        if !surplus_bids.is_empty() {
            self.surplus_executor.dispatch(surplus_bids).await;
        }
        let debt_bids = self.debt.scan(self.config.debt_bidding_enabled).await;
        if !debt_bids.is_empty() {
            self.debt_executor.dispatch(debt_bids).await;
        }

        if self.config.mode.runs_peg() {
            if let Some(peg) = &self.peg {
                peg.check_and_arbitrage().await?;
            }
        }

        let snap = self.health.snapshot();
        info!(
            vaults = snap.monitored_vaults,
            auctions = snap.active_auctions,
            liquidations = snap.liquidations,
            bids = snap.bids,
            peg_arbs = snap.peg_arbs,
            errors = snap.errors,
            profit_gem = snap.profit_gem,
            "Tick complete"
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.health.set_running(false);
        for task in self.subscription_tasks.drain(..) {
            task.abort();
        }
        self.prices.clear_cache();
        info!("Keeper stopped cleanly");
    }
}

/// Exponential backoff for consecutive RPC failures, capped at 60 s.
fn rpc_backoff(failures: u32) -> Duration {
    let secs = 1u64
        .checked_shl(failures.min(6))
        .unwrap_or(MAX_BACKOFF.as_secs());
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(rpc_backoff(1), Duration::from_secs(2));
        assert_eq!(rpc_backoff(2), Duration::from_secs(4));
        assert_eq!(rpc_backoff(5), Duration::from_secs(32));
        assert_eq!(rpc_backoff(6), Duration::from_secs(60));
        assert_eq!(rpc_backoff(100), Duration::from_secs(60));
    }
}
