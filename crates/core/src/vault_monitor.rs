//! Vault discovery and the unsafe-vault scan.
//!
//! The monitor learns vaults from `Frob` logs (historical replay at
//! startup, live subscription afterwards) and never forgets one: an
//! emptied vault can be refilled. Safety is evaluated per scan tick from
//! fresh chain reads; nothing here is cached across cycles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use dashmap::DashSet;
use futures::StreamExt;
use keeper_chain::{ChainClient, EventListener, FrobEvent, IlkState, UrnState};
use tracing::{debug, error, info, warn};

use crate::config::CollateralConfig;
use crate::math;
use crate::types::{penalty_bps_from_chop, IlkId, LiquidationOpportunity, VaultId};

/// Delay before re-subscribing after a dropped event stream.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Unsafe-vault emission rule: a vault is emitted iff it carries debt and
/// fails the safety inequality. Returns the collateralization ratio in
/// basis points.
pub fn evaluate_urn(urn: &UrnState, ilk: &IlkState) -> Option<U256> {
    if urn.art.is_zero() {
        return None;
    }
    if math::is_safe(urn.ink, urn.art, ilk.spot, ilk.rate) {
        return None;
    }
    math::collateralization_ratio_bps(urn.ink, urn.art, ilk.spot, ilk.rate)
}

/// Tracks the known vault population and emits liquidation opportunities.
pub struct VaultMonitor {
    client: Arc<ChainClient>,
    known: DashSet<VaultId>,
    read_errors: AtomicU64,
}

impl VaultMonitor {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self {
            client,
            known: DashSet::new(),
            read_errors: AtomicU64::new(0),
        }
    }

    /// Replay `Frob` history to seed the vault set.
    pub async fn hydrate(
        &self,
        listener: &EventListener,
        lookback_blocks: u64,
    ) -> Result<(), keeper_chain::KeeperError> {
        let events = listener.hydrate_frobs(&self.client, lookback_blocks).await?;
        for event in &events {
            self.observe(event);
        }
        info!(
            vaults = self.known.len(),
            frobs = events.len(),
            "Vault set hydrated"
        );
        Ok(())
    }

    /// Record a vault sighting. Idempotent; the set only grows.
    pub fn observe(&self, event: &FrobEvent) {
        let id = VaultId {
            ilk: IlkId(event.ilk),
            urn: event.urn,
        };
        if self.known.insert(id) {
            debug!(ilk = %id.ilk, urn = %id.urn, "New vault observed");
        }
    }

    pub fn vault_count(&self) -> usize {
        self.known.len()
    }

    pub fn read_error_count(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Long-running subscription task. Reconnects forever; the set is
    /// only ever appended to, so missed windows are healed by the next
    /// restart's hydration.
    pub async fn run_listener(self: Arc<Self>, listener: Arc<EventListener>) {
        loop {
            match listener.subscribe_frobs().await {
                Ok(mut stream) => {
                    info!("Frob subscription active");
                    while let Some(event) = stream.next().await {
                        self.observe(&event);
                    }
                    warn!("Frob stream ended, reconnecting");
                }
                Err(e) => {
                    error!(error = %e, "Frob subscribe failed, retrying");
                }
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    /// One scan cycle: for each enabled collateral read the ilk and dog
    /// state once, then test every known urn of that ilk.
    ///
    /// An error on the ilk-level reads aborts that collateral (no partial
    /// emissions for it); per-urn read errors are counted and the urn is
    /// retried next tick.
    pub async fn scan(&self, collaterals: &[CollateralConfig]) -> Vec<LiquidationOpportunity> {
        let mut opportunities = Vec::new();

        for collateral in collaterals {
            let ilk_state = match self.client.ilk(collateral.ilk.tag()).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(ilk = %collateral.ilk, error = %e, "Ilk read failed, skipping collateral this tick");
                    continue;
                }
            };
            let dog_ilk = match self.client.dog_ilk(collateral.ilk.tag()).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(ilk = %collateral.ilk, error = %e, "Dog ilk read failed, skipping collateral this tick");
                    continue;
                }
            };
            let penalty_bps = penalty_bps_from_chop(dog_ilk.chop);

            let urns: Vec<VaultId> = self
                .known
                .iter()
                .filter(|v| v.ilk == collateral.ilk)
                .map(|v| *v)
                .collect();
            debug!(ilk = %collateral.ilk, urns = urns.len(), "Scanning vaults");

            for vault in urns {
                let urn = match self.client.urn(vault.ilk.tag(), vault.urn).await {
                    Ok(urn) => urn,
                    Err(e) => {
                        self.read_errors.fetch_add(1, Ordering::Relaxed);
                        debug!(urn = %vault.urn, error = %e, "Urn read failed, retrying next tick");
                        continue;
                    }
                };

                if let Some(ratio_bps) = evaluate_urn(&urn, &ilk_state) {
                    info!(
                        ilk = %vault.ilk,
                        urn = %vault.urn,
                        ratio_pct = ratio_bps.to::<u64>() as f64 / 100.0,
                        ink = math::wad_to_f64(urn.ink),
                        art = math::wad_to_f64(urn.art),
                        "Unsafe vault detected"
                    );
                    opportunities.push(LiquidationOpportunity {
                        vault,
                        urn,
                        ilk: ilk_state,
                        ratio_bps,
                        penalty_bps,
                    });
                }
            }
        }

        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use keeper_chain::encode_ilk;

    fn frob(ilk: &str, urn: u8) -> FrobEvent {
        FrobEvent {
            ilk: encode_ilk(ilk),
            urn: Address::repeat_byte(urn),
            dink: U256::ZERO,
            dart: U256::ZERO,
            block_number: 1,
        }
    }

    fn monitor() -> VaultMonitor {
        let client = ChainClient::new_unchecked(
            "http://127.0.0.1:1",
            "ws://127.0.0.1:1",
            keeper_chain::ContractAddresses {
                vat: Address::ZERO,
                dog: Address::ZERO,
                flapper: Address::ZERO,
                flopper: Address::ZERO,
                kusd: Address::ZERO,
                kusd_join: Address::ZERO,
                sklc: Address::ZERO,
                psm: Address::ZERO,
                dex_router: Address::ZERO,
                dex_pair: Address::ZERO,
            },
        );
        VaultMonitor::new(Arc::new(client))
    }

    #[test]
    fn vault_set_growth_is_idempotent() {
        let monitor = monitor();

        // A multiset of Frob logs collapses to distinct (ilk, urn) pairs
        monitor.observe(&frob("WBTC-A", 1));
        monitor.observe(&frob("WBTC-A", 1));
        monitor.observe(&frob("WBTC-A", 2));
        monitor.observe(&frob("WETH-A", 1));
        monitor.observe(&frob("WBTC-A", 1));

        assert_eq!(monitor.vault_count(), 3);
    }

    fn ilk_state(spot_ray: U256, rate_ray: U256) -> IlkState {
        IlkState {
            art_total: U256::ZERO,
            rate: rate_ray,
            spot: spot_ray,
            line: U256::MAX,
            dust: U256::ZERO,
        }
    }

    #[test]
    fn empty_vault_is_never_emitted() {
        let urn = UrnState {
            ink: U256::ZERO,
            art: U256::ZERO,
        };
        let ilk = ilk_state(math::RAY, math::RAY);
        assert!(evaluate_urn(&urn, &ilk).is_none());
    }

    #[test]
    fn safe_vault_is_not_emitted() {
        let urn = UrnState {
            ink: math::WAD * U256::from(2u64),
            art: math::WAD * U256::from(20_000u64),
        };
        let ilk = ilk_state(math::RAY * U256::from(20_000u64), math::RAY);
        assert!(evaluate_urn(&urn, &ilk).is_none());
    }

    #[test]
    fn unsafe_vault_emits_spec_scenario_ratio() {
        // WBTC-A: spot 20_000 RAY, rate 1 RAY, urn (1 WAD, 21_000 WAD)
        let urn = UrnState {
            ink: math::WAD,
            art: math::WAD * U256::from(21_000u64),
        };
        let ilk = ilk_state(math::RAY * U256::from(20_000u64), math::RAY);
        let ratio = evaluate_urn(&urn, &ilk).unwrap();
        // 20000/21000 = 95.23%
        assert_eq!(ratio, U256::from(9_523u64));
    }

    #[test]
    fn boundary_vault_is_safe() {
        // ink * spot == art * rate exactly
        let urn = UrnState {
            ink: math::WAD,
            art: math::WAD * U256::from(20_000u64),
        };
        let ilk = ilk_state(math::RAY * U256::from(20_000u64), math::RAY);
        assert!(evaluate_urn(&urn, &ilk).is_none());
    }
}
