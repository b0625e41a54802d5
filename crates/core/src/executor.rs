//! Transaction executors.
//!
//! Each executor re-checks the chain for capacity and balance immediately
//! before signing (the monitor's snapshot may be a tick old), builds the
//! calldata, and sends through the serialized `TxSender`. Batches run
//! sequentially with a fixed gap so the node can mine between sends.
//! Reverts are never retried; the usual cause is a competing keeper.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use keeper_chain::contracts::{IClipper, IDog, IErc20, IFlapper, IFlopper};
use keeper_chain::{ChainClient, DogIlkState, DogState, KeeperError, TxSender};
use tracing::{debug, info, warn};

use crate::health::KeeperHealth;
use crate::math;
use crate::types::{BiddingOpportunity, DebtBid, LiquidationOpportunity, SurplusBid};

/// Gap between sequential sends in one batch. Avoids nonce races and
/// gives the node time to mine.
const SEND_GAP: Duration = Duration::from_secs(2);

/// Ceiling preflight shared by every `bark`: both the global and the
/// per-ilk liquidation room must be open.
pub fn liquidation_preflight(dog: &DogState, dog_ilk: &DogIlkState) -> Result<(), KeeperError> {
    if dog.dirt >= dog.hole {
        return Err(KeeperError::LimitExceeded(format!(
            "global liquidation ceiling reached: Dirt {} >= Hole {}",
            math::rad_to_f64(dog.dirt),
            math::rad_to_f64(dog.hole)
        )));
    }
    if dog_ilk.dirt >= dog_ilk.hole {
        return Err(KeeperError::LimitExceeded(format!(
            "ilk liquidation ceiling reached: dirt {} >= hole {}",
            math::rad_to_f64(dog_ilk.dirt),
            math::rad_to_f64(dog_ilk.hole)
        )));
    }
    Ok(())
}

/// Size a take so the keeper can always settle it: the amount is capped
/// by the lot, the configured per-auction limit, and by what the Vat
/// balance can pay at the current price (`amt * price <= balance`).
/// Returns `(amt_wad, owe_rad)`, or `None` when nothing affordable is
/// left.
pub fn plan_take(
    lot_wad: U256,
    price_ray: U256,
    vat_balance_rad: U256,
    max_collateral_wad: U256,
) -> Option<(U256, U256)> {
    let mut amt = lot_wad.min(max_collateral_wad);
    if amt.is_zero() {
        return None;
    }
    if price_ray.is_zero() {
        // Fully decayed price: the whole slice is free
        return Some((amt, U256::ZERO));
    }

    // owe = amt (WAD) * price (RAY), a RAD value
    let one = U256::from(1u64);
    if math::mul_div(amt, price_ray, one) > vat_balance_rad {
        amt = vat_balance_rad / price_ray;
    }
    if amt.is_zero() {
        return None;
    }
    Some((amt, math::mul_div(amt, price_ray, one)))
}

/// Flap bid preflight: the wallet must hold the full sKLC bid.
pub fn flap_preflight(sklc_balance_wad: U256, min_bid_wad: U256) -> Result<(), KeeperError> {
    if sklc_balance_wad < min_bid_wad {
        return Err(KeeperError::InsufficientFunds {
            required: math::wad_to_f64(min_bid_wad).to_string(),
            available: math::wad_to_f64(sklc_balance_wad).to_string(),
        });
    }
    Ok(())
}

/// Flop bid preflight: the Vat balance must cover the fixed stablecoin
/// bid.
pub fn flop_preflight(vat_balance_rad: U256, bid_rad: U256) -> Result<(), KeeperError> {
    if vat_balance_rad < bid_rad {
        return Err(KeeperError::InsufficientFunds {
            required: math::rad_to_f64(bid_rad).to_string(),
            available: math::rad_to_f64(vat_balance_rad).to_string(),
        });
    }
    Ok(())
}

fn log_skip(context: &str, err: &KeeperError) {
    match err {
        KeeperError::LimitExceeded(_) => info!(context, error = %err, "Opportunity skipped"),
        KeeperError::InsufficientFunds { .. } => {
            warn!(context, error = %err, "Opportunity skipped")
        }
        KeeperError::TxReverted { .. } => {
            warn!(context, error = %err, "Transaction reverted, not retrying")
        }
        _ => warn!(context, error = %err, "Execution failed"),
    }
}

fn is_counted_error(err: &KeeperError) -> bool {
    matches!(
        err,
        KeeperError::ChainRpc(_)
            | KeeperError::TxReverted { .. }
            | KeeperError::TxUnderpriced(_)
            | KeeperError::TxUnknown { .. }
    )
}

/// Sends `dog.bark` for unsafe vaults.
pub struct LiquidationExecutor {
    client: Arc<ChainClient>,
    sender: Arc<TxSender>,
    health: Arc<KeeperHealth>,
    emergency_stop: bool,
}

impl LiquidationExecutor {
    pub fn new(
        client: Arc<ChainClient>,
        sender: Arc<TxSender>,
        health: Arc<KeeperHealth>,
        emergency_stop: bool,
    ) -> Self {
        Self {
            client,
            sender,
            health,
            emergency_stop,
        }
    }

    /// Sequential batch dispatch in monitor emission order.
    pub async fn dispatch(&self, opportunities: Vec<LiquidationOpportunity>) {
        for (i, opportunity) in opportunities.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(SEND_GAP).await;
            }
            if let Err(e) = self.execute(&opportunity).await {
                log_skip("bark", &e);
                if is_counted_error(&e) {
                    self.health.record_error();
                }
            }
        }
    }

    async fn execute(&self, opportunity: &LiquidationOpportunity) -> Result<(), KeeperError> {
        if self.emergency_stop {
            return Err(KeeperError::LimitExceeded("emergency stop active".into()));
        }

        let dog = self.client.dog_params().await?;
        let dog_ilk = self.client.dog_ilk(opportunity.vault.ilk.tag()).await?;
        liquidation_preflight(&dog, &dog_ilk)?;

        let call = IDog::barkCall {
            ilk: opportunity.vault.ilk.tag(),
            urn: opportunity.vault.urn,
            kpr: self.sender.address,
        };
        let outcome = self
            .sender
            .send(self.client.addresses().dog, Bytes::from(call.abi_encode()))
            .await?;

        self.health.record_liquidation();
        info!(
            ilk = %opportunity.vault.ilk,
            urn = %opportunity.vault.urn,
            ink = math::wad_to_f64(opportunity.urn.ink),
            art = math::wad_to_f64(opportunity.urn.art),
            ratio_pct = opportunity.ratio_percent(),
            tx_hash = %outcome.hash,
            gas_used = outcome.gas_used,
            "Vault liquidated"
        );
        Ok(())
    }
}

/// Sends `clipper.take` for profitable Dutch auctions.
pub struct TakeExecutor {
    client: Arc<ChainClient>,
    sender: Arc<TxSender>,
    health: Arc<KeeperHealth>,
    emergency_stop: bool,
    max_collateral_per_auction: U256,
}

impl TakeExecutor {
    pub fn new(
        client: Arc<ChainClient>,
        sender: Arc<TxSender>,
        health: Arc<KeeperHealth>,
        emergency_stop: bool,
        max_collateral_per_auction: U256,
    ) -> Self {
        Self {
            client,
            sender,
            health,
            emergency_stop,
            max_collateral_per_auction,
        }
    }

    /// Best opportunities first, then sequential sends with the standard
    /// gap.
    pub async fn dispatch(&self, mut opportunities: Vec<BiddingOpportunity>) {
        opportunities.sort_by(|a, b| b.profit_bps.cmp(&a.profit_bps));
        for (i, opportunity) in opportunities.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(SEND_GAP).await;
            }
            if let Err(e) = self.execute(&opportunity).await {
                log_skip("take", &e);
                if is_counted_error(&e) {
                    self.health.record_error();
                }
            }
        }
    }

    async fn execute(&self, opportunity: &BiddingOpportunity) -> Result<(), KeeperError> {
        if self.emergency_stop {
            return Err(KeeperError::LimitExceeded("emergency stop active".into()));
        }

        let vat_balance = self.client.vat_kusd_balance(self.sender.address).await?;
        let (amt, owe) = plan_take(
            opportunity.max_take,
            opportunity.current_price,
            vat_balance,
            self.max_collateral_per_auction,
        )
        .ok_or_else(|| KeeperError::InsufficientFunds {
            required: math::ray_to_f64(opportunity.current_price).to_string(),
            available: math::rad_to_f64(vat_balance).to_string(),
        })?;

        // The chain enforces max as execution price protection; pinning
        // it to the observed price refuses any adverse repricing.
        let call = IClipper::takeCall {
            id: opportunity.auction.id,
            amt,
            max: opportunity.current_price,
            who: self.sender.address,
            data: Bytes::new(),
        };
        let outcome = self
            .sender
            .send(opportunity.auction.clip, Bytes::from(call.abi_encode()))
            .await?;

        // Estimated edge over market at snapshot prices, RAD.
        let one = U256::from(1u64);
        let value_at_market = math::mul_div(amt, opportunity.market_price, one);
        let profit_rad = value_at_market.saturating_sub(owe);
        self.health.record_bid();
        self.health.add_profit_gem(math::rad_to_f64(profit_rad));

        info!(
            ilk = %opportunity.auction.ilk,
            id = %opportunity.auction.id,
            amt = math::wad_to_f64(amt),
            owe = math::rad_to_f64(owe),
            max_price = math::ray_to_f64(opportunity.current_price),
            profit_pct = math::bps_to_percent(opportunity.profit_bps),
            tx_hash = %outcome.hash,
            "Collateral taken"
        );
        Ok(())
    }
}

/// Sends `flapper.tend` for surplus auctions whose `profitable` input is
/// set.
pub struct SurplusExecutor {
    client: Arc<ChainClient>,
    sender: Arc<TxSender>,
    health: Arc<KeeperHealth>,
    emergency_stop: bool,
}

impl SurplusExecutor {
    pub fn new(
        client: Arc<ChainClient>,
        sender: Arc<TxSender>,
        health: Arc<KeeperHealth>,
        emergency_stop: bool,
    ) -> Self {
        Self {
            client,
            sender,
            health,
            emergency_stop,
        }
    }

    pub async fn dispatch(&self, bids: Vec<SurplusBid>) {
        for (i, bid) in bids.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(SEND_GAP).await;
            }
            if let Err(e) = self.execute(&bid).await {
                log_skip("tend", &e);
                if is_counted_error(&e) {
                    self.health.record_error();
                }
            }
        }
    }

    async fn execute(&self, bid: &SurplusBid) -> Result<(), KeeperError> {
        if !bid.profitable {
            debug!(id = %bid.auction.id, "Surplus bid not flagged profitable, skipping");
            return Ok(());
        }
        if self.emergency_stop {
            return Err(KeeperError::LimitExceeded("emergency stop active".into()));
        }
        if bid.min_bid.is_zero() {
            debug!(id = %bid.auction.id, "No meaningful minimum bid yet, skipping");
            return Ok(());
        }

        let addrs = self.client.addresses();
        let sklc_balance = self
            .client
            .erc20_balance(addrs.sklc, self.sender.address)
            .await?;
        flap_preflight(sklc_balance, bid.min_bid)?;

        // Fresh exact-amount approval per bid bounds allowance exposure.
        let approve = IErc20::approveCall {
            spender: addrs.flapper,
            amount: bid.min_bid,
        };
        self.sender
            .send(addrs.sklc, Bytes::from(approve.abi_encode()))
            .await?;

        let tend = IFlapper::tendCall {
            id: bid.auction.id,
            lot: bid.auction.lot,
            bid: bid.min_bid,
        };
        let outcome = self
            .sender
            .send(addrs.flapper, Bytes::from(tend.abi_encode()))
            .await?;

        self.health.record_bid();
        info!(
            id = %bid.auction.id,
            lot = math::rad_to_f64(bid.auction.lot),
            bid = math::wad_to_f64(bid.min_bid),
            tx_hash = %outcome.hash,
            "Surplus auction bid placed"
        );
        Ok(())
    }
}

/// Sends `flopper.dent` for debt auctions whose `profitable` input is set.
pub struct DebtExecutor {
    client: Arc<ChainClient>,
    sender: Arc<TxSender>,
    health: Arc<KeeperHealth>,
    emergency_stop: bool,
}

impl DebtExecutor {
    pub fn new(
        client: Arc<ChainClient>,
        sender: Arc<TxSender>,
        health: Arc<KeeperHealth>,
        emergency_stop: bool,
    ) -> Self {
        Self {
            client,
            sender,
            health,
            emergency_stop,
        }
    }

    pub async fn dispatch(&self, bids: Vec<DebtBid>) {
        for (i, bid) in bids.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(SEND_GAP).await;
            }
            if let Err(e) = self.execute(&bid).await {
                log_skip("dent", &e);
                if is_counted_error(&e) {
                    self.health.record_error();
                }
            }
        }
    }

    async fn execute(&self, bid: &DebtBid) -> Result<(), KeeperError> {
        if !bid.profitable {
            debug!(id = %bid.auction.id, "Debt bid not flagged profitable, skipping");
            return Ok(());
        }
        if self.emergency_stop {
            return Err(KeeperError::LimitExceeded("emergency stop active".into()));
        }
        if bid.max_lot.is_zero() {
            debug!(id = %bid.auction.id, "Lot cannot shrink further, skipping");
            return Ok(());
        }

        let vat_balance = self
            .client
            .vat_kusd_balance(self.sender.address)
            .await?;
        flop_preflight(vat_balance, bid.auction.bid)?;

        let dent = IFlopper::dentCall {
            id: bid.auction.id,
            lot: bid.max_lot,
            bid: bid.auction.bid,
        };
        let outcome = self
            .sender
            .send(self.client.addresses().flopper, Bytes::from(dent.abi_encode()))
            .await?;

        self.health.record_bid();
        info!(
            id = %bid.auction.id,
            lot = math::wad_to_f64(bid.max_lot),
            bid = math::rad_to_f64(bid.auction.bid),
            tx_hash = %outcome.hash,
            "Debt auction bid placed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rad(n: u64) -> U256 {
        math::RAD * U256::from(n)
    }

    #[test]
    fn preflight_blocks_when_global_ceiling_reached() {
        let dog = DogState {
            hole: rad(100),
            dirt: rad(100),
        };
        let ilk = DogIlkState {
            clip: Default::default(),
            chop: math::RAY,
            hole: rad(50),
            dirt: U256::ZERO,
        };
        let err = liquidation_preflight(&dog, &ilk).unwrap_err();
        assert_eq!(err.kind(), "limit_exceeded");
    }

    #[test]
    fn preflight_blocks_when_ilk_ceiling_reached() {
        let dog = DogState {
            hole: rad(100),
            dirt: U256::ZERO,
        };
        let ilk = DogIlkState {
            clip: Default::default(),
            chop: math::RAY,
            hole: rad(50),
            dirt: rad(50),
        };
        assert!(liquidation_preflight(&dog, &ilk).is_err());
    }

    #[test]
    fn preflight_passes_with_open_room() {
        let dog = DogState {
            hole: rad(100),
            dirt: rad(99),
        };
        let ilk = DogIlkState {
            clip: Default::default(),
            chop: math::RAY,
            hole: rad(50),
            dirt: rad(49),
        };
        assert!(liquidation_preflight(&dog, &ilk).is_ok());
    }

    #[test]
    fn plan_take_full_lot_when_funded() {
        // 4 WAD lot at price 50 RAY needs 200 RAD
        let lot = math::WAD * U256::from(4u64);
        let price = math::RAY * U256::from(50u64);
        let (amt, owe) = plan_take(lot, price, rad(200), U256::MAX).unwrap();
        assert_eq!(amt, lot);
        assert_eq!(owe, rad(200));
    }

    #[test]
    fn plan_take_shrinks_to_affordable() {
        // Balance covers half the lot
        let lot = math::WAD * U256::from(4u64);
        let price = math::RAY * U256::from(50u64);
        let (amt, owe) = plan_take(lot, price, rad(100), U256::MAX).unwrap();
        assert_eq!(amt, math::WAD * U256::from(2u64));
        assert_eq!(owe, rad(100));
        // Take-bound solvency: owe never exceeds the balance
        assert!(owe <= rad(100));
    }

    #[test]
    fn plan_take_respects_collateral_cap() {
        let lot = math::WAD * U256::from(4u64);
        let price = math::RAY * U256::from(50u64);
        let cap = math::WAD;
        let (amt, owe) = plan_take(lot, price, rad(1_000), cap).unwrap();
        assert_eq!(amt, cap);
        assert_eq!(owe, rad(50));
    }

    #[test]
    fn plan_take_empty_balance_is_none() {
        let lot = math::WAD;
        let price = math::RAY * U256::from(50u64);
        assert!(plan_take(lot, price, U256::ZERO, U256::MAX).is_none());
    }

    #[test]
    fn plan_take_zero_price_takes_everything() {
        let lot = math::WAD * U256::from(4u64);
        let (amt, owe) = plan_take(lot, U256::ZERO, U256::ZERO, U256::MAX).unwrap();
        assert_eq!(amt, lot);
        assert_eq!(owe, U256::ZERO);
    }

    #[test]
    fn flop_refuses_underfunded_bid() {
        // Spec scenario: bid 500 RAD, balance 400 RAD
        let err = flop_preflight(rad(400), rad(500)).unwrap_err();
        assert_eq!(err.kind(), "insufficient_funds");
        assert!(flop_preflight(rad(500), rad(500)).is_ok());
    }

    #[test]
    fn flap_refuses_underfunded_bid() {
        let min_bid = math::WAD * U256::from(10u64);
        let err = flap_preflight(math::WAD * U256::from(9u64), min_bid).unwrap_err();
        assert_eq!(err.kind(), "insufficient_funds");
        assert!(flap_preflight(min_bid, min_bid).is_ok());
    }
}
