//! Dutch collateral-auction tracking and take-opportunity detection.
//!
//! Auctions enter via `Bark` events and leave when a `sales(id)` re-read
//! shows `tab == 0`. Each scan tick recomputes the decayed price, fetches
//! the oracle price, and emits at most one opportunity per auction,
//! pre-sorted by descending profit.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use dashmap::DashMap;
use futures::StreamExt;
use keeper_chain::{BarkEvent, ChainClient, EventListener};
use tracing::{debug, error, info, warn};

use crate::math;
use crate::price::PriceService;
use crate::time_utils::current_unix;
use crate::types::{BiddingOpportunity, CollateralAuction, IlkId};

/// Fixed Dutch auction duration: price reaches zero 6 hours after `tic`.
pub const AUCTION_DURATION_SECS: u64 = 21_600;

/// Delay before re-subscribing after a dropped event stream.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Take decision rule. Emits iff the auction is active and the decayed
/// price sits at least `min_profit_bps` under market.
pub fn evaluate_auction(
    auction: &CollateralAuction,
    market_price: U256,
    now: u64,
    min_profit_bps: i64,
) -> Option<BiddingOpportunity> {
    if !auction.is_active() {
        return None;
    }

    let current_price = math::auction_price(auction.top, auction.tic, AUCTION_DURATION_SECS, now);
    let profit_bps = math::profit_percentage_bps(current_price, market_price);
    if profit_bps < min_profit_bps {
        return None;
    }

    Some(BiddingOpportunity {
        auction: *auction,
        current_price,
        market_price,
        profit_bps,
        max_take: auction.lot,
    })
}

/// Tracks open Clipper auctions across all enabled collaterals.
pub struct AuctionMonitor {
    client: Arc<ChainClient>,
    auctions: DashMap<(IlkId, U256), CollateralAuction>,
}

impl AuctionMonitor {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self {
            client,
            auctions: DashMap::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.auctions.len()
    }

    /// Ingest a `Bark`: read the fresh sale slot and start tracking it.
    pub async fn on_bark(&self, event: &BarkEvent) {
        let ilk = IlkId(event.ilk);
        match self.client.clipper_sale(event.clip, event.id).await {
            Ok(sale) => {
                let auction = CollateralAuction::from_sale(ilk, event.id, event.clip, &sale);
                if auction.is_active() {
                    info!(
                        %ilk,
                        id = %event.id,
                        lot = math::wad_to_f64(auction.lot),
                        tab = math::rad_to_f64(auction.tab),
                        top = math::ray_to_f64(auction.top),
                        "Tracking new collateral auction"
                    );
                    self.auctions.insert((ilk, event.id), auction);
                } else {
                    debug!(%ilk, id = %event.id, "Bark for an already-settled auction");
                }
            }
            Err(e) => {
                warn!(%ilk, id = %event.id, error = %e, "Failed to read kicked sale, will miss this auction until re-barked");
            }
        }
    }

    /// Long-running Bark subscription task with reconnection.
    pub async fn run_listener(self: Arc<Self>, listener: Arc<EventListener>) {
        loop {
            match listener.subscribe_barks().await {
                Ok(mut stream) => {
                    info!("Bark subscription active");
                    while let Some(event) = stream.next().await {
                        self.on_bark(&event).await;
                    }
                    warn!("Bark stream ended, reconnecting");
                }
                Err(e) => {
                    error!(error = %e, "Bark subscribe failed, retrying");
                }
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    /// One scan tick: refresh every tracked auction, drop the settled
    /// ones, emit profitable takes sorted by descending profit.
    pub async fn scan(
        &self,
        prices: &PriceService,
        min_profit_bps: i64,
    ) -> Vec<BiddingOpportunity> {
        let now = current_unix();
        let keys: Vec<(IlkId, U256)> = self.auctions.iter().map(|e| *e.key()).collect();
        let mut opportunities = Vec::new();

        for key in keys {
            let (ilk, id) = key;
            let clip = match self.auctions.get(&key) {
                Some(entry) => entry.clip,
                None => continue,
            };

            let sale = match self.client.clipper_sale(clip, id).await {
                Ok(sale) => sale,
                Err(e) => {
                    debug!(%ilk, %id, error = %e, "Sale re-read failed, retrying next tick");
                    continue;
                }
            };

            let auction = CollateralAuction::from_sale(ilk, id, clip, &sale);
            if !auction.is_active() {
                info!(%ilk, %id, "Auction settled, dropping");
                self.auctions.remove(&key);
                continue;
            }
            self.auctions.insert(key, auction);

            let market_price = match prices.get_price(ilk).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(%ilk, %id, error = %e, "Market price unavailable, skipping auction this tick");
                    continue;
                }
            };

            if let Some(opportunity) = evaluate_auction(&auction, market_price, now, min_profit_bps)
            {
                info!(
                    %ilk,
                    %id,
                    current = math::ray_to_f64(opportunity.current_price),
                    market = math::ray_to_f64(opportunity.market_price),
                    profit_pct = math::bps_to_percent(opportunity.profit_bps),
                    "Profitable take detected"
                );
                opportunities.push(opportunity);
            }
        }

        opportunities.sort_by(|a, b| b.profit_bps.cmp(&a.profit_bps));
        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use crate::types::AuctionStatus;

    fn ray(n: u64) -> U256 {
        math::RAY * U256::from(n)
    }

    fn auction(top: u64, tic: u64) -> CollateralAuction {
        CollateralAuction {
            ilk: IlkId::from_name("WBTC-A"),
            id: U256::from(1u64),
            clip: Address::repeat_byte(9),
            tab: math::RAD,
            lot: math::WAD * U256::from(4u64),
            top: ray(top),
            tic,
            pos: U256::ZERO,
            usr: Address::repeat_byte(1),
            status: AuctionStatus::Active,
        }
    }

    #[test]
    fn spec_decay_scenario_half_way() {
        // top 100 RAY, tic 1000, now = tic + 10800 -> price 50 RAY
        let a = auction(100, 1_000);
        let now = 1_000 + 10_800;
        let price = math::auction_price(a.top, a.tic, AUCTION_DURATION_SECS, now);
        assert_eq!(price, ray(50));
    }

    #[test]
    fn spec_profitable_take_scenario() {
        // Price 50 at the half-way mark, market 60 -> 20.00% >= 5%
        let a = auction(100, 1_000);
        let now = 1_000 + 10_800;
        let opp = evaluate_auction(&a, ray(60), now, 500).unwrap();
        assert_eq!(opp.current_price, ray(50));
        assert_eq!(opp.profit_bps, 2_000);
        assert_eq!(opp.max_take, a.lot);
    }

    #[test]
    fn unprofitable_auction_is_skipped() {
        // Early in the decay the price still exceeds market
        let a = auction(100, 1_000);
        assert!(evaluate_auction(&a, ray(60), 1_100, 500).is_none());
    }

    #[test]
    fn profit_just_below_threshold_is_skipped() {
        let a = auction(100, 1_000);
        let now = 1_000 + 10_800; // price 50
        // market 52 -> 4.00% < 5%
        assert!(evaluate_auction(&a, ray(52), now, 500).is_none());
        // market 53 -> 6.00% >= 5%
        assert!(evaluate_auction(&a, ray(53), now, 500).is_some());
    }

    #[test]
    fn closed_auction_is_never_emitted() {
        let mut a = auction(100, 1_000);
        a.status = AuctionStatus::Closed;
        assert!(evaluate_auction(&a, ray(1_000), 20_000, 0).is_none());
    }

    #[test]
    fn opportunities_sort_by_descending_profit() {
        let mut opportunities = vec![
            BiddingOpportunity {
                auction: auction(100, 0),
                current_price: ray(50),
                market_price: ray(55),
                profit_bps: 1_000,
                max_take: math::WAD,
            },
            BiddingOpportunity {
                auction: auction(100, 0),
                current_price: ray(40),
                market_price: ray(60),
                profit_bps: 5_000,
                max_take: math::WAD,
            },
            BiddingOpportunity {
                auction: auction(100, 0),
                current_price: ray(50),
                market_price: ray(51),
                profit_bps: 200,
                max_take: math::WAD,
            },
        ];
        opportunities.sort_by(|a, b| b.profit_bps.cmp(&a.profit_bps));
        let profits: Vec<i64> = opportunities.iter().map(|o| o.profit_bps).collect();
        assert_eq!(profits, vec![5_000, 1_000, 200]);
    }
}
