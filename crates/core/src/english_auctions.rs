//! Surplus (Flap) and debt (Flop) auction tracking.
//!
//! Both are English auctions tracked from `Kick` to expiry. The monitors
//! compute minimum bid increments from the contract `beg` parameter, read
//! once at startup with conservative defaults on failure. Whether a bid
//! is *worth* placing is not decided here: the `profitable` flag on the
//! emitted opportunities is an input wired from configuration.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use dashmap::DashMap;
use futures::StreamExt;
use keeper_chain::{ChainClient, EventListener};
use tracing::{debug, error, info, warn};

use crate::math;
use crate::time_utils::current_unix;
use crate::types::{AuctionStatus, DebtAuction, DebtBid, SurplusAuction, SurplusBid};

/// Delay before re-subscribing after a dropped event stream.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Fallback minimum bid-increase factor for Flap: 1.05 RAY.
fn default_flap_beg() -> U256 {
    math::RAY + math::RAY / U256::from(20u64)
}

/// Fallback lot-decrease factor for Flop: 0.95 RAY.
fn default_flop_beg() -> U256 {
    math::RAY - math::RAY / U256::from(20u64)
}

/// Minimum acceptable next sKLC bid on a surplus auction.
pub fn min_next_bid(current_bid: U256, beg: U256) -> U256 {
    math::rmul(current_bid, beg)
}

/// Maximum acceptable next sKLC lot on a debt auction.
pub fn max_next_lot(current_lot: U256, beg: U256) -> U256 {
    math::rmul(current_lot, beg)
}

/// Tracks open surplus auctions.
pub struct SurplusMonitor {
    client: Arc<ChainClient>,
    auctions: DashMap<U256, SurplusAuction>,
    beg: U256,
}

impl SurplusMonitor {
    /// Reads `beg` once; a failed read falls back to 1.05.
    pub async fn init(client: Arc<ChainClient>) -> Self {
        let beg = match client.flap_beg().await {
            Ok(beg) if !beg.is_zero() => beg,
            Ok(_) | Err(_) => {
                warn!("Flapper beg unavailable, using default 1.05");
                default_flap_beg()
            }
        };
        Self {
            client,
            auctions: DashMap::new(),
            beg,
        }
    }

    pub fn beg(&self) -> U256 {
        self.beg
    }

    pub fn tracked_count(&self) -> usize {
        self.auctions.len()
    }

    async fn refresh(&self, id: U256) -> Option<SurplusAuction> {
        match self.client.flap_bid(id).await {
            Ok(state) => Some(SurplusAuction {
                id,
                bid: state.bid,
                lot: state.lot,
                guy: state.guy,
                tic: state.tic,
                end: state.end,
            }),
            Err(e) => {
                debug!(%id, error = %e, "Flap bid read failed");
                None
            }
        }
    }

    pub async fn on_kick(&self, id: U256) {
        if let Some(auction) = self.refresh(id).await {
            if auction.status() == AuctionStatus::Active {
                info!(
                    %id,
                    lot = math::rad_to_f64(auction.lot),
                    "Tracking new surplus auction"
                );
                self.auctions.insert(id, auction);
            }
        }
    }

    pub async fn run_listener(self: Arc<Self>, listener: Arc<EventListener>) {
        loop {
            match listener.subscribe_flap_kicks().await {
                Ok(mut stream) => {
                    info!("Flap Kick subscription active");
                    while let Some(event) = stream.next().await {
                        self.on_kick(event.id).await;
                    }
                    warn!("Flap Kick stream ended, reconnecting");
                }
                Err(e) => {
                    error!(error = %e, "Flap Kick subscribe failed, retrying");
                }
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    /// Refresh tracked auctions, prune closed or expired ones, and emit
    /// bids with the externally supplied `profitable` input.
    pub async fn scan(&self, profitable: bool) -> Vec<SurplusBid> {
        let now = current_unix();
        let ids: Vec<U256> = self.auctions.iter().map(|e| *e.key()).collect();
        let mut bids = Vec::new();

        for id in ids {
            let Some(auction) = self.refresh(id).await else {
                continue;
            };
            if auction.status() == AuctionStatus::Closed || auction.is_expired(now) {
                debug!(%id, "Surplus auction over, dropping");
                self.auctions.remove(&id);
                continue;
            }
            self.auctions.insert(id, auction);

            bids.push(SurplusBid {
                auction,
                min_bid: min_next_bid(auction.bid, self.beg),
                profitable,
            });
        }

        bids
    }
}

/// Tracks open debt auctions.
pub struct DebtMonitor {
    client: Arc<ChainClient>,
    auctions: DashMap<U256, DebtAuction>,
    beg: U256,
}

impl DebtMonitor {
    /// Reads `beg` once; a failed read falls back to 0.95.
    pub async fn init(client: Arc<ChainClient>) -> Self {
        let beg = match client.flop_beg().await {
            Ok(beg) if !beg.is_zero() => beg,
            Ok(_) | Err(_) => {
                warn!("Flopper beg unavailable, using default 0.95");
                default_flop_beg()
            }
        };
        Self {
            client,
            auctions: DashMap::new(),
            beg,
        }
    }

    pub fn beg(&self) -> U256 {
        self.beg
    }

    pub fn tracked_count(&self) -> usize {
        self.auctions.len()
    }

    async fn refresh(&self, id: U256) -> Option<DebtAuction> {
        match self.client.flop_bid(id).await {
            Ok(state) => Some(DebtAuction {
                id,
                bid: state.bid,
                lot: state.lot,
                guy: state.guy,
                tic: state.tic,
                end: state.end,
            }),
            Err(e) => {
                debug!(%id, error = %e, "Flop bid read failed");
                None
            }
        }
    }

    pub async fn on_kick(&self, id: U256) {
        if let Some(auction) = self.refresh(id).await {
            if auction.status() == AuctionStatus::Active {
                info!(
                    %id,
                    bid = math::rad_to_f64(auction.bid),
                    lot = math::wad_to_f64(auction.lot),
                    "Tracking new debt auction"
                );
                self.auctions.insert(id, auction);
            }
        }
    }

    pub async fn run_listener(self: Arc<Self>, listener: Arc<EventListener>) {
        loop {
            match listener.subscribe_flop_kicks().await {
                Ok(mut stream) => {
                    info!("Flop Kick subscription active");
                    while let Some(event) = stream.next().await {
                        self.on_kick(event.id).await;
                    }
                    warn!("Flop Kick stream ended, reconnecting");
                }
                Err(e) => {
                    error!(error = %e, "Flop Kick subscribe failed, retrying");
                }
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    pub async fn scan(&self, profitable: bool) -> Vec<DebtBid> {
        let now = current_unix();
        let ids: Vec<U256> = self.auctions.iter().map(|e| *e.key()).collect();
        let mut bids = Vec::new();

        for id in ids {
            let Some(auction) = self.refresh(id).await else {
                continue;
            };
            if auction.status() == AuctionStatus::Closed || auction.is_expired(now) {
                debug!(%id, "Debt auction over, dropping");
                self.auctions.remove(&id);
                continue;
            }
            self.auctions.insert(id, auction);

            bids.push(DebtBid {
                auction,
                max_lot: max_next_lot(auction.lot, self.beg),
                profitable,
            });
        }

        bids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flap_increment_raises_by_beg() {
        let bid = math::WAD * U256::from(100u64);
        let next = min_next_bid(bid, default_flap_beg());
        assert_eq!(next, math::WAD * U256::from(105u64));
    }

    #[test]
    fn flop_decrement_lowers_by_beg() {
        let lot = math::WAD * U256::from(100u64);
        let next = max_next_lot(lot, default_flop_beg());
        assert_eq!(next, math::WAD * U256::from(95u64));
    }

    #[test]
    fn first_bid_has_zero_floor() {
        assert_eq!(min_next_bid(U256::ZERO, default_flap_beg()), U256::ZERO);
    }

    #[test]
    fn default_begs_are_ray_scaled() {
        assert_eq!(
            default_flap_beg(),
            U256::from(105u64) * math::RAY / U256::from(100u64)
        );
        assert_eq!(
            default_flop_beg(),
            U256::from(95u64) * math::RAY / U256::from(100u64)
        );
    }
}
