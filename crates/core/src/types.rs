//! Value types for monitor state and opportunities.
//!
//! Monitors own maps of these snapshots; executors receive them by value.
//! Nothing here holds a chain client, so every decision function is unit
//! testable offline.

use alloy::primitives::{Address, B256, U256};
use keeper_chain::{decode_ilk, encode_ilk, IlkState, SaleState, UrnState};

use crate::math;

/// A collateral type tag (UTF-8 name right-padded to 32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IlkId(pub B256);

impl IlkId {
    pub fn from_name(name: &str) -> Self {
        Self(encode_ilk(name))
    }

    pub fn name(&self) -> String {
        decode_ilk(&self.0)
    }

    pub fn tag(&self) -> B256 {
        self.0
    }
}

impl std::fmt::Display for IlkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// A vault is identified by its collateral type and owner address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VaultId {
    pub ilk: IlkId,
    pub urn: Address,
}

/// Wire sentinel made explicit: an auction slot is either live or spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionStatus {
    Active,
    Closed,
}

/// A tracked Dutch collateral auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralAuction {
    pub ilk: IlkId,
    pub id: U256,
    /// Clipper this auction lives on.
    pub clip: Address,
    /// Debt to recover (RAD).
    pub tab: U256,
    /// Collateral on sale (WAD).
    pub lot: U256,
    /// Starting price (RAY).
    pub top: U256,
    /// Start time (Unix seconds).
    pub tic: u64,
    pub pos: U256,
    /// Vault owner before liquidation.
    pub usr: Address,
    pub status: AuctionStatus,
}

impl CollateralAuction {
    /// Snapshot a Clipper sale slot. `tab == 0` is the wire encoding for
    /// a closed auction.
    pub fn from_sale(ilk: IlkId, id: U256, clip: Address, sale: &SaleState) -> Self {
        let status = if sale.tab.is_zero() {
            AuctionStatus::Closed
        } else {
            AuctionStatus::Active
        };
        Self {
            ilk,
            id,
            clip,
            tab: sale.tab,
            lot: sale.lot,
            top: sale.top,
            tic: sale.tic,
            pos: sale.pos,
            usr: sale.usr,
            status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AuctionStatus::Active
    }
}

/// A tracked English surplus auction (stablecoin lot, rising sKLC bid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurplusAuction {
    pub id: U256,
    /// Current sKLC bid (WAD).
    pub bid: U256,
    /// Stablecoin on sale (RAD).
    pub lot: U256,
    /// High bidder; zero address marks an inactive slot.
    pub guy: Address,
    /// Bid expiry (Unix seconds, zero before the first bid).
    pub tic: u64,
    /// Auction expiry (Unix seconds).
    pub end: u64,
}

impl SurplusAuction {
    pub fn status(&self) -> AuctionStatus {
        if self.guy == Address::ZERO {
            AuctionStatus::Closed
        } else {
            AuctionStatus::Active
        }
    }

    /// Expired when either the bid window or the auction window has passed.
    pub fn is_expired(&self, now: u64) -> bool {
        (self.tic != 0 && now >= self.tic) || now >= self.end
    }
}

/// A tracked English debt auction (fixed stablecoin bid, shrinking sKLC lot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebtAuction {
    pub id: U256,
    /// Stablecoin paid (RAD).
    pub bid: U256,
    /// sKLC demanded (WAD).
    pub lot: U256,
    pub guy: Address,
    pub tic: u64,
    pub end: u64,
}

impl DebtAuction {
    pub fn status(&self) -> AuctionStatus {
        if self.guy == Address::ZERO {
            AuctionStatus::Closed
        } else {
            AuctionStatus::Active
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        (self.tic != 0 && now >= self.tic) || now >= self.end
    }
}

/// An unsafe vault, ready for `bark`.
#[derive(Debug, Clone, Copy)]
pub struct LiquidationOpportunity {
    pub vault: VaultId,
    /// Vault snapshot at scan time.
    pub urn: UrnState,
    /// Collateral-type snapshot at scan time.
    pub ilk: IlkState,
    /// Collateralization ratio in basis points (always < 10_000 here).
    pub ratio_bps: U256,
    /// Liquidation penalty over par, basis points, derived from `chop`.
    pub penalty_bps: U256,
}

impl LiquidationOpportunity {
    pub fn ratio_percent(&self) -> f64 {
        let bps: u64 = self.ratio_bps.try_into().unwrap_or(u64::MAX);
        bps as f64 / 100.0
    }
}

/// A Dutch auction currently priced below market.
#[derive(Debug, Clone, Copy)]
pub struct BiddingOpportunity {
    pub auction: CollateralAuction,
    /// Auction price now (RAY).
    pub current_price: U256,
    /// Oracle market price (RAY).
    pub market_price: U256,
    /// `profit_percentage(current, market)` in basis points.
    pub profit_bps: i64,
    /// Advisory cap: the whole lot (WAD).
    pub max_take: U256,
}

/// A surplus auction the keeper may bid on. `profitable` is an input from
/// configuration or an external strategy, never computed here.
#[derive(Debug, Clone, Copy)]
pub struct SurplusBid {
    pub auction: SurplusAuction,
    /// Minimum acceptable next bid (WAD sKLC), from `beg`.
    pub min_bid: U256,
    pub profitable: bool,
}

/// A debt auction the keeper may bid on. Same `profitable` contract as
/// [`SurplusBid`].
#[derive(Debug, Clone, Copy)]
pub struct DebtBid {
    pub auction: DebtAuction,
    /// Maximum acceptable next lot (WAD sKLC), from `beg`.
    pub max_lot: U256,
    pub profitable: bool,
}

/// Penalty in basis points from a `chop` multiplier (RAY-scaled, 1.13 =
/// 13% penalty). Values at or below par clamp to zero.
pub fn penalty_bps_from_chop(chop: U256) -> U256 {
    if chop <= math::RAY {
        return U256::ZERO;
    }
    math::mul_div(chop - math::RAY, U256::from(10_000u64), math::RAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilk_id_display_matches_name() {
        let ilk = IlkId::from_name("WBTC-A");
        assert_eq!(ilk.name(), "WBTC-A");
        assert_eq!(format!("{ilk}"), "WBTC-A");
    }

    #[test]
    fn auction_status_follows_tab_sentinel() {
        let sale = SaleState {
            pos: U256::ZERO,
            tab: U256::from(1u64),
            lot: U256::from(2u64),
            tot: U256::from(2u64),
            usr: Address::repeat_byte(1),
            tic: 100,
            top: U256::from(3u64),
        };
        let ilk = IlkId::from_name("WETH-A");
        let auction = CollateralAuction::from_sale(ilk, U256::from(9u64), Address::ZERO, &sale);
        assert!(auction.is_active());

        let closed = SaleState {
            tab: U256::ZERO,
            ..sale
        };
        let auction = CollateralAuction::from_sale(ilk, U256::from(9u64), Address::ZERO, &closed);
        assert_eq!(auction.status, AuctionStatus::Closed);
    }

    #[test]
    fn english_auction_zero_guy_is_closed() {
        let auction = SurplusAuction {
            id: U256::from(1u64),
            bid: U256::ZERO,
            lot: U256::ZERO,
            guy: Address::ZERO,
            tic: 0,
            end: 100,
        };
        assert_eq!(auction.status(), AuctionStatus::Closed);
    }

    #[test]
    fn english_auction_expiry() {
        let auction = DebtAuction {
            id: U256::from(1u64),
            bid: U256::ZERO,
            lot: U256::ZERO,
            guy: Address::repeat_byte(1),
            tic: 50,
            end: 100,
        };
        assert!(!auction.is_expired(49));
        assert!(auction.is_expired(50));
        assert!(auction.is_expired(150));

        let unbid = DebtAuction { tic: 0, ..auction };
        assert!(!unbid.is_expired(99));
        assert!(unbid.is_expired(100));
    }

    #[test]
    fn chop_converts_to_penalty() {
        // chop = 1.13 RAY -> 1300 bps
        let chop = math::RAY + math::RAY * U256::from(13u64) / U256::from(100u64);
        assert_eq!(penalty_bps_from_chop(chop), U256::from(1_300u64));
        assert_eq!(penalty_bps_from_chop(math::RAY), U256::ZERO);
    }
}
