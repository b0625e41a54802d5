//! Core keeper logic for the KUSD protocol.
//!
//! This crate provides:
//! - Fixed-point arithmetic on the WAD/RAY/RAD scales
//! - The vault, auction, and peg data model as plain value snapshots
//! - Monitors that maintain the unsafe-vault set and the open-auction
//!   maps online
//! - Executors for `bark`, `take`, `tend`, and `dent`
//! - The PSM/DEX peg arbitrage service
//! - The orchestrator tick loop, configuration, and health counters

pub mod auction_monitor;
pub mod balance;
pub mod config;
pub mod english_auctions;
pub mod executor;
pub mod health;
pub mod math;
pub mod orchestrator;
pub mod peg;
pub mod price;
pub mod time_utils;
pub mod types;
pub mod vault_monitor;

pub use auction_monitor::{AuctionMonitor, AUCTION_DURATION_SECS};
pub use balance::VatBalanceManager;
pub use config::{CollateralConfig, KeeperConfig, Mode, PegConfig};
pub use english_auctions::{DebtMonitor, SurplusMonitor};
pub use executor::{DebtExecutor, LiquidationExecutor, SurplusExecutor, TakeExecutor};
pub use health::{HealthSnapshot, KeeperHealth};
pub use orchestrator::Orchestrator;
pub use peg::PegArbService;
pub use price::PriceService;
pub use types::{
    AuctionStatus, BiddingOpportunity, CollateralAuction, DebtAuction, DebtBid, IlkId,
    LiquidationOpportunity, SurplusAuction, SurplusBid, VaultId,
};
pub use vault_monitor::VaultMonitor;
