//! Keeper configuration.
//!
//! Environment variables are the configuration interface; `.env` loading
//! happens in `main` via dotenvy before this module reads anything.
//! Every failure here is `KeeperError::Config` and fatal (exit code 1).

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use keeper_chain::{ContractAddresses, KeeperError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::math;
use crate::types::IlkId;

/// Which monitors the orchestrator runs each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Everything: vault scans, auction bidding, peg arbitrage.
    Full,
    /// Vault scans and liquidations only.
    Kick,
    /// Collateral-auction bidding only.
    Bid,
    /// Peg arbitrage only.
    Peg,
}

impl FromStr for Mode {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "kick" => Ok(Self::Kick),
            "bid" => Ok(Self::Bid),
            "peg" => Ok(Self::Peg),
            other => Err(KeeperError::Config(format!(
                "MODE must be one of full|kick|bid|peg, got {other}"
            ))),
        }
    }
}

impl Mode {
    pub fn runs_kick(&self) -> bool {
        matches!(self, Self::Full | Self::Kick)
    }

    pub fn runs_bid(&self) -> bool {
        matches!(self, Self::Full | Self::Bid)
    }

    pub fn runs_peg(&self) -> bool {
        matches!(self, Self::Full | Self::Peg)
    }
}

/// One enabled collateral type.
#[derive(Debug, Clone)]
pub struct CollateralConfig {
    pub name: String,
    pub ilk: IlkId,
    /// The gem ERC-20.
    pub gem: Address,
    /// The collateral's Clipper.
    pub clipper: Address,
    /// The collateral's price feed (`peek()`).
    pub oracle: Address,
}

/// Peg arbitrage parameters.
#[derive(Debug, Clone)]
pub struct PegConfig {
    /// Spot price above this (WAD) triggers the mint-and-sell branch.
    pub upper_limit_wad: U256,
    /// Spot price below this (WAD) triggers the buy-and-redeem branch.
    pub lower_limit_wad: U256,
    /// Trade size cap, gem units.
    pub max_arb_amount: f64,
    /// Minimum simulated profit to act, basis points.
    pub min_profit_bps: i64,
    /// Slippage tolerance on the DEX leg, basis points.
    pub slippage_bps: u16,
    /// Minimum wait between arbitrage executions.
    pub cooldown: Duration,
    /// Trade cap as a percentage of the pool's gem reserve.
    pub max_trade_percent_of_pool: u64,
    /// Skip (with a warning) when the pool's gem side is below this.
    pub min_pool_liquidity: f64,
}

/// Full keeper configuration.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub private_key: String,
    pub rpc_url: String,
    pub ws_url: String,
    pub chain_id: u64,
    pub mode: Mode,
    /// Orchestrator tick period.
    pub check_interval: Duration,
    /// Minimum take profit, basis points.
    pub min_profit_bps: i64,
    pub gas_limit: u64,
    /// Fixed legacy gas price, wei.
    pub gas_price: u128,
    /// Hard cap on the configured gas price, wei.
    pub max_gas_price: u128,
    /// Per-auction take cap (WAD). `U256::MAX` when unset.
    pub max_collateral_per_auction: U256,
    /// Refuse all sends when set.
    pub emergency_stop: bool,
    /// Frob history window for vault-set hydration.
    pub frob_lookback_blocks: u64,
    pub addresses: ContractAddresses,
    pub collaterals: Vec<CollateralConfig>,
    /// The Flap `profitable` input: bid on surplus auctions at all.
    pub surplus_bidding_enabled: bool,
    /// The Flop `profitable` input.
    pub debt_bidding_enabled: bool,
    pub peg: PegConfig,
}

fn required(name: &str) -> Result<String, KeeperError> {
    std::env::var(name).map_err(|_| KeeperError::Config(format!("missing env var: {name}")))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, KeeperError>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| KeeperError::Config(format!("invalid {name}={raw}: {e}")))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T, KeeperError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn address(name: &str) -> Result<Address, KeeperError> {
    let raw = required(name)?;
    parse(name, &raw)
}

fn flag(name: &str) -> bool {
    optional(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Env-var prefix for a collateral name: `WBTC-A` -> `WBTC_A`.
fn collateral_prefix(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

impl KeeperConfig {
    pub fn from_env() -> Result<Self, KeeperError> {
        let rpc_url = required("RPC_URL")?;
        // Subscriptions need a WebSocket endpoint; default to the RPC host
        // with the scheme swapped.
        let ws_url = match optional("WS_URL") {
            Some(url) => url,
            None => rpc_url.replacen("http", "ws", 1),
        };

        let mode: Mode = parse_or("MODE", Mode::Full)?;
        let check_interval_ms: u64 = parse_or("CHECK_INTERVAL", 30_000)?;
        let min_profit_pct: f64 = parse_or("MIN_PROFIT_PERCENTAGE", 5.0)?;

        let gas_limit: u64 = parse_or("GAS_LIMIT", 1_000_000)?;
        let gas_price: u128 = parse_or("GAS_PRICE", 1_000_000_000)?;
        let max_gas_price: u128 = parse_or("MAX_GAS_PRICE", 100_000_000_000)?;

        let max_collateral_per_auction = match optional("MAX_COLLATERAL_PER_AUCTION") {
            Some(raw) => math::f64_to_wad(parse::<f64>("MAX_COLLATERAL_PER_AUCTION", &raw)?),
            None => U256::MAX,
        };

        let addresses = ContractAddresses {
            vat: address("VAT_ADDRESS")?,
            dog: address("DOG_ADDRESS")?,
            flapper: address("FLAPPER_ADDRESS")?,
            flopper: address("FLOPPER_ADDRESS")?,
            kusd: address("KUSD_ADDRESS")?,
            kusd_join: address("KUSD_JOIN_ADDRESS")?,
            sklc: address("SKLC_ADDRESS")?,
            psm: address("PSM_ADDRESS")?,
            dex_router: address("DEX_ROUTER_ADDRESS")?,
            dex_pair: address("DEX_PAIR_ADDRESS")?,
        };

        let collaterals = Self::collaterals_from_env()?;
        if collaterals.is_empty() && (mode.runs_kick() || mode.runs_bid()) {
            return Err(KeeperError::Config(
                "COLLATERALS is empty but the configured MODE scans vaults or auctions".into(),
            ));
        }

        let peg = PegConfig {
            upper_limit_wad: math::f64_to_wad(parse_or("PEG_UPPER_LIMIT", 1.005)?),
            lower_limit_wad: math::f64_to_wad(parse_or("PEG_LOWER_LIMIT", 0.995)?),
            max_arb_amount: parse_or("MAX_ARB_AMOUNT", 1_000.0)?,
            min_profit_bps: (parse_or("MIN_ARB_PROFIT_PERCENTAGE", 0.5)? * 100.0) as i64,
            slippage_bps: (parse_or("ARB_SLIPPAGE_TOLERANCE", 0.5)? * 100.0) as u16,
            cooldown: Duration::from_millis(parse_or("ARB_COOLDOWN_MS", 60_000)?),
            max_trade_percent_of_pool: parse_or("MAX_TRADE_PERCENT_OF_POOL", 10)?,
            min_pool_liquidity: parse_or("MIN_POOL_LIQUIDITY", 5.0)?,
        };

        Ok(Self {
            private_key: required("PRIVATE_KEY")?,
            rpc_url,
            ws_url,
            chain_id: parse("CHAIN_ID", &required("CHAIN_ID")?)?,
            mode,
            check_interval: Duration::from_millis(check_interval_ms),
            min_profit_bps: (min_profit_pct * 100.0) as i64,
            gas_limit,
            gas_price,
            max_gas_price,
            max_collateral_per_auction,
            emergency_stop: flag("EMERGENCY_STOP"),
            frob_lookback_blocks: parse_or("FROB_LOOKBACK_BLOCKS", 100_000)?,
            addresses,
            collaterals,
            surplus_bidding_enabled: flag("SURPLUS_BIDDING_ENABLED"),
            debt_bidding_enabled: flag("DEBT_BIDDING_ENABLED"),
            peg,
        })
    }

    /// `COLLATERALS=WBTC-A,WETH-A` plus `WBTC_A_ADDRESS`, `WBTC_A_CLIPPER`,
    /// `WBTC_A_ORACLE` per entry.
    fn collaterals_from_env() -> Result<Vec<CollateralConfig>, KeeperError> {
        let Some(list) = optional("COLLATERALS") else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let prefix = collateral_prefix(name);
            out.push(CollateralConfig {
                name: name.to_string(),
                ilk: IlkId::from_name(name),
                gem: address(&format!("{prefix}_ADDRESS"))?,
                clipper: address(&format!("{prefix}_CLIPPER"))?,
                oracle: address(&format!("{prefix}_ORACLE"))?,
            });
        }
        Ok(out)
    }

    pub fn log_config(&self) {
        info!(mode = ?self.mode, chain_id = self.chain_id, "Keeper configuration loaded");
        info!(
            check_interval_ms = self.check_interval.as_millis() as u64,
            min_profit_bps = self.min_profit_bps,
            emergency_stop = self.emergency_stop,
            "Opportunity thresholds"
        );
        info!(
            gas_limit = self.gas_limit,
            gas_price_gwei = self.gas_price / 1_000_000_000,
            "Gas policy"
        );
        info!(
            collaterals = %self
                .collaterals
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            surplus_bidding = self.surplus_bidding_enabled,
            debt_bidding = self.debt_bidding_enabled,
            "Enabled markets"
        );
        info!(
            upper = math::wad_to_f64(self.peg.upper_limit_wad),
            lower = math::wad_to_f64(self.peg.lower_limit_wad),
            max_amount = self.peg.max_arb_amount,
            min_profit_bps = self.peg.min_profit_bps,
            cooldown_ms = self.peg.cooldown.as_millis() as u64,
            "Peg band"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("FULL".parse::<Mode>().unwrap(), Mode::Full);
        assert_eq!("kick".parse::<Mode>().unwrap(), Mode::Kick);
        assert_eq!("Bid".parse::<Mode>().unwrap(), Mode::Bid);
        assert_eq!("peg".parse::<Mode>().unwrap(), Mode::Peg);
        assert!("mainnet".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_gates_monitors() {
        assert!(Mode::Full.runs_kick() && Mode::Full.runs_bid() && Mode::Full.runs_peg());
        assert!(Mode::Kick.runs_kick() && !Mode::Kick.runs_bid() && !Mode::Kick.runs_peg());
        assert!(!Mode::Bid.runs_kick() && Mode::Bid.runs_bid());
        assert!(Mode::Peg.runs_peg() && !Mode::Peg.runs_bid());
    }

    #[test]
    fn collateral_prefix_normalizes() {
        assert_eq!(collateral_prefix("WBTC-A"), "WBTC_A");
        assert_eq!(collateral_prefix("wsteth-b"), "WSTETH_B");
    }

    #[test]
    fn percent_to_bps_conversion() {
        // 5.0% -> 500 bps, matching the MIN_PROFIT_PERCENTAGE contract
        assert_eq!((5.0f64 * 100.0) as i64, 500);
        assert_eq!((0.5f64 * 100.0) as i64, 50);
    }
}
