//! Chain facade over the protocol's read surface.
//!
//! Every other component reads chain state through [`ChainClient`]. Calls
//! are typed through the `sol!` bindings, carry a 15 second timeout, and
//! fail uniformly with `KeeperError::ChainRpc` so callers can apply one
//! retry policy.

use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use tracing::{debug, info};

use crate::contracts::{
    IClipper, IDexPair, IDexRouter, IDog, IErc20, IFlapper, IFlopper, IOracle, IPsm, IVat,
};
use crate::error::KeeperError;

/// Per-call timeout. A node slower than this is treated as unreachable.
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Fixed protocol addresses for one deployment.
#[derive(Debug, Clone)]
pub struct ContractAddresses {
    pub vat: Address,
    pub dog: Address,
    pub flapper: Address,
    pub flopper: Address,
    pub kusd: Address,
    pub kusd_join: Address,
    pub sklc: Address,
    pub psm: Address,
    pub dex_router: Address,
    pub dex_pair: Address,
}

/// Vault state read from `Vat.urns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrnState {
    /// Collateral amount (WAD).
    pub ink: U256,
    /// Normalized debt (WAD).
    pub art: U256,
}

/// Collateral-type state read from `Vat.ilks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IlkState {
    /// Total normalized debt (WAD).
    pub art_total: U256,
    /// Accumulated rate multiplier (RAY).
    pub rate: U256,
    /// Oracle price divided by liquidation ratio (RAY).
    pub spot: U256,
    /// Debt ceiling (RAD).
    pub line: U256,
    /// Minimum vault debt (RAD).
    pub dust: U256,
}

/// Global liquidation limits read from the Dog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DogState {
    /// Global liquidation ceiling (RAD).
    pub hole: U256,
    /// In-flight liquidation debt (RAD).
    pub dirt: U256,
}

/// Per-ilk liquidation parameters read from `Dog.ilks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DogIlkState {
    /// Collateral auction (Clipper) address for this ilk.
    pub clip: Address,
    /// Liquidation penalty multiplier.
    pub chop: U256,
    /// Per-ilk liquidation ceiling (RAD).
    pub hole: U256,
    /// Per-ilk in-flight debt (RAD).
    pub dirt: U256,
}

/// One Clipper sale slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleState {
    pub pos: U256,
    /// Debt to recover (RAD). Zero means the auction is closed.
    pub tab: U256,
    /// Collateral on sale (WAD).
    pub lot: U256,
    pub tot: U256,
    /// Vault owner before liquidation.
    pub usr: Address,
    /// Auction start (Unix seconds).
    pub tic: u64,
    /// Starting price (RAY).
    pub top: U256,
}

/// One Flapper/Flopper bid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnglishBidState {
    pub bid: U256,
    pub lot: U256,
    /// Current high bidder; the zero address marks an inactive slot.
    pub guy: Address,
    /// Bid expiry (Unix seconds, zero until the first bid).
    pub tic: u64,
    /// Auction expiry (Unix seconds).
    pub end: u64,
}

/// DEX pair reserves, raw (native token decimals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairReserves {
    pub reserve0: U256,
    pub reserve1: U256,
    pub last_ts: u32,
}

/// PSM facts that are fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsmStatic {
    pub gem: Address,
    pub kusd: Address,
    pub pocket: Address,
    pub gem_decimals: u8,
}

/// Chain read facade. Cheap to clone; creates a provider per call the way
/// the send path does (no connection pinning).
#[derive(Clone)]
pub struct ChainClient {
    http_url: String,
    ws_url: String,
    addrs: ContractAddresses,
}

async fn rpc<T, E, F>(what: &str, fut: F) -> Result<T, KeeperError>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(CALL_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(KeeperError::ChainRpc(format!("{what}: {e}"))),
        Err(_) => Err(KeeperError::ChainRpc(format!(
            "{what}: timed out after {}s",
            CALL_TIMEOUT.as_secs()
        ))),
    }
}

impl ChainClient {
    /// Build the facade and verify the node answers. A dead RPC must fail
    /// here, at startup, not on the first tick.
    pub async fn connect(
        http_url: &str,
        ws_url: &str,
        addrs: ContractAddresses,
    ) -> Result<Self, KeeperError> {
        let client = Self::new_unchecked(http_url, ws_url, addrs);
        let block = client.block_number().await?;
        info!(block, vat = %client.addrs.vat, dog = %client.addrs.dog, "Chain client connected");
        Ok(client)
    }

    /// Build without the startup probe. Used by tests.
    pub fn new_unchecked(http_url: &str, ws_url: &str, addrs: ContractAddresses) -> Self {
        Self {
            http_url: http_url.to_string(),
            ws_url: ws_url.to_string(),
            addrs,
        }
    }

    fn http(&self) -> Result<impl Provider + Clone, KeeperError> {
        let url = self
            .http_url
            .parse()
            .map_err(|e| KeeperError::ChainRpc(format!("bad rpc url: {e}")))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn addresses(&self) -> &ContractAddresses {
        &self.addrs
    }

    pub async fn block_number(&self) -> Result<u64, KeeperError> {
        let provider = self.http()?;
        rpc("eth_blockNumber", provider.get_block_number()).await
    }

    pub async fn chain_id(&self) -> Result<u64, KeeperError> {
        let provider = self.http()?;
        rpc("eth_chainId", provider.get_chain_id()).await
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, KeeperError> {
        let provider = self.http()?;
        rpc("eth_getLogs", provider.get_logs(filter)).await
    }

    // ------------------------------------------------------------------
    // Vat
    // ------------------------------------------------------------------

    pub async fn urn(&self, ilk: B256, urn: Address) -> Result<UrnState, KeeperError> {
        let provider = self.http()?;
        let vat = IVat::new(self.addrs.vat, &provider);
        let r = rpc("vat.urns", vat.urns(ilk, urn).call()).await?;
        Ok(UrnState {
            ink: r.ink,
            art: r.art,
        })
    }

    pub async fn ilk(&self, ilk: B256) -> Result<IlkState, KeeperError> {
        let provider = self.http()?;
        let vat = IVat::new(self.addrs.vat, &provider);
        let r = rpc("vat.ilks", vat.ilks(ilk).call()).await?;
        Ok(IlkState {
            art_total: r.Art,
            rate: r.rate,
            spot: r.spot,
            line: r.line,
            dust: r.dust,
        })
    }

    /// Internal stablecoin balance inside the Vat (RAD). The deployment
    /// keeps the Maker wire name `dai(address)`.
    pub async fn vat_kusd_balance(&self, usr: Address) -> Result<U256, KeeperError> {
        let provider = self.http()?;
        let vat = IVat::new(self.addrs.vat, &provider);
        let r = rpc("vat.dai", vat.dai(usr).call()).await?;
        Ok(r._0)
    }

    // ------------------------------------------------------------------
    // Dog
    // ------------------------------------------------------------------

    pub async fn dog_params(&self) -> Result<DogState, KeeperError> {
        let provider = self.http()?;
        let dog = IDog::new(self.addrs.dog, &provider);
        let hole = rpc("dog.Hole", dog.Hole().call()).await?._0;
        let dirt = rpc("dog.Dirt", dog.Dirt().call()).await?._0;
        Ok(DogState { hole, dirt })
    }

    pub async fn dog_ilk(&self, ilk: B256) -> Result<DogIlkState, KeeperError> {
        let provider = self.http()?;
        let dog = IDog::new(self.addrs.dog, &provider);
        let r = rpc("dog.ilks", dog.ilks(ilk).call()).await?;
        Ok(DogIlkState {
            clip: r.clip,
            chop: r.chop,
            hole: r.hole,
            dirt: r.dirt,
        })
    }

    // ------------------------------------------------------------------
    // Clipper
    // ------------------------------------------------------------------

    pub async fn clipper_sale(&self, clipper: Address, id: U256) -> Result<SaleState, KeeperError> {
        let provider = self.http()?;
        let clip = IClipper::new(clipper, &provider);
        let r = rpc("clipper.sales", clip.sales(id).call()).await?;
        Ok(SaleState {
            pos: r.pos,
            tab: r.tab,
            lot: r.lot,
            tot: r.tot,
            usr: r.usr,
            tic: r.tic.try_into().unwrap_or(u64::MAX),
            top: r.top,
        })
    }

    // ------------------------------------------------------------------
    // Flapper / Flopper
    // ------------------------------------------------------------------

    pub async fn flap_beg(&self) -> Result<U256, KeeperError> {
        let provider = self.http()?;
        let flapper = IFlapper::new(self.addrs.flapper, &provider);
        Ok(rpc("flapper.beg", flapper.beg().call()).await?._0)
    }

    pub async fn flap_bid(&self, id: U256) -> Result<EnglishBidState, KeeperError> {
        let provider = self.http()?;
        let flapper = IFlapper::new(self.addrs.flapper, &provider);
        let r = rpc("flapper.bids", flapper.bids(id).call()).await?;
        Ok(EnglishBidState {
            bid: r.bid,
            lot: r.lot,
            guy: r.guy,
            tic: r.tic.to::<u64>(),
            end: r.end.to::<u64>(),
        })
    }

    pub async fn flop_beg(&self) -> Result<U256, KeeperError> {
        let provider = self.http()?;
        let flopper = IFlopper::new(self.addrs.flopper, &provider);
        Ok(rpc("flopper.beg", flopper.beg().call()).await?._0)
    }

    pub async fn flop_bid(&self, id: U256) -> Result<EnglishBidState, KeeperError> {
        let provider = self.http()?;
        let flopper = IFlopper::new(self.addrs.flopper, &provider);
        let r = rpc("flopper.bids", flopper.bids(id).call()).await?;
        Ok(EnglishBidState {
            bid: r.bid,
            lot: r.lot,
            guy: r.guy,
            tic: r.tic.to::<u64>(),
            end: r.end.to::<u64>(),
        })
    }

    // ------------------------------------------------------------------
    // Oracle
    // ------------------------------------------------------------------

    /// Raw `peek()`: unsigned price (WAD) and a validity flag. Validity
    /// policy belongs to the price service, not the facade.
    pub async fn oracle_peek(&self, oracle: Address) -> Result<(U256, bool), KeeperError> {
        let provider = self.http()?;
        let feed = IOracle::new(oracle, &provider);
        let r = rpc("oracle.peek", feed.peek().call()).await?;
        Ok((r.val, r.has))
    }

    // ------------------------------------------------------------------
    // PSM
    // ------------------------------------------------------------------

    /// Deployment-fixed PSM facts: token addresses, pocket, gem decimals.
    pub async fn psm_static(&self) -> Result<PsmStatic, KeeperError> {
        let provider = self.http()?;
        let psm = IPsm::new(self.addrs.psm, &provider);
        let gem = rpc("psm.gem", psm.gem().call()).await?._0;
        let kusd = rpc("psm.kusd", psm.kusd().call()).await?._0;
        let pocket = rpc("psm.pocket", psm.pocket().call()).await?._0;
        let gem_decimals = self.erc20_decimals(gem).await?;
        debug!(%gem, %kusd, %pocket, gem_decimals, "PSM static state read");
        Ok(PsmStatic {
            gem,
            kusd,
            pocket,
            gem_decimals,
        })
    }

    /// Current PSM fees `(tin, tout)`, both WAD. Re-read per tick; fees
    /// are governance-mutable.
    pub async fn psm_fees(&self) -> Result<(U256, U256), KeeperError> {
        let provider = self.http()?;
        let psm = IPsm::new(self.addrs.psm, &provider);
        let tin = rpc("psm.tin", psm.tin().call()).await?._0;
        let tout = rpc("psm.tout", psm.tout().call()).await?._0;
        Ok((tin, tout))
    }

    // ------------------------------------------------------------------
    // DEX
    // ------------------------------------------------------------------

    pub async fn pair_reserves(&self) -> Result<PairReserves, KeeperError> {
        let provider = self.http()?;
        let pair = IDexPair::new(self.addrs.dex_pair, &provider);
        let r = rpc("pair.getReserves", pair.getReserves().call()).await?;
        Ok(PairReserves {
            reserve0: r.reserve0.to::<U256>(),
            reserve1: r.reserve1.to::<U256>(),
            last_ts: r.blockTimestampLast,
        })
    }

    pub async fn pair_token0(&self) -> Result<Address, KeeperError> {
        let provider = self.http()?;
        let pair = IDexPair::new(self.addrs.dex_pair, &provider);
        Ok(rpc("pair.token0", pair.token0().call()).await?._0)
    }

    pub async fn router_amounts_out(
        &self,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, KeeperError> {
        let provider = self.http()?;
        let router = IDexRouter::new(self.addrs.dex_router, &provider);
        let r = rpc(
            "router.getAmountsOut",
            router.getAmountsOut(amount_in, path).call(),
        )
        .await?;
        Ok(r.amounts)
    }

    // ------------------------------------------------------------------
    // ERC-20
    // ------------------------------------------------------------------

    pub async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, KeeperError> {
        let provider = self.http()?;
        let erc20 = IErc20::new(token, &provider);
        Ok(rpc("erc20.balanceOf", erc20.balanceOf(owner).call()).await?._0)
    }

    pub async fn erc20_decimals(&self, token: Address) -> Result<u8, KeeperError> {
        let provider = self.http()?;
        let erc20 = IErc20::new(token, &provider);
        Ok(rpc("erc20.decimals", erc20.decimals().call()).await?._0)
    }

    pub async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, KeeperError> {
        let provider = self.http()?;
        let erc20 = IErc20::new(token, &provider);
        Ok(rpc("erc20.allowance", erc20.allowance(owner, spender).call())
            .await?
            ._0)
    }

    /// Liveness probe for the health loop.
    pub async fn health_check(&self) -> Result<bool, KeeperError> {
        let block = self.block_number().await?;
        debug!(block, "Provider health check passed");
        Ok(block > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> ContractAddresses {
        ContractAddresses {
            vat: Address::repeat_byte(1),
            dog: Address::repeat_byte(2),
            flapper: Address::repeat_byte(3),
            flopper: Address::repeat_byte(4),
            kusd: Address::repeat_byte(5),
            kusd_join: Address::repeat_byte(6),
            sklc: Address::repeat_byte(7),
            psm: Address::repeat_byte(8),
            dex_router: Address::repeat_byte(9),
            dex_pair: Address::repeat_byte(10),
        }
    }

    #[tokio::test]
    async fn bad_url_surfaces_as_chain_rpc() {
        let client = ChainClient::new_unchecked("not a url", "ws://127.0.0.1:1", addrs());
        let err = client.block_number().await.unwrap_err();
        assert_eq!(err.kind(), "chain_rpc");
    }

    #[tokio::test]
    #[ignore] // Requires a local node
    async fn connect_probes_the_node() {
        let client = ChainClient::connect("http://127.0.0.1:8545", "ws://127.0.0.1:8546", addrs())
            .await
            .unwrap();
        assert!(client.health_check().await.unwrap());
    }
}
