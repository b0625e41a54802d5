//! Contract interfaces for the KUSD protocol surface.
//!
//! Inline `sol!` bindings for every contract the keeper touches: the Vat
//! (vault engine), Dog (liquidation module), Clipper (Dutch collateral
//! auctions), Flapper/Flopper (English surplus and debt auctions), the
//! per-collateral price oracles, the PSM, the DEX router/pair, and ERC-20.
//!
//! The deployment under test is a Maker ABI fork, so the wire names keep
//! the Maker spellings (`dai(address)` for the internal stablecoin balance,
//! `ilks`, `urns`); the Rust-facing layer renames where it helps.

use alloy::primitives::{keccak256, B256};
use alloy::sol;

sol! {
    /// Core vault engine. Vault state is keyed by (ilk, urn address).
    #[sol(rpc)]
    interface IVat {
        event Frob(bytes32 indexed ilk, address indexed urn, uint256 dink, uint256 dart);

        function urns(bytes32 ilk, address urn) external view returns (uint256 ink, uint256 art);
        function ilks(bytes32 ilk) external view returns (uint256 Art, uint256 rate, uint256 spot, uint256 line, uint256 dust);
        function dai(address usr) external view returns (uint256);
        function hope(address usr) external;
    }

    /// Liquidation module. `bark` seizes an unsafe vault and kicks a
    /// Clipper auction.
    #[sol(rpc)]
    interface IDog {
        event Bark(
            bytes32 indexed ilk,
            address indexed urn,
            uint256 ink,
            uint256 art,
            uint256 due,
            address clip,
            uint256 indexed id
        );

        function Hole() external view returns (uint256);
        function Dirt() external view returns (uint256);
        function ilks(bytes32 ilk) external view returns (address clip, uint256 chop, uint256 hole, uint256 dirt);
        function bark(bytes32 ilk, address urn, address kpr) external returns (uint256 id);
    }

    /// Dutch collateral auction. Price decays from `top` at `tic`.
    #[sol(rpc)]
    interface IClipper {
        event Kick(
            uint256 indexed id,
            uint256 top,
            uint256 tab,
            uint256 lot,
            address indexed usr,
            address indexed kpr,
            uint256 coin
        );
        event Take(
            uint256 indexed id,
            uint256 max,
            uint256 price,
            uint256 owe,
            uint256 tab,
            uint256 lot,
            address indexed usr
        );

        function sales(uint256 id) external view returns (
            uint256 pos,
            uint256 tab,
            uint256 lot,
            uint256 tot,
            address usr,
            uint256 tic,
            uint256 top
        );
        function take(uint256 id, uint256 amt, uint256 max, address who, bytes calldata data) external;
    }

    /// Surplus auction: stablecoin lot sold for rising sKLC bids.
    #[sol(rpc)]
    interface IFlapper {
        event Kick(uint256 id, uint256 lot, uint256 bid);

        function beg() external view returns (uint256);
        function bids(uint256 id) external view returns (uint256 bid, uint256 lot, address guy, uint48 tic, uint48 end);
        function tend(uint256 id, uint256 lot, uint256 bid) external;
    }

    /// Debt auction: fixed stablecoin bid for a shrinking sKLC lot.
    #[sol(rpc)]
    interface IFlopper {
        event Kick(uint256 id, uint256 lot, uint256 bid, address indexed gal);

        function beg() external view returns (uint256);
        function bids(uint256 id) external view returns (uint256 bid, uint256 lot, address guy, uint48 tic, uint48 end);
        function dent(uint256 id, uint256 lot, uint256 bid) external;
    }

    /// Per-collateral price feed. `has = false` means the value must not
    /// be used.
    #[sol(rpc)]
    interface IOracle {
        function peek() external view returns (uint256 val, bool has);
    }

    /// Peg Stability Module: fee-bounded 1:1 gem <-> stablecoin facility.
    #[sol(rpc)]
    interface IPsm {
        function sellGem(address usr, uint256 gemAmt) external;
        function buyGem(address usr, uint256 gemAmt) external;
        function tin() external view returns (uint256);
        function tout() external view returns (uint256);
        function gem() external view returns (address);
        function kusd() external view returns (address);
        function pocket() external view returns (address);
    }

    /// Join adapter between the external stablecoin ERC-20 and the Vat
    /// internal balance.
    #[sol(rpc)]
    interface IKusdJoin {
        function join(address usr, uint256 wad) external;
        function exit(address usr, uint256 wad) external;
    }

    /// UniswapV2-style router, used for the DEX leg of peg arbitrage.
    #[sol(rpc)]
    interface IDexRouter {
        function getAmountsOut(uint256 amountIn, address[] calldata path) external view returns (uint256[] memory amounts);
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);
    }

    /// UniswapV2-style pair, read for reserves.
    #[sol(rpc)]
    interface IDexPair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }

    #[sol(rpc)]
    interface IErc20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// Event signatures used for log filters. Computed at runtime from the
/// canonical declarations so they cannot drift from the bindings.
pub mod event_signatures {
    use super::*;

    pub fn frob() -> B256 {
        keccak256("Frob(bytes32,address,uint256,uint256)".as_bytes())
    }

    pub fn bark() -> B256 {
        keccak256("Bark(bytes32,address,uint256,uint256,uint256,address,uint256)".as_bytes())
    }

    pub fn flap_kick() -> B256 {
        keccak256("Kick(uint256,uint256,uint256)".as_bytes())
    }

    pub fn flop_kick() -> B256 {
        keccak256("Kick(uint256,uint256,uint256,address)".as_bytes())
    }

    pub fn clip_kick() -> B256 {
        keccak256(
            "Kick(uint256,uint256,uint256,uint256,address,address,uint256)".as_bytes(),
        )
    }
}

/// A collateral type tag: UTF-8 name right-padded with zero bytes to 32.
pub fn encode_ilk(name: &str) -> B256 {
    let bytes = name.as_bytes();
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    B256::new(out)
}

/// Inverse of [`encode_ilk`]: drop trailing zero bytes, interpret the
/// prefix as UTF-8. Non-UTF-8 tags render as hex.
pub fn decode_ilk(tag: &B256) -> String {
    let end = tag
        .as_slice()
        .iter()
        .rposition(|b| *b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    match std::str::from_utf8(&tag.as_slice()[..end]) {
        Ok(s) => s.to_string(),
        Err(_) => format!("0x{}", alloy::primitives::hex::encode(tag.as_slice())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, U256};
    use alloy::sol_types::SolCall;

    #[test]
    fn ilk_name_round_trip() {
        let tag = encode_ilk("WBTC-A");
        assert_eq!(&tag.as_slice()[..6], b"WBTC-A");
        assert!(tag.as_slice()[6..].iter().all(|b| *b == 0));
        assert_eq!(decode_ilk(&tag), "WBTC-A");
    }

    #[test]
    fn empty_ilk_decodes_empty() {
        assert_eq!(decode_ilk(&B256::ZERO), "");
    }

    #[test]
    fn overlong_ilk_is_truncated() {
        let name = "A".repeat(40);
        let tag = encode_ilk(&name);
        assert_eq!(decode_ilk(&tag), "A".repeat(32));
    }

    #[test]
    fn selectors_match_canonical_signatures() {
        // Guards against the bindings drifting from the deployed surface.
        for (selector, signature) in [
            (IDog::barkCall::SELECTOR, "bark(bytes32,address,address)"),
            (
                IClipper::takeCall::SELECTOR,
                "take(uint256,uint256,uint256,address,bytes)",
            ),
            (IFlapper::tendCall::SELECTOR, "tend(uint256,uint256,uint256)"),
            (IFlopper::dentCall::SELECTOR, "dent(uint256,uint256,uint256)"),
            (IPsm::sellGemCall::SELECTOR, "sellGem(address,uint256)"),
            (IPsm::buyGemCall::SELECTOR, "buyGem(address,uint256)"),
            (IKusdJoin::joinCall::SELECTOR, "join(address,uint256)"),
            (IKusdJoin::exitCall::SELECTOR, "exit(address,uint256)"),
        ] {
            let expected = &keccak256(signature.as_bytes())[..4];
            assert_eq!(&selector[..], expected, "selector mismatch for {signature}");
        }

        let call = IDog::barkCall {
            ilk: encode_ilk("WBTC-A"),
            urn: Address::ZERO,
            kpr: Address::ZERO,
        };
        assert!(!call.abi_encode().is_empty());
    }

    #[test]
    fn take_calldata_encodes() {
        let call = IClipper::takeCall {
            id: U256::from(7u64),
            amt: U256::from(1u64),
            max: U256::from(2u64),
            who: Address::ZERO,
            data: Bytes::new(),
        };
        let encoded = call.abi_encode();
        // 4-byte selector + 5 head words + empty bytes tail word
        assert_eq!(encoded.len(), 4 + 32 * 6);
    }

    #[test]
    fn event_signatures_are_distinct() {
        let sigs = [
            event_signatures::frob(),
            event_signatures::bark(),
            event_signatures::flap_kick(),
            event_signatures::flop_kick(),
            event_signatures::clip_kick(),
        ];
        for (i, a) in sigs.iter().enumerate() {
            for b in sigs.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
