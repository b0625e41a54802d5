//! Fixed-point arithmetic on the protocol's three scales.
//!
//! WAD = 1e18, RAY = 1e27, RAD = 1e45. All comparisons and trade sizing
//! run on integers; products are widened through U512 so no intermediate
//! bit is ever lost, and truncation happens only in the final division,
//! toward zero. Floating point exists solely for log formatting.

use alloy::primitives::{U256, U512};

/// 1e18, the WAD scale (token amounts, normalized debt).
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// 1e27, the RAY scale (rates, prices).
pub const RAY: U256 = U256::from_limbs([11515845246265065472, 54210108, 0, 0]);

/// 1e45, the RAD scale (internal stablecoin balances, debt ceilings).
pub const RAD: U256 = U256::from_limbs([802379605485813760, 16178822382532126880, 2938735, 0]);

/// 1e9, the WAD -> RAY scale step.
const E9: U256 = U256::from_limbs([1_000_000_000, 0, 0, 0]);

/// Basis-points denominator.
const BPS: U256 = U256::from_limbs([10_000, 0, 0, 0]);

/// Pre-computed powers of ten for decimal normalization (10^0 ..= 10^38).
const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Fast power-of-ten lookup.
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

#[inline]
fn narrow(value: U512) -> U256 {
    if value.bit_len() > 256 {
        U256::MAX
    } else {
        let limbs = value.as_limbs();
        U256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]])
    }
}

/// `x * y / denom` with a 512-bit intermediate product.
#[inline]
pub fn mul_div(x: U256, y: U256, denom: U256) -> U256 {
    if denom.is_zero() {
        return U256::MAX;
    }
    let prod = x.to::<U512>() * y.to::<U512>();
    narrow(prod / denom.to::<U512>())
}

/// `(x * y) / WAD`.
#[inline(always)]
pub fn wmul(x: U256, y: U256) -> U256 {
    mul_div(x, y, WAD)
}

/// `(x * y) / RAY`.
#[inline(always)]
pub fn rmul(x: U256, y: U256) -> U256 {
    mul_div(x, y, RAY)
}

/// `(x * WAD) / y`.
#[inline(always)]
pub fn wdiv(x: U256, y: U256) -> U256 {
    mul_div(x, WAD, y)
}

/// `(x * RAY) / y`.
#[inline(always)]
pub fn rdiv(x: U256, y: U256) -> U256 {
    mul_div(x, RAY, y)
}

/// Scale a WAD value up to RAY.
#[inline(always)]
pub fn wad_to_ray(x: U256) -> U256 {
    x.to::<U512>()
        .checked_mul(E9.to::<U512>())
        .map(narrow)
        .unwrap_or(U256::MAX)
}

/// Safety test of a vault: `ink * spot >= art * rate`, computed without
/// division so no rounding can flip the verdict.
#[inline]
pub fn is_safe(ink: U256, art: U256, spot: U256, rate: U256) -> bool {
    let collateral_value = ink.to::<U512>() * spot.to::<U512>();
    let debt_value = art.to::<U512>() * rate.to::<U512>();
    collateral_value >= debt_value
}

/// Collateralization ratio in basis points: `(ink*spot) * 10000 /
/// (art*rate)`. `None` for an empty vault (ratio is +inf).
pub fn collateralization_ratio_bps(ink: U256, art: U256, spot: U256, rate: U256) -> Option<U256> {
    if art.is_zero() {
        return None;
    }
    let collateral_value = ink.to::<U512>() * spot.to::<U512>();
    let debt_value = art.to::<U512>() * rate.to::<U512>();
    if debt_value.is_zero() {
        return None;
    }
    Some(narrow(collateral_value * BPS.to::<U512>() / debt_value))
}

/// Dutch-auction price at `now`: linear decay from `top` at `tic` to zero
/// at `tic + tau`.
pub fn auction_price(top: U256, tic: u64, tau: u64, now: u64) -> U256 {
    if now <= tic || tau == 0 {
        return top;
    }
    let end = tic.saturating_add(tau);
    if now >= end {
        return U256::ZERO;
    }
    let remaining = end - now;
    mul_div(top, U256::from(remaining), U256::from(tau))
}

/// Profit of buying at `buy` and selling at `sell`, in signed basis
/// points. A zero `buy` price means unbounded profit.
pub fn profit_percentage_bps(buy: U256, sell: U256) -> i64 {
    if buy.is_zero() {
        return i64::MAX;
    }
    if sell >= buy {
        let bps = mul_div(sell - buy, BPS, buy);
        bps.try_into().unwrap_or(i64::MAX)
    } else {
        let bps = mul_div(buy - sell, BPS, buy);
        bps.try_into().map(|v: i64| -v).unwrap_or(i64::MIN)
    }
}

/// Basis points as a display percentage.
#[inline(always)]
pub fn bps_to_percent(bps: i64) -> f64 {
    bps as f64 / 100.0
}

/// WAD to f64, display only.
pub fn wad_to_f64(value: U256) -> f64 {
    scaled_to_f64(value, 1e18)
}

/// RAY to f64, display only.
pub fn ray_to_f64(value: U256) -> f64 {
    scaled_to_f64(value, 1e27)
}

/// RAD to f64, display only.
pub fn rad_to_f64(value: U256) -> f64 {
    scaled_to_f64(value, 1e45)
}

fn scaled_to_f64(value: U256, scale: f64) -> f64 {
    let limbs = value.as_limbs();
    let mut acc = 0.0f64;
    for (i, limb) in limbs.iter().enumerate() {
        acc += (*limb as f64) * 2.0f64.powi(64 * i as i32);
    }
    acc / scale
}

/// f64 to WAD, for configuration input only.
pub fn f64_to_wad(value: f64) -> U256 {
    if value <= 0.0 {
        return U256::ZERO;
    }
    U256::from((value * 1e18) as u128)
}

/// Normalize a native-decimals token amount to 18 decimals.
pub fn to_wad_decimals(amount: U256, decimals: u8) -> U256 {
    if decimals >= 18 {
        amount / pow10(decimals - 18)
    } else {
        amount.to::<U512>()
            .checked_mul(pow10(18 - decimals).to::<U512>())
            .map(narrow)
            .unwrap_or(U256::MAX)
    }
}

/// Inverse of [`to_wad_decimals`]; truncates toward zero.
pub fn from_wad_decimals(amount_wad: U256, decimals: u8) -> U256 {
    if decimals >= 18 {
        amount_wad.to::<U512>()
            .checked_mul(pow10(decimals - 18).to::<U512>())
            .map(narrow)
            .unwrap_or(U256::MAX)
    } else {
        amount_wad / pow10(18 - decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wad(n: u64) -> U256 {
        U256::from(n) * WAD
    }

    fn ray(n: u64) -> U256 {
        U256::from(n) * RAY
    }

    #[test]
    fn scale_constants_relate() {
        assert_eq!(WAD * E9, RAY);
        assert_eq!(WAD * RAY, RAD);
        assert_eq!(pow10(18), WAD);
        assert_eq!(pow10(27), RAY);
        assert_eq!(pow10(45), RAD);
    }

    #[test]
    fn wmul_wdiv_round_trip() {
        // wdiv(wmul(x, RAY), RAY) == x for exact multiples
        for n in [1u64, 7, 1_000, 123_456_789] {
            let x = wad(n);
            assert_eq!(wdiv(wmul(x, RAY), RAY), x);
            assert_eq!(rdiv(rmul(x, RAY), RAY), x);
        }
    }

    #[test]
    fn truncation_is_toward_zero() {
        // 1 / 3 at WAD scale: 0.333... truncates
        let third = wdiv(U256::from(1u64), U256::from(3u64));
        assert_eq!(third, U256::from(333_333_333_333_333_333u64));
    }

    #[test]
    fn wad_ray_scaling() {
        assert_eq!(wad_to_ray(wad(5)), ray(5));
    }

    #[test]
    fn is_safe_agrees_with_ratio() {
        let cases = [
            (wad(1), wad(21_000), ray(20_000), RAY),
            (wad(2), wad(21_000), ray(20_000), RAY),
            (wad(1), wad(20_000), ray(20_000), RAY),
            (wad(3), wad(1), ray(1), ray(2)),
        ];
        for (ink, art, spot, rate) in cases {
            let safe = is_safe(ink, art, spot, rate);
            let ratio = collateralization_ratio_bps(ink, art, spot, rate).unwrap();
            assert_eq!(safe, ratio >= U256::from(10_000u64), "ink={ink} art={art}");
        }
    }

    #[test]
    fn empty_vault_ratio_is_infinite() {
        assert!(collateralization_ratio_bps(wad(1), U256::ZERO, ray(100), RAY).is_none());
        assert!(is_safe(U256::ZERO, U256::ZERO, ray(100), RAY));
    }

    #[test]
    fn undercollateralized_vault_ratio() {
        // WBTC-A at spot 20_000, rate 1.0, vault (1 ink, 21_000 art):
        // ratio = 20000/21000 = 95.23%
        let ratio = collateralization_ratio_bps(wad(1), wad(21_000), ray(20_000), RAY).unwrap();
        assert_eq!(ratio, U256::from(9_523u64));
        assert!(!is_safe(wad(1), wad(21_000), ray(20_000), RAY));
    }

    #[test]
    fn auction_price_endpoints_and_midpoint() {
        let top = ray(100);
        let tic = 1_000;
        let tau = 21_600;

        assert_eq!(auction_price(top, tic, tau, 0), top);
        assert_eq!(auction_price(top, tic, tau, tic), top);
        assert_eq!(auction_price(top, tic, tau, tic + tau), U256::ZERO);
        assert_eq!(auction_price(top, tic, tau, tic + tau + 1), U256::ZERO);
        // Halfway through the 6 hour window the price has halved
        assert_eq!(auction_price(top, tic, tau, tic + 10_800), ray(50));
    }

    #[test]
    fn auction_price_is_non_increasing() {
        let top = ray(77);
        let tic = 5_000;
        let tau = 21_600;
        let mut last = auction_price(top, tic, tau, 0);
        for now in (0..30_000).step_by(97) {
            let price = auction_price(top, tic, tau, now);
            assert!(price <= last, "price rose at now={now}");
            last = price;
        }
    }

    #[test]
    fn profit_percentage_matches_spec_scenario() {
        // Buy at 50 RAY, market at 60 RAY: 20.00%
        let bps = profit_percentage_bps(ray(50), ray(60));
        assert_eq!(bps, 2_000);
        assert!((bps_to_percent(bps) - 20.0).abs() < f64::EPSILON);

        // Loss: buy 60, sell 50 = -16.66%
        assert_eq!(profit_percentage_bps(ray(60), ray(50)), -1_666);

        // Free collateral is unbounded profit
        assert_eq!(profit_percentage_bps(U256::ZERO, ray(1)), i64::MAX);
    }

    #[test]
    fn decimal_normalization_round_trips() {
        // 1000 units of a 6-decimal gem
        let native = U256::from(1_000_000_000u64);
        let as_wad = to_wad_decimals(native, 6);
        assert_eq!(as_wad, wad(1_000));
        assert_eq!(from_wad_decimals(as_wad, 6), native);
        // 18-decimal tokens pass through
        assert_eq!(to_wad_decimals(wad(5), 18), wad(5));
    }

    #[test]
    fn display_conversions_are_close() {
        assert!((wad_to_f64(wad(1_000)) - 1_000.0).abs() < 1e-6);
        assert!((ray_to_f64(ray(2)) - 2.0).abs() < 1e-9);
        assert!((rad_to_f64(RAD) - 1.0).abs() < 1e-9);
        assert_eq!(f64_to_wad(1.5), U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(f64_to_wad(-1.0), U256::ZERO);
    }

    #[test]
    fn mul_div_saturates_instead_of_wrapping() {
        assert_eq!(mul_div(U256::MAX, U256::MAX, U256::from(1u64)), U256::MAX);
        assert_eq!(mul_div(U256::from(1u64), U256::from(1u64), U256::ZERO), U256::MAX);
    }
}
