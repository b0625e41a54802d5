//! Oracle price service with a per-collateral TTL cache.
//!
//! `get_price` returns RAY-scaled prices. The oracle speaks WAD; scaling
//! happens once at the cache boundary. A `valid = false` peek fails with
//! `InvalidOracle` and caches nothing, so the next tick retries.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use keeper_chain::{ChainClient, KeeperError};
use tracing::debug;

use crate::math;
use crate::time_utils::current_unix;
use crate::types::IlkId;

/// Default cache TTL.
pub const PRICE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price_ray: U256,
    fetched_at: u64,
}

impl CachedPrice {
    fn is_fresh(&self, ttl: Duration, now: u64) -> bool {
        now.saturating_sub(self.fetched_at) <= ttl.as_secs()
    }
}

/// Per-collateral oracle reader and cache.
pub struct PriceService {
    client: Arc<ChainClient>,
    oracles: DashMap<IlkId, Address>,
    cache: DashMap<IlkId, CachedPrice>,
    ttl: Duration,
}

impl PriceService {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self::with_ttl(client, PRICE_TTL)
    }

    pub fn with_ttl(client: Arc<ChainClient>, ttl: Duration) -> Self {
        Self {
            client,
            oracles: DashMap::new(),
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Register the price feed for a collateral. Called once at startup
    /// per enabled ilk.
    pub fn register_oracle(&self, ilk: IlkId, oracle: Address) {
        self.oracles.insert(ilk, oracle);
    }

    /// Market price for an ilk, RAY-scaled. Stale-but-within-TTL reads
    /// are served from cache.
    pub async fn get_price(&self, ilk: IlkId) -> Result<U256, KeeperError> {
        let now = current_unix();
        if let Some(cached) = self.cache.get(&ilk) {
            if cached.is_fresh(self.ttl, now) {
                return Ok(cached.price_ray);
            }
        }

        let oracle = *self
            .oracles
            .get(&ilk)
            .ok_or_else(|| KeeperError::Config(format!("no oracle registered for {ilk}")))?;

        let (price_wad, valid) = self.client.oracle_peek(oracle).await?;
        if !valid {
            return Err(KeeperError::InvalidOracle {
                ilk: ilk.name(),
            });
        }

        let price_ray = math::wad_to_ray(price_wad);
        self.cache.insert(
            ilk,
            CachedPrice {
                price_ray,
                fetched_at: now,
            },
        );
        debug!(%ilk, price = math::ray_to_f64(price_ray), "Oracle price cached");
        Ok(price_ray)
    }

    /// Drop every cached entry.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_freshness_window() {
        let entry = CachedPrice {
            price_ray: U256::from(1u64),
            fetched_at: 1_000,
        };
        let ttl = Duration::from_secs(30);
        assert!(entry.is_fresh(ttl, 1_000));
        assert!(entry.is_fresh(ttl, 1_030));
        assert!(!entry.is_fresh(ttl, 1_031));
        // A clock step backwards never expires the entry
        assert!(entry.is_fresh(ttl, 999));
    }
}
