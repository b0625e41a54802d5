//! Error taxonomy for the keeper.
//!
//! Every recoverable failure maps to one of these kinds; the orchestrator
//! decides retry behavior per kind (backoff for RPC, skip-and-retry-next-tick
//! for oracle and funds issues, no retry for reverts).

use alloy::primitives::B256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    /// Invalid or missing configuration. Fatal; the process exits 1.
    #[error("configuration error: {0}")]
    Config(String),

    /// Node unreachable or returned a malformed response.
    #[error("chain rpc error: {0}")]
    ChainRpc(String),

    /// Oracle `peek()` returned `valid = false`.
    #[error("oracle for {ilk} returned an invalid price")]
    InvalidOracle { ilk: String },

    /// Wallet, Vat, or PSM pocket balance below what the action requires.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    /// Debt ceiling, pool-trade cap, or slippage bound would be violated.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Transaction mined but reverted. Usually a competing keeper won.
    #[error("transaction {hash} reverted (reason: {reason:?})")]
    TxReverted { hash: B256, reason: Option<String> },

    /// Node rejected the transaction as underpriced.
    #[error("transaction underpriced: {0}")]
    TxUnderpriced(String),

    /// Receipt wait timed out twice; the outcome is unknown.
    #[error("transaction {hash} outcome unknown after receipt timeout")]
    TxUnknown { hash: B256 },

    /// Shutdown signal received.
    #[error("interrupted by signal")]
    Interrupted,
}

impl KeeperError {
    /// Stable name for health counters and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ChainRpc(_) => "chain_rpc",
            Self::InvalidOracle { .. } => "invalid_oracle",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::TxReverted { .. } => "tx_reverted",
            Self::TxUnderpriced(_) => "tx_underpriced",
            Self::TxUnknown { .. } => "tx_unknown",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether the orchestrator should retry with backoff rather than
    /// dropping the opportunity until the next tick.
    pub fn is_rpc(&self) -> bool {
        matches!(self, Self::ChainRpc(_))
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        let err = KeeperError::ChainRpc("ws closed".into());
        assert_eq!(err.kind(), "chain_rpc");
        assert!(err.is_rpc());

        let err = KeeperError::InsufficientFunds {
            required: "500".into(),
            available: "400".into(),
        };
        assert_eq!(err.kind(), "insufficient_funds");
        assert!(!err.is_rpc());
    }

    #[test]
    fn reverted_display_includes_reason() {
        let err = KeeperError::TxReverted {
            hash: B256::ZERO,
            reason: Some("Dog/not-unsafe".into()),
        };
        assert!(err.to_string().contains("Dog/not-unsafe"));
    }
}
