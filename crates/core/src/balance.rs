//! Movement of the stablecoin between the keeper's wallet and the Vat.
//!
//! The Vat accounts internally in RAD; the ERC-20 side is WAD. Joining is
//! a two-transaction sequence (approve the join adapter, then `join`);
//! the caller sees an atomic result, with the failing step named so an
//! operator can reconcile a half-completed move.

use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use keeper_chain::contracts::{IErc20, IKusdJoin, IVat};
use keeper_chain::{ChainClient, KeeperError, TxSender};
use tracing::{info, warn};

use crate::math;

/// Which leg of `move_to_vat` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    Approve,
    Join,
    Exit,
}

impl MoveStep {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Join => "join",
            Self::Exit => "exit",
        }
    }
}

fn annotate(err: KeeperError, step: MoveStep) -> KeeperError {
    match err {
        KeeperError::ChainRpc(m) => {
            KeeperError::ChainRpc(format!("{} step: {m}", step.as_str()))
        }
        KeeperError::TxUnderpriced(m) => {
            KeeperError::TxUnderpriced(format!("{} step: {m}", step.as_str()))
        }
        other => other,
    }
}

/// Keeper-side balance operations against the Vat and the stablecoin
/// ERC-20.
pub struct VatBalanceManager {
    client: Arc<ChainClient>,
    sender: Arc<TxSender>,
}

impl VatBalanceManager {
    pub fn new(client: Arc<ChainClient>, sender: Arc<TxSender>) -> Self {
        Self { client, sender }
    }

    /// Internal Vat balance (RAD).
    pub async fn vat_balance(&self) -> Result<U256, KeeperError> {
        self.client.vat_kusd_balance(self.sender.address).await
    }

    /// External ERC-20 balance (WAD).
    pub async fn wallet_balance(&self) -> Result<U256, KeeperError> {
        self.client
            .erc20_balance(self.client.addresses().kusd, self.sender.address)
            .await
    }

    /// One-time Vat authorization so the join adapter can `exit` the
    /// keeper's internal balance. Safe to repeat.
    pub async fn authorize_join(&self) -> Result<(), KeeperError> {
        let call = IVat::hopeCall {
            usr: self.client.addresses().kusd_join,
        };
        let outcome = self
            .sender
            .send(self.client.addresses().vat, Bytes::from(call.abi_encode()))
            .await?;
        info!(tx_hash = %outcome.hash, "Vat hope(join) confirmed");
        Ok(())
    }

    /// Move `amount_wad` of wallet stablecoin into the Vat. Approves the
    /// exact amount, then joins; both transactions must confirm.
    pub async fn move_to_vat(&self, amount_wad: U256) -> Result<(), KeeperError> {
        let addrs = self.client.addresses();

        let approve = IErc20::approveCall {
            spender: addrs.kusd_join,
            amount: amount_wad,
        };
        let outcome = self
            .sender
            .send(addrs.kusd, Bytes::from(approve.abi_encode()))
            .await
            .map_err(|e| {
                warn!(step = "approve", "move_to_vat failed before join; nothing moved");
                annotate(e, MoveStep::Approve)
            })?;
        info!(tx_hash = %outcome.hash, amount = math::wad_to_f64(amount_wad), "Join approval confirmed");

        let join = IKusdJoin::joinCall {
            usr: self.sender.address,
            wad: amount_wad,
        };
        let outcome = self
            .sender
            .send(addrs.kusd_join, Bytes::from(join.abi_encode()))
            .await
            .map_err(|e| {
                warn!(
                    step = "join",
                    "move_to_vat approve confirmed but join failed; allowance left open"
                );
                annotate(e, MoveStep::Join)
            })?;
        info!(tx_hash = %outcome.hash, amount = math::wad_to_f64(amount_wad), "Vat join confirmed");
        Ok(())
    }

    /// Move `amount_wad` of internal balance back to the wallet.
    pub async fn move_to_wallet(&self, amount_wad: U256) -> Result<(), KeeperError> {
        let exit = IKusdJoin::exitCall {
            usr: self.sender.address,
            wad: amount_wad,
        };
        let outcome = self
            .sender
            .send(
                self.client.addresses().kusd_join,
                Bytes::from(exit.abi_encode()),
            )
            .await
            .map_err(|e| annotate(e, MoveStep::Exit))?;
        info!(tx_hash = %outcome.hash, amount = math::wad_to_f64(amount_wad), "Vat exit confirmed");
        Ok(())
    }

    /// Top the Vat balance up to at least `min_wad`. Checks the wallet
    /// before sending anything: an underfunded wallet fails with
    /// `InsufficientFunds` and no transaction.
    pub async fn ensure_vat_balance(&self, min_wad: U256) -> Result<(), KeeperError> {
        let vat_rad = self.vat_balance().await?;
        let current_wad = vat_rad / math::RAY;
        if current_wad >= min_wad {
            return Ok(());
        }

        let needed = min_wad - current_wad;
        let wallet = self.wallet_balance().await?;
        if wallet < needed {
            return Err(KeeperError::InsufficientFunds {
                required: math::wad_to_f64(needed).to_string(),
                available: math::wad_to_f64(wallet).to_string(),
            });
        }

        info!(
            needed = math::wad_to_f64(needed),
            "Topping up Vat balance from wallet"
        );
        self.move_to_vat(needed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_prefixes_message_kinds() {
        let err = annotate(KeeperError::ChainRpc("timeout".into()), MoveStep::Join);
        assert!(err.to_string().contains("join step"));

        // Typed kinds pass through unchanged
        let err = annotate(
            KeeperError::InsufficientFunds {
                required: "1".into(),
                available: "0".into(),
            },
            MoveStep::Approve,
        );
        assert_eq!(err.kind(), "insufficient_funds");
    }

    #[test]
    fn rad_to_wad_floor_division() {
        // 1.5 WAD worth of RAD floors to 1 WAD + change
        let rad = math::RAY * (math::WAD + math::WAD / U256::from(2u64));
        assert_eq!(rad / math::RAY, math::WAD + math::WAD / U256::from(2u64));
    }
}
