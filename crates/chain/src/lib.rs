//! Chain access layer for the KUSD keeper.
//!
//! This crate provides:
//! - The read facade over the protocol contracts ([`ChainClient`])
//! - Inline `sol!` bindings for the full ABI surface the keeper consumes
//! - WebSocket event listeners for `Frob`, `Bark`, and auction `Kick` logs
//! - Legacy (type-0) transaction signing and submission with a single
//!   in-flight transaction guarantee
//! - The keeper error taxonomy

pub mod contracts;
mod error;
mod event_listener;
mod provider;
mod signer;

pub use contracts::{decode_ilk, encode_ilk, event_signatures};
pub use error::KeeperError;
pub use event_listener::{BarkEvent, EventListener, FlapKickEvent, FlopKickEvent, FrobEvent};
pub use provider::{
    ChainClient, ContractAddresses, DogIlkState, DogState, EnglishBidState, IlkState,
    PairReserves, PsmStatic, SaleState, UrnState,
};
pub use signer::{NonceManager, TxOutcome, TxSender};
