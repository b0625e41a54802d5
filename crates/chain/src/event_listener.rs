//! WebSocket event listener for protocol events.
//!
//! Subscribes to `Frob` (vault mutations), `Bark` (liquidation kicks), and
//! the Flapper/Flopper `Kick` events, and replays historical `Frob` logs
//! for vault-set hydration. Logs are parsed manually from topics and data;
//! a log that does not match its declared shape is skipped, never fatal.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use tracing::{debug, info, warn};

use crate::contracts::event_signatures;
use crate::error::KeeperError;
use crate::provider::ChainClient;

/// Block window per historical `eth_getLogs` request. Providers commonly
/// reject wider ranges.
const HYDRATION_CHUNK: u64 = 10_000;

/// A vault mutation observed on the Vat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrobEvent {
    pub ilk: B256,
    pub urn: Address,
    pub dink: U256,
    pub dart: U256,
    pub block_number: u64,
}

/// A liquidation kick observed on the Dog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarkEvent {
    pub ilk: B256,
    pub urn: Address,
    pub ink: U256,
    pub art: U256,
    /// Debt sent to auction, tab (RAD).
    pub due: U256,
    pub clip: Address,
    pub id: U256,
    pub block_number: u64,
}

/// A surplus-auction kick observed on the Flapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlapKickEvent {
    pub id: U256,
    pub lot: U256,
    pub bid: U256,
    pub block_number: u64,
}

/// A debt-auction kick observed on the Flopper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlopKickEvent {
    pub id: U256,
    pub lot: U256,
    pub bid: U256,
    pub gal: Address,
    pub block_number: u64,
}

type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Subscription source for the monitors.
pub struct EventListener {
    ws_url: String,
    vat: Address,
    dog: Address,
    flapper: Address,
    flopper: Address,
}

impl EventListener {
    pub fn new(
        ws_url: impl Into<String>,
        vat: Address,
        dog: Address,
        flapper: Address,
        flopper: Address,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            vat,
            dog,
            flapper,
            flopper,
        }
    }

    /// Replay historical `Frob` logs over `[head - lookback, head]`,
    /// chunked so providers with range caps stay happy.
    pub async fn hydrate_frobs(
        &self,
        client: &ChainClient,
        lookback: u64,
    ) -> Result<Vec<FrobEvent>, KeeperError> {
        let head = client.block_number().await?;
        let start = head.saturating_sub(lookback);
        info!(start, head, "Hydrating vault set from Frob history");

        let mut events = Vec::new();
        let mut from = start;
        while from <= head {
            let to = (from + HYDRATION_CHUNK - 1).min(head);
            let filter = Filter::new()
                .address(self.vat)
                .event_signature(event_signatures::frob())
                .from_block(from)
                .to_block(to);
            let logs = client.get_logs(&filter).await?;
            events.extend(logs.iter().filter_map(parse_frob));
            from = to + 1;
        }

        info!(count = events.len(), "Frob history replayed");
        Ok(events)
    }

    /// Subscribe to live `Frob` logs.
    pub async fn subscribe_frobs(&self) -> Result<EventStream<FrobEvent>, KeeperError> {
        self.subscribe(
            Filter::new()
                .address(self.vat)
                .event_signature(event_signatures::frob()),
            "Frob",
            parse_frob,
        )
        .await
    }

    /// Subscribe to live `Bark` logs.
    pub async fn subscribe_barks(&self) -> Result<EventStream<BarkEvent>, KeeperError> {
        self.subscribe(
            Filter::new()
                .address(self.dog)
                .event_signature(event_signatures::bark()),
            "Bark",
            parse_bark,
        )
        .await
    }

    /// Subscribe to surplus-auction kicks.
    pub async fn subscribe_flap_kicks(&self) -> Result<EventStream<FlapKickEvent>, KeeperError> {
        self.subscribe(
            Filter::new()
                .address(self.flapper)
                .event_signature(event_signatures::flap_kick()),
            "Flap Kick",
            parse_flap_kick,
        )
        .await
    }

    /// Subscribe to debt-auction kicks.
    pub async fn subscribe_flop_kicks(&self) -> Result<EventStream<FlopKickEvent>, KeeperError> {
        self.subscribe(
            Filter::new()
                .address(self.flopper)
                .event_signature(event_signatures::flop_kick()),
            "Flop Kick",
            parse_flop_kick,
        )
        .await
    }

    async fn subscribe<T: Send + 'static>(
        &self,
        filter: Filter,
        label: &'static str,
        parse: fn(&Log) -> Option<T>,
    ) -> Result<EventStream<T>, KeeperError> {
        info!(ws_url = %self.ws_url, event = label, "Subscribing to logs");

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(|e| KeeperError::ChainRpc(format!("ws connect: {e}")))?;
        let sub = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| KeeperError::ChainRpc(format!("subscribe {label}: {e}")))?;
        let inner = sub.into_stream();

        // The provider lives inside the stream state; dropping it would
        // close the WebSocket under us.
        let stream = futures::stream::unfold(
            (provider, inner),
            move |(provider, mut stream)| async move {
                loop {
                    match stream.next().await {
                        Some(log) => {
                            if let Some(event) = parse(&log) {
                                return Some((event, (provider, stream)));
                            }
                            debug!(event = label, "Skipping unparseable log");
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

fn word(data: &[u8], index: usize) -> Option<U256> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return None;
    }
    Some(U256::from_be_slice(&data[start..end]))
}

fn address_word(data: &[u8], index: usize) -> Option<Address> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return None;
    }
    Some(Address::from_slice(&data[start + 12..end]))
}

/// Frob(bytes32 indexed ilk, address indexed urn, uint256 dink, uint256 dart)
fn parse_frob(log: &Log) -> Option<FrobEvent> {
    if log.topics().len() < 3 {
        warn!(address = %log.address(), "Frob log with insufficient topics");
        return None;
    }
    let ilk = log.topics()[1];
    let urn = Address::from_slice(&log.topics()[2][12..]);
    let data = log.data().data.as_ref();

    Some(FrobEvent {
        ilk,
        urn,
        dink: word(data, 0)?,
        dart: word(data, 1)?,
        block_number: log.block_number.unwrap_or(0),
    })
}

/// Bark(bytes32 indexed ilk, address indexed urn, uint256 ink, uint256 art,
///      uint256 due, address clip, uint256 indexed id)
fn parse_bark(log: &Log) -> Option<BarkEvent> {
    if log.topics().len() < 4 {
        warn!(address = %log.address(), "Bark log with insufficient topics");
        return None;
    }
    let ilk = log.topics()[1];
    let urn = Address::from_slice(&log.topics()[2][12..]);
    let id = U256::from_be_bytes(log.topics()[3].0);
    let data = log.data().data.as_ref();

    Some(BarkEvent {
        ilk,
        urn,
        ink: word(data, 0)?,
        art: word(data, 1)?,
        due: word(data, 2)?,
        clip: address_word(data, 3)?,
        id,
        block_number: log.block_number.unwrap_or(0),
    })
}

/// Kick(uint256 id, uint256 lot, uint256 bid)
fn parse_flap_kick(log: &Log) -> Option<FlapKickEvent> {
    let data = log.data().data.as_ref();
    Some(FlapKickEvent {
        id: word(data, 0)?,
        lot: word(data, 1)?,
        bid: word(data, 2)?,
        block_number: log.block_number.unwrap_or(0),
    })
}

/// Kick(uint256 id, uint256 lot, uint256 bid, address indexed gal)
fn parse_flop_kick(log: &Log) -> Option<FlopKickEvent> {
    if log.topics().len() < 2 {
        return None;
    }
    let data = log.data().data.as_ref();
    Some(FlopKickEvent {
        id: word(data, 0)?,
        lot: word(data, 1)?,
        bid: word(data, 2)?,
        gal: Address::from_slice(&log.topics()[1][12..]),
        block_number: log.block_number.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};
    use crate::contracts::encode_ilk;

    fn log_with(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xAA),
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_hash: None,
            block_number: Some(42),
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: None,
            removed: false,
        }
    }

    fn pad_word(value: u64) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&value.to_be_bytes());
        out
    }

    #[test]
    fn parses_frob() {
        let ilk = encode_ilk("WBTC-A");
        let urn = Address::repeat_byte(0x11);
        let mut urn_topic = [0u8; 32];
        urn_topic[12..].copy_from_slice(urn.as_slice());

        let mut data = Vec::new();
        data.extend_from_slice(&pad_word(1_000));
        data.extend_from_slice(&pad_word(2_000));

        let log = log_with(
            vec![event_signatures::frob(), ilk, B256::new(urn_topic)],
            data,
        );
        let event = parse_frob(&log).unwrap();
        assert_eq!(event.ilk, ilk);
        assert_eq!(event.urn, urn);
        assert_eq!(event.dink, U256::from(1_000u64));
        assert_eq!(event.dart, U256::from(2_000u64));
        assert_eq!(event.block_number, 42);
    }

    #[test]
    fn frob_with_short_data_is_skipped() {
        let ilk = encode_ilk("WBTC-A");
        let log = log_with(
            vec![event_signatures::frob(), ilk, B256::repeat_byte(1)],
            vec![0u8; 16],
        );
        assert!(parse_frob(&log).is_none());
    }

    #[test]
    fn parses_bark() {
        let ilk = encode_ilk("WETH-A");
        let urn = Address::repeat_byte(0x22);
        let clip = Address::repeat_byte(0x33);
        let mut urn_topic = [0u8; 32];
        urn_topic[12..].copy_from_slice(urn.as_slice());
        let id_topic = B256::new(pad_word(7));

        let mut data = Vec::new();
        data.extend_from_slice(&pad_word(10)); // ink
        data.extend_from_slice(&pad_word(20)); // art
        data.extend_from_slice(&pad_word(30)); // due
        let mut clip_word = [0u8; 32];
        clip_word[12..].copy_from_slice(clip.as_slice());
        data.extend_from_slice(&clip_word);

        let log = log_with(
            vec![
                event_signatures::bark(),
                ilk,
                B256::new(urn_topic),
                id_topic,
            ],
            data,
        );
        let event = parse_bark(&log).unwrap();
        assert_eq!(event.id, U256::from(7u64));
        assert_eq!(event.clip, clip);
        assert_eq!(event.due, U256::from(30u64));
    }

    #[test]
    fn parses_flap_and_flop_kicks() {
        let mut data = Vec::new();
        data.extend_from_slice(&pad_word(1)); // id
        data.extend_from_slice(&pad_word(2)); // lot
        data.extend_from_slice(&pad_word(3)); // bid

        let flap = parse_flap_kick(&log_with(vec![event_signatures::flap_kick()], data.clone()))
            .unwrap();
        assert_eq!(
            (flap.id, flap.lot, flap.bid),
            (U256::from(1u64), U256::from(2u64), U256::from(3u64))
        );

        let gal = Address::repeat_byte(0x44);
        let mut gal_topic = [0u8; 32];
        gal_topic[12..].copy_from_slice(gal.as_slice());
        let flop = parse_flop_kick(&log_with(
            vec![event_signatures::flop_kick(), B256::new(gal_topic)],
            data,
        ))
        .unwrap();
        assert_eq!(flop.gal, gal);
        assert_eq!(flop.bid, U256::from(3u64));
    }
}
