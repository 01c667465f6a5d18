//! The append-only event log.
//!
//! Each committed transition appends one [`LedgerEvent`], named after the state the item
//! entered. Events for the same item are hash-linked through `parent`, so an item's history
//! can be checked end to end against the digest stored on the item itself.
use super::error::LedgerError;
use super::item::{Address, Item, Sku, State, TimeStamp, Upc};
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct LedgerEvent {
    #[n(0)]
    pub seq: u64, // position in the global log, starting at 1
    #[n(1)]
    pub kind: State,
    #[n(2)]
    pub upc: Upc,
    #[n(3)]
    pub sku: Sku,
    #[n(4)]
    pub actor: Address,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>,
    #[n(6)]
    pub parent: Option<String>, // digest of the previous event for this item
}

impl LedgerEvent {
    pub fn new(seq: u64, item: &Item, actor: &Address) -> Self {
        Self {
            seq,
            kind: item.state,
            upc: item.upc,
            sku: item.sku,
            actor: actor.clone(),
            timestamp: TimeStamp::new(),
            parent: item.head.clone(),
        }
    }
    /// Encode to cbor and return its sha256 digest alongside
    pub fn build(&self) -> Result<(String, Vec<u8>), LedgerError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Check that `events` form an unbroken chain for one item ending at `head`.
pub fn verify_chain(events: &[LedgerEvent], head: Option<&str>) -> Result<bool, LedgerError> {
    let mut previous: Option<String> = None;

    for (index, event) in events.iter().enumerate() {
        if event.parent != previous {
            return Ok(false);
        }
        // the first event is always the creation of the item
        if index == 0 && event.kind != State::Produced {
            return Ok(false);
        }
        if index > 0 && u8::from(event.kind) != u8::from(events[index - 1].kind) + 1 {
            return Ok(false);
        }
        previous = Some(event.build()?.0);
    }

    Ok(previous.as_deref() == head)
}
