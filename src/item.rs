//! Item records, identities and the lifecycle stages they move through
use super::error::LedgerError;
use super::role::Role;
use super::utils;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

pub type Upc = u64;
pub type Sku = u64;
pub type Amount = u64;

/// Authenticated identity of a caller or party. Opaque to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

/// Lifecycle stages in their only permitted order.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum State {
    #[n(0)]
    Produced,
    #[n(1)]
    Processed,
    #[n(2)]
    Packed,
    #[n(3)]
    ForSale,
    #[n(4)]
    Sold,
    #[n(5)]
    Shipped,
    #[n(6)]
    Received,
    #[n(7)]
    Purchased,
}

// Provenance supplied by the producer. Also the draft for a new item
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProductDetails {
    producer_id: Option<Address>,
    producer_name: String,
    producer_information: String,
    producer_latitude: String,
    producer_longitude: String,
    product_notes: String,
}

// Key is the upc of the item
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Item {
    #[n(0)]
    pub sku: Sku,
    #[n(1)]
    pub upc: Upc,
    #[n(2)]
    pub owner_id: Address,
    #[n(3)]
    pub producer_id: Address,
    #[n(4)]
    pub producer_name: String,
    #[n(5)]
    pub producer_information: String,
    #[n(6)]
    pub producer_latitude: String,
    #[n(7)]
    pub producer_longitude: String,
    #[n(8)]
    pub product_notes: String,
    #[n(9)]
    pub product_price: Amount, // zero until offered for sale
    #[n(10)]
    pub distributor_id: Option<Address>,
    #[n(11)]
    pub retailer_id: Option<Address>,
    #[n(12)]
    pub consumer_id: Option<Address>,
    #[n(13)]
    pub state: State,
    #[n(14)]
    pub head: Option<String>, // digest of the latest event for this item
}

/// Who made the item and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub sku: Sku,
    pub upc: Upc,
    pub owner_id: Address,
    pub producer_id: Address,
    pub producer_name: String,
    pub producer_information: String,
    pub producer_latitude: String,
    pub producer_longitude: String,
}

/// Where the item is in the chain and who has handled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Custody {
    pub sku: Sku,
    pub upc: Upc,
    pub product_id: u128,
    pub product_notes: String,
    pub product_price: Amount,
    pub state: State,
    pub distributor_id: Option<Address>,
    pub retailer_id: Option<Address>,
    pub consumer_id: Option<Address>,
}

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
    /// Mint a fresh bech32m address under the given human readable prefix
    pub fn generate(hrp: &str) -> anyhow::Result<Self> {
        Ok(Self(utils::new_uuid_to_bech32(hrp)?))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl State {
    pub const ALL: [State; 8] = [
        State::Produced,
        State::Processed,
        State::Packed,
        State::ForSale,
        State::Sold,
        State::Shipped,
        State::Received,
        State::Purchased,
    ];

    pub fn name(self) -> &'static str {
        match self {
            State::Produced => "Produced",
            State::Processed => "Processed",
            State::Packed => "Packed",
            State::ForSale => "ForSale",
            State::Sold => "Sold",
            State::Shipped => "Shipped",
            State::Received => "Received",
            State::Purchased => "Purchased",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<State> for u8 {
    fn from(value: State) -> Self {
        value as u8
    }
}

impl ProductDetails {
    /// Construct an empty draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_producer(mut self, producer_id: Address) -> Self {
        self.producer_id = Some(producer_id);
        self
    }
    pub fn set_producer_name(mut self, name: &str) -> Self {
        self.producer_name = name.to_owned();
        self
    }
    pub fn set_producer_information(mut self, information: &str) -> Self {
        self.producer_information = information.to_owned();
        self
    }
    pub fn set_location(mut self, latitude: &str, longitude: &str) -> Self {
        self.producer_latitude = latitude.to_owned();
        self.producer_longitude = longitude.to_owned();
        self
    }
    pub fn set_product_notes(mut self, notes: &str) -> Self {
        self.product_notes = notes.to_owned();
        self
    }
    /// Latitude within [-90, 90] and longitude within [-180, 180], in decimal degrees.
    /// Locations are stored as given; callers that want decimal coordinates check here.
    pub fn validate_location(&self) -> bool {
        let latitude = self.producer_latitude.trim().parse::<f64>();
        let longitude = self.producer_longitude.trim().parse::<f64>();

        match (latitude, longitude) {
            (Ok(lat), Ok(long)) => (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&long),
            _ => false,
        }
    }
    /// The only hard requirement: an item must name its producer
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.producer_id.is_none() {
            return Err(LedgerError::InvalidDetails("producer is not set".into()));
        }
        Ok(())
    }
}

impl Item {
    /// A freshly produced item, held by its producer
    pub fn new(sku: Sku, upc: Upc, details: ProductDetails) -> Result<Self, LedgerError> {
        let ProductDetails {
            producer_id,
            producer_name,
            producer_information,
            producer_latitude,
            producer_longitude,
            product_notes,
        } = details;
        let producer_id =
            producer_id.ok_or_else(|| LedgerError::InvalidDetails("producer is not set".into()))?;

        Ok(Self {
            sku,
            upc,
            owner_id: producer_id.clone(),
            producer_id,
            producer_name,
            producer_information,
            producer_latitude,
            producer_longitude,
            product_notes,
            product_price: 0,
            distributor_id: None,
            retailer_id: None,
            consumer_id: None,
            state: State::Produced,
            head: None,
        })
    }
    /// sku + upc, widened so the sum never overflows
    pub fn product_id(&self) -> u128 {
        u128::from(self.sku) + u128::from(self.upc)
    }
    /// The party recorded against the item for a role, if that party has acted
    pub fn party(&self, role: Role) -> Option<&Address> {
        match role {
            Role::Producer => Some(&self.producer_id),
            Role::Distributor => self.distributor_id.as_ref(),
            Role::Retailer => self.retailer_id.as_ref(),
            Role::Consumer => self.consumer_id.as_ref(),
        }
    }
    /// Hand custody to `party` and record them for `role`. A recorded party is never replaced.
    pub(crate) fn take_custody(&mut self, role: Role, party: &Address) -> bool {
        let slot = match role {
            Role::Producer => return false,
            Role::Distributor => &mut self.distributor_id,
            Role::Retailer => &mut self.retailer_id,
            Role::Consumer => &mut self.consumer_id,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(party.clone());
        self.owner_id = party.clone();
        true
    }
    pub fn provenance(&self) -> Provenance {
        Provenance {
            sku: self.sku,
            upc: self.upc,
            owner_id: self.owner_id.clone(),
            producer_id: self.producer_id.clone(),
            producer_name: self.producer_name.clone(),
            producer_information: self.producer_information.clone(),
            producer_latitude: self.producer_latitude.clone(),
            producer_longitude: self.producer_longitude.clone(),
        }
    }
    pub fn custody(&self) -> Custody {
        Custody {
            sku: self.sku,
            upc: self.upc,
            product_id: self.product_id(),
            product_notes: self.product_notes.clone(),
            product_price: self.product_price,
            state: self.state,
            distributor_id: self.distributor_id.clone(),
            retailer_id: self.retailer_id.clone(),
            consumer_id: self.consumer_id.clone(),
        }
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for Address {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Address {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Address(d.str()?.to_owned()))
    }
}
