//! Provenance ledger for items moving from producer to consumer.
//!
//! An [`ItemLedger`] records each item under its upc and moves it through eight fixed
//! stages. Each stage is gated by the [`RoleRegistry`] or by the party already recorded
//! on the item, and each committed step appends a [`LedgerEvent`] to an append-only log.

pub mod config;
pub mod error;
pub mod escrow;
pub mod event;
pub mod item;
pub mod ledger;
pub mod role;
pub mod transition;
pub mod utils;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use escrow::Settlement;
pub use event::LedgerEvent;
pub use item::{Address, Amount, Custody, Item, ProductDetails, Provenance, Sku, State, Upc};
pub use ledger::{ItemLedger, Receipt};
pub use role::{Role, RoleRegistry};
pub use transition::{Rule, TRANSITIONS, Transition};
