use crate::item::{Address, Amount, State, Upc};
use crate::role::Role;
use crate::transition::Transition;
use sled::transaction::TransactionError;
use std::convert::Infallible;

/// Every variant rejects the call as a whole: nothing is written and no event is appended.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("no item recorded for upc {0}")]
    NotFound(Upc),
    #[error("an item already exists for upc {0}")]
    ItemExists(Upc),
    #[error("item {upc} is {actual}; {transition} requires {expected}")]
    InvalidState {
        upc: Upc,
        transition: Transition,
        expected: State,
        actual: State,
    },
    #[error("{caller} is not authorised to {action}")]
    Unauthorized {
        caller: Address,
        action: &'static str,
    },
    #[error("payment of {offered} is below the asking price of {price}")]
    InsufficientPayment { offered: Amount, price: Amount },
    #[error("payment transfer failed: {0}")]
    TransferFailed(String),
    #[error("an item cannot be offered for sale at a price of zero")]
    InvalidPrice,
    #[error("invalid product details: {0}")]
    InvalidDetails(String),
    #[error("{account} already holds the {role} role")]
    RoleAlreadyGranted { role: Role, account: Address },
    #[error("{account} does not hold the {role} role")]
    RoleNotHeld { role: Role, account: Address },
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Codec(String),
}

impl From<minicbor::decode::Error> for LedgerError {
    fn from(value: minicbor::decode::Error) -> Self {
        LedgerError::Codec(value.to_string())
    }
}

impl From<minicbor::encode::Error<Infallible>> for LedgerError {
    fn from(value: minicbor::encode::Error<Infallible>) -> Self {
        LedgerError::Codec(value.to_string())
    }
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(value: TransactionError<LedgerError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => LedgerError::Storage(err),
        }
    }
}
