//! Balances and the settlement of a sale.
//!
//! Balances stand in for the native value transfer of the host environment. Settlement only
//! ever runs inside a ledger transaction, so its writes commit or vanish together with the
//! ownership change they pay for.
use super::error::LedgerError;
use super::item::{Address, Amount};
use super::utils;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree, abort,
};

/// What moved when an item was bought
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub paid: Amount,
    pub refunded: Amount,
}

pub(crate) fn read_balance(
    balances: &TransactionalTree,
    account: &Address,
) -> ConflictableTransactionResult<Amount, LedgerError> {
    match balances.get(account.as_str())? {
        Some(bytes) => utils::decode_u64(&bytes).map_err(ConflictableTransactionError::Abort),
        None => Ok(0),
    }
}

pub(crate) fn write_balance(
    balances: &TransactionalTree,
    account: &Address,
    amount: Amount,
) -> ConflictableTransactionResult<(), LedgerError> {
    balances.insert(account.as_str(), &utils::u64_key(amount)[..])?;
    Ok(())
}

/// Draw `offered` from the buyer, pay `price` to the seller and hand the surplus back.
pub(crate) fn settle(
    balances: &TransactionalTree,
    buyer: &Address,
    seller: &Address,
    price: Amount,
    offered: Amount,
) -> ConflictableTransactionResult<Settlement, LedgerError> {
    if price == 0 {
        return abort(LedgerError::InvalidPrice);
    }
    if offered < price {
        return abort(LedgerError::InsufficientPayment { offered, price });
    }

    let available = read_balance(balances, buyer)?;
    if available < offered {
        return abort(LedgerError::TransferFailed(format!(
            "{buyer} cannot cover {offered} with a balance of {available}"
        )));
    }
    // the surplus never leaves the buyer, so only the price is debited
    write_balance(balances, buyer, available - price)?;

    // read after the debit so a buyer paying themselves nets to zero
    let earned = read_balance(balances, seller)?;
    let Some(credited) = earned.checked_add(price) else {
        return abort(LedgerError::TransferFailed(format!(
            "crediting {price} would overflow the balance of {seller}"
        )));
    };
    write_balance(balances, seller, credited)?;

    Ok(Settlement {
        paid: price,
        refunded: offered - price,
    })
}
