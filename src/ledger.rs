//! Service layer API for the item lifecycle
use super::config::LedgerConfig;
use super::error::LedgerError;
use super::escrow::{self, Settlement};
use super::event::{self, LedgerEvent};
use super::item::{Address, Amount, Custody, Item, ProductDetails, Provenance, Upc};
use super::role::{self, RoleRegistry};
use super::transition::{Rule, Transition};
use super::utils;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree, abort,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SKU_KEY: &str = "sku";
const EVENT_SEQ_KEY: &str = "event_seq";

/// Maps each upc to its item and applies lifecycle transitions.
///
/// Every mutating call runs as a single sled transaction spanning items, events, history,
/// balances, roles and counters. It either commits all of its writes or none of them,
/// and concurrent calls on the same item serialize with exactly one winner.
///
/// Every commit also bumps the shared `event_seq` counter in `meta` (and `produce_item` the
/// `sku` counter), so calls on different items still conflict there. sled retries the
/// loser, which then succeeds; throughput on unrelated items is bounded by those counters.
pub struct ItemLedger {
    instance: Arc<sled::Db>,
    registry: RoleRegistry,
    items: sled::Tree,
    events: sled::Tree,
    history: sled::Tree,
    balances: sled::Tree,
}

/// Outcome of a successful purchase by a distributor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub item: Item,
    pub settlement: Settlement,
}

// The trees of one transaction attempt
struct Txn<'a> {
    items: &'a TransactionalTree,
    events: &'a TransactionalTree,
    history: &'a TransactionalTree,
    balances: &'a TransactionalTree,
    roles: &'a TransactionalTree,
    meta: &'a TransactionalTree,
}

fn codec<T>(result: Result<T, LedgerError>) -> ConflictableTransactionResult<T, LedgerError> {
    result.map_err(ConflictableTransactionError::Abort)
}

impl Txn<'_> {
    fn load_item(&self, upc: Upc) -> ConflictableTransactionResult<Item, LedgerError> {
        match self.items.get(utils::u64_key(upc))? {
            Some(bytes) => codec(minicbor::decode(&bytes).map_err(LedgerError::from)),
            None => abort(LedgerError::NotFound(upc)),
        }
    }

    fn next_counter(&self, key: &str) -> ConflictableTransactionResult<u64, LedgerError> {
        let current = match self.meta.get(key)? {
            Some(bytes) => codec(utils::decode_u64(&bytes))?,
            None => 0,
        };
        let next = current + 1;
        self.meta.insert(key, &utils::u64_key(next)[..])?;
        Ok(next)
    }

    /// Caller must hold the rule's role and, where the rule names one, be the recorded party.
    fn authorize(
        &self,
        caller: &Address,
        rule: &Rule,
        item: Option<&Item>,
    ) -> ConflictableTransactionResult<(), LedgerError> {
        let unauthorized = || LedgerError::Unauthorized {
            caller: caller.clone(),
            action: rule.transition.name(),
        };

        if let Some(role) = rule.role {
            if !role::is_member(self.roles, role, caller)? {
                return abort(unauthorized());
            }
        }
        if let Some(party) = rule.counterpart {
            if item.and_then(|item| item.party(party)) != Some(caller) {
                return abort(unauthorized());
            }
        }
        Ok(())
    }

    /// Append the event for the item's current state and write the item back.
    fn commit(
        &self,
        item: &mut Item,
        actor: &Address,
    ) -> ConflictableTransactionResult<(), LedgerError> {
        let seq = self.next_counter(EVENT_SEQ_KEY)?;
        let event = LedgerEvent::new(seq, item, actor);
        let (digest, cbor) = codec(event.build())?;

        self.events.insert(&utils::u64_key(seq)[..], cbor)?;
        self.history
            .insert(&utils::history_key(item.upc, seq)[..], digest.as_bytes())?;

        item.head = Some(digest);
        let encoded = codec(minicbor::to_vec(&*item).map_err(LedgerError::from))?;
        self.items.insert(&utils::u64_key(item.upc)[..], encoded)?;
        Ok(())
    }
}

impl ItemLedger {
    /// Deploy a ledger on `instance`, or reopen one previously deployed by `owner`.
    pub fn new(instance: Arc<sled::Db>, owner: &Address) -> Result<Self, LedgerError> {
        let registry = RoleRegistry::open(&instance, owner)?;
        let items = instance.open_tree("items")?;
        let events = instance.open_tree("events")?;
        let history = instance.open_tree("history")?;
        let balances = instance.open_tree("balances")?;

        debug!(owner = %owner, items = items.len() as u64, "ledger ready");
        Ok(Self {
            instance,
            registry,
            items,
            events,
            history,
            balances,
        })
    }

    pub fn open(config: &LedgerConfig, owner: &Address) -> Result<Self, LedgerError> {
        Self::new(Arc::new(config.open_db()?), owner)
    }

    /// Administrative surface: grant, revoke, renounce and query roles
    pub fn roles(&self) -> &RoleRegistry {
        &self.registry
    }

    /// Persist everything committed so far
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.instance.flush()?;
        Ok(())
    }

    fn transact<T>(
        &self,
        f: impl Fn(&Txn<'_>) -> ConflictableTransactionResult<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let trees = (
            &self.items,
            &self.events,
            &self.history,
            &self.balances,
            &self.registry.roles,
            &self.registry.meta,
        );
        let result = trees.transaction(|(items, events, history, balances, roles, meta)| {
            f(&Txn {
                items,
                events,
                history,
                balances,
                roles,
                meta,
            })
        })?;
        Ok(result)
    }

    /// Check existence, predecessor state and caller in that order, then move the item
    /// one step forward. `effect` runs after the guards, inside the same transaction.
    fn advance<T>(
        &self,
        caller: &Address,
        upc: Upc,
        transition: Transition,
        effect: impl Fn(&Txn<'_>, &mut Item) -> ConflictableTransactionResult<T, LedgerError>,
    ) -> Result<(Item, T), LedgerError> {
        let rule = transition.rule();

        let outcome = self.transact(|txn| {
            let mut item = txn.load_item(upc)?;
            let current = item.state;
            let invalid = || LedgerError::InvalidState {
                upc,
                transition,
                expected: rule.from.unwrap_or(rule.to),
                actual: current,
            };
            let Some(next) = current.next(transition) else {
                return abort(invalid());
            };
            txn.authorize(caller, rule, Some(&item))?;

            let extra = effect(txn, &mut item)?;
            item.state = next;
            if let Some(role) = rule.custody {
                if !item.take_custody(role, caller) {
                    return abort(invalid());
                }
            }
            txn.commit(&mut item, caller)?;
            Ok((item, extra))
        });

        match &outcome {
            Ok((item, _)) => info!(
                upc,
                sku = item.sku,
                state = %item.state,
                actor = %caller,
                "item advanced"
            ),
            Err(err) => warn!(upc, %transition, actor = %caller, error = %err, "transition rejected"),
        }
        outcome
    }

    /// Create a new item held by its producer. Caller must hold the producer role.
    pub fn produce_item(
        &self,
        caller: &Address,
        upc: Upc,
        details: ProductDetails,
    ) -> Result<Item, LedgerError> {
        details.validate()?;
        let rule = Transition::Produce.rule();

        let outcome = self.transact(|txn| {
            if txn.items.get(utils::u64_key(upc))?.is_some() {
                return abort(LedgerError::ItemExists(upc));
            }
            txn.authorize(caller, rule, None)?;

            let sku = txn.next_counter(SKU_KEY)?;
            let mut item = codec(Item::new(sku, upc, details.clone()))?;
            txn.commit(&mut item, caller)?;
            Ok(item)
        });

        match &outcome {
            Ok(item) => info!(upc, sku = item.sku, producer = %item.producer_id, "item produced"),
            Err(err) => warn!(upc, actor = %caller, error = %err, "produce rejected"),
        }
        outcome
    }

    pub fn process_item(&self, caller: &Address, upc: Upc) -> Result<Item, LedgerError> {
        let (item, _) = self.advance(caller, upc, Transition::Process, |_, _| Ok(()))?;
        Ok(item)
    }

    pub fn pack_item(&self, caller: &Address, upc: Upc) -> Result<Item, LedgerError> {
        let (item, _) = self.advance(caller, upc, Transition::Pack, |_, _| Ok(()))?;
        Ok(item)
    }

    /// Offer the item for sale. The price is fixed from here on and must be non-zero.
    pub fn sell_item(
        &self,
        caller: &Address,
        upc: Upc,
        price: Amount,
    ) -> Result<Item, LedgerError> {
        let (item, _) = self.advance(caller, upc, Transition::Sell, |_, item| {
            if price == 0 {
                return abort(LedgerError::InvalidPrice);
            }
            item.product_price = price;
            Ok(())
        })?;
        Ok(item)
    }

    /// Buy the item as a distributor, offering `value`. Exactly the asking price reaches the
    /// producer and the surplus stays with the caller; payment and custody commit together.
    pub fn buy_item(
        &self,
        caller: &Address,
        upc: Upc,
        value: Amount,
    ) -> Result<Receipt, LedgerError> {
        let (item, settlement) = self.advance(caller, upc, Transition::Buy, |txn, item| {
            escrow::settle(
                txn.balances,
                caller,
                &item.producer_id,
                item.product_price,
                value,
            )
        })?;

        info!(
            upc,
            paid = settlement.paid,
            refunded = settlement.refunded,
            "sale settled"
        );
        Ok(Receipt { item, settlement })
    }

    pub fn ship_item(&self, caller: &Address, upc: Upc) -> Result<Item, LedgerError> {
        let (item, _) = self.advance(caller, upc, Transition::Ship, |_, _| Ok(()))?;
        Ok(item)
    }

    pub fn receive_item(&self, caller: &Address, upc: Upc) -> Result<Item, LedgerError> {
        let (item, _) = self.advance(caller, upc, Transition::Receive, |_, _| Ok(()))?;
        Ok(item)
    }

    pub fn purchase_item(&self, caller: &Address, upc: Upc) -> Result<Item, LedgerError> {
        let (item, _) = self.advance(caller, upc, Transition::Purchase, |_, _| Ok(()))?;
        Ok(item)
    }

    /// The full record as last committed
    pub fn read_item(&self, upc: Upc) -> Result<Item, LedgerError> {
        let bytes = self
            .items
            .get(utils::u64_key(upc))?
            .ok_or(LedgerError::NotFound(upc))?;
        Ok(minicbor::decode(&bytes)?)
    }

    pub fn fetch_provenance(&self, upc: Upc) -> Result<Provenance, LedgerError> {
        Ok(self.read_item(upc)?.provenance())
    }

    pub fn fetch_custody(&self, upc: Upc) -> Result<Custody, LedgerError> {
        Ok(self.read_item(upc)?.custody())
    }

    /// Credit `account` from outside the ledger. This is the host environment's deposit hook.
    pub fn fund(&self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let balance = self.balances.transaction(|balances| {
            let current = escrow::read_balance(balances, account)?;
            let Some(next) = current.checked_add(amount) else {
                return abort(LedgerError::TransferFailed(format!(
                    "funding {amount} would overflow the balance of {account}"
                )));
            };
            escrow::write_balance(balances, account, next)?;
            Ok(next)
        })?;

        debug!(account = %account, amount, balance, "account funded");
        Ok(balance)
    }

    pub fn balance_of(&self, account: &Address) -> Result<Amount, LedgerError> {
        match self.balances.get(account.as_str())? {
            Some(bytes) => utils::decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Every event in commit order
    pub fn events(&self) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.events_after(0)
    }

    /// Events with a sequence number above `cursor`, for subscribers that poll
    pub fn events_after(&self, cursor: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        let Some(start) = cursor.checked_add(1) else {
            return Ok(vec![]);
        };
        self.events
            .range(utils::u64_key(start)..)
            .values()
            .map(|bytes| -> Result<LedgerEvent, LedgerError> { Ok(minicbor::decode(&bytes?)?) })
            .collect()
    }

    /// The events of one item, oldest first
    pub fn item_history(&self, upc: Upc) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.history
            .scan_prefix(utils::u64_key(upc))
            .keys()
            .map(|key| -> Result<LedgerEvent, LedgerError> {
                let key = key?;
                let seq = utils::decode_u64(&key[8..])?;
                let bytes = self
                    .events
                    .get(utils::u64_key(seq))?
                    .ok_or_else(|| LedgerError::Codec(format!("event {seq} is missing")))?;
                Ok(minicbor::decode(&bytes)?)
            })
            .collect()
    }

    /// Check the item's history is an unbroken hash chain ending at the item's head
    pub fn verify_history(&self, upc: Upc) -> Result<bool, LedgerError> {
        let item = self.read_item(upc)?;
        let history = self.item_history(upc)?;
        event::verify_chain(&history, item.head.as_deref())
    }
}
