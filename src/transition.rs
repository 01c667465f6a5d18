//! The lifecycle transition table.
//!
//! Every operation on the ledger is described by exactly one [`Rule`]. The ledger never
//! decides on its own which state follows which; it looks the answer up here.
use super::item::State;
use super::role::Role;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Produce,
    Process,
    Pack,
    Sell,
    Buy,
    Ship,
    Receive,
    Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub transition: Transition,
    /// Required predecessor. `None` only for creation.
    pub from: Option<State>,
    pub to: State,
    /// Role the caller must currently hold
    pub role: Option<Role>,
    /// Caller must be the party already recorded on the item for this role
    pub counterpart: Option<Role>,
    /// Caller takes custody and is recorded on the item for this role
    pub custody: Option<Role>,
}

pub const TRANSITIONS: [Rule; 8] = [
    Rule {
        transition: Transition::Produce,
        from: None,
        to: State::Produced,
        role: Some(Role::Producer),
        counterpart: None,
        custody: None,
    },
    Rule {
        transition: Transition::Process,
        from: Some(State::Produced),
        to: State::Processed,
        role: Some(Role::Producer),
        counterpart: Some(Role::Producer),
        custody: None,
    },
    Rule {
        transition: Transition::Pack,
        from: Some(State::Processed),
        to: State::Packed,
        role: None,
        counterpart: Some(Role::Producer),
        custody: None,
    },
    Rule {
        transition: Transition::Sell,
        from: Some(State::Packed),
        to: State::ForSale,
        role: None,
        counterpart: Some(Role::Producer),
        custody: None,
    },
    Rule {
        transition: Transition::Buy,
        from: Some(State::ForSale),
        to: State::Sold,
        role: Some(Role::Distributor),
        counterpart: None,
        custody: Some(Role::Distributor),
    },
    Rule {
        transition: Transition::Ship,
        from: Some(State::Sold),
        to: State::Shipped,
        role: None,
        counterpart: Some(Role::Distributor),
        custody: None,
    },
    Rule {
        transition: Transition::Receive,
        from: Some(State::Shipped),
        to: State::Received,
        role: Some(Role::Retailer),
        counterpart: None,
        custody: Some(Role::Retailer),
    },
    Rule {
        transition: Transition::Purchase,
        from: Some(State::Received),
        to: State::Purchased,
        role: Some(Role::Consumer),
        counterpart: None,
        custody: Some(Role::Consumer),
    },
];

impl Transition {
    pub const ALL: [Transition; 8] = [
        Transition::Produce,
        Transition::Process,
        Transition::Pack,
        Transition::Sell,
        Transition::Buy,
        Transition::Ship,
        Transition::Receive,
        Transition::Purchase,
    ];

    // TRANSITIONS is laid out in declaration order
    pub fn rule(self) -> &'static Rule {
        &TRANSITIONS[self as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            Transition::Produce => "produce_item",
            Transition::Process => "process_item",
            Transition::Pack => "pack_item",
            Transition::Sell => "sell_item",
            Transition::Buy => "buy_item",
            Transition::Ship => "ship_item",
            Transition::Receive => "receive_item",
            Transition::Purchase => "purchase_item",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl State {
    /// The state reached by applying `transition` here, if the table allows it
    pub fn next(self, transition: Transition) -> Option<State> {
        let rule = transition.rule();
        (rule.from == Some(self)).then_some(rule.to)
    }
}
