use anyhow::Context;
use sled::open;
use std::sync::Arc;
use std::thread;
use supply_chain::{Address, ItemLedger, LedgerError, ProductDetails, Role, State, Transition};

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.
use tracing_subscriber::EnvFilter;

const PRICE: u64 = 1_000_000_000_000_000_000;

struct Parties {
    owner: Address,
    producer: Address,
    distributor: Address,
    retailer: Address,
    consumer: Address,
}

// Ledger logs show up with RUST_LOG=supply_chain=info
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Sled locks its directory, so each test opens its own database under a tempdir.
fn setup(name: &str) -> anyhow::Result<(TempDir, ItemLedger, Parties)> {
    init_tracing();
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let db = Arc::new(db);

    let parties = Parties {
        owner: Address::generate("owner_")?,
        producer: Address::generate("user_")?,
        distributor: Address::generate("user_")?,
        retailer: Address::generate("user_")?,
        consumer: Address::generate("user_")?,
    };

    let ledger = ItemLedger::new(db, &parties.owner)?;
    let roles = ledger.roles();
    roles.add_role(&parties.owner, Role::Producer, &parties.producer)?;
    roles.add_role(&parties.owner, Role::Distributor, &parties.distributor)?;
    roles.add_role(&parties.owner, Role::Retailer, &parties.retailer)?;
    roles.add_role(&parties.owner, Role::Consumer, &parties.consumer)?;
    ledger.fund(&parties.distributor, 5 * PRICE)?;

    Ok((temp_dir, ledger, parties))
}

fn details(producer: &Address) -> ProductDetails {
    ProductDetails::new()
        .set_producer(producer.clone())
        .set_producer_name("John Doe")
        .set_producer_information("Yarra Valley")
        .set_location("-38.239770", "144.341490")
        .set_product_notes("Humane, Natural, and Organic")
}

// Drive item `upc` through every stage up to and including `target`
fn advance_to(
    ledger: &ItemLedger,
    parties: &Parties,
    upc: u64,
    target: State,
) -> anyhow::Result<()> {
    for state in State::ALL {
        let outcome = match state {
            State::Produced => ledger
                .produce_item(&parties.producer, upc, details(&parties.producer))
                .map(drop),
            State::Processed => ledger.process_item(&parties.producer, upc).map(drop),
            State::Packed => ledger.pack_item(&parties.producer, upc).map(drop),
            State::ForSale => ledger.sell_item(&parties.producer, upc, PRICE).map(drop),
            State::Sold => ledger.buy_item(&parties.distributor, upc, PRICE).map(drop),
            State::Shipped => ledger.ship_item(&parties.distributor, upc).map(drop),
            State::Received => ledger.receive_item(&parties.retailer, upc).map(drop),
            State::Purchased => ledger.purchase_item(&parties.consumer, upc).map(drop),
        };
        outcome.with_context(|| format!("failed to reach {state}"))?;
        if state == target {
            break;
        }
    }
    Ok(())
}

#[test]
fn full_lifecycle() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("full_lifecycle.db")?;
    let upc = 1;

    let item = ledger
        .produce_item(&parties.producer, upc, details(&parties.producer))
        .context("Item failed on produce: ")?;
    assert_eq!(item.sku, 1);
    assert_eq!(item.owner_id, parties.producer);
    assert_eq!(item.state, State::Produced);

    assert_eq!(ledger.process_item(&parties.producer, upc)?.state, State::Processed);
    assert_eq!(ledger.pack_item(&parties.producer, upc)?.state, State::Packed);

    let item = ledger.sell_item(&parties.producer, upc, PRICE)?;
    assert_eq!(item.product_price, PRICE);
    assert_eq!(item.state, State::ForSale);

    let producer_before = ledger.balance_of(&parties.producer)?;
    let receipt = ledger
        .buy_item(&parties.distributor, upc, PRICE)
        .context("Item failed on buy: ")?;
    let producer_after = ledger.balance_of(&parties.producer)?;

    assert_eq!(producer_after - producer_before, PRICE);
    assert_eq!(receipt.settlement.refunded, 0);
    assert_eq!(receipt.item.owner_id, parties.distributor);
    assert_eq!(receipt.item.distributor_id, Some(parties.distributor.clone()));
    assert_eq!(receipt.item.state, State::Sold);

    assert_eq!(ledger.ship_item(&parties.distributor, upc)?.state, State::Shipped);

    let item = ledger.receive_item(&parties.retailer, upc)?;
    assert_eq!(item.owner_id, parties.retailer);
    assert_eq!(item.retailer_id, Some(parties.retailer.clone()));
    assert_eq!(item.state, State::Received);

    let item = ledger.purchase_item(&parties.consumer, upc)?;
    assert_eq!(item.owner_id, parties.consumer);
    assert_eq!(item.consumer_id, Some(parties.consumer.clone()));
    assert_eq!(item.state, State::Purchased);

    let provenance = ledger.fetch_provenance(upc)?;
    assert_eq!(provenance.sku, 1);
    assert_eq!(provenance.upc, 1);
    assert_eq!(provenance.owner_id, parties.consumer);
    assert_eq!(provenance.producer_id, parties.producer);
    assert_eq!(provenance.producer_name, "John Doe");
    assert_eq!(provenance.producer_information, "Yarra Valley");
    assert_eq!(provenance.producer_latitude, "-38.239770");
    assert_eq!(provenance.producer_longitude, "144.341490");

    let custody = ledger.fetch_custody(upc)?;
    assert_eq!(custody.product_id, 2);
    assert_eq!(custody.product_notes, "Humane, Natural, and Organic");
    assert_eq!(custody.product_price, PRICE);
    assert_eq!(u8::from(custody.state), 7);
    assert_eq!(custody.distributor_id, Some(parties.distributor));
    assert_eq!(custody.retailer_id, Some(parties.retailer));
    assert_eq!(custody.consumer_id, Some(parties.consumer));

    Ok(())
}

#[test]
fn every_transition_emits_its_event() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("events.db")?;
    advance_to(&ledger, &parties, 1, State::Purchased)?;

    let events = ledger.events()?;
    let kinds: Vec<State> = events.iter().map(|event| event.kind).collect();
    assert_eq!(kinds, State::ALL.to_vec());

    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, (1..=8).collect::<Vec<_>>());
    assert!(events.iter().all(|event| event.upc == 1 && event.sku == 1));
    assert_eq!(events[4].actor, parties.distributor);

    assert_eq!(ledger.events_after(6)?.len(), 2);
    assert!(ledger.events_after(8)?.is_empty());
    assert!(ledger.verify_history(1)?);

    Ok(())
}

#[test]
fn ship_before_buy_is_invalid() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("ship_before_buy.db")?;
    advance_to(&ledger, &parties, 1, State::ForSale)?;
    let before = ledger.read_item(1)?;

    let err = ledger.ship_item(&parties.distributor, 1).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidState {
            transition: Transition::Ship,
            expected: State::Sold,
            actual: State::ForSale,
            ..
        }
    ));

    assert_eq!(ledger.read_item(1)?, before);
    assert_eq!(ledger.events()?.len(), 4);
    Ok(())
}

#[test]
fn only_distributors_may_buy() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("non_distributor_buy.db")?;
    advance_to(&ledger, &parties, 1, State::ForSale)?;
    ledger.fund(&parties.retailer, PRICE)?;

    let err = ledger.buy_item(&parties.retailer, 1, PRICE).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));

    let item = ledger.read_item(1)?;
    assert_eq!(item.state, State::ForSale);
    assert_eq!(item.owner_id, parties.producer);
    assert_eq!(item.distributor_id, None);
    assert_eq!(ledger.balance_of(&parties.retailer)?, PRICE);
    assert_eq!(ledger.balance_of(&parties.producer)?, 0);
    Ok(())
}

#[test]
fn underpayment_is_rejected() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("underpayment.db")?;
    advance_to(&ledger, &parties, 1, State::ForSale)?;

    let err = ledger.buy_item(&parties.distributor, 1, PRICE - 1).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientPayment { .. }));

    assert_eq!(ledger.read_item(1)?.state, State::ForSale);
    assert_eq!(ledger.balance_of(&parties.distributor)?, 5 * PRICE);
    assert_eq!(ledger.balance_of(&parties.producer)?, 0);
    Ok(())
}

#[test]
fn overpayment_is_refunded() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("overpayment.db")?;
    advance_to(&ledger, &parties, 1, State::ForSale)?;

    let receipt = ledger.buy_item(&parties.distributor, 1, 3 * PRICE)?;

    assert_eq!(receipt.settlement.paid, PRICE);
    assert_eq!(receipt.settlement.refunded, 2 * PRICE);
    assert_eq!(ledger.balance_of(&parties.producer)?, PRICE);
    assert_eq!(ledger.balance_of(&parties.distributor)?, 4 * PRICE);
    Ok(())
}

#[test]
fn failed_transfer_leaves_no_trace() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("failed_transfer.db")?;
    advance_to(&ledger, &parties, 1, State::ForSale)?;

    let broke = Address::generate("user_")?;
    ledger
        .roles()
        .add_role(&parties.owner, Role::Distributor, &broke)?;
    ledger.fund(&broke, PRICE / 2)?;

    let err = ledger.buy_item(&broke, 1, PRICE).unwrap_err();
    assert!(matches!(err, LedgerError::TransferFailed(_)));

    let item = ledger.read_item(1)?;
    assert_eq!(item.state, State::ForSale);
    assert_eq!(item.distributor_id, None);
    assert_eq!(ledger.balance_of(&broke)?, PRICE / 2);
    assert_eq!(ledger.balance_of(&parties.producer)?, 0);
    assert_eq!(ledger.events()?.len(), 4);
    Ok(())
}

#[test]
fn upc_is_unique() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("duplicate_upc.db")?;
    advance_to(&ledger, &parties, 7, State::Produced)?;

    let err = ledger
        .produce_item(&parties.producer, 7, details(&parties.producer))
        .unwrap_err();
    assert!(matches!(err, LedgerError::ItemExists(7)));

    let second = ledger.produce_item(&parties.producer, 8, details(&parties.producer))?;
    assert_eq!(second.sku, 2);
    Ok(())
}

#[test]
fn missing_items_are_not_found() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("missing.db")?;

    assert!(matches!(ledger.read_item(99), Err(LedgerError::NotFound(99))));
    assert!(matches!(
        ledger.process_item(&parties.producer, 99),
        Err(LedgerError::NotFound(99))
    ));
    Ok(())
}

#[test]
fn producer_steps_belong_to_the_recorded_producer() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("other_producer.db")?;
    let rival = Address::generate("user_")?;
    ledger
        .roles()
        .add_role(&parties.owner, Role::Producer, &rival)?;
    advance_to(&ledger, &parties, 1, State::Produced)?;

    let err = ledger.process_item(&rival, 1).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));

    ledger.process_item(&parties.producer, 1)?;
    let err = ledger.pack_item(&rival, 1).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));
    Ok(())
}

#[test]
fn only_the_buyer_ships() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("other_distributor.db")?;
    let rival = Address::generate("user_")?;
    ledger
        .roles()
        .add_role(&parties.owner, Role::Distributor, &rival)?;
    advance_to(&ledger, &parties, 1, State::Sold)?;

    let err = ledger.ship_item(&rival, 1).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));
    assert_eq!(ledger.read_item(1)?.state, State::Sold);
    Ok(())
}

#[test]
fn zero_price_is_rejected() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("zero_price.db")?;
    advance_to(&ledger, &parties, 1, State::Packed)?;

    let err = ledger.sell_item(&parties.producer, 1, 0).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPrice));
    assert_eq!(ledger.read_item(1)?.state, State::Packed);
    Ok(())
}

#[test]
fn renounced_roles_keep_their_history() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("renounce.db")?;
    advance_to(&ledger, &parties, 1, State::Purchased)?;

    for (role, party) in [
        (Role::Producer, &parties.producer),
        (Role::Distributor, &parties.distributor),
        (Role::Retailer, &parties.retailer),
        (Role::Consumer, &parties.consumer),
    ] {
        ledger.roles().renounce_role(party, role)?;
        assert!(!ledger.roles().has_role(role, party)?);
    }

    let item = ledger.read_item(1)?;
    assert_eq!(item.producer_id, parties.producer);
    assert_eq!(item.distributor_id, Some(parties.distributor));
    assert!(ledger.verify_history(1)?);

    // a renounced producer can no longer create items
    let err = ledger
        .produce_item(&parties.producer, 2, details(&parties.producer))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));
    Ok(())
}

#[test]
fn ledger_survives_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("reopen.db");
    let owner = Address::generate("owner_")?;
    let producer = Address::generate("user_")?;

    {
        let ledger = ItemLedger::new(Arc::new(open(&db_path)?), &owner)?;
        ledger.roles().add_role(&owner, Role::Producer, &producer)?;
        ledger.produce_item(&producer, 1, details(&producer))?;
        ledger.process_item(&producer, 1)?;
        ledger.flush()?;
    }

    let db = Arc::new(open(&db_path)?);
    assert!(ItemLedger::new(db.clone(), &producer).is_err());

    let ledger = ItemLedger::new(db, &owner)?;
    assert_eq!(ledger.read_item(1)?.state, State::Processed);
    assert!(ledger.roles().has_role(Role::Producer, &producer)?);

    let item = ledger.produce_item(&producer, 2, details(&producer))?;
    assert_eq!(item.sku, 2);
    assert_eq!(ledger.events()?.len(), 3);
    assert!(ledger.verify_history(1)?);
    Ok(())
}

#[test]
fn racing_buyers_have_one_winner() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("racing_buyers.db")?;
    advance_to(&ledger, &parties, 1, State::ForSale)?;

    let mut buyers = vec![parties.distributor.clone()];
    for _ in 0..7 {
        let buyer = Address::generate("user_")?;
        ledger
            .roles()
            .add_role(&parties.owner, Role::Distributor, &buyer)?;
        ledger.fund(&buyer, PRICE)?;
        buyers.push(buyer);
    }

    let outcomes: Vec<_> = thread::scope(|scope| {
        let ledger = &ledger;
        let handles: Vec<_> = buyers
            .iter()
            .map(|buyer| scope.spawn(move || ledger.buy_item(buyer, 1, PRICE)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("buyer thread panicked"))
            .collect()
    });

    let winners: Vec<_> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(matches!(err, LedgerError::InvalidState { actual: State::Sold, .. }));
        }
    }

    let winner = winners[0].item.distributor_id.clone().context("buyer not recorded")?;
    assert_eq!(ledger.read_item(1)?.owner_id, winner);
    assert_eq!(ledger.balance_of(&parties.producer)?, PRICE);
    assert_eq!(ledger.events()?.len(), 5);
    Ok(())
}

#[test]
fn independent_items_advance_in_parallel() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("parallel_items.db")?;
    ledger.fund(&parties.distributor, 3 * PRICE)?;

    thread::scope(|scope| -> anyhow::Result<()> {
        let handles: Vec<_> = (1..=8u64)
            .map(|upc| {
                let (ledger, parties) = (&ledger, &parties);
                scope.spawn(move || advance_to(ledger, parties, upc, State::Purchased))
            })
            .collect();
        for handle in handles {
            handle.join().expect("lifecycle thread panicked")?;
        }
        Ok(())
    })?;

    let mut skus = Vec::new();
    for upc in 1..=8u64 {
        let item = ledger.read_item(upc)?;
        assert_eq!(item.state, State::Purchased);
        assert!(ledger.verify_history(upc)?);
        skus.push(item.sku);
    }
    skus.sort();
    assert_eq!(skus, (1..=8).collect::<Vec<_>>());

    let seqs: Vec<u64> = ledger.events()?.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, (1..=64).collect::<Vec<_>>());
    assert_eq!(ledger.balance_of(&parties.producer)?, 8 * PRICE);
    Ok(())
}

#[test]
fn custody_reads_at_the_top_of_the_upc_range() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("max_upc.db")?;
    advance_to(&ledger, &parties, u64::MAX, State::Produced)?;

    let custody = ledger.fetch_custody(u64::MAX)?;
    assert_eq!(custody.sku, 1);
    assert_eq!(custody.product_id, u128::from(u64::MAX) + 1);
    Ok(())
}

#[test]
fn producer_details_are_stored_as_given() -> anyhow::Result<()> {
    let (_dir, ledger, parties) = setup("free_form_details.db")?;
    let details = ProductDetails::new()
        .set_producer(parties.producer.clone())
        .set_location("38°14'N", "144°20'E");

    let item = ledger
        .produce_item(&parties.producer, 1, details)
        .context("Item failed on produce: ")?;
    assert_eq!(item.producer_name, "");
    assert_eq!(item.producer_latitude, "38°14'N");
    assert_eq!(item.producer_longitude, "144°20'E");

    let err = ledger
        .produce_item(&parties.producer, 2, ProductDetails::new())
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidDetails(_)));
    assert!(matches!(ledger.read_item(2), Err(LedgerError::NotFound(2))));
    Ok(())
}
