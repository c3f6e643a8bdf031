//! Remote-query sync cycle: block-number tracking, query issuance,
//! transaction merging, completion, and retry exhaustion.

use std::sync::Arc;

use wallet_sync::test_utils::{wait_until, RecordedEvent, RecordedRequest, RecordingClient};
use wallet_sync::types::{ChainKind, RequestId, TransactionEventKind, TransactionWire};
use wallet_sync::{Client, ManagerConfig, ManagerEventKind, Persisted, Status, WalletManager};

const ACCOUNT: &str = "0xa9d8724bf9db8c3ed4b44cbb2bfca2604c048041";

fn new_manager(client: &Arc<RecordingClient>) -> WalletManager {
    let config = ManagerConfig::new(ChainKind::Ethereum, ACCOUNT);
    WalletManager::new(config, Arc::clone(client) as Arc<dyn Client>, Persisted::default())
        .expect("manager construction")
}

/// Connect, answer the initial block-number query with `height`, and return
/// the rid of the transactions query that starts the first sync cycle.
fn connect_at_height(manager: &WalletManager, client: &Arc<RecordingClient>, height: &str) -> RequestId {
    manager.connect();
    wait_until("block number requested", || client.last_block_number_rid().is_some());
    let rid = client.last_block_number_rid().unwrap();
    assert_eq!(manager.announce_block_number(height, rid), Status::Success);
    wait_until("transactions requested", || client.last_transactions_rid().is_some());
    client.last_transactions_rid().unwrap()
}

fn incoming_wire<'a>(hash: &'a str, block_number: &'a str, block_hash: &'a str) -> TransactionWire<'a> {
    TransactionWire {
        hash,
        from: "0x1563915e194d8cfba1943570603f7606a3115508",
        to: ACCOUNT,
        contract: "",
        amount: "500",
        gas_limit: "21000",
        gas_price: "2000000000",
        data: "",
        nonce: "1",
        gas_used: "21000",
        block_number,
        block_hash,
        block_confirmations: "1",
        block_transaction_index: "0",
        block_timestamp: "1650000000",
        is_error: false,
    }
}

#[test]
fn test_connect_requests_block_number_then_transactions() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);

    let query_rid = connect_at_height(&manager, &client, "1000");

    // First two ids issued by this manager.
    assert_eq!(client.last_block_number_rid(), Some(RequestId(1)));
    assert_eq!(query_rid, RequestId(2));
    assert!(manager.is_connected());
    assert_eq!(manager.block_height(), 1000);

    let progress = manager.sync_progress();
    assert_eq!((progress.begin_block, progress.end_block), (0, 1000));
    assert!(!progress.completed);

    let events = client.manager_events();
    assert_eq!(events[0], ManagerEventKind::Created);
    assert!(events.contains(&ManagerEventKind::SyncStarted));
}

#[test]
fn test_block_height_is_a_high_water_mark() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    connect_at_height(&manager, &client, "1000");

    manager.refresh_block_number();
    wait_until("second block number request", || {
        client.last_block_number_rid() != Some(RequestId(1))
    });
    let rid = client.last_block_number_rid().unwrap();
    assert_eq!(manager.announce_block_number("999", rid), Status::Success);

    // A later nonce round trip proves the 999 announcement was handled.
    manager.refresh_nonce();
    wait_until("nonce requested", || {
        client.find_request(|r| matches!(r, RecordedRequest::GetNonce { .. })).is_some()
    });
    let nonce_rid = client
        .find_request(|r| matches!(r, RecordedRequest::GetNonce { .. }))
        .unwrap()
        .rid();
    manager.announce_nonce(ACCOUNT, "7", nonce_rid);
    wait_until("nonce applied", || manager.account_nonce() == Some(7));

    assert_eq!(manager.block_height(), 1000);
}

#[test]
fn test_stale_block_number_rid_is_a_noop() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    connect_at_height(&manager, &client, "1000");

    // rid 1 was consumed by the first announcement; replaying it changes
    // nothing and issues no further query.
    let queries_before = client
        .requests()
        .iter()
        .filter(|r| matches!(r, RecordedRequest::GetTransactions { .. }))
        .count();
    assert_eq!(manager.announce_block_number("2000", RequestId(1)), Status::Success);
    assert_eq!(manager.block_height(), 1000);
    let queries_after = client
        .requests()
        .iter()
        .filter(|r| matches!(r, RecordedRequest::GetTransactions { .. }))
        .count();
    assert_eq!(queries_before, queries_after);
}

#[test]
fn test_malformed_block_number_is_rejected_locally() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    manager.connect();
    wait_until("block number requested", || client.last_block_number_rid().is_some());
    let rid = client.last_block_number_rid().unwrap();

    assert_eq!(manager.announce_block_number("10x0", rid), Status::NumericParse);
    assert_eq!(manager.announce_block_number("", rid), Status::NumericParse);
    // The rid survives the failed parses and the well-formed retry lands.
    assert_eq!(manager.announce_block_number("1000", rid), Status::Success);
    wait_until("height applied", || manager.block_height() == 1000);
}

#[test]
fn test_full_sync_cycle_merges_and_completes() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let rid = connect_at_height(&manager, &client, "1000");
    let primary = manager.primary_wallet();

    assert_eq!(manager.announce_transaction(incoming_wire("0xt1", "900", "0xb1"), rid), Status::Success);
    assert_eq!(manager.announce_transaction(incoming_wire("0xt2", "900", "0xb1"), rid), Status::Success);
    assert_eq!(manager.announce_transaction(incoming_wire("0xt3", "950", "0xb2"), rid), Status::Success);
    wait_until("three transactions merged", || {
        manager.wallet_transaction_count(primary) == Ok(3)
    });

    assert_eq!(manager.announce_transactions_complete(rid, true), Status::Success);
    wait_until("cycle completed", || manager.sync_progress().completed);

    // All three shared the account as recipient.
    assert_eq!(manager.wallet_balance(primary).unwrap().value(), 1500);

    // Caught up at the current height, so the cycle stops rather than
    // immediately reissuing.
    let events = client.manager_events();
    assert!(events.contains(&ManagerEventKind::SyncContinues));
    assert!(events.contains(&ManagerEventKind::SyncStopped));
    let progress = manager.sync_progress();
    assert_eq!((progress.begin_block, progress.end_block), (0, 1000));
}

#[test]
fn test_duplicate_hash_announcement_stores_once() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let rid = connect_at_height(&manager, &client, "1000");
    let primary = manager.primary_wallet();

    let wire = incoming_wire("0xt1", "900", "0xb1");
    assert_eq!(manager.announce_transaction(wire, rid), Status::Success);
    assert_eq!(manager.announce_transaction(wire, rid), Status::Success);
    assert_eq!(manager.announce_transactions_complete(rid, true), Status::Success);
    wait_until("cycle completed", || manager.sync_progress().completed);

    // One stored transaction, one Created event, one balance contribution.
    assert_eq!(manager.wallet_transaction_count(primary), Ok(1));
    assert_eq!(manager.wallet_balance(primary).unwrap().value(), 500);
    let created = client
        .events()
        .iter()
        .filter(|event| {
            matches!(
                event,
                RecordedEvent::Transaction(_, _, TransactionEventKind::Created, _, _)
            )
        })
        .count();
    assert_eq!(created, 1);
}

#[test]
fn test_stale_transaction_announcement_after_completion() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let rid = connect_at_height(&manager, &client, "1000");
    let primary = manager.primary_wallet();

    manager.announce_transaction(incoming_wire("0xt1", "900", "0xb1"), rid);
    wait_until("transaction merged", || manager.wallet_transaction_count(primary) == Ok(1));
    manager.announce_transactions_complete(rid, true);
    wait_until("cycle completed", || manager.sync_progress().completed);

    // The rid was consumed by the completion; a late announcement under it
    // merges nothing.
    assert_eq!(manager.announce_transaction(incoming_wire("0xt9", "990", "0xb9"), rid), Status::Success);
    assert_eq!(manager.wallet_transaction_count(primary), Ok(1));
}

#[test]
fn test_next_cycle_starts_when_height_advances() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let rid = connect_at_height(&manager, &client, "1000");
    manager.announce_transactions_complete(rid, true);
    wait_until("cycle completed", || manager.sync_progress().completed);

    manager.refresh_block_number();
    wait_until("block number requested again", || {
        client.last_block_number_rid() != Some(RequestId(1))
    });
    let height_rid = client.last_block_number_rid().unwrap();
    manager.announce_block_number("1500", height_rid);

    // The next query covers the newly uncovered range.
    wait_until("next query issued", || client.last_transactions_rid() != Some(rid));
    wait_until("range advanced", || {
        let progress = manager.sync_progress();
        (progress.begin_block, progress.end_block) == (1000, 1500) && !progress.completed
    });
}

#[test]
fn test_failed_cycles_retry_then_suspend() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let mut rid = connect_at_height(&manager, &client, "1000");

    // Default retry limit is 3 attempts per range.
    for _ in 0..2 {
        manager.announce_transactions_complete(rid, false);
        wait_until("range reissued", || client.last_transactions_rid() != Some(rid));
        rid = client.last_transactions_rid().unwrap();
        // The reissued query still targets the same range.
        let progress = manager.sync_progress();
        assert_eq!((progress.begin_block, progress.end_block), (0, 1000));
    }

    manager.announce_transactions_complete(rid, false);
    wait_until("manager suspended", || !manager.is_connected());
    assert!(client.manager_events().contains(&ManagerEventKind::NetworkUnavailable));

    let queries = client
        .requests()
        .iter()
        .filter(|r| matches!(r, RecordedRequest::GetTransactions { .. }))
        .count();
    assert_eq!(queries, 3);
}

#[test]
fn test_failed_range_is_requeried_after_reconnect() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let mut rid = connect_at_height(&manager, &client, "1000");

    for _ in 0..2 {
        manager.announce_transactions_complete(rid, false);
        wait_until("range reissued", || client.last_transactions_rid() != Some(rid));
        rid = client.last_transactions_rid().unwrap();
    }
    manager.announce_transactions_complete(rid, false);
    wait_until("manager suspended", || !manager.is_connected());

    // Reconnecting at a higher height must not skip the range that never
    // completed; it is queried again before anything newer.
    manager.connect();
    wait_until("block number requested again", || {
        manager.is_connected() && client.last_block_number_rid() != Some(RequestId(1))
    });
    let height_rid = client.last_block_number_rid().unwrap();
    assert_eq!(manager.announce_block_number("1500", height_rid), Status::Success);

    wait_until("failed range reissued", || client.last_transactions_rid() != Some(rid));
    let progress = manager.sync_progress();
    assert_eq!((progress.begin_block, progress.end_block), (0, 1000));
    assert!(!progress.completed);
}

#[test]
fn test_abandoned_range_is_requeried_after_reconnect_at_same_height() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let rid = connect_at_height(&manager, &client, "1000");

    manager.disconnect();
    wait_until("disconnected", || !manager.is_connected());

    manager.connect();
    wait_until("block number requested again", || {
        client.last_block_number_rid() != Some(RequestId(1))
    });
    let height_rid = client.last_block_number_rid().unwrap();
    assert_eq!(manager.announce_block_number("1000", height_rid), Status::Success);

    // The interrupted range is still owed a completed cycle even though the
    // height did not move.
    wait_until("interrupted range reissued", || client.last_transactions_rid() != Some(rid));
    let progress = manager.sync_progress();
    assert_eq!((progress.begin_block, progress.end_block), (0, 1000));
}

#[test]
fn test_disconnect_invalidates_outstanding_requests() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    manager.connect();
    wait_until("block number requested", || client.last_block_number_rid().is_some());
    let rid = client.last_block_number_rid().unwrap();

    manager.disconnect();
    wait_until("disconnected", || !manager.is_connected());

    // In-flight I/O was not aborted; its eventual answer is simply stale.
    assert_eq!(manager.announce_block_number("1000", rid), Status::Success);
    assert_eq!(manager.block_height(), 0);
    assert!(client
        .requests()
        .iter()
        .all(|r| !matches!(r, RecordedRequest::GetTransactions { .. })));
    assert!(client.manager_events().contains(&ManagerEventKind::SyncStopped));
}
