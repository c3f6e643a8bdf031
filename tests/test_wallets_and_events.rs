//! Wallet registry, token routing, listeners, log merging, and the
//! peer-to-peer backend path.

use std::sync::{Arc, Mutex};

use wallet_sync::test_utils::{wait_until, RecordedChange, RecordedEvent, RecordedRequest, RecordingClient};
use wallet_sync::types::{
    ChainKind, ChangeKind, EntityHash, LogWire, PersistRecord, RequestId, SyncMode, Token,
    TransactionWire,
};
use wallet_sync::{
    Client, Event, EventKind, ManagerConfig, PeerEventKind, Persisted, Status, TransactionStatus,
    WalletEventKind, WalletManager,
};

const ACCOUNT: &str = "0xa9d8724bf9db8c3ed4b44cbb2bfca2604c048041";
const TOKEN_CONTRACT: &str = "0x558ec3152e2eb2174905cd19aea4e34a23de9ad6";

fn new_manager(client: &Arc<RecordingClient>) -> WalletManager {
    let config = ManagerConfig::new(ChainKind::Ethereum, ACCOUNT);
    WalletManager::new(config, Arc::clone(client) as Arc<dyn Client>, Persisted::default())
        .expect("manager construction")
}

fn connect(manager: &WalletManager, client: &Arc<RecordingClient>) -> RequestId {
    manager.connect();
    wait_until("block number requested", || client.last_block_number_rid().is_some());
    let rid = client.last_block_number_rid().unwrap();
    manager.announce_block_number("1000", rid);
    wait_until("transactions requested", || client.last_transactions_rid().is_some());
    client.last_transactions_rid().unwrap()
}

#[test]
fn test_primary_wallet_created_with_manager() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let primary = manager.primary_wallet();

    wait_until("primary wallet materialized", || {
        client
            .events()
            .iter()
            .any(|event| matches!(event, RecordedEvent::Wallet(w, WalletEventKind::Created, _, _) if *w == primary))
    });
    assert_eq!(manager.wallet_token(primary), Ok(None));
    assert_eq!(manager.wallet_balance(primary).unwrap().value(), 0);
    assert_eq!(manager.wallet_default_gas_limit(primary), Ok(21_000));

    let basis = manager.wallet_fee_basis(primary).unwrap();
    assert_eq!(basis.chain(), ChainKind::Ethereum);
    assert_eq!(basis.cost_units(), 21_000);
}

#[test]
fn test_wallet_holding_token_is_idempotent() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let token = Token::new(TOKEN_CONTRACT, "BRD");

    let first = manager.wallet_holding_token(token.clone());
    let second = manager.wallet_holding_token(token.clone());
    assert_eq!(first, second);
    assert_ne!(first, manager.primary_wallet());

    wait_until("token wallet materialized", || manager.wallet_token(first) == Ok(Some(token.clone())));
    let created = client
        .events()
        .iter()
        .filter(|event| matches!(event, RecordedEvent::Wallet(w, WalletEventKind::Created, _, _) if *w == first))
        .count();
    assert_eq!(created, 1);
}

#[test]
fn test_fresh_wallet_ids_accept_operations_immediately() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let primary = manager.primary_wallet();

    // An id is a valid operation target the moment it is handed out, before
    // the dispatcher materializes the slot.
    assert_eq!(manager.set_default_gas_limit(primary, 70_000), Status::Success);
    let transaction = manager
        .create_transaction(primary, "0x1563915e194d8cfba1943570603f7606a3115508", 10)
        .expect("fresh wallet id accepted");
    let token_wallet = manager.wallet_holding_token(Token::new(TOKEN_CONTRACT, "BRD"));
    assert_eq!(manager.set_default_gas_price(token_wallet, 1_000_000_000), Status::Success);

    wait_until("transaction materialized", || {
        manager.transaction_status(transaction) == Ok(TransactionStatus::Created)
    });
    wait_until("gas limit applied", || manager.wallet_default_gas_limit(primary) == Ok(70_000));
    wait_until("token gas price applied", || {
        manager.wallet_default_gas_price(token_wallet) == Ok(1_000_000_000)
    });
}

#[test]
fn test_default_gas_updates_rebuild_fee_basis() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let primary = manager.primary_wallet();

    assert_eq!(manager.set_default_gas_limit(primary, 90_000), Status::Success);
    assert_eq!(manager.set_default_gas_price(primary, 30_000_000_000), Status::Success);
    wait_until("gas defaults applied", || {
        manager.wallet_default_gas_limit(primary) == Ok(90_000)
            && manager.wallet_default_gas_price(primary) == Ok(30_000_000_000)
    });

    let basis = manager.wallet_fee_basis(primary).unwrap();
    assert_eq!(basis.cost_units(), 90_000);
    assert_eq!(basis.price_per_cost_unit(), 30_000_000_000);

    let events = client.events();
    assert!(events.iter().any(|event| {
        matches!(event, RecordedEvent::Wallet(_, WalletEventKind::DefaultGasLimitUpdated, _, _))
    }));
    assert!(events.iter().any(|event| {
        matches!(event, RecordedEvent::Wallet(_, WalletEventKind::DefaultGasPriceUpdated, _, _))
    }));
}

#[test]
fn test_token_transaction_routes_to_token_wallet() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let token_wallet = manager.wallet_holding_token(Token::new(TOKEN_CONTRACT, "BRD"));
    let rid = connect(&manager, &client);

    let wire = TransactionWire {
        hash: "0xt1",
        from: "0x1563915e194d8cfba1943570603f7606a3115508",
        to: ACCOUNT,
        contract: TOKEN_CONTRACT,
        amount: "1000",
        gas_limit: "90000",
        gas_price: "2000000000",
        data: "",
        nonce: "4",
        gas_used: "52000",
        block_number: "950",
        block_hash: "0xb950",
        block_confirmations: "1",
        block_transaction_index: "0",
        block_timestamp: "1650000000",
        is_error: false,
    };
    assert_eq!(manager.announce_transaction(wire, rid), Status::Success);
    wait_until("token transfer merged", || {
        manager.wallet_transaction_count(token_wallet) == Ok(1)
    });
    assert_eq!(manager.wallet_transaction_count(manager.primary_wallet()), Ok(0));
    assert_eq!(manager.wallet_balance(token_wallet).unwrap().value(), 1000);
}

#[test]
fn test_listeners_receive_and_stop_receiving_events() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    let primary = manager.primary_wallet();

    let seen: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = manager.add_listener(Arc::new(move |event: &Event| {
        sink.lock().unwrap().push(event.clone());
    }));

    manager.set_default_gas_limit(primary, 50_000);
    wait_until("listener saw the update", || {
        seen.lock().unwrap().iter().any(|event| {
            matches!(event.kind, EventKind::Wallet(_, WalletEventKind::DefaultGasLimitUpdated))
        })
    });

    assert_eq!(manager.remove_listener(listener), Status::Success);
    let count = seen.lock().unwrap().len();

    manager.set_default_gas_limit(primary, 60_000);
    wait_until("second update applied", || manager.wallet_default_gas_limit(primary) == Ok(60_000));
    assert_eq!(seen.lock().unwrap().len(), count);

    // Removing twice reports the miss.
    assert_eq!(manager.remove_listener(listener), Status::UnknownListener);
}

#[test]
fn test_logs_merge_and_dedupe() {
    let client = RecordingClient::new();
    let manager = new_manager(&client);
    connect(&manager, &client);

    manager.request_logs(Some(TOKEN_CONTRACT), "Transfer(address,address,uint256)");
    wait_until("logs requested", || {
        client.find_request(|r| matches!(r, RecordedRequest::GetLogs { .. })).is_some()
    });
    let rid = client
        .find_request(|r| matches!(r, RecordedRequest::GetLogs { .. }))
        .unwrap()
        .rid();

    let wire = LogWire {
        hash: "0xt1",
        contract: TOKEN_CONTRACT,
        topics: &["0xddf252ad", "0x00a9d872"],
        data: "0x01f4",
        gas_price: "2000000000",
        gas_used: "52000",
        log_index: "0",
        block_number: "950",
        block_transaction_index: "0",
        block_timestamp: "1650000000",
    };
    assert_eq!(manager.announce_log(wire, rid), Status::Success);
    assert_eq!(manager.announce_log(wire, rid), Status::Success);
    wait_until("log persisted", || {
        client
            .changes()
            .iter()
            .any(|change| matches!(change, RecordedChange::Log(ChangeKind::Add, _)))
    });

    let log_changes = client
        .changes()
        .iter()
        .filter(|change| matches!(change, RecordedChange::Log(_, _)))
        .count();
    assert_eq!(log_changes, 1);
}

#[test]
fn test_peer_mode_feeds_height_transactions_and_peers() {
    let client = RecordingClient::new();
    let config =
        ManagerConfig::new(ChainKind::Bitcoin, ACCOUNT).with_mode(SyncMode::PeerToPeer);
    let manager =
        WalletManager::new(config, Arc::clone(&client) as Arc<dyn Client>, Persisted::default())
            .expect("manager construction");
    let primary = manager.primary_wallet();

    manager.connect();
    wait_until("connected", || manager.is_connected());
    // Peer mode issues no remote queries.
    assert!(client.last_block_number_rid().is_none());

    manager.peer_block_height(500);
    wait_until("height applied", || manager.block_height() == 500);

    let wire = TransactionWire {
        hash: "0xt1",
        from: "0x1563915e194d8cfba1943570603f7606a3115508",
        to: ACCOUNT,
        contract: "",
        amount: "800",
        gas_limit: "0",
        gas_price: "0",
        data: "",
        nonce: "0",
        gas_used: "0",
        block_number: "480",
        block_hash: "0xb480",
        block_confirmations: "3",
        block_transaction_index: "1",
        block_timestamp: "1650000000",
        is_error: false,
    };
    assert_eq!(manager.peer_transaction(wire), Status::Success);
    wait_until("relayed transaction merged", || {
        manager.wallet_transaction_count(primary) == Ok(1)
    });
    assert_eq!(manager.wallet_balance(primary).unwrap().value(), 800);

    manager.peer_connected(PersistRecord::new(EntityHash::new("peer-1"), vec![1, 2, 3]));
    wait_until("peer saved", || {
        client
            .changes()
            .iter()
            .any(|change| matches!(change, RecordedChange::SavePeers(records) if records.len() == 1))
    });
    assert!(client
        .events()
        .iter()
        .any(|event| matches!(event, RecordedEvent::Peer(PeerEventKind::Created, _, _))));

    manager.peer_disconnected(EntityHash::new("peer-1"));
    wait_until("peer removed", || {
        client
            .changes()
            .iter()
            .any(|change| matches!(change, RecordedChange::SavePeers(records) if records.is_empty()))
    });
}
