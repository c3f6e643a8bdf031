//! The wallet manager: signal entry points, handle-side mutation, getters.
//!
//! Every externally visible operation is split into a *signal* half and a
//! *handle* half. Signals run on the caller's thread: they validate cheaply,
//! deep-copy any borrowed payload, and enqueue an event. Handles run
//! exclusively on the dispatcher worker and are the only place wallet and
//! entity state mutates, which is what lets them share state without locking
//! among themselves. Synchronous getters read small snapshots behind a
//! narrow lock that is never held across the signal-to-handle boundary.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::amount::{parse_decimal, parse_decimal_u64, Amount, FeeBasis};
use crate::client::{Client, EventListener};
use crate::config::ManagerConfig;
use crate::dispatch::{Dispatchable, EventDispatcher, HandlerTable, ShutdownMode};
use crate::entity::{Entities, Transaction, TransactionStatus, Wallet};
use crate::error::{EntityError, EntityResult, Result, Status, SyncError};
use crate::sync::{RequestKind, RequestTracker, SyncProgress, SyncProgressSnapshot};
use crate::types::{
    AnnouncedLog, AnnouncedTransaction, BlockEventKind, BlockId, ChainKind, ChangeKind, EntityHash,
    Event, EventKind, ListenerId, LogWire, ManagerEventKind, PeerEventKind, PersistRecord,
    Persisted, RequestId, SignalTag, SyncMode, Token, TransactionEventKind, TransactionId,
    TransactionWire, WalletEventKind, WalletId,
};

/// The dispatcher's closed event catalog. One variant per signal entry
/// point; payloads are already deep-copied and parsed.
#[derive(Debug)]
pub(crate) enum Signal {
    Connect,
    Disconnect,
    ManagerCreated,
    ManagerDeleted,

    RequestBlockNumber,
    RequestBalance {
        wallet: WalletId,
    },
    RequestGasPrice {
        wallet: WalletId,
    },
    RequestGasEstimate {
        wallet: WalletId,
        transaction: TransactionId,
    },
    RequestNonce,
    RequestLogs {
        contract: Option<String>,
        event_signature: String,
    },

    WalletCreate {
        wallet: WalletId,
        token: Option<Token>,
    },
    WalletSetGasLimit {
        wallet: WalletId,
        gas_limit: u64,
    },
    WalletSetGasPrice {
        wallet: WalletId,
        gas_price: u128,
    },

    TransactionCreate {
        wallet: WalletId,
        transaction: TransactionId,
        to: String,
        amount: u128,
    },
    TransactionSign {
        wallet: WalletId,
        transaction: TransactionId,
        raw_signed: Vec<u8>,
        hash: EntityHash,
    },
    TransactionSubmit {
        wallet: WalletId,
        transaction: TransactionId,
    },
    TransactionDelete {
        wallet: WalletId,
        transaction: TransactionId,
    },

    AnnounceBlockNumber {
        rid: RequestId,
        height: u64,
    },
    AnnounceNonce {
        rid: RequestId,
        address: String,
        nonce: u64,
    },
    AnnounceBalance {
        rid: RequestId,
        wallet: WalletId,
        balance: u128,
    },
    AnnounceGasPrice {
        rid: RequestId,
        wallet: WalletId,
        gas_price: u128,
    },
    AnnounceGasEstimate {
        rid: RequestId,
        wallet: WalletId,
        transaction: TransactionId,
        gas_estimate: u64,
    },
    AnnounceSubmit {
        rid: RequestId,
        wallet: WalletId,
        transaction: TransactionId,
        hash: Option<EntityHash>,
        error: Option<String>,
    },
    AnnounceTransaction {
        rid: RequestId,
        transaction: AnnouncedTransaction,
    },
    AnnounceTransactionsComplete {
        rid: RequestId,
        success: bool,
    },
    AnnounceLog {
        rid: RequestId,
        log: AnnouncedLog,
    },

    PeerConnected {
        record: PersistRecord,
    },
    PeerDisconnected {
        hash: EntityHash,
    },
    PeerBlockHeight {
        height: u64,
    },
    PeerTransaction {
        transaction: AnnouncedTransaction,
    },
}

impl Dispatchable for Signal {
    type Tag = SignalTag;

    fn tag(&self) -> SignalTag {
        match self {
            Signal::Connect => SignalTag::Connect,
            Signal::Disconnect => SignalTag::Disconnect,
            Signal::ManagerCreated => SignalTag::ManagerCreated,
            Signal::ManagerDeleted => SignalTag::ManagerDeleted,
            Signal::RequestBlockNumber => SignalTag::RequestBlockNumber,
            Signal::RequestBalance {
                ..
            } => SignalTag::RequestBalance,
            Signal::RequestGasPrice {
                ..
            } => SignalTag::RequestGasPrice,
            Signal::RequestGasEstimate {
                ..
            } => SignalTag::RequestGasEstimate,
            Signal::RequestNonce => SignalTag::RequestNonce,
            Signal::RequestLogs {
                ..
            } => SignalTag::RequestLogs,
            Signal::WalletCreate {
                ..
            } => SignalTag::WalletCreate,
            Signal::WalletSetGasLimit {
                ..
            } => SignalTag::WalletSetGasLimit,
            Signal::WalletSetGasPrice {
                ..
            } => SignalTag::WalletSetGasPrice,
            Signal::TransactionCreate {
                ..
            } => SignalTag::TransactionCreate,
            Signal::TransactionSign {
                ..
            } => SignalTag::TransactionSign,
            Signal::TransactionSubmit {
                ..
            } => SignalTag::TransactionSubmit,
            Signal::TransactionDelete {
                ..
            } => SignalTag::TransactionDelete,
            Signal::AnnounceBlockNumber {
                ..
            } => SignalTag::AnnounceBlockNumber,
            Signal::AnnounceNonce {
                ..
            } => SignalTag::AnnounceNonce,
            Signal::AnnounceBalance {
                ..
            } => SignalTag::AnnounceBalance,
            Signal::AnnounceGasPrice {
                ..
            } => SignalTag::AnnounceGasPrice,
            Signal::AnnounceGasEstimate {
                ..
            } => SignalTag::AnnounceGasEstimate,
            Signal::AnnounceSubmit {
                ..
            } => SignalTag::AnnounceSubmit,
            Signal::AnnounceTransaction {
                ..
            } => SignalTag::AnnounceTransaction,
            Signal::AnnounceTransactionsComplete {
                ..
            } => SignalTag::AnnounceTransactionsComplete,
            Signal::AnnounceLog {
                ..
            } => SignalTag::AnnounceLog,
            Signal::PeerConnected {
                ..
            } => SignalTag::PeerConnected,
            Signal::PeerDisconnected {
                ..
            } => SignalTag::PeerDisconnected,
            Signal::PeerBlockHeight {
                ..
            } => SignalTag::PeerBlockHeight,
            Signal::PeerTransaction {
                ..
            } => SignalTag::PeerTransaction,
        }
    }
}

/// Fields read by synchronous getters from caller threads. Guarded by the
/// narrow state lock; written only from the dispatcher thread.
#[derive(Debug)]
struct SharedState {
    connected: bool,
    block_height: u64,
    progress: SyncProgressSnapshot,
    account_nonce: Option<u64>,
}

type PendingEvent = (EventKind, Status, Option<String>);

/// State owned by the dispatcher worker. Handle methods run here, one at a
/// time, and are the only writers of wallet and entity state.
struct ManagerState {
    config: ManagerConfig,
    client: Arc<dyn Client>,
    entities: Arc<RwLock<Entities>>,
    shared: Arc<RwLock<SharedState>>,
    requests: Arc<Mutex<RequestTracker>>,
    progress: SyncProgress,
    block_height: u64,
    connected: bool,
    account_nonce: Option<u64>,
    seen_addresses: HashSet<String>,
    peer_records: Vec<PersistRecord>,
}

impl ManagerState {
    fn entities(&self) -> RwLockWriteGuard<'_, Entities> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn entities_read(&self) -> RwLockReadGuard<'_, Entities> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn requests(&self) -> MutexGuard<'_, RequestTracker> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mirror dispatcher-owned fields into the snapshot getters read.
    fn sync_shared(&self) {
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        shared.connected = self.connected;
        shared.block_height = self.block_height;
        shared.progress = self.progress.snapshot();
        shared.account_nonce = self.account_nonce;
    }

    /// Deliver one lifecycle event to the client and every listener. Called
    /// with no locks held.
    fn emit(&self, kind: EventKind, status: Status, error: Option<String>) {
        match kind {
            EventKind::Manager(event) => {
                self.client.manager_event(event, status, error.as_deref())
            }
            EventKind::Peer(event) => self.client.peer_event(event, status, error.as_deref()),
            EventKind::Wallet(wallet, event) => {
                self.client.wallet_event(wallet, event, status, error.as_deref())
            }
            EventKind::Block(block, event) => {
                self.client.block_event(block, event, status, error.as_deref())
            }
            EventKind::Transaction(wallet, transaction, event) => {
                self.client.transaction_event(wallet, transaction, event, status, error.as_deref())
            }
        }
        let listeners = self.entities_read().listeners();
        let event = Event {
            kind,
            status,
            error,
        };
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn emit_all(&self, events: Vec<PendingEvent>) {
        for (kind, status, error) in events {
            self.emit(kind, status, error);
        }
    }

    fn wiring_mismatch(&mut self, expected: SignalTag, signal: Signal) {
        debug_assert!(
            false,
            "handler for {:?} received event tagged {:?}",
            expected,
            signal.tag()
        );
        tracing::error!(expected = %expected, actual = %signal.tag(), "event routed to wrong handler; dropping");
    }

    // Connection lifecycle

    fn handle_manager_created(&mut self) {
        self.emit(EventKind::Manager(ManagerEventKind::Created), Status::Success, None);
    }

    fn handle_manager_deleted(&mut self) {
        self.emit(EventKind::Manager(ManagerEventKind::Deleted), Status::Success, None);
    }

    fn handle_connect(&mut self) {
        if self.connected {
            tracing::debug!("connect while already connected; ignoring");
            return;
        }
        self.connected = true;
        self.progress.abandon();
        self.sync_shared();
        self.emit(EventKind::Manager(ManagerEventKind::SyncStarted), Status::Success, None);
        if self.config.mode == SyncMode::RemoteQuery {
            self.issue_block_number_request();
        }
    }

    fn handle_disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        // Outstanding announcements become stale rather than being aborted.
        self.requests().clear();
        self.progress.abandon();
        self.sync_shared();
        self.emit(EventKind::Manager(ManagerEventKind::SyncStopped), Status::Success, None);
    }

    /// Suspend querying after a connectivity failure. Reconnection is the
    /// embedder's call, via `connect`.
    fn suspend(&mut self, reason: String) {
        self.connected = false;
        self.requests().clear();
        self.progress.abandon();
        self.sync_shared();
        self.emit(
            EventKind::Manager(ManagerEventKind::NetworkUnavailable),
            Status::NotConnected,
            Some(reason),
        );
    }

    // Backend requests

    fn issue_block_number_request(&mut self) {
        let rid = self.requests().register(RequestKind::BlockNumber);
        tracing::debug!(%rid, "requesting block number");
        self.client.get_block_number(rid);
    }

    fn handle_request_block_number(&mut self) {
        if !self.connected {
            tracing::debug!("block number request while disconnected; dropping");
            return;
        }
        self.issue_block_number_request();
    }

    fn handle_request_balance(&mut self, wallet: WalletId) {
        if !self.connected {
            return;
        }
        let address = match self.entities_read().wallet(wallet) {
            Ok(w) => w.address.clone(),
            Err(e) => {
                tracing::warn!(%wallet, error = %e, "balance request for unknown wallet");
                return;
            }
        };
        let rid = self.requests().register(RequestKind::Balance(wallet));
        self.client.get_balance(wallet, &address, rid);
    }

    fn handle_request_gas_price(&mut self, wallet: WalletId) {
        if !self.connected || !self.entities_read().wallets.contains(wallet) {
            return;
        }
        let rid = self.requests().register(RequestKind::GasPrice(wallet));
        self.client.get_gas_price(wallet, rid);
    }

    fn handle_request_gas_estimate(&mut self, wallet: WalletId, transaction: TransactionId) {
        if !self.connected {
            return;
        }
        let (to, amount, data) = match self.entities_read().transaction(transaction) {
            Ok(tx) => (tx.to.clone(), tx.amount.to_string(), String::new()),
            Err(e) => {
                tracing::warn!(%transaction, error = %e, "gas estimate request for unknown transaction");
                return;
            }
        };
        let rid = self.requests().register(RequestKind::GasEstimate(wallet, transaction));
        self.client.estimate_gas(wallet, transaction, &to, &amount, &data, rid);
    }

    fn handle_request_nonce(&mut self) {
        if !self.connected {
            return;
        }
        let rid = self.requests().register(RequestKind::Nonce);
        let address = self.config.account_address.clone();
        self.client.get_nonce(&address, rid);
    }

    fn handle_request_logs(&mut self, contract: Option<String>, event_signature: String) {
        if !self.connected {
            return;
        }
        let rid = self.requests().register(RequestKind::Logs);
        let address = self.config.account_address.clone();
        self.client.get_logs(contract.as_deref(), &address, &event_signature, rid);
    }

    // Wallet mutation

    fn handle_wallet_create(&mut self, wallet: WalletId, token: Option<Token>) {
        let created = {
            let mut entities = self.entities();
            let record = Wallet::new(
                token,
                self.config.account_address.clone(),
                self.config.chain,
                self.config.default_gas_limit,
                self.config.default_gas_price,
            );
            entities.fill_wallet(wallet, record)
        };
        if created {
            self.emit(
                EventKind::Wallet(wallet, WalletEventKind::Created),
                Status::Success,
                None,
            );
        } else {
            tracing::warn!(%wallet, "wallet slot already materialized; ignoring create");
        }
    }

    fn handle_wallet_set_gas_limit(&mut self, wallet: WalletId, gas_limit: u64) {
        let applied = {
            let mut entities = self.entities();
            let chain = entities.chain();
            match entities.wallet_mut(wallet) {
                Ok(w) => {
                    w.default_gas_limit = gas_limit;
                    w.fee_basis = FeeBasis::new(chain, w.default_gas_price, gas_limit);
                    true
                }
                Err(_) => false,
            }
        };
        if applied {
            self.emit(
                EventKind::Wallet(wallet, WalletEventKind::DefaultGasLimitUpdated),
                Status::Success,
                None,
            );
        } else {
            tracing::warn!(%wallet, "gas limit update for unknown wallet");
        }
    }

    fn handle_wallet_set_gas_price(&mut self, wallet: WalletId, gas_price: u128) {
        let applied = {
            let mut entities = self.entities();
            let chain = entities.chain();
            match entities.wallet_mut(wallet) {
                Ok(w) => {
                    w.default_gas_price = gas_price;
                    w.fee_basis = FeeBasis::new(chain, gas_price, w.default_gas_limit);
                    true
                }
                Err(_) => false,
            }
        };
        if applied {
            self.emit(
                EventKind::Wallet(wallet, WalletEventKind::DefaultGasPriceUpdated),
                Status::Success,
                None,
            );
        } else {
            tracing::warn!(%wallet, "gas price update for unknown wallet");
        }
    }

    // Transaction mutation

    fn handle_transaction_create(
        &mut self,
        wallet: WalletId,
        transaction: TransactionId,
        to: String,
        amount: u128,
    ) {
        let mut events: Vec<PendingEvent> = Vec::new();
        {
            let mut entities = self.entities();
            let chain = entities.chain();
            let (from, gas_limit, gas_price) = match entities.wallet(wallet) {
                Ok(w) => (w.address.clone(), w.default_gas_limit, w.default_gas_price),
                Err(e) => {
                    tracing::warn!(%wallet, error = %e, "transaction create for unknown wallet");
                    return;
                }
            };
            let tx = Transaction::local(from, to, Amount::new(chain, amount), gas_limit, gas_price);
            if !entities.transactions.fill(transaction, tx) {
                tracing::warn!(%transaction, "transaction slot already materialized; ignoring create");
                return;
            }
            if let Ok(w) = entities.wallet_mut(wallet) {
                w.push_transaction(transaction);
            }
            events.push((
                EventKind::Transaction(wallet, transaction, TransactionEventKind::Created),
                Status::Success,
                None,
            ));
            if let Ok(Some(balance)) = entities.recompute_balance(wallet) {
                tracing::trace!(%wallet, %balance, "balance updated after local create");
                events.push((
                    EventKind::Wallet(wallet, WalletEventKind::BalanceUpdated),
                    Status::Success,
                    None,
                ));
            }
        }
        self.emit_all(events);
    }

    fn handle_transaction_sign(
        &mut self,
        wallet: WalletId,
        transaction: TransactionId,
        raw_signed: Vec<u8>,
        hash: EntityHash,
    ) {
        let mut events: Vec<PendingEvent> = Vec::new();
        let mut record = None;
        {
            let mut entities = self.entities();
            let nonce = self.account_nonce;
            let outcome = match entities.transaction_mut(transaction) {
                Ok(tx) => match tx.transition(TransactionStatus::Signed) {
                    Ok(()) => {
                        tracing::trace!(%transaction, raw = %hex::encode(&raw_signed), "transaction signed");
                        tx.raw_signed = Some(raw_signed);
                        tx.hash = Some(hash.clone());
                        if tx.nonce.is_none() {
                            tx.nonce = nonce;
                        }
                        record = tx.to_record();
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    entities.index_transaction_hash(hash, transaction);
                    events.push((
                        EventKind::Transaction(wallet, transaction, TransactionEventKind::Signed),
                        Status::Success,
                        None,
                    ));
                }
                Err(e) => {
                    events.push((
                        EventKind::Transaction(wallet, transaction, TransactionEventKind::Signed),
                        e.status(),
                        Some(e.to_string()),
                    ));
                }
            }
        }
        self.emit_all(events);
        if let Some(record) = record {
            self.client.change_transaction(ChangeKind::Add, &record);
        }
    }

    fn handle_transaction_submit(&mut self, wallet: WalletId, transaction: TransactionId) {
        if !self.connected {
            // Submission needs the backend; fail the transaction rather than
            // queueing it invisibly.
            let failed = {
                let mut entities = self.entities();
                entities
                    .transaction_mut(transaction)
                    .and_then(|tx| tx.transition(TransactionStatus::Errored))
                    .is_ok()
            };
            let status = if failed {
                Status::NotConnected
            } else {
                Status::InvalidState
            };
            self.emit(
                EventKind::Transaction(wallet, transaction, TransactionEventKind::Errored),
                status,
                Some("not connected".to_string()),
            );
            return;
        }

        let raw = {
            let entities = self.entities_read();
            match entities.transaction(transaction) {
                Ok(tx) if tx.status == TransactionStatus::Signed => tx.raw_signed.clone(),
                Ok(tx) => {
                    let error = EntityError::InvalidTransition {
                        from: tx.status,
                        to: TransactionStatus::Submitted,
                    };
                    drop(entities);
                    self.emit(
                        EventKind::Transaction(
                            wallet,
                            transaction,
                            TransactionEventKind::Submitted,
                        ),
                        Status::InvalidState,
                        Some(error.to_string()),
                    );
                    return;
                }
                Err(e) => {
                    drop(entities);
                    self.emit(
                        EventKind::Transaction(
                            wallet,
                            transaction,
                            TransactionEventKind::Submitted,
                        ),
                        e.status(),
                        Some(e.to_string()),
                    );
                    return;
                }
            }
        };

        let rid = self.requests().register(RequestKind::Submit(wallet, transaction));
        tracing::debug!(%wallet, %transaction, %rid, "submitting transaction");
        self.client.submit_transaction(wallet, transaction, raw.as_deref().unwrap_or(&[]), rid);
    }

    fn handle_transaction_delete(&mut self, wallet: WalletId, transaction: TransactionId) {
        let mut events: Vec<PendingEvent> = Vec::new();
        let record = {
            let mut entities = self.entities();
            let record = match entities.transaction_mut(transaction) {
                Ok(tx) => match tx.transition(TransactionStatus::Deleted) {
                    Ok(()) => tx.to_record(),
                    Err(e) => {
                        tracing::warn!(%transaction, error = %e, "delete rejected");
                        return;
                    }
                },
                Err(e) => {
                    tracing::warn!(%transaction, error = %e, "delete for unknown transaction");
                    return;
                }
            };
            let removed = entities.transactions.remove(transaction);
            if let Some(tx) = &removed {
                if let Some(hash) = &tx.hash {
                    let hash = hash.clone();
                    entities.unindex_transaction_hash(&hash);
                }
            }
            if let Ok(w) = entities.wallet_mut(wallet) {
                w.remove_transaction(transaction);
            }
            events.push((
                EventKind::Transaction(wallet, transaction, TransactionEventKind::Deleted),
                Status::Success,
                None,
            ));
            if let Ok(Some(_)) = entities.recompute_balance(wallet) {
                events.push((
                    EventKind::Wallet(wallet, WalletEventKind::BalanceUpdated),
                    Status::Success,
                    None,
                ));
            }
            record
        };
        self.emit_all(events);
        if let Some(record) = record {
            self.client.change_transaction(ChangeKind::Remove, &record);
        }
    }

    // Announce handling

    fn handle_announce_block_number(&mut self, rid: RequestId, height: u64) {
        if self.requests().consume(rid) != Some(RequestKind::BlockNumber) {
            tracing::debug!(%rid, height, "stale block number announcement; dropping");
            return;
        }
        self.apply_block_height(height);
    }

    fn handle_peer_block_height(&mut self, height: u64) {
        self.apply_block_height(height);
    }

    /// High-water mark update shared by both backends. Monotonic: a lower
    /// announced height never lowers the mark.
    fn apply_block_height(&mut self, height: u64) {
        if height >= self.block_height {
            self.block_height = height;
        } else {
            tracing::debug!(
                height,
                current = self.block_height,
                "announced height below high-water mark; keeping mark"
            );
        }
        self.progress.extend_end(self.block_height);
        self.sync_shared();
        self.maybe_start_sync();
    }

    /// Start the next query cycle when idle with an uncovered range.
    ///
    /// The range only advances past `[begin, end)` once that range completed
    /// successfully; a range abandoned by disconnect or retry exhaustion is
    /// reissued as-is on the next opportunity.
    fn maybe_start_sync(&mut self) {
        if self.config.mode != SyncMode::RemoteQuery || !self.connected {
            return;
        }
        if !self.progress.is_idle() {
            return;
        }
        let current = self.progress.range();
        if !self.progress.is_completed() && !current.is_empty() {
            self.issue_sync_query();
            return;
        }
        let next = current.advanced(self.block_height);
        if next.is_empty() {
            return;
        }
        self.progress.advance_range(self.block_height);
        self.issue_sync_query();
    }

    /// Issue the transactions query for the current range under a fresh
    /// request id, invalidating any previous one.
    fn issue_sync_query(&mut self) {
        let range = self.progress.range();
        let rid = {
            let mut requests = self.requests();
            if let Some(previous) = self.progress.active_rid() {
                requests.invalidate(previous);
            }
            requests.register(RequestKind::Transactions)
        };
        self.progress.begin_query(rid, range);
        self.sync_shared();
        tracing::info!(%rid, %range, "querying transactions");
        let address = self.config.account_address.clone();
        self.client.get_transactions(&address, rid);
    }

    fn handle_announce_nonce(&mut self, rid: RequestId, address: String, nonce: u64) {
        if self.requests().consume(rid) != Some(RequestKind::Nonce) {
            tracing::debug!(%rid, "stale nonce announcement; dropping");
            return;
        }
        if address != self.config.account_address {
            tracing::warn!(%address, "nonce announced for foreign address; dropping");
            return;
        }
        self.account_nonce = Some(nonce);
        self.sync_shared();
    }

    fn handle_announce_balance(&mut self, rid: RequestId, wallet: WalletId, balance: u128) {
        if self.requests().consume(rid) != Some(RequestKind::Balance(wallet)) {
            tracing::debug!(%rid, %wallet, "stale balance announcement; dropping");
            return;
        }
        let applied = {
            let mut entities = self.entities();
            let chain = entities.chain();
            match entities.wallet_mut(wallet) {
                Ok(w) => {
                    w.balance = Amount::new(chain, balance);
                    true
                }
                Err(_) => false,
            }
        };
        if applied {
            self.emit(
                EventKind::Wallet(wallet, WalletEventKind::BalanceUpdated),
                Status::Success,
                None,
            );
        }
    }

    fn handle_announce_gas_price(&mut self, rid: RequestId, wallet: WalletId, gas_price: u128) {
        if self.requests().consume(rid) != Some(RequestKind::GasPrice(wallet)) {
            tracing::debug!(%rid, %wallet, "stale gas price announcement; dropping");
            return;
        }
        self.handle_wallet_set_gas_price(wallet, gas_price);
    }

    fn handle_announce_gas_estimate(
        &mut self,
        rid: RequestId,
        wallet: WalletId,
        transaction: TransactionId,
        gas_estimate: u64,
    ) {
        if self.requests().consume(rid) != Some(RequestKind::GasEstimate(wallet, transaction)) {
            tracing::debug!(%rid, %transaction, "stale gas estimate announcement; dropping");
            return;
        }
        let applied = {
            let mut entities = self.entities();
            match entities.transaction_mut(transaction) {
                Ok(tx) => {
                    tx.gas_estimate = Some(gas_estimate);
                    true
                }
                Err(_) => false,
            }
        };
        if applied {
            self.emit(
                EventKind::Transaction(wallet, transaction, TransactionEventKind::GasEstimateUpdated),
                Status::Success,
                None,
            );
        }
    }

    fn handle_announce_submit(
        &mut self,
        rid: RequestId,
        wallet: WalletId,
        transaction: TransactionId,
        hash: Option<EntityHash>,
        error: Option<String>,
    ) {
        match self.requests().consume(rid) {
            Some(RequestKind::Submit(w, t)) if w == wallet && t == transaction => {}
            Some(other) => {
                tracing::warn!(%rid, ?other, "submit announcement for mismatched request; dropping");
                return;
            }
            None => {
                tracing::debug!(%rid, "stale submit announcement; dropping");
                return;
            }
        }

        if let Some(error) = error {
            let mut events: Vec<PendingEvent> = Vec::new();
            let record = {
                let mut entities = self.entities();
                let record = match entities
                    .transaction_mut(transaction)
                    .and_then(|tx| tx.transition(TransactionStatus::Errored).map(|()| tx))
                {
                    Ok(tx) => {
                        tx.is_error = true;
                        events.push((
                            EventKind::Transaction(
                                wallet,
                                transaction,
                                TransactionEventKind::Errored,
                            ),
                            Status::TransactionSubmission,
                            Some(error),
                        ));
                        tx.to_record()
                    }
                    Err(e) => {
                        tracing::warn!(%transaction, error = %e, "submit failure for transaction in wrong state");
                        return;
                    }
                };
                // The errored transaction no longer counts toward the balance.
                if let Ok(Some(_)) = entities.recompute_balance(wallet) {
                    events.push((
                        EventKind::Wallet(wallet, WalletEventKind::BalanceUpdated),
                        Status::Success,
                        None,
                    ));
                }
                record
            };
            self.emit_all(events);
            if let Some(record) = record {
                self.client.change_transaction(ChangeKind::Update, &record);
            }
            return;
        }

        // Success path: guard against a hash disagreeing with the one we
        // computed at signing. That is a data-integrity fault: the
        // announcement is rejected, the transaction stays Signed, and the
        // fault surfaces as a status code on the transaction event.
        let mut mismatch = None;
        let accepted = {
            let mut entities = self.entities();
            match entities.transaction_mut(transaction) {
                Ok(tx) => {
                    let fault = match (&tx.hash, &hash) {
                        (Some(held), Some(announced)) if held != announced => {
                            Some(EntityError::HashMismatch {
                                held: held.to_string(),
                                announced: announced.to_string(),
                            })
                        }
                        _ => None,
                    };
                    if let Some(fault) = fault {
                        mismatch = Some(fault);
                        None
                    } else {
                        match tx.transition(TransactionStatus::Submitted) {
                            Ok(()) => {
                                if tx.hash.is_none() {
                                    tx.hash = hash.clone();
                                }
                                Some(tx.to_record())
                            }
                            Err(e) => {
                                tracing::warn!(%transaction, error = %e, "submit confirmation in wrong state");
                                None
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%transaction, error = %e, "submit confirmation for unknown transaction");
                    None
                }
            }
        };
        if let Some(fault) = mismatch {
            tracing::warn!(%transaction, error = %fault, "rejecting submit announcement");
            self.emit(
                EventKind::Transaction(wallet, transaction, TransactionEventKind::Submitted),
                fault.status(),
                Some(fault.to_string()),
            );
            return;
        }
        if let Some(record) = accepted {
            if let Some(hash) = hash {
                self.entities().index_transaction_hash(hash, transaction);
            }
            self.emit(
                EventKind::Transaction(wallet, transaction, TransactionEventKind::Submitted),
                Status::Success,
                None,
            );
            if let Some(record) = record {
                self.client.change_transaction(ChangeKind::Update, &record);
            }
        }
    }

    fn handle_announce_transaction(&mut self, rid: RequestId, announced: AnnouncedTransaction) {
        // Streaming announcement: the rid stays outstanding until the
        // completion announcement consumes it.
        if self.requests().kind(rid) != Some(RequestKind::Transactions)
            || !self.progress.is_active_rid(rid)
        {
            tracing::debug!(%rid, hash = %announced.hash, "stale transaction announcement; dropping");
            return;
        }
        self.merge_announced_transaction(announced, true);
    }

    fn handle_peer_transaction(&mut self, announced: AnnouncedTransaction) {
        self.merge_announced_transaction(announced, false);
    }

    /// Merge one reported transaction into the owning wallet, deduplicating
    /// by hash. Shared by the remote-query and peer-to-peer paths.
    fn merge_announced_transaction(&mut self, announced: AnnouncedTransaction, stage_horizon: bool) {
        let mut events: Vec<PendingEvent> = Vec::new();
        let mut changed_record: Option<(ChangeKind, PersistRecord)> = None;
        let mut block_records = None;
        {
            let mut entities = self.entities();
            let chain = entities.chain();
            let wallet = announced
                .contract
                .as_deref()
                .and_then(|contract| entities.wallet_for_contract(contract))
                .unwrap_or_else(|| {
                    entities.wallet_for_token(None).unwrap_or_else(|| WalletId::from_index(0))
                });

            if let Some(existing) = entities.transaction_by_hash(&announced.hash) {
                // Known hash: no duplicate storage. A first on-chain sighting
                // of a submitted transaction confirms it; later sightings
                // only refresh the confirmation count.
                if let Ok(tx) = entities.transaction_mut(existing) {
                    if tx.status == TransactionStatus::Submitted && announced.block_number > 0 {
                        if tx.transition(TransactionStatus::Blocked).is_ok() {
                            tx.confirmations = announced.block_confirmations;
                            events.push((
                                EventKind::Transaction(
                                    wallet,
                                    existing,
                                    TransactionEventKind::Blocked,
                                ),
                                Status::Success,
                                None,
                            ));
                        }
                    } else if tx.status == TransactionStatus::Blocked
                        && announced.block_confirmations > tx.confirmations
                    {
                        tx.confirmations = announced.block_confirmations;
                        events.push((
                            EventKind::Transaction(
                                wallet,
                                existing,
                                TransactionEventKind::ConfirmationsUpdated,
                            ),
                            Status::Success,
                            None,
                        ));
                    } else {
                        tracing::debug!(hash = %announced.hash, "duplicate transaction announcement; no change");
                    }
                    if !events.is_empty() {
                        changed_record = entities
                            .transaction(existing)
                            .ok()
                            .and_then(Transaction::to_record)
                            .map(|record| (ChangeKind::Update, record));
                    }
                }
                if announced.block_number > 0 {
                    let (block, created) = entities.chain_block(
                        announced.block_hash.clone(),
                        announced.block_number,
                        announced.block_timestamp,
                    );
                    if created {
                        events.push((
                            EventKind::Block(block, BlockEventKind::Created),
                            Status::Success,
                            None,
                        ));
                        block_records = Some(Self::collect_block_records(&entities));
                    }
                    if let Ok(tx) = entities.transaction_mut(existing) {
                        if tx.block.is_none() {
                            tx.block = Some(block);
                        }
                    }
                }
            } else {
                let id = entities.transactions.insert(Transaction::announced(chain, &announced));
                entities.index_transaction_hash(announced.hash.clone(), id);
                if let Ok(w) = entities.wallet_mut(wallet) {
                    w.push_transaction(id);
                }
                events.push((
                    EventKind::Transaction(wallet, id, TransactionEventKind::Created),
                    Status::Success,
                    None,
                ));

                if announced.block_number > 0 {
                    let (block, created) = entities.chain_block(
                        announced.block_hash.clone(),
                        announced.block_number,
                        announced.block_timestamp,
                    );
                    if created {
                        events.push((
                            EventKind::Block(block, BlockEventKind::Created),
                            Status::Success,
                            None,
                        ));
                        block_records = Some(Self::collect_block_records(&entities));
                    }
                    if let Ok(tx) = entities.transaction_mut(id) {
                        tx.block = Some(block);
                    }
                }

                let status = entities.transaction(id).map(|tx| tx.status).unwrap_or(
                    TransactionStatus::Created,
                );
                match status {
                    TransactionStatus::Blocked => events.push((
                        EventKind::Transaction(wallet, id, TransactionEventKind::Blocked),
                        Status::Success,
                        None,
                    )),
                    TransactionStatus::Errored => events.push((
                        EventKind::Transaction(wallet, id, TransactionEventKind::Errored),
                        Status::TransactionSubmission,
                        None,
                    )),
                    _ => {}
                }

                changed_record = entities
                    .transaction(id)
                    .ok()
                    .and_then(Transaction::to_record)
                    .map(|record| (ChangeKind::Add, record));
            }

            if let Ok(Some(_)) = entities.recompute_balance(wallet) {
                events.push((
                    EventKind::Wallet(wallet, WalletEventKind::BalanceUpdated),
                    Status::Success,
                    None,
                ));
            }
        }

        if stage_horizon {
            let new_to = self.seen_addresses.insert(announced.to.clone());
            let new_from = self.seen_addresses.insert(announced.from.clone());
            self.progress.stage_addresses(
                new_to.then_some(announced.to.as_str()),
                new_from.then_some(announced.from.as_str()),
            );
        }

        self.emit_all(events);
        if let Some((change, record)) = changed_record {
            self.client.change_transaction(change, &record);
        }
        if let Some(records) = block_records {
            self.client.save_blocks(&records);
        }
    }

    fn collect_block_records(entities: &Entities) -> Vec<PersistRecord> {
        entities.blocks.iter().filter_map(|(_, block)| block.to_record()).collect()
    }

    fn handle_announce_transactions_complete(&mut self, rid: RequestId, success: bool) {
        if !self.progress.is_active_rid(rid) {
            tracing::debug!(%rid, "stale sync completion; dropping");
            return;
        }
        self.requests().consume(rid);

        if success {
            self.progress.complete_success(rid);
            self.sync_shared();
            self.emit(EventKind::Manager(ManagerEventKind::SyncContinues), Status::Success, None);

            let next = self.progress.range().advanced(self.block_height);
            if next.is_empty() {
                // Caught up; the next cycle starts when the height moves.
                self.emit(
                    EventKind::Manager(ManagerEventKind::SyncStopped),
                    Status::Success,
                    None,
                );
            } else {
                self.progress.advance_range(self.block_height);
                self.issue_sync_query();
            }
            return;
        }

        let attempts = match self.progress.complete_failure(rid) {
            Some(attempts) => attempts,
            None => return,
        };
        if attempts < self.config.retry_limit {
            tracing::warn!(
                %rid,
                attempts,
                limit = self.config.retry_limit,
                "sync cycle failed; reissuing range"
            );
            self.issue_sync_query();
        } else {
            let fault = SyncError::RetriesExhausted {
                limit: self.config.retry_limit,
                range: self.progress.range(),
            };
            self.suspend(fault.to_string());
        }
    }

    fn handle_announce_log(&mut self, rid: RequestId, log: AnnouncedLog) {
        if self.requests().kind(rid) != Some(RequestKind::Logs) {
            tracing::debug!(%rid, "stale log announcement; dropping");
            return;
        }
        let record = {
            let mut entities = self.entities();
            entities.merge_log(&log).and_then(|stored| stored.to_record())
        };
        if let Some(record) = record {
            self.client.change_log(ChangeKind::Add, &record);
        }
    }

    // Peer backend

    fn handle_peer_connected(&mut self, record: PersistRecord) {
        self.peer_records.retain(|existing| existing.hash != record.hash);
        self.peer_records.push(record);
        self.emit(EventKind::Peer(PeerEventKind::Created), Status::Success, None);
        self.client.save_peers(&self.peer_records);
    }

    fn handle_peer_disconnected(&mut self, hash: EntityHash) {
        let before = self.peer_records.len();
        self.peer_records.retain(|existing| existing.hash != hash);
        if self.peer_records.len() == before {
            tracing::debug!(%hash, "disconnect for unknown peer record");
            return;
        }
        self.emit(EventKind::Peer(PeerEventKind::Deleted), Status::Success, None);
        self.client.save_peers(&self.peer_records);
    }
}

macro_rules! route {
    ($table:expr, $tag:ident => $method:ident) => {
        $table.register(SignalTag::$tag, |state: &mut ManagerState, signal| match signal {
            Signal::$tag => state.$method(),
            other => state.wiring_mismatch(SignalTag::$tag, other),
        });
    };
    ($table:expr, $tag:ident { $($field:ident),* } => $method:ident) => {
        $table.register(SignalTag::$tag, |state: &mut ManagerState, signal| match signal {
            Signal::$tag { $($field),* } => state.$method($($field),*),
            other => state.wiring_mismatch(SignalTag::$tag, other),
        });
    };
}

fn handler_table() -> HandlerTable<ManagerState, Signal> {
    let mut table = HandlerTable::new();
    route!(table, Connect => handle_connect);
    route!(table, Disconnect => handle_disconnect);
    route!(table, ManagerCreated => handle_manager_created);
    route!(table, ManagerDeleted => handle_manager_deleted);
    route!(table, RequestBlockNumber => handle_request_block_number);
    route!(table, RequestBalance { wallet } => handle_request_balance);
    route!(table, RequestGasPrice { wallet } => handle_request_gas_price);
    route!(table, RequestGasEstimate { wallet, transaction } => handle_request_gas_estimate);
    route!(table, RequestNonce => handle_request_nonce);
    route!(table, RequestLogs { contract, event_signature } => handle_request_logs);
    route!(table, WalletCreate { wallet, token } => handle_wallet_create);
    route!(table, WalletSetGasLimit { wallet, gas_limit } => handle_wallet_set_gas_limit);
    route!(table, WalletSetGasPrice { wallet, gas_price } => handle_wallet_set_gas_price);
    route!(table, TransactionCreate { wallet, transaction, to, amount } => handle_transaction_create);
    route!(table, TransactionSign { wallet, transaction, raw_signed, hash } => handle_transaction_sign);
    route!(table, TransactionSubmit { wallet, transaction } => handle_transaction_submit);
    route!(table, TransactionDelete { wallet, transaction } => handle_transaction_delete);
    route!(table, AnnounceBlockNumber { rid, height } => handle_announce_block_number);
    route!(table, AnnounceNonce { rid, address, nonce } => handle_announce_nonce);
    route!(table, AnnounceBalance { rid, wallet, balance } => handle_announce_balance);
    route!(table, AnnounceGasPrice { rid, wallet, gas_price } => handle_announce_gas_price);
    route!(table, AnnounceGasEstimate { rid, wallet, transaction, gas_estimate } => handle_announce_gas_estimate);
    route!(table, AnnounceSubmit { rid, wallet, transaction, hash, error } => handle_announce_submit);
    route!(table, AnnounceTransaction { rid, transaction } => handle_announce_transaction);
    route!(table, AnnounceTransactionsComplete { rid, success } => handle_announce_transactions_complete);
    route!(table, AnnounceLog { rid, log } => handle_announce_log);
    route!(table, PeerConnected { record } => handle_peer_connected);
    route!(table, PeerDisconnected { hash } => handle_peer_disconnected);
    route!(table, PeerBlockHeight { height } => handle_peer_block_height);
    route!(table, PeerTransaction { transaction } => handle_peer_transaction);
    table
}

/// The synchronization and event-coordination core for one account on one
/// chain backend.
///
/// Owns its wallets, the connection state, the block-height high-water mark,
/// the request-id generator, and the event dispatcher. The supplied
/// [`Client`] is the external collaborator answering backend queries and
/// receiving lifecycle events.
pub struct WalletManager {
    config: ManagerConfig,
    dispatcher: EventDispatcher<Signal>,
    entities: Arc<RwLock<Entities>>,
    shared: Arc<RwLock<SharedState>>,
    requests: Arc<Mutex<RequestTracker>>,
    primary_wallet: WalletId,
}

impl WalletManager {
    /// Create a manager from key material (already reduced to an account
    /// address), a client contract, and previously persisted state.
    ///
    /// The primary wallet for the chain's native currency is created here;
    /// its `Created` event, and the manager's own, are delivered through the
    /// dispatcher once the worker starts.
    pub fn new(
        config: ManagerConfig,
        client: Arc<dyn Client>,
        persisted: Persisted,
    ) -> Result<Self> {
        config.validate()?;

        let mut entities = Entities::new(config.chain, config.account_address.clone());
        let (primary_wallet, _) = entities.reserve_wallet(None);
        let entities = Arc::new(RwLock::new(entities));

        let shared = Arc::new(RwLock::new(SharedState {
            connected: false,
            block_height: 0,
            progress: SyncProgressSnapshot::default(),
            account_nonce: None,
        }));
        let requests = Arc::new(Mutex::new(RequestTracker::new()));

        if !persisted.blocks.is_empty()
            || !persisted.transactions.is_empty()
            || !persisted.logs.is_empty()
        {
            // Persisted blobs are opaque at this layer; decoding them is
            // chain-specific and happens above. They are carried only so the
            // embedder can hand them back out on save callbacks.
            tracing::info!(
                peers = persisted.peers.len(),
                blocks = persisted.blocks.len(),
                transactions = persisted.transactions.len(),
                logs = persisted.logs.len(),
                "restoring persisted state"
            );
        }

        let state = ManagerState {
            config: config.clone(),
            client,
            entities: Arc::clone(&entities),
            shared: Arc::clone(&shared),
            requests: Arc::clone(&requests),
            progress: SyncProgress::new(),
            block_height: 0,
            connected: false,
            account_nonce: None,
            seen_addresses: HashSet::new(),
            peer_records: persisted.peers,
        };

        let dispatcher = EventDispatcher::spawn(&config.worker_name, state, handler_table())?;

        let manager = Self {
            config,
            dispatcher,
            entities,
            shared,
            requests,
            primary_wallet,
        };
        manager.signal(Signal::ManagerCreated);
        manager.signal(Signal::WalletCreate {
            wallet: primary_wallet,
            token: None,
        });
        Ok(manager)
    }

    fn signal(&self, signal: Signal) {
        if let Err(e) = self.dispatcher.enqueue(signal) {
            tracing::warn!(error = %e, "signal dropped");
        }
    }

    fn shared(&self) -> RwLockReadGuard<'_, SharedState> {
        self.shared.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entities_read(&self) -> RwLockReadGuard<'_, Entities> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn requests(&self) -> MutexGuard<'_, RequestTracker> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the announce-side gate accepts `rid` for `kind` right now.
    fn announce_accepted(&self, rid: RequestId, kind: impl Fn(&RequestKind) -> bool) -> bool {
        if !self.shared().connected {
            return false;
        }
        self.requests().kind(rid).as_ref().is_some_and(kind)
    }

    // Lifecycle

    /// Connect and begin synchronizing.
    pub fn connect(&self) {
        self.signal(Signal::Connect);
    }

    /// Disconnect. Suppresses new queries; announcements for already
    /// in-flight requests are dropped as stale rather than aborted.
    pub fn disconnect(&self) {
        self.signal(Signal::Disconnect);
    }

    /// Tear the manager down. `Drain` processes already-queued events to
    /// completion (including the final `Deleted` event); `Discard` drops
    /// them.
    pub fn shutdown(&mut self, mode: ShutdownMode) {
        if mode == ShutdownMode::Drain {
            self.signal(Signal::ManagerDeleted);
        }
        self.dispatcher.shutdown(mode);
    }

    // Synchronous getters (narrow lock, caller threads)

    pub fn mode(&self) -> SyncMode {
        self.config.mode
    }

    pub fn chain(&self) -> ChainKind {
        self.config.chain
    }

    pub fn account_address(&self) -> &str {
        &self.config.account_address
    }

    pub fn is_connected(&self) -> bool {
        self.shared().connected
    }

    /// The block-height high-water mark: the largest height seen.
    pub fn block_height(&self) -> u64 {
        self.shared().block_height
    }

    pub fn sync_progress(&self) -> SyncProgressSnapshot {
        self.shared().progress.clone()
    }

    pub fn account_nonce(&self) -> Option<u64> {
        self.shared().account_nonce
    }

    /// The wallet holding the chain's native currency, created with the
    /// manager.
    pub fn primary_wallet(&self) -> WalletId {
        self.primary_wallet
    }

    // Wallets

    /// The wallet holding `token`, created on first request. Idempotent:
    /// asking again for a held token returns the same id.
    pub fn wallet_holding_token(&self, token: Token) -> WalletId {
        let (wallet, created) = {
            let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
            entities.reserve_wallet(Some(token.clone()))
        };
        if created {
            self.signal(Signal::WalletCreate {
                wallet,
                token: Some(token),
            });
        }
        wallet
    }

    pub fn wallet_token(&self, wallet: WalletId) -> EntityResult<Option<Token>> {
        self.entities_read().wallet(wallet).map(|w| w.token.clone())
    }

    pub fn wallet_balance(&self, wallet: WalletId) -> EntityResult<Amount> {
        self.entities_read().wallet(wallet).map(|w| w.balance)
    }

    /// Owned transaction ids in creation order.
    pub fn wallet_transactions(&self, wallet: WalletId) -> EntityResult<Vec<TransactionId>> {
        self.entities_read().wallet(wallet).map(|w| w.transactions().to_vec())
    }

    pub fn wallet_transaction_count(&self, wallet: WalletId) -> EntityResult<usize> {
        self.entities_read().wallet(wallet).map(Wallet::transaction_count)
    }

    pub fn wallet_default_gas_limit(&self, wallet: WalletId) -> EntityResult<u64> {
        self.entities_read().wallet(wallet).map(|w| w.default_gas_limit)
    }

    pub fn wallet_default_gas_price(&self, wallet: WalletId) -> EntityResult<u128> {
        self.entities_read().wallet(wallet).map(|w| w.default_gas_price)
    }

    /// The wallet's current fee basis. The returned handle shares ownership.
    pub fn wallet_fee_basis(&self, wallet: WalletId) -> EntityResult<FeeBasis> {
        self.entities_read().wallet(wallet).map(|w| w.fee_basis.retain())
    }

    pub fn set_default_gas_limit(&self, wallet: WalletId, gas_limit: u64) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::WalletSetGasLimit {
            wallet,
            gas_limit,
        });
        Status::Success
    }

    pub fn set_default_gas_price(&self, wallet: WalletId, gas_price: u128) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::WalletSetGasPrice {
            wallet,
            gas_price,
        });
        Status::Success
    }

    // Transactions

    /// Create a transaction transferring `amount` from `wallet` to `to`.
    /// The entity materializes on the dispatcher path; the id is valid
    /// immediately for further signals.
    pub fn create_transaction(
        &self,
        wallet: WalletId,
        to: &str,
        amount: u128,
    ) -> EntityResult<TransactionId> {
        let transaction = {
            let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
            if !entities.wallets.is_assigned(wallet) {
                return Err(EntityError::UnknownWallet(wallet));
            }
            entities.transactions.reserve()
        };
        self.signal(Signal::TransactionCreate {
            wallet,
            transaction,
            to: to.to_string(),
            amount,
        });
        Ok(transaction)
    }

    /// Record the signed form of a transaction. Signing itself is an opaque
    /// operation performed by the caller; this stores the raw bytes and the
    /// locally computed hash used later for integrity checks.
    pub fn sign_transaction(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        raw_signed: Vec<u8>,
        hash: &str,
    ) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::TransactionSign {
            wallet,
            transaction,
            raw_signed,
            hash: EntityHash::from(hash),
        });
        Status::Success
    }

    /// Submit a signed transaction to the backend. The outcome arrives via
    /// `announce_submit_*`; reaching `Submitted` without `Signed` is
    /// rejected as a state error on the mutation path.
    pub fn submit_transaction(&self, wallet: WalletId, transaction: TransactionId) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::TransactionSubmit {
            wallet,
            transaction,
        });
        Status::Success
    }

    pub fn delete_transaction(&self, wallet: WalletId, transaction: TransactionId) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::TransactionDelete {
            wallet,
            transaction,
        });
        Status::Success
    }

    pub fn transaction_status(&self, transaction: TransactionId) -> EntityResult<TransactionStatus> {
        self.entities_read().transaction(transaction).map(|tx| tx.status)
    }

    pub fn transaction_hash(&self, transaction: TransactionId) -> EntityResult<Option<EntityHash>> {
        self.entities_read().transaction(transaction).map(|tx| tx.hash.clone())
    }

    pub fn transaction_amount(&self, transaction: TransactionId) -> EntityResult<Amount> {
        self.entities_read().transaction(transaction).map(|tx| tx.amount)
    }

    pub fn transaction_from(&self, transaction: TransactionId) -> EntityResult<String> {
        self.entities_read().transaction(transaction).map(|tx| tx.from.clone())
    }

    pub fn transaction_to(&self, transaction: TransactionId) -> EntityResult<String> {
        self.entities_read().transaction(transaction).map(|tx| tx.to.clone())
    }

    pub fn transaction_nonce(&self, transaction: TransactionId) -> EntityResult<Option<u64>> {
        self.entities_read().transaction(transaction).map(|tx| tx.nonce)
    }

    pub fn transaction_gas_estimate(&self, transaction: TransactionId) -> EntityResult<Option<u64>> {
        self.entities_read().transaction(transaction).map(|tx| tx.gas_estimate)
    }

    pub fn transaction_confirmations(&self, transaction: TransactionId) -> EntityResult<u64> {
        self.entities_read().transaction(transaction).map(|tx| tx.confirmations)
    }

    /// The block confirming this transaction, when known. A back-reference
    /// for lookup; the transaction does not own the block.
    pub fn transaction_block(&self, transaction: TransactionId) -> EntityResult<Option<BlockId>> {
        self.entities_read().transaction(transaction).map(|tx| tx.block)
    }

    // Blocks

    pub fn block_number(&self, block: BlockId) -> EntityResult<u64> {
        self.entities_read().block(block).map(|b| b.number)
    }

    pub fn block_hash(&self, block: BlockId) -> EntityResult<EntityHash> {
        self.entities_read().block(block).map(|b| b.hash.clone())
    }

    pub fn block_timestamp(&self, block: BlockId) -> EntityResult<u64> {
        self.entities_read().block(block).map(|b| b.timestamp)
    }

    // Listeners

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        entities.add_listener(listener)
    }

    pub fn remove_listener(&self, listener: ListenerId) -> Status {
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        match entities.remove_listener(listener) {
            Ok(()) => Status::Success,
            Err(e) => e.status(),
        }
    }

    // Backend request signals

    /// Ask the backend for the current block number. The embedder decides
    /// the cadence; the manager runs no internal timers.
    pub fn refresh_block_number(&self) {
        self.signal(Signal::RequestBlockNumber);
    }

    pub fn refresh_balance(&self, wallet: WalletId) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::RequestBalance {
            wallet,
        });
        Status::Success
    }

    pub fn refresh_gas_price(&self, wallet: WalletId) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::RequestGasPrice {
            wallet,
        });
        Status::Success
    }

    pub fn request_gas_estimate(&self, wallet: WalletId, transaction: TransactionId) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        self.signal(Signal::RequestGasEstimate {
            wallet,
            transaction,
        });
        Status::Success
    }

    pub fn refresh_nonce(&self) {
        self.signal(Signal::RequestNonce);
    }

    pub fn request_logs(&self, contract: Option<&str>, event_signature: &str) {
        self.signal(Signal::RequestLogs {
            contract: contract.map(str::to_string),
            event_signature: event_signature.to_string(),
        });
    }

    // Announce entry points (external context -> core)
    //
    // Callable from any thread. Payloads reference the caller's memory,
    // which is only valid for the duration of the call; everything needed is
    // deep-copied before enqueueing. A request id that is not currently
    // outstanding makes the announcement a no-op with no event emitted.

    pub fn announce_block_number(&self, block_number: &str, rid: RequestId) -> Status {
        let height = match parse_decimal_u64(block_number) {
            Ok(height) => height,
            Err(e) => {
                tracing::warn!(%rid, error = %e, "malformed block number");
                return Status::NumericParse;
            }
        };
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::BlockNumber) {
            tracing::debug!(%rid, "block number announcement not accepted");
            return Status::Success;
        }
        self.signal(Signal::AnnounceBlockNumber {
            rid,
            height,
        });
        Status::Success
    }

    pub fn announce_nonce(&self, address: &str, nonce: &str, rid: RequestId) -> Status {
        let nonce = match parse_decimal_u64(nonce) {
            Ok(nonce) => nonce,
            Err(e) => {
                tracing::warn!(%rid, error = %e, "malformed nonce");
                return Status::NumericParse;
            }
        };
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::Nonce) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceNonce {
            rid,
            address: address.to_string(),
            nonce,
        });
        Status::Success
    }

    pub fn announce_balance(&self, wallet: WalletId, balance: &str, rid: RequestId) -> Status {
        let balance = match parse_decimal(balance) {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(%rid, error = %e, "malformed balance");
                return Status::NumericParse;
            }
        };
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::Balance(wallet)) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceBalance {
            rid,
            wallet,
            balance,
        });
        Status::Success
    }

    pub fn announce_gas_price(&self, wallet: WalletId, gas_price: &str, rid: RequestId) -> Status {
        let gas_price = match parse_decimal(gas_price) {
            Ok(gas_price) => gas_price,
            Err(e) => {
                tracing::warn!(%rid, error = %e, "malformed gas price");
                return Status::NumericParse;
            }
        };
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::GasPrice(wallet)) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceGasPrice {
            rid,
            wallet,
            gas_price,
        });
        Status::Success
    }

    pub fn announce_gas_estimate(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        gas_estimate: &str,
        rid: RequestId,
    ) -> Status {
        let gas_estimate = match parse_decimal_u64(gas_estimate) {
            Ok(gas_estimate) => gas_estimate,
            Err(e) => {
                tracing::warn!(%rid, error = %e, "malformed gas estimate");
                return Status::NumericParse;
            }
        };
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        if !self
            .announce_accepted(rid, |kind| matches!(kind, RequestKind::GasEstimate(_, _)))
        {
            return Status::Success;
        }
        self.signal(Signal::AnnounceGasEstimate {
            rid,
            wallet,
            transaction,
            gas_estimate,
        });
        Status::Success
    }

    /// Announce a successful submission, carrying the backend-reported hash.
    pub fn announce_submit_success(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        hash: &str,
        rid: RequestId,
    ) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        if !self.announce_accepted(rid, |kind| matches!(kind, RequestKind::Submit(_, _))) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceSubmit {
            rid,
            wallet,
            transaction,
            hash: Some(EntityHash::from(hash)),
            error: None,
        });
        Status::Success
    }

    /// The failure form of the submit announcement. Invoked by the client
    /// when the backend rejected the transaction or the client gave up.
    pub fn announce_submit_failure(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        error: &str,
        rid: RequestId,
    ) -> Status {
        if !self.entities_read().wallets.is_assigned(wallet) {
            return Status::UnknownWallet;
        }
        if !self.announce_accepted(rid, |kind| matches!(kind, RequestKind::Submit(_, _))) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceSubmit {
            rid,
            wallet,
            transaction,
            hash: None,
            error: Some(error.to_string()),
        });
        Status::Success
    }

    /// Announce one transaction from a transactions query. Malformed numeric
    /// fields fail only this announcement; the rest of the batch proceeds.
    pub fn announce_transaction(&self, wire: TransactionWire<'_>, rid: RequestId) -> Status {
        let transaction = match Self::copy_transaction_wire(&wire) {
            Ok(transaction) => transaction,
            Err(status) => return status,
        };
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::Transactions) {
            tracing::debug!(%rid, hash = wire.hash, "transaction announcement not accepted");
            return Status::Success;
        }
        self.signal(Signal::AnnounceTransaction {
            rid,
            transaction,
        });
        Status::Success
    }

    /// Announce the end of a transactions query, successful or not.
    pub fn announce_transactions_complete(&self, rid: RequestId, success: bool) -> Status {
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::Transactions) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceTransactionsComplete {
            rid,
            success,
        });
        Status::Success
    }

    pub fn announce_log(&self, wire: LogWire<'_>, rid: RequestId) -> Status {
        let log = match Self::copy_log_wire(&wire) {
            Ok(log) => log,
            Err(status) => return status,
        };
        if !self.announce_accepted(rid, |kind| *kind == RequestKind::Logs) {
            return Status::Success;
        }
        self.signal(Signal::AnnounceLog {
            rid,
            log,
        });
        Status::Success
    }

    fn copy_transaction_wire(
        wire: &TransactionWire<'_>,
    ) -> std::result::Result<AnnouncedTransaction, Status> {
        let parse = |field: &str| parse_decimal(field).map_err(|_| Status::NumericParse);
        let parse64 = |field: &str| parse_decimal_u64(field).map_err(|_| Status::NumericParse);
        Ok(AnnouncedTransaction {
            hash: EntityHash::from(wire.hash),
            from: wire.from.to_string(),
            to: wire.to.to_string(),
            contract: (!wire.contract.is_empty()).then(|| wire.contract.to_string()),
            amount: parse(wire.amount)?,
            gas_limit: parse64(wire.gas_limit)?,
            gas_price: parse(wire.gas_price)?,
            data: wire.data.to_string(),
            nonce: parse64(wire.nonce)?,
            gas_used: parse64(wire.gas_used)?,
            block_number: parse64(wire.block_number)?,
            block_hash: EntityHash::from(wire.block_hash),
            block_confirmations: parse64(wire.block_confirmations)?,
            block_transaction_index: parse64(wire.block_transaction_index)?,
            block_timestamp: parse64(wire.block_timestamp)?,
            is_error: wire.is_error,
        })
    }

    fn copy_log_wire(wire: &LogWire<'_>) -> std::result::Result<AnnouncedLog, Status> {
        let parse = |field: &str| parse_decimal(field).map_err(|_| Status::NumericParse);
        let parse64 = |field: &str| parse_decimal_u64(field).map_err(|_| Status::NumericParse);
        Ok(AnnouncedLog {
            hash: EntityHash::from(wire.hash),
            contract: wire.contract.to_string(),
            topics: wire.topics.iter().map(|topic| topic.to_string()).collect(),
            data: wire.data.to_string(),
            gas_price: parse(wire.gas_price)?,
            gas_used: parse64(wire.gas_used)?,
            log_index: parse64(wire.log_index)?,
            block_number: parse64(wire.block_number)?,
            block_transaction_index: parse64(wire.block_transaction_index)?,
            block_timestamp: parse64(wire.block_timestamp)?,
        })
    }

    // Peer backend signals (peer-to-peer mode)

    /// Report a block height learned from the peer backend.
    pub fn peer_block_height(&self, height: u64) {
        if self.config.mode != SyncMode::PeerToPeer {
            tracing::debug!(height, "peer height in remote-query mode; dropping");
            return;
        }
        self.signal(Signal::PeerBlockHeight {
            height,
        });
    }

    /// Report a transaction relayed by the peer backend.
    pub fn peer_transaction(&self, wire: TransactionWire<'_>) -> Status {
        if self.config.mode != SyncMode::PeerToPeer {
            tracing::debug!(hash = wire.hash, "peer transaction in remote-query mode; dropping");
            return Status::Success;
        }
        let transaction = match Self::copy_transaction_wire(&wire) {
            Ok(transaction) => transaction,
            Err(status) => return status,
        };
        self.signal(Signal::PeerTransaction {
            transaction,
        });
        Status::Success
    }

    pub fn peer_connected(&self, record: PersistRecord) {
        if self.config.mode != SyncMode::PeerToPeer {
            return;
        }
        self.signal(Signal::PeerConnected {
            record,
        });
    }

    pub fn peer_disconnected(&self, hash: EntityHash) {
        if self.config.mode != SyncMode::PeerToPeer {
            return;
        }
        self.signal(Signal::PeerDisconnected {
            hash,
        });
    }
}

impl Drop for WalletManager {
    fn drop(&mut self) {
        self.dispatcher.shutdown(ShutdownMode::Discard);
    }
}
