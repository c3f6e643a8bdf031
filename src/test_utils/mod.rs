//! Test utilities: a recording client and polling helpers.
//!
//! The mutation path runs on the dispatcher thread, so tests observe effects
//! by polling with a deadline rather than by running handlers inline.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::client::Client;
use crate::error::Status;
use crate::types::{
    BlockEventKind, BlockId, ChangeKind, ManagerEventKind, PeerEventKind, PersistRecord,
    RequestId, TransactionEventKind, TransactionId, WalletEventKind, WalletId,
};

/// A backend request captured by the [`RecordingClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    GetBalance {
        wallet: WalletId,
        address: String,
        rid: RequestId,
    },
    GetGasPrice {
        wallet: WalletId,
        rid: RequestId,
    },
    EstimateGas {
        wallet: WalletId,
        transaction: TransactionId,
        rid: RequestId,
    },
    SubmitTransaction {
        wallet: WalletId,
        transaction: TransactionId,
        raw_transaction: Vec<u8>,
        rid: RequestId,
    },
    GetTransactions {
        address: String,
        rid: RequestId,
    },
    GetLogs {
        contract: Option<String>,
        address: String,
        event_signature: String,
        rid: RequestId,
    },
    GetBlockNumber {
        rid: RequestId,
    },
    GetNonce {
        address: String,
        rid: RequestId,
    },
}

impl RecordedRequest {
    pub fn rid(&self) -> RequestId {
        match self {
            RecordedRequest::GetBalance {
                rid, ..
            }
            | RecordedRequest::GetGasPrice {
                rid, ..
            }
            | RecordedRequest::EstimateGas {
                rid, ..
            }
            | RecordedRequest::SubmitTransaction {
                rid, ..
            }
            | RecordedRequest::GetTransactions {
                rid, ..
            }
            | RecordedRequest::GetLogs {
                rid, ..
            }
            | RecordedRequest::GetBlockNumber {
                rid,
            }
            | RecordedRequest::GetNonce {
                rid, ..
            } => *rid,
        }
    }
}

/// A lifecycle event captured by the [`RecordingClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Manager(ManagerEventKind, Status, Option<String>),
    Peer(PeerEventKind, Status, Option<String>),
    Wallet(WalletId, WalletEventKind, Status, Option<String>),
    Block(BlockId, BlockEventKind, Status, Option<String>),
    Transaction(WalletId, TransactionId, TransactionEventKind, Status, Option<String>),
}

/// A persistence callback captured by the [`RecordingClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedChange {
    SavePeers(Vec<PersistRecord>),
    SaveBlocks(Vec<PersistRecord>),
    Transaction(ChangeKind, PersistRecord),
    Log(ChangeKind, PersistRecord),
}

/// A [`Client`] that records every callback for later assertion.
#[derive(Debug, Default)]
pub struct RecordingClient {
    requests: Mutex<Vec<RecordedRequest>>,
    events: Mutex<Vec<RecordedEvent>>,
    changes: Mutex<Vec<RecordedChange>>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock<'a, T>(mutex: &'a Mutex<Vec<T>>) -> MutexGuard<'a, Vec<T>> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        Self::lock(&self.requests).clone()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        Self::lock(&self.events).clone()
    }

    pub fn changes(&self) -> Vec<RecordedChange> {
        Self::lock(&self.changes).clone()
    }

    /// The most recent request matching `predicate`, if any.
    pub fn find_request(
        &self,
        predicate: impl Fn(&RecordedRequest) -> bool,
    ) -> Option<RecordedRequest> {
        Self::lock(&self.requests).iter().rev().find(|request| predicate(request)).cloned()
    }

    /// The rid of the most recent block-number request.
    pub fn last_block_number_rid(&self) -> Option<RequestId> {
        self.find_request(|request| matches!(request, RecordedRequest::GetBlockNumber { .. }))
            .map(|request| request.rid())
    }

    /// The rid of the most recent transactions query.
    pub fn last_transactions_rid(&self) -> Option<RequestId> {
        self.find_request(|request| matches!(request, RecordedRequest::GetTransactions { .. }))
            .map(|request| request.rid())
    }

    /// The rid of the most recent submit request.
    pub fn last_submit_rid(&self) -> Option<RequestId> {
        self.find_request(|request| matches!(request, RecordedRequest::SubmitTransaction { .. }))
            .map(|request| request.rid())
    }

    /// Events recorded for `transaction`, in order.
    pub fn transaction_events(
        &self,
        transaction: TransactionId,
    ) -> Vec<(TransactionEventKind, Status)> {
        Self::lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Transaction(_, tid, kind, status, _) if *tid == transaction => {
                    Some((*kind, *status))
                }
                _ => None,
            })
            .collect()
    }

    /// Manager-scope event kinds recorded so far, in order.
    pub fn manager_events(&self) -> Vec<ManagerEventKind> {
        Self::lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Manager(kind, _, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

impl Client for RecordingClient {
    fn get_balance(&self, wallet: WalletId, address: &str, rid: RequestId) {
        Self::lock(&self.requests).push(RecordedRequest::GetBalance {
            wallet,
            address: address.to_string(),
            rid,
        });
    }

    fn get_gas_price(&self, wallet: WalletId, rid: RequestId) {
        Self::lock(&self.requests).push(RecordedRequest::GetGasPrice {
            wallet,
            rid,
        });
    }

    fn estimate_gas(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        _to: &str,
        _amount: &str,
        _data: &str,
        rid: RequestId,
    ) {
        Self::lock(&self.requests).push(RecordedRequest::EstimateGas {
            wallet,
            transaction,
            rid,
        });
    }

    fn submit_transaction(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        raw_transaction: &[u8],
        rid: RequestId,
    ) {
        Self::lock(&self.requests).push(RecordedRequest::SubmitTransaction {
            wallet,
            transaction,
            raw_transaction: raw_transaction.to_vec(),
            rid,
        });
    }

    fn get_transactions(&self, address: &str, rid: RequestId) {
        Self::lock(&self.requests).push(RecordedRequest::GetTransactions {
            address: address.to_string(),
            rid,
        });
    }

    fn get_logs(&self, contract: Option<&str>, address: &str, event_signature: &str, rid: RequestId) {
        Self::lock(&self.requests).push(RecordedRequest::GetLogs {
            contract: contract.map(str::to_string),
            address: address.to_string(),
            event_signature: event_signature.to_string(),
            rid,
        });
    }

    fn get_block_number(&self, rid: RequestId) {
        Self::lock(&self.requests).push(RecordedRequest::GetBlockNumber {
            rid,
        });
    }

    fn get_nonce(&self, address: &str, rid: RequestId) {
        Self::lock(&self.requests).push(RecordedRequest::GetNonce {
            address: address.to_string(),
            rid,
        });
    }

    fn save_peers(&self, records: &[PersistRecord]) {
        Self::lock(&self.changes).push(RecordedChange::SavePeers(records.to_vec()));
    }

    fn save_blocks(&self, records: &[PersistRecord]) {
        Self::lock(&self.changes).push(RecordedChange::SaveBlocks(records.to_vec()));
    }

    fn change_transaction(&self, change: ChangeKind, record: &PersistRecord) {
        Self::lock(&self.changes).push(RecordedChange::Transaction(change, record.clone()));
    }

    fn change_log(&self, change: ChangeKind, record: &PersistRecord) {
        Self::lock(&self.changes).push(RecordedChange::Log(change, record.clone()));
    }

    fn manager_event(&self, event: ManagerEventKind, status: Status, error: Option<&str>) {
        Self::lock(&self.events).push(RecordedEvent::Manager(
            event,
            status,
            error.map(str::to_string),
        ));
    }

    fn peer_event(&self, event: PeerEventKind, status: Status, error: Option<&str>) {
        Self::lock(&self.events).push(RecordedEvent::Peer(event, status, error.map(str::to_string)));
    }

    fn wallet_event(
        &self,
        wallet: WalletId,
        event: WalletEventKind,
        status: Status,
        error: Option<&str>,
    ) {
        Self::lock(&self.events).push(RecordedEvent::Wallet(
            wallet,
            event,
            status,
            error.map(str::to_string),
        ));
    }

    fn block_event(&self, block: BlockId, event: BlockEventKind, status: Status, error: Option<&str>) {
        Self::lock(&self.events).push(RecordedEvent::Block(
            block,
            event,
            status,
            error.map(str::to_string),
        ));
    }

    fn transaction_event(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        event: TransactionEventKind,
        status: Status,
        error: Option<&str>,
    ) {
        Self::lock(&self.events).push(RecordedEvent::Transaction(
            wallet,
            transaction,
            event,
            status,
            error.map(str::to_string),
        ));
    }
}

/// Poll `condition` until it holds or the deadline passes. Panics on timeout
/// so the failing assertion is visible in test output.
pub fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for: {description}");
}
