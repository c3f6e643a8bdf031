//! The id-keyed entity model: wallets, transactions, blocks, logs, listeners.
//!
//! All mutation happens on the dispatcher thread; caller threads reach these
//! tables only through the manager's read-locked getters, and only ever hold
//! opaque ids.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::amount::{Amount, FeeBasis};
use crate::client::EventListener;
use crate::error::{EntityError, EntityResult};
use crate::registry::Registry;
use crate::types::{
    AnnouncedLog, AnnouncedTransaction, BlockId, ChainKind, EntityHash, ListenerId, PersistRecord,
    Token, TransactionId, WalletId,
};

/// Lifecycle status of a transaction.
///
/// `Created -> Signed -> Submitted -> {Blocked | Errored}`, with any live
/// state able to terminate into `Deleted`. `Blocked` keeps receiving
/// confirmation-count updates as later blocks arrive; those updates are not
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Created,
    Signed,
    Submitted,
    Blocked,
    Errored,
    Deleted,
}

impl TransactionStatus {
    fn allows(self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, to) {
            (Created, Signed) => true,
            (Signed, Submitted) => true,
            (Submitted, Blocked) => true,
            // A submission can fail before or after the backend accepted it.
            (Signed | Submitted, Errored) => true,
            (Deleted, _) => false,
            (_, Deleted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Signed => "signed",
            TransactionStatus::Submitted => "submitted",
            TransactionStatus::Blocked => "blocked",
            TransactionStatus::Errored => "errored",
            TransactionStatus::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Where a transaction entered the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOrigin {
    /// Created locally for signing and submission.
    Local,
    /// Merged from a backend or peer announcement, already on-chain.
    Announced,
}

/// A wallet: balance and transaction history for one currency or token.
#[derive(Debug, Clone)]
pub struct Wallet {
    /// `None` holds the chain's native currency.
    pub token: Option<Token>,
    /// The account address owning this wallet.
    pub address: String,
    pub balance: Amount,
    pub default_gas_limit: u64,
    pub default_gas_price: u128,
    pub fee_basis: FeeBasis,
    /// Owned transactions in creation order.
    transactions: Vec<TransactionId>,
}

impl Wallet {
    pub fn new(
        token: Option<Token>,
        address: impl Into<String>,
        chain: ChainKind,
        default_gas_limit: u64,
        default_gas_price: u128,
    ) -> Self {
        Self {
            token,
            address: address.into(),
            balance: Amount::zero(chain),
            default_gas_limit,
            default_gas_price,
            fee_basis: FeeBasis::new(chain, default_gas_price, default_gas_limit),
            transactions: Vec::new(),
        }
    }

    pub fn holds_token(&self, token: Option<&Token>) -> bool {
        self.token.as_ref() == token
    }

    /// Transaction ids in insertion order.
    pub fn transactions(&self) -> &[TransactionId] {
        &self.transactions
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub(crate) fn push_transaction(&mut self, id: TransactionId) {
        self.transactions.push(id);
    }

    pub(crate) fn remove_transaction(&mut self, id: TransactionId) {
        self.transactions.retain(|held| *held != id);
    }
}

/// A transaction as tracked by the entity layer.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub status: TransactionStatus,
    pub origin: TransactionOrigin,
    pub hash: Option<EntityHash>,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub gas_estimate: Option<u64>,
    pub nonce: Option<u64>,
    pub raw_signed: Option<Vec<u8>>,
    /// Back-reference to the confirming block. Lookup only: a transaction
    /// does not own the block that confirms it.
    pub block: Option<BlockId>,
    pub confirmations: u64,
    pub is_error: bool,
}

impl Transaction {
    /// A locally created transaction awaiting sign and submit.
    pub fn local(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: Amount,
        gas_limit: u64,
        gas_price: u128,
    ) -> Self {
        Self {
            status: TransactionStatus::Created,
            origin: TransactionOrigin::Local,
            hash: None,
            from: from.into(),
            to: to.into(),
            amount,
            gas_limit,
            gas_price,
            gas_estimate: None,
            nonce: None,
            raw_signed: None,
            block: None,
            confirmations: 0,
            is_error: false,
        }
    }

    /// A transaction merged from an announcement. Failed transactions arrive
    /// as `Errored`, unconfirmed ones as `Submitted`, confirmed ones as
    /// `Blocked`.
    pub fn announced(chain: ChainKind, announced: &AnnouncedTransaction) -> Self {
        let status = if announced.is_error {
            TransactionStatus::Errored
        } else if announced.block_number == 0 {
            TransactionStatus::Submitted
        } else {
            TransactionStatus::Blocked
        };
        Self {
            status,
            origin: TransactionOrigin::Announced,
            hash: Some(announced.hash.clone()),
            from: announced.from.clone(),
            to: announced.to.clone(),
            amount: Amount::new(chain, announced.amount),
            gas_limit: announced.gas_limit,
            gas_price: announced.gas_price,
            gas_estimate: None,
            nonce: Some(announced.nonce),
            raw_signed: None,
            block: None,
            confirmations: announced.block_confirmations,
            is_error: announced.is_error,
        }
    }

    /// Apply a status transition, enforcing the lifecycle order.
    pub fn transition(&mut self, to: TransactionStatus) -> EntityResult<()> {
        if !self.status.allows(to) {
            return Err(EntityError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// The persisted `(hash, blob)` form, available once a hash exists.
    pub fn to_record(&self) -> Option<PersistRecord> {
        let hash = self.hash.clone()?;
        let stored = StoredTransaction {
            hash: hash.as_str().to_string(),
            from: self.from.clone(),
            to: self.to.clone(),
            amount: self.amount.value(),
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            nonce: self.nonce,
            status: self.status,
            confirmations: self.confirmations,
        };
        match bincode::serialize(&stored) {
            Ok(blob) => Some(PersistRecord::new(hash, blob)),
            Err(e) => {
                tracing::error!(hash = %hash, error = %e, "failed to encode transaction record");
                None
            }
        }
    }
}

/// Durable transaction shape. The manager treats persisted blobs as opaque;
/// this is only the encoder side.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTransaction {
    hash: String,
    from: String,
    to: String,
    amount: u128,
    gas_limit: u64,
    gas_price: u128,
    nonce: Option<u64>,
    status: TransactionStatus,
    confirmations: u64,
}

/// A block known to the manager, created when an announcement references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: EntityHash,
    pub timestamp: u64,
}

impl Block {
    pub fn to_record(&self) -> Option<PersistRecord> {
        let stored = StoredBlock {
            number: self.number,
            hash: self.hash.as_str().to_string(),
            timestamp: self.timestamp,
        };
        match bincode::serialize(&stored) {
            Ok(blob) => Some(PersistRecord::new(self.hash.clone(), blob)),
            Err(e) => {
                tracing::error!(hash = %self.hash, error = %e, "failed to encode block record");
                None
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlock {
    number: u64,
    hash: String,
    timestamp: u64,
}

/// An announced contract log. Payload stays opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub hash: EntityHash,
    pub contract: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub log_index: u64,
}

impl Log {
    pub fn from_announced(announced: &AnnouncedLog) -> Self {
        Self {
            hash: announced.hash.clone(),
            contract: announced.contract.clone(),
            topics: announced.topics.clone(),
            data: announced.data.clone(),
            block_number: announced.block_number,
            log_index: announced.log_index,
        }
    }

    pub fn to_record(&self) -> Option<PersistRecord> {
        let stored = StoredLog {
            hash: self.hash.as_str().to_string(),
            contract: self.contract.clone(),
            topics: self.topics.clone(),
            data: self.data.clone(),
            block_number: self.block_number,
            log_index: self.log_index,
        };
        match bincode::serialize(&stored) {
            Ok(blob) => Some(PersistRecord::new(self.hash.clone(), blob)),
            Err(e) => {
                tracing::error!(hash = %self.hash, error = %e, "failed to encode log record");
                None
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredLog {
    hash: String,
    contract: String,
    topics: Vec<String>,
    data: String,
    block_number: u64,
    log_index: u64,
}

/// All entity tables of one manager.
pub struct Entities {
    chain: ChainKind,
    account_address: String,
    pub wallets: Registry<WalletId, Wallet>,
    pub transactions: Registry<TransactionId, Transaction>,
    pub blocks: Registry<BlockId, Block>,
    pub logs: Vec<Log>,
    listeners: Registry<ListenerId, Arc<dyn EventListener>>,
    /// Token-to-wallet mapping making wallet creation idempotent. Reserved
    /// ids are recorded here before the dispatcher materializes the wallet.
    token_wallets: HashMap<Option<Token>, WalletId>,
    /// Dedupe index for merged transactions.
    hash_index: HashMap<EntityHash, TransactionId>,
    block_index: HashMap<EntityHash, BlockId>,
    log_index: std::collections::HashSet<(EntityHash, u64)>,
}

impl Entities {
    pub fn new(chain: ChainKind, account_address: impl Into<String>) -> Self {
        Self {
            chain,
            account_address: account_address.into(),
            wallets: Registry::new(),
            transactions: Registry::new(),
            blocks: Registry::new(),
            logs: Vec::new(),
            listeners: Registry::new(),
            token_wallets: HashMap::new(),
            hash_index: HashMap::new(),
            block_index: HashMap::new(),
            log_index: std::collections::HashSet::new(),
        }
    }

    pub fn chain(&self) -> ChainKind {
        self.chain
    }

    pub fn account_address(&self) -> &str {
        &self.account_address
    }

    pub fn wallet(&self, id: WalletId) -> EntityResult<&Wallet> {
        self.wallets.get(id).ok_or(EntityError::UnknownWallet(id))
    }

    pub fn wallet_mut(&mut self, id: WalletId) -> EntityResult<&mut Wallet> {
        self.wallets.get_mut(id).ok_or(EntityError::UnknownWallet(id))
    }

    pub fn transaction(&self, id: TransactionId) -> EntityResult<&Transaction> {
        self.transactions.get(id).ok_or(EntityError::UnknownTransaction(id))
    }

    pub fn transaction_mut(&mut self, id: TransactionId) -> EntityResult<&mut Transaction> {
        self.transactions.get_mut(id).ok_or(EntityError::UnknownTransaction(id))
    }

    pub fn block(&self, id: BlockId) -> EntityResult<&Block> {
        self.blocks.get(id).ok_or(EntityError::UnknownBlock(id))
    }

    /// The wallet holding `token`, if any — reserved or materialized.
    pub fn wallet_for_token(&self, token: Option<&Token>) -> Option<WalletId> {
        self.token_wallets.get(&token.cloned()).copied()
    }

    /// The wallet holding the token with `contract`, if any.
    pub fn wallet_for_contract(&self, contract: &str) -> Option<WalletId> {
        self.token_wallets
            .iter()
            .find(|(token, _)| {
                token.as_ref().is_some_and(|t| t.contract == contract)
            })
            .map(|(_, id)| *id)
    }

    /// Reserve a wallet id for `token`, or return the already-held one.
    /// Returns `(id, true)` when a new id was reserved and must be
    /// materialized on the dispatcher path.
    pub fn reserve_wallet(&mut self, token: Option<Token>) -> (WalletId, bool) {
        if let Some(existing) = self.token_wallets.get(&token) {
            return (*existing, false);
        }
        let id = self.wallets.reserve();
        self.token_wallets.insert(token, id);
        (id, true)
    }

    /// Materialize a reserved wallet slot.
    pub fn fill_wallet(&mut self, id: WalletId, wallet: Wallet) -> bool {
        self.wallets.fill(id, wallet)
    }

    /// The transaction currently known under `hash`, if any.
    pub fn transaction_by_hash(&self, hash: &EntityHash) -> Option<TransactionId> {
        self.hash_index.get(hash).copied()
    }

    /// Record a transaction's hash in the dedupe index.
    pub fn index_transaction_hash(&mut self, hash: EntityHash, id: TransactionId) {
        self.hash_index.insert(hash, id);
    }

    /// Drop a hash from the dedupe index, e.g. when its transaction is
    /// deleted.
    pub fn unindex_transaction_hash(&mut self, hash: &EntityHash) {
        self.hash_index.remove(hash);
    }

    /// Find or create the block entity for an announced block reference.
    /// Returns `(id, true)` when the block was newly created.
    pub fn chain_block(&mut self, hash: EntityHash, number: u64, timestamp: u64) -> (BlockId, bool) {
        if let Some(existing) = self.block_index.get(&hash) {
            return (*existing, false);
        }
        let id = self.blocks.insert(Block {
            number,
            hash: hash.clone(),
            timestamp,
        });
        self.block_index.insert(hash, id);
        (id, true)
    }

    /// Merge an announced log, deduplicating by `(hash, log index)`.
    /// Returns the log when it was new.
    pub fn merge_log(&mut self, announced: &AnnouncedLog) -> Option<&Log> {
        let key = (announced.hash.clone(), announced.log_index);
        if !self.log_index.insert(key) {
            return None;
        }
        self.logs.push(Log::from_announced(announced));
        self.logs.last()
    }

    /// Recompute a wallet's balance from its transaction set.
    ///
    /// Incoming minus outgoing over live transactions; `Errored` and
    /// `Deleted` transactions are excluded. Returns the new balance when it
    /// changed.
    pub fn recompute_balance(&mut self, id: WalletId) -> EntityResult<Option<Amount>> {
        let wallet = self.wallets.get(id).ok_or(EntityError::UnknownWallet(id))?;
        let account = wallet.address.clone();
        let mut incoming: u128 = 0;
        let mut outgoing: u128 = 0;
        for tid in wallet.transactions() {
            let Some(tx) = self.transactions.get(*tid) else {
                continue;
            };
            if matches!(tx.status, TransactionStatus::Errored | TransactionStatus::Deleted) {
                continue;
            }
            if tx.to == account {
                incoming = incoming.saturating_add(tx.amount.value());
            }
            if tx.from == account {
                outgoing = outgoing.saturating_add(tx.amount.value());
            }
        }
        let balance = Amount::new(self.chain, incoming.saturating_sub(outgoing));
        let wallet = self.wallets.get_mut(id).ok_or(EntityError::UnknownWallet(id))?;
        if wallet.balance == balance {
            Ok(None)
        } else {
            wallet.balance = balance;
            Ok(Some(balance))
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.listeners.insert(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> EntityResult<()> {
        self.listeners.remove(id).map(|_| ()).ok_or(EntityError::UnknownListener(id))
    }

    /// Snapshot the live listeners so events can be delivered without holding
    /// the entity lock.
    pub fn listeners(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect()
    }
}
