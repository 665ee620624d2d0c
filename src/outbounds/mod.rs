//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the storage contract the ledger engine depends on, together
// with the reference implementations shipped in-crate. The engine consumes these
// interfaces, it never implements storage semantics of its own.
//
// | Component          | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | AccountStore       | Read access to user accounts.                                    |
// | LotStore           | Read access to open lots, FIFO-ordered per (user, asset).        |
// | OrderStore         | Read access to standing orders.                                  |
// | TransactionLog     | Fire-and-forget audit trail of executed trades.                  |
// | TransactionalStore | All-or-none application of a staged WriteBatch.                  |
// | WriteBatch         | Staged mutations committed as one atomic unit.                   |
//--------------------------------------------------------------------------------------------------

mod journal;
mod memory;

pub use journal::JournalTransactionLog;
pub use memory::MemoryStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::types::{Account, AssetId, Lot, Order, Side, TradeRecord, UserId};

/// Errors surfaced by a storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No account exists for the given user id.
    #[error("account not found for user {0}")]
    AccountNotFound(UserId),

    /// No order exists with the given id.
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    /// The balance guard of a batch did not match the stored value. The whole
    /// batch was rejected and no state was touched.
    #[error("balance conflict for user {user_id}: expected {expected}, found {found}")]
    Conflict {
        user_id: UserId,
        expected: Decimal,
        found: Decimal,
    },

    /// A transient storage failure (lock timeout, connection loss). Safe to
    /// retry only for reads.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Staged write of an account balance, guarded by the value the writer read.
///
/// The guard is the compare-and-set of the account store: if the stored balance
/// no longer equals `expected` at apply time, the batch fails with
/// [`StoreError::Conflict`] and nothing is written.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceWrite {
    /// Account to write.
    pub user_id: UserId,
    /// Balance the writer observed before staging.
    pub expected: Decimal,
    /// Balance to store.
    pub new_balance: Decimal,
}

/// A staged set of mutations applied as one all-or-none unit.
///
/// Ledger operations never write to the stores directly; they accumulate every
/// effect of one operation here and commit it through
/// [`TransactionalStore::apply`]. A failure partway through an operation
/// therefore leaves account, lot and order state exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Balance write with its expected-value guard, if the operation moves cash.
    pub balance: Option<BalanceWrite>,
    /// Lots to create or replace.
    pub lot_upserts: Vec<Lot>,
    /// Lots to delete (closed by a sell). Unknown ids are ignored.
    pub lot_deletes: Vec<Uuid>,
    /// Orders to create or replace.
    pub order_upserts: Vec<Order>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the single balance write of this batch.
    pub fn write_balance(&mut self, user_id: UserId, expected: Decimal, new_balance: Decimal) {
        self.balance = Some(BalanceWrite {
            user_id,
            expected,
            new_balance,
        });
    }

    pub fn upsert_lot(&mut self, lot: Lot) {
        self.lot_upserts.push(lot);
    }

    pub fn delete_lot(&mut self, lot_id: Uuid) {
        self.lot_deletes.push(lot_id);
    }

    pub fn upsert_order(&mut self, order: Order) {
        self.order_upserts.push(order);
    }

    pub fn is_empty(&self) -> bool {
        self.balance.is_none()
            && self.lot_upserts.is_empty()
            && self.lot_deletes.is_empty()
            && self.order_upserts.is_empty()
    }
}

/// Durable lookup of user accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Returns the account for `user_id`, or [`StoreError::AccountNotFound`].
    async fn account(&self, user_id: &UserId) -> StoreResult<Account>;
}

/// Durable collection of open purchase lots.
#[async_trait]
pub trait LotStore: Send + Sync {
    /// Returns all lots for the (user, asset) pair ordered by `acquired_at`
    /// ascending. The engine relies on this ordering for FIFO consumption.
    async fn lots_by_asset(&self, user_id: &UserId, asset_id: &AssetId) -> StoreResult<Vec<Lot>>;

    /// Returns every open lot the user holds, across assets.
    async fn lots_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Lot>>;
}

/// Durable collection of standing orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Returns the order with the given id, or [`StoreError::OrderNotFound`].
    async fn order(&self, order_id: Uuid) -> StoreResult<Order>;

    /// Returns the user's pending orders for one asset and side.
    async fn pending_orders(
        &self,
        user_id: &UserId,
        asset_id: &AssetId,
        side: Side,
    ) -> StoreResult<Vec<Order>>;

    /// Returns every order the user has placed, newest first.
    async fn orders_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Order>>;
}

/// Append-only audit trail of executed trades. Never read by the engine.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn append(&self, record: TradeRecord) -> StoreResult<()>;
}

/// All-or-none application of a staged [`WriteBatch`].
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Applies the batch atomically. Either every staged mutation commits or
    /// none does; validation failures (unknown account, balance conflict)
    /// reject the batch without touching state.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// A [`TransactionLog`] that discards every record. Useful in tests and
/// benchmarks where the audit trail is irrelevant.
#[derive(Debug, Default, Clone)]
pub struct NullTransactionLog;

#[async_trait]
impl TransactionLog for NullTransactionLog {
    async fn append(&self, _record: TradeRecord) -> StoreResult<()> {
        Ok(())
    }
}
