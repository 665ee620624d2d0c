//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name        | Description                                          | Key Methods             |
// |-------------|------------------------------------------------------|-------------------------|
// | MemoryStore | In-memory reference implementation of every store    | seed_account            |
// |             | trait, with all-or-none batch application            | seed_lot                |
// |             |                                                      | apply                   |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::types::{Account, AssetId, Lot, Order, OrderStatus, Side, UserId};

use super::{
    AccountStore, LotStore, OrderStore, StoreError, StoreResult, TransactionalStore, WriteBatch,
};

/// In-memory reference store backing the ledger engine in tests, benchmarks and
/// the demo binary.
///
/// State lives behind `parking_lot::RwLock`-guarded maps. [`apply`] takes every
/// write guard up front and validates the whole batch before mutating anything,
/// so a rejected batch leaves no partial effects and readers never observe an
/// intermediate state.
///
/// [`apply`]: TransactionalStore::apply
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<UserId, Account>>,
    lots: RwLock<HashMap<Uuid, Lot>>,
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an account with the given balance.
    pub fn seed_account(&self, user_id: UserId, cash_balance: Decimal) {
        self.accounts
            .write()
            .insert(user_id.clone(), Account::new(user_id, cash_balance));
    }

    /// Inserts a pre-existing lot, e.g. to stage multi-lot FIFO scenarios.
    pub fn seed_lot(&self, lot: Lot) {
        self.lots.write().insert(lot.id, lot);
    }

    /// Number of open lots across all users. Test observability helper.
    pub fn lot_count(&self) -> usize {
        self.lots.read().len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn account(&self, user_id: &UserId) -> StoreResult<Account> {
        self.accounts
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::AccountNotFound(user_id.clone()))
    }
}

#[async_trait]
impl LotStore for MemoryStore {
    async fn lots_by_asset(&self, user_id: &UserId, asset_id: &AssetId) -> StoreResult<Vec<Lot>> {
        let mut lots: Vec<Lot> = self
            .lots
            .read()
            .values()
            .filter(|lot| &lot.user_id == user_id && &lot.asset_id == asset_id)
            .cloned()
            .collect();
        // FIFO contract: oldest acquisition first. Lot id breaks timestamp ties
        // deterministically.
        lots.sort_by(|a, b| {
            a.acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(lots)
    }

    async fn lots_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Lot>> {
        let mut lots: Vec<Lot> = self
            .lots
            .read()
            .values()
            .filter(|lot| &lot.user_id == user_id)
            .cloned()
            .collect();
        lots.sort_by(|a, b| {
            a.acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(lots)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn order(&self, order_id: Uuid) -> StoreResult<Order> {
        self.orders
            .read()
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn pending_orders(
        &self,
        user_id: &UserId,
        asset_id: &AssetId,
        side: Side,
    ) -> StoreResult<Vec<Order>> {
        let orders: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|order| {
                order.status == OrderStatus::Pending
                    && &order.user_id == user_id
                    && &order.asset_id == asset_id
                    && order.side == side
            })
            .cloned()
            .collect();
        Ok(orders)
    }

    async fn orders_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|order| &order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        // Take every write guard before validating so validation and mutation
        // see the same state.
        let mut accounts = self.accounts.write();
        let mut lots = self.lots.write();
        let mut orders = self.orders.write();

        if let Some(write) = &batch.balance {
            let account = accounts
                .get(&write.user_id)
                .ok_or_else(|| StoreError::AccountNotFound(write.user_id.clone()))?;
            if account.cash_balance != write.expected {
                return Err(StoreError::Conflict {
                    user_id: write.user_id.clone(),
                    expected: write.expected,
                    found: account.cash_balance,
                });
            }
        }

        // Validation passed; the batch commits in full.
        if let Some(write) = batch.balance {
            debug!(
                user_id = %write.user_id,
                new_balance = %write.new_balance,
                "applying balance write"
            );
            if let Some(account) = accounts.get_mut(&write.user_id) {
                account.cash_balance = write.new_balance;
            }
        }
        for lot in batch.lot_upserts {
            lots.insert(lot.id, lot);
        }
        for lot_id in batch.lot_deletes {
            lots.remove(&lot_id);
        }
        for order in batch.order_upserts {
            orders.insert(order.id, order);
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
// | Name                            | Description                                          |
// |---------------------------------|------------------------------------------------------|
// | test_lots_ordered_fifo          | lots_by_asset returns oldest acquisition first.      |
// | test_apply_commits_whole_batch  | A valid batch applies every staged mutation.         |
// | test_apply_rejects_on_conflict  | A stale balance guard rejects the batch untouched.   |
// | test_pending_orders_filtering   | pending_orders filters on user, asset, side, status. |
//--------------------------------------------------------------------------------------------------
