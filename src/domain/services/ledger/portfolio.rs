//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                        | Key Methods           |
// |-----------------|----------------------------------------------------|----------------------|
// | HoldingSummary  | Per-asset aggregation over a user's open lots      |                       |
// | (LedgerEngine)  | Read-side queries and the balance reset            | balance, holdings     |
// |                 |                                                    | open_orders           |
// |                 |                                                    | reset_balance         |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;

use crate::domain::models::types::{AssetId, Order, OrderStatus, UserId};
use crate::outbounds::{
    AccountStore, LotStore, OrderStore, TransactionalStore, WriteBatch,
};

use super::engine::LedgerEngine;
use super::{LedgerError, LedgerResult};

/// Per-asset view over a user's open lots.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingSummary {
    /// Asset the summary aggregates.
    pub asset_id: AssetId,
    /// Total quantity across the asset's open lots.
    pub total_quantity: Decimal,
    /// Total remaining cost basis across the asset's open lots.
    pub total_invested: Decimal,
    /// Weighted-average cost per unit (`total_invested / total_quantity`).
    pub average_unit_cost: Decimal,
}

/// Read-side queries. These take no user lock and stage no batch; they observe
/// whatever state the store currently holds.
impl<S> LedgerEngine<S>
where
    S: AccountStore + LotStore + OrderStore + TransactionalStore,
{
    /// Returns the user's current cash balance.
    pub async fn balance(&self, user_id: &UserId) -> LedgerResult<Decimal> {
        Ok(self.store().account(user_id).await?.cash_balance)
    }

    /// Returns the user's holdings aggregated per asset, sorted by asset id.
    pub async fn holdings(&self, user_id: &UserId) -> LedgerResult<Vec<HoldingSummary>> {
        let lots = self.store().lots_for_user(user_id).await?;

        let mut by_asset: HashMap<AssetId, HoldingSummary> = HashMap::new();
        for lot in lots {
            let entry = by_asset
                .entry(lot.asset_id.clone())
                .or_insert_with(|| HoldingSummary {
                    asset_id: lot.asset_id.clone(),
                    total_quantity: Decimal::ZERO,
                    total_invested: Decimal::ZERO,
                    average_unit_cost: Decimal::ZERO,
                });
            entry.total_quantity += lot.quantity;
            entry.total_invested += lot.total_cost;
        }

        let mut holdings: Vec<HoldingSummary> = by_asset
            .into_values()
            .map(|mut summary| {
                if !summary.total_quantity.is_zero() {
                    summary.average_unit_cost = summary.total_invested / summary.total_quantity;
                }
                summary
            })
            .collect();
        holdings.sort_by(|a, b| a.asset_id.as_str().cmp(b.asset_id.as_str()));

        Ok(holdings)
    }

    /// Returns the user's pending orders, newest first.
    pub async fn open_orders(&self, user_id: &UserId) -> LedgerResult<Vec<Order>> {
        let orders = self.store().orders_for_user(user_id).await?;
        Ok(orders
            .into_iter()
            .filter(|order| order.status == OrderStatus::Pending)
            .collect())
    }

    /// Resets the user's cash balance to the configured starting balance.
    ///
    /// The one mutating member of this family: it takes the user lock and
    /// commits through a batch like every other balance write.
    pub async fn reset_balance(&self, user_id: &UserId) -> LedgerResult<Decimal> {
        let _guard = self
            .locks()
            .try_acquire(user_id)
            .ok_or_else(|| LedgerError::Busy(user_id.clone()))?;

        let account = self.store().account(user_id).await?;
        let starting_balance = self.config().starting_balance;

        let mut batch = WriteBatch::new();
        batch.write_balance(user_id.clone(), account.cash_balance, starting_balance);
        self.store().apply(batch).await?;

        info!(user_id = %user_id, %starting_balance, "balance reset");

        Ok(starting_balance)
    }
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
// | Name                          | Description                                          |
// |-------------------------------|------------------------------------------------------|
// | test_holdings_aggregation     | Holdings group lots per asset with average cost.     |
// | test_open_orders_only_pending | Cancelled and filled orders are excluded.            |
// | test_reset_balance            | Reset writes the configured starting balance.        |
//--------------------------------------------------------------------------------------------------
