//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the core data types used throughout the ledger engine,
// including accounts, lots, orders, trade records and various status/type enums.
//
// | Section            | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | IDENTIFIERS        | Opaque id newtypes (UserId, AssetId).                            |
// | ENUMS              | Discrete sets of values (Side, OrderCategory, OrderStatus).      |
// | STRUCTS            | Accounts, lots, orders and trade records.                        |
// | TESTS              | Unit tests for the defined types.                                |
//--------------------------------------------------------------------------------------------------

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//--------------------------------------------------------------------------------------------------
//  IDENTIFIERS
//--------------------------------------------------------------------------------------------------

/// Opaque, globally unique identifier for a user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque identifier for a tradeable asset (e.g. a coin id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

//--------------------------------------------------------------------------------------------------
//  ENUMS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                  |
// |---------------|----------------------------------------------|
// | Side          | Represents the side of a trade (Buy/Sell).   |
// | OrderCategory | Represents the category of a standing order. |
// | OrderStatus   | Represents the lifecycle status of an order. |
//--------------------------------------------------------------------------------------------------

/// Represents the side of a trade or standing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Acquires asset quantity in exchange for cash.
    Buy,
    /// Releases asset quantity in exchange for cash.
    Sell,
}

/// Represents the category of a standing order, determining its trigger rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderCategory {
    /// Executes when the market price reaches the limit price or better.
    Limit,
    /// Converts to a `Limit` order once the stop price is crossed.
    StopLimit,
    /// Executes immediately at the market price once the stop price is crossed.
    StopMarket,
}

/// Represents the lifecycle status of a standing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// The order is live and waiting for its price condition.
    Pending,
    /// The order settled in full. Fills are all-or-nothing.
    Filled,
    /// The order was cancelled before settling.
    Cancelled,
}

//--------------------------------------------------------------------------------------------------
//  STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                        |
// |---------------|----------------------------------------------------|
// | Account       | A user's virtual cash balance.                     |
// | Lot           | One acquisition batch of an asset with cost basis. |
// | Order         | A standing buy/sell instruction, not yet settled.  |
// | TradeRecord   | Append-only audit entry for an executed trade.     |
//--------------------------------------------------------------------------------------------------

/// A user account holding the virtual cash balance.
///
/// Invariant: `cash_balance >= 0` at all times; the balance is mutated only by
/// the ledger engine's buy/sell/order operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Identifier of the account owner.
    pub user_id: UserId,
    /// Current virtual cash balance.
    pub cash_balance: Decimal,
}

impl Account {
    pub fn new(user_id: UserId, cash_balance: Decimal) -> Self {
        Self {
            user_id,
            cash_balance,
        }
    }
}

/// One acquisition batch of an asset for a user.
///
/// A lot tracks the cumulative cost basis for its remaining quantity. Buys merge
/// into the existing lot for the (user, asset) pair with a weighted-average
/// cost; sells consume lots oldest-first and reduce `total_cost` proportionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Unique identifier for the lot.
    pub id: Uuid,
    /// Owner of the lot.
    pub user_id: UserId,
    /// Asset this lot holds.
    pub asset_id: AssetId,
    /// Remaining quantity in this lot. Always positive while the lot exists.
    pub quantity: Decimal,
    /// Cumulative cost basis for the remaining quantity.
    pub total_cost: Decimal,
    /// Acquisition timestamp, used for FIFO ordering. Refreshed on merge.
    pub acquired_at: DateTime<Utc>,
}

impl Lot {
    pub fn new(
        user_id: UserId,
        asset_id: AssetId,
        quantity: Decimal,
        total_cost: Decimal,
        acquired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            asset_id,
            quantity,
            total_cost,
            acquired_at,
        }
    }

    /// Average cost per unit for the remaining quantity.
    ///
    /// Returns zero for an empty lot rather than dividing by zero; empty lots
    /// are deleted by the engine and never observed by callers.
    pub fn unit_cost(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.total_cost / self.quantity
        }
    }
}

/// A standing instruction to buy or sell once a price condition is met.
///
/// A buy order locks `reserved_value` cash at creation and is refunded in full
/// on cancellation. A sell order locks no cash; its quantity is counted against
/// the owner's available holdings while the order is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier for the order.
    pub id: Uuid,
    /// Identifier of the account that placed the order.
    pub user_id: UserId,
    /// Asset the order trades.
    pub asset_id: AssetId,
    /// Side of the order (buy or sell).
    pub side: Side,
    /// Category determining the trigger rules. A triggered stop-limit order is
    /// rewritten in place to `Limit`.
    pub category: OrderCategory,
    /// Limit price for `Limit` and `StopLimit` orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price for `StopLimit` and `StopMarket` orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Quantity settled so far. Either zero or `quantity`.
    pub filled_quantity: Decimal,
    /// Cash debited at creation for buy orders; zero for sells.
    pub reserved_value: Decimal,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Timestamp of order creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last state change.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Quantity not yet settled. Counted against available holdings for
    /// pending sell orders.
    pub fn unfilled_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }
}

/// Append-only audit entry for one executed trade.
///
/// Sell executions produce one record per consumed lot so the cost basis of
/// each batch remains traceable. The engine writes records and never reads
/// them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unique identifier for the record.
    pub id: Uuid,
    /// Account the trade was executed for.
    pub user_id: UserId,
    /// Asset that was traded.
    pub asset_id: AssetId,
    /// Side of the execution.
    pub side: Side,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution price per unit.
    pub price: Decimal,
    /// Total value moved (price * quantity, plus fees on buys).
    pub total_value: Decimal,
    /// Fees charged on the execution.
    pub fees: Decimal,
    /// Lot consumed by a sell execution, for cost-basis traceability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot_id: Option<Uuid>,
    /// Timestamp of the execution.
    pub executed_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
// | Name                          | Description                                      |
// |-------------------------------|--------------------------------------------------|
// | test_lot_unit_cost            | Verify unit cost derivation and zero guard.      |
// | test_order_unfilled_quantity  | Verify unfilled quantity arithmetic.             |
// | test_enum_serde_names         | Check wire names of the status/category enums.   |
// | test_id_newtypes              | Check display/equality of the id newtypes.       |
//--------------------------------------------------------------------------------------------------
