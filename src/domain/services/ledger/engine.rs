//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the core ledger engine: market buys and sells against a
// virtual cash balance, standing-order lifecycle, weighted-average cost basis on
// acquisition and FIFO lot consumption on sale.
//
// Every operation follows the same shape: acquire the user's lock, read, stage
// all effects into a WriteBatch, commit the batch through the store's
// all-or-none primitive, then journal the executed trades. A failure at any
// point leaves account, lot and order state untouched.
//
// | Component          | Description                                                |
// |--------------------|-----------------------------------------------------------|
// | LedgerEngine       | The five ledger operations over injected stores           |
// | PlaceOrderRequest  | Input for standing-order creation                         |
// | BuyReceipt         | Result of a market buy                                    |
// | SellReceipt        | Result of a market sell                                   |
// | Settlement         | Result of an order evaluation                             |
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                  | Description                                  | Return Type            |
// |-----------------------|----------------------------------------------|------------------------|
// | execute_market_buy    | Debit cash, create or merge the lot          | LedgerResult<BuyReceipt>  |
// | execute_market_sell   | Consume lots FIFO, credit proceeds           | LedgerResult<SellReceipt> |
// | place_order           | Validate, reserve funds, persist pending     | LedgerResult<Order>    |
// | cancel_order          | Refund reservation, mark cancelled           | LedgerResult<Order>    |
// | evaluate_and_settle   | Run the trigger state machine, settle        | LedgerResult<Settlement>  |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::models::types::{
    AssetId, Lot, Order, OrderCategory, OrderStatus, Side, TradeRecord, UserId,
};
use crate::outbounds::{
    AccountStore, LotStore, OrderStore, TransactionLog, TransactionalStore, WriteBatch,
};

use super::locks::UserLocks;
use super::{LedgerError, LedgerResult};

/// A lot whose remaining quantity is at or below this threshold is closed.
/// Applied in exactly one place, the FIFO consumption loop.
pub const LOT_EPSILON: Decimal = rust_decimal_macros::dec!(0.00000001);

/// Input for standing-order creation.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    /// Account placing the order.
    pub user_id: UserId,
    /// Asset to trade.
    pub asset_id: AssetId,
    /// Side of the order.
    pub side: Side,
    /// Trigger category.
    pub category: OrderCategory,
    /// Required for `Limit` and `StopLimit`.
    pub limit_price: Option<Decimal>,
    /// Required for `StopLimit` and `StopMarket`.
    pub stop_price: Option<Decimal>,
    /// Quantity to trade.
    pub quantity: Decimal,
}

/// Result of a market buy.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyReceipt {
    /// Balance after the debit.
    pub new_balance: Decimal,
    /// The created or merged lot.
    pub lot: Lot,
}

/// Result of a market sell.
#[derive(Debug, Clone, PartialEq)]
pub struct SellReceipt {
    /// Balance after the credit.
    pub new_balance: Decimal,
    /// Cash credited (`quantity * unit_price`).
    pub sale_amount: Decimal,
    /// Lots fully consumed and deleted.
    pub lots_closed: usize,
    /// Lots partially consumed and persisted.
    pub lots_updated: usize,
}

/// Result of an order evaluation.
///
/// `settled == false` means the evaluation made progress without filling: a
/// stop-limit order whose stop was hit converts to a limit order and stays
/// pending for a later price tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Whether the order filled.
    pub settled: bool,
    /// The order after evaluation.
    pub order: Order,
}

/// Outcome of consuming lots oldest-first for one sale.
struct FifoConsumption {
    /// Partially consumed lots to persist.
    updated: Vec<Lot>,
    /// Fully consumed lots to delete.
    closed: Vec<Lot>,
    /// One entry per consumed lot, in consumption order.
    fills: Vec<LotFill>,
}

struct LotFill {
    lot_id: Uuid,
    quantity: Decimal,
}

/// The ledger engine: owns the arithmetic over one user's cash balance, lot
/// inventory and standing orders.
///
/// # Overview
///
/// The engine is constructed over injected storage collaborators and holds no
/// ambient state of its own beyond the per-user lock registry:
///
/// * Market buys debit cash and create or merge the (user, asset) lot with a
///   weighted-average cost basis.
/// * Market sells consume lots FIFO, reduce cost basis proportionally and
///   credit the proceeds.
/// * Standing orders reserve cash at creation (buys) or count against
///   available holdings (sells), and settle all-or-nothing when an externally
///   supplied price satisfies their trigger.
///
/// # Consistency
///
/// Operations for the same user are serialized by [`UserLocks`]; a contended
/// lock fails the request with [`LedgerError::Busy`] instead of waiting.
/// All effects of one operation commit through a single
/// [`TransactionalStore::apply`] call, so no partial state survives a failure.
pub struct LedgerEngine<S> {
    /// Storage collaborator: account, lot and order reads plus batch commit.
    store: Arc<S>,
    /// Fire-and-forget audit trail.
    log: Arc<dyn TransactionLog>,
    /// Per-user serialization of mutating operations.
    locks: UserLocks,
    /// Engine configuration (starting balance for resets).
    config: LedgerConfig,
}

impl<S> LedgerEngine<S>
where
    S: AccountStore + LotStore + OrderStore + TransactionalStore,
{
    /// Creates a new ledger engine over the given storage collaborators.
    pub fn new(store: Arc<S>, log: Arc<dyn TransactionLog>, config: LedgerConfig) -> Self {
        Self {
            store,
            log,
            locks: UserLocks::new(),
            config,
        }
    }

    pub(super) fn store(&self) -> &S {
        &self.store
    }

    pub(super) fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(super) fn locks(&self) -> &UserLocks {
        &self.locks
    }

    /// Executes an immediate buy at the given market price.
    ///
    /// Debits `unit_price * quantity + fees` from the account and creates or
    /// merges the (user, asset) lot with weighted-average cost.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Account to debit
    /// * `asset_id` - Asset to acquire
    /// * `unit_price` - Market price per unit
    /// * `quantity` - Units to acquire
    /// * `fees` - Fees added to the total cost
    ///
    /// # Errors
    ///
    /// * `ValidationError` - Non-positive quantity or price, negative fees
    /// * `Busy` - Another operation holds the user's lock
    /// * `InsufficientFunds` - Balance cannot cover the total cost
    /// * `NotFound` - Unknown account
    pub async fn execute_market_buy(
        &self,
        user_id: &UserId,
        asset_id: &AssetId,
        unit_price: Decimal,
        quantity: Decimal,
        fees: Decimal,
    ) -> LedgerResult<BuyReceipt> {
        ensure_positive("quantity", quantity)?;
        ensure_positive("unit_price", unit_price)?;
        ensure_non_negative("fees", fees)?;

        let _guard = self.acquire(user_id)?;

        let account = self.store.account(user_id).await?;
        let total_cost = unit_price * quantity + fees;
        if account.cash_balance < total_cost {
            return Err(LedgerError::InsufficientFunds {
                available: account.cash_balance,
                required: total_cost,
            });
        }

        let now = Utc::now();
        let lot = self
            .merge_into_lot(user_id, asset_id, quantity, total_cost, now)
            .await?;
        let new_balance = account.cash_balance - total_cost;

        let mut batch = WriteBatch::new();
        batch.write_balance(user_id.clone(), account.cash_balance, new_balance);
        batch.upsert_lot(lot.clone());
        self.store.apply(batch).await?;

        self.journal(TradeRecord {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            asset_id: asset_id.clone(),
            side: Side::Buy,
            quantity,
            price: unit_price,
            total_value: total_cost,
            fees,
            lot_id: None,
            executed_at: now,
        })
        .await;

        info!(
            user_id = %user_id,
            asset_id = %asset_id,
            %quantity,
            %unit_price,
            %new_balance,
            "market buy executed"
        );

        Ok(BuyReceipt { new_balance, lot })
    }

    /// Executes an immediate sell at the given market price.
    ///
    /// Consumes lots oldest-first, reduces each lot's cost basis in proportion
    /// to the consumed quantity and credits `quantity * unit_price`. No fee is
    /// charged on this path. One trade record is journaled per consumed lot so
    /// the cost basis of each batch stays traceable.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - Non-positive quantity or price
    /// * `Busy` - Another operation holds the user's lock
    /// * `InsufficientHoldings` - Total lot quantity is short of `quantity`
    /// * `NotFound` - Unknown account
    pub async fn execute_market_sell(
        &self,
        user_id: &UserId,
        asset_id: &AssetId,
        unit_price: Decimal,
        quantity: Decimal,
    ) -> LedgerResult<SellReceipt> {
        ensure_positive("quantity", quantity)?;
        ensure_positive("unit_price", unit_price)?;

        let _guard = self.acquire(user_id)?;

        let account = self.store.account(user_id).await?;
        let lots = self.store.lots_by_asset(user_id, asset_id).await?;
        let owned: Decimal = lots.iter().map(|lot| lot.quantity).sum();
        if owned < quantity {
            return Err(LedgerError::InsufficientHoldings {
                owned,
                requested: quantity,
            });
        }

        let now = Utc::now();
        let consumption = consume_lots_fifo(lots, quantity);
        let sale_amount = quantity * unit_price;
        let new_balance = account.cash_balance + sale_amount;

        let mut batch = WriteBatch::new();
        batch.write_balance(user_id.clone(), account.cash_balance, new_balance);
        for lot in &consumption.updated {
            batch.upsert_lot(lot.clone());
        }
        for lot in &consumption.closed {
            batch.delete_lot(lot.id);
        }
        self.store.apply(batch).await?;

        for fill in &consumption.fills {
            self.journal(TradeRecord {
                id: Uuid::new_v4(),
                user_id: user_id.clone(),
                asset_id: asset_id.clone(),
                side: Side::Sell,
                quantity: fill.quantity,
                price: unit_price,
                total_value: fill.quantity * unit_price,
                fees: Decimal::ZERO,
                lot_id: Some(fill.lot_id),
                executed_at: now,
            })
            .await;
        }

        info!(
            user_id = %user_id,
            asset_id = %asset_id,
            %quantity,
            %unit_price,
            %sale_amount,
            lots_closed = consumption.closed.len(),
            lots_updated = consumption.updated.len(),
            "market sell executed"
        );

        Ok(SellReceipt {
            new_balance,
            sale_amount,
            lots_closed: consumption.closed.len(),
            lots_updated: consumption.updated.len(),
        })
    }

    /// Places a standing order.
    ///
    /// Buy orders lock `reservation price * quantity` cash for the life of the
    /// order; the reservation price is the limit price, or the stop price for
    /// stop-market orders. Sell orders lock no cash but must fit inside the
    /// owner's holdings net of quantity already locked by other pending sells.
    /// The reservation debit and the order row commit in one batch.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - Non-positive quantity, missing or non-positive
    ///   price for the category
    /// * `Busy` - Another operation holds the user's lock
    /// * `InsufficientFunds` - Buy reservation exceeds the balance
    /// * `InsufficientAvailableHoldings` - Sell quantity exceeds unlocked
    ///   holdings
    /// * `NotFound` - Unknown account
    pub async fn place_order(&self, request: PlaceOrderRequest) -> LedgerResult<Order> {
        ensure_positive("quantity", request.quantity)?;
        validate_category_prices(request.category, request.limit_price, request.stop_price)?;

        let _guard = self.acquire(&request.user_id)?;

        let account = self.store.account(&request.user_id).await?;
        let now = Utc::now();
        let mut batch = WriteBatch::new();

        let reserved_value = match request.side {
            Side::Buy => {
                let price = reservation_price(
                    request.category,
                    request.limit_price,
                    request.stop_price,
                )?;
                let reserved = price * request.quantity;
                if account.cash_balance < reserved {
                    return Err(LedgerError::InsufficientFunds {
                        available: account.cash_balance,
                        required: reserved,
                    });
                }
                batch.write_balance(
                    request.user_id.clone(),
                    account.cash_balance,
                    account.cash_balance - reserved,
                );
                reserved
            }
            Side::Sell => {
                let lots = self
                    .store
                    .lots_by_asset(&request.user_id, &request.asset_id)
                    .await?;
                let owned: Decimal = lots.iter().map(|lot| lot.quantity).sum();
                let pending = self
                    .store
                    .pending_orders(&request.user_id, &request.asset_id, Side::Sell)
                    .await?;
                let locked: Decimal = pending
                    .iter()
                    .map(|order| order.unfilled_quantity())
                    .sum();
                if owned - locked < request.quantity {
                    return Err(LedgerError::InsufficientAvailableHoldings {
                        owned,
                        locked,
                        requested: request.quantity,
                    });
                }
                Decimal::ZERO
            }
        };

        let order = Order {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            asset_id: request.asset_id.clone(),
            side: request.side,
            category: request.category,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            reserved_value,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        batch.upsert_order(order.clone());
        self.store.apply(batch).await?;

        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            asset_id = %order.asset_id,
            side = ?order.side,
            category = ?order.category,
            %reserved_value,
            "order placed"
        );

        Ok(order)
    }

    /// Cancels a pending order.
    ///
    /// Buy orders get their full `reserved_value` credited back; sell orders
    /// release nothing beyond the availability accounting (nothing was
    /// reserved). Refund and status change commit in one batch.
    ///
    /// # Errors
    ///
    /// * `NotFound` - Unknown order
    /// * `Busy` - Another operation holds the user's lock
    /// * `InvalidState` - The order is not pending
    pub async fn cancel_order(&self, order_id: Uuid) -> LedgerResult<Order> {
        // First read only locates the owner; the authoritative read happens
        // under the lock.
        let probe = self.store.order(order_id).await?;
        let _guard = self.acquire(&probe.user_id)?;

        let mut order = self.store.order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(LedgerError::InvalidState {
                id: order.id,
                status: order.status,
            });
        }

        let mut batch = WriteBatch::new();
        if order.side == Side::Buy && !order.reserved_value.is_zero() {
            let account = self.store.account(&order.user_id).await?;
            batch.write_balance(
                order.user_id.clone(),
                account.cash_balance,
                account.cash_balance + order.reserved_value,
            );
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        batch.upsert_order(order.clone());
        self.store.apply(batch).await?;

        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            refunded = %order.reserved_value,
            "order cancelled"
        );

        Ok(order)
    }

    /// Evaluates a pending order against an externally supplied price and
    /// settles it when its condition holds.
    ///
    /// Trigger rules per category:
    ///
    /// * `Limit` buy fills when `current_price <= limit_price`; `Limit` sell
    ///   when `current_price >= limit_price`.
    /// * `StopLimit`/`StopMarket` stop condition: buy `current_price >=
    ///   stop_price`, sell `current_price <= stop_price`. A triggered
    ///   `StopMarket` fills immediately at `current_price`; a triggered
    ///   `StopLimit` converts in place to `Limit` (still pending,
    ///   `settled == false`) and is re-evaluated on a later tick.
    ///
    /// Fills are all-or-nothing. A buy fill merges into the lot at the
    /// reservation price (the funds were debited at placement, so no balance
    /// change); a sell fill re-checks holdings, consumes lots FIFO and credits
    /// the proceeds at the execution price.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - Non-positive current price
    /// * `NotFound` - Unknown order
    /// * `Busy` - Another operation holds the user's lock
    /// * `AlreadySettled` - The order is not pending
    /// * `PriceConditionNotMet` - The trigger condition does not hold
    /// * `InsufficientHoldings` - A sell fill no longer covered by lots
    pub async fn evaluate_and_settle(
        &self,
        order_id: Uuid,
        current_price: Decimal,
    ) -> LedgerResult<Settlement> {
        ensure_positive("current_price", current_price)?;

        let probe = self.store.order(order_id).await?;
        let _guard = self.acquire(&probe.user_id)?;

        let mut order = self.store.order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(LedgerError::AlreadySettled(order.id));
        }

        match order.category {
            OrderCategory::StopLimit | OrderCategory::StopMarket => {
                let stop_price = order.stop_price.ok_or_else(|| {
                    LedgerError::ValidationError(format!(
                        "order {} has no stop price",
                        order.id
                    ))
                })?;
                let stop_hit = match order.side {
                    Side::Buy => current_price >= stop_price,
                    Side::Sell => current_price <= stop_price,
                };
                if !stop_hit {
                    return Err(LedgerError::PriceConditionNotMet(order.id));
                }

                if order.category == OrderCategory::StopLimit {
                    // Stop hit: the order becomes a plain limit order and
                    // waits for its limit condition on a later tick.
                    order.category = OrderCategory::Limit;
                    order.updated_at = Utc::now();
                    let mut batch = WriteBatch::new();
                    batch.upsert_order(order.clone());
                    self.store.apply(batch).await?;

                    info!(order_id = %order.id, "stop limit triggered, order is now limit");
                    return Ok(Settlement {
                        settled: false,
                        order,
                    });
                }

                self.settle(order, current_price).await
            }
            OrderCategory::Limit => {
                let limit_price = order.limit_price.ok_or_else(|| {
                    LedgerError::ValidationError(format!(
                        "order {} has no limit price",
                        order.id
                    ))
                })?;
                let triggered = match order.side {
                    Side::Buy => current_price <= limit_price,
                    Side::Sell => current_price >= limit_price,
                };
                if !triggered {
                    return Err(LedgerError::PriceConditionNotMet(order.id));
                }

                self.settle(order, limit_price).await
            }
        }
    }

    /// Fills an order whose condition holds. `execution_price` is the limit
    /// price for limit orders and the current market price for stop-markets.
    async fn settle(&self, mut order: Order, execution_price: Decimal) -> LedgerResult<Settlement> {
        let now = Utc::now();
        let mut batch = WriteBatch::new();
        let mut records = Vec::new();

        match order.side {
            Side::Buy => {
                // Funds were debited at placement; the reservation is the cost
                // basis, so settling moves no cash.
                let price = reservation_price(order.category, order.limit_price, order.stop_price)?;
                let lot = self
                    .merge_into_lot(
                        &order.user_id,
                        &order.asset_id,
                        order.quantity,
                        order.reserved_value,
                        now,
                    )
                    .await?;
                batch.upsert_lot(lot);
                records.push(TradeRecord {
                    id: Uuid::new_v4(),
                    user_id: order.user_id.clone(),
                    asset_id: order.asset_id.clone(),
                    side: Side::Buy,
                    quantity: order.quantity,
                    price,
                    total_value: order.reserved_value,
                    fees: Decimal::ZERO,
                    lot_id: None,
                    executed_at: now,
                });
            }
            Side::Sell => {
                let account = self.store.account(&order.user_id).await?;
                let lots = self
                    .store
                    .lots_by_asset(&order.user_id, &order.asset_id)
                    .await?;
                let owned: Decimal = lots.iter().map(|lot| lot.quantity).sum();
                // Availability was only checked at placement; market sells may
                // have consumed the holdings since.
                if owned < order.quantity {
                    return Err(LedgerError::InsufficientHoldings {
                        owned,
                        requested: order.quantity,
                    });
                }

                let consumption = consume_lots_fifo(lots, order.quantity);
                let proceeds = order.quantity * execution_price;
                batch.write_balance(
                    order.user_id.clone(),
                    account.cash_balance,
                    account.cash_balance + proceeds,
                );
                for lot in &consumption.updated {
                    batch.upsert_lot(lot.clone());
                }
                for lot in &consumption.closed {
                    batch.delete_lot(lot.id);
                }
                for fill in &consumption.fills {
                    records.push(TradeRecord {
                        id: Uuid::new_v4(),
                        user_id: order.user_id.clone(),
                        asset_id: order.asset_id.clone(),
                        side: Side::Sell,
                        quantity: fill.quantity,
                        price: execution_price,
                        total_value: fill.quantity * execution_price,
                        fees: Decimal::ZERO,
                        lot_id: Some(fill.lot_id),
                        executed_at: now,
                    });
                }
            }
        }

        order.status = OrderStatus::Filled;
        order.filled_quantity = order.quantity;
        order.updated_at = now;
        batch.upsert_order(order.clone());
        self.store.apply(batch).await?;

        for record in records {
            self.journal(record).await;
        }

        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            side = ?order.side,
            %execution_price,
            "order settled"
        );

        Ok(Settlement {
            settled: true,
            order,
        })
    }

    /// Creates the (user, asset) lot or merges the acquisition into the
    /// existing one. Merging sums quantity and cost and refreshes the
    /// acquisition time, which makes the unit cost the weighted average.
    async fn merge_into_lot(
        &self,
        user_id: &UserId,
        asset_id: &AssetId,
        quantity: Decimal,
        total_cost: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<Lot> {
        let lots = self.store.lots_by_asset(user_id, asset_id).await?;
        let lot = match lots.into_iter().next_back() {
            Some(mut lot) => {
                lot.quantity += quantity;
                lot.total_cost += total_cost;
                lot.acquired_at = now;
                debug!(
                    lot_id = %lot.id,
                    new_quantity = %lot.quantity,
                    unit_cost = %lot.unit_cost(),
                    "merged acquisition into existing lot"
                );
                lot
            }
            None => Lot::new(user_id.clone(), asset_id.clone(), quantity, total_cost, now),
        };
        Ok(lot)
    }

    fn acquire(&self, user_id: &UserId) -> LedgerResult<super::locks::UserGuard> {
        self.locks
            .try_acquire(user_id)
            .ok_or_else(|| LedgerError::Busy(user_id.clone()))
    }

    /// Journals a trade record. The batch has already committed when this
    /// runs, and the trail is fire-and-forget, so a failed append is logged
    /// and not surfaced.
    async fn journal(&self, record: TradeRecord) {
        if let Err(e) = self.log.append(record).await {
            warn!("trade journal append failed: {}", e);
        }
    }
}

/// Consumes lots oldest-first until `quantity` is covered. The caller has
/// already verified total holdings are sufficient.
fn consume_lots_fifo(lots: Vec<Lot>, quantity: Decimal) -> FifoConsumption {
    let mut remaining = quantity;
    let mut updated = Vec::new();
    let mut closed = Vec::new();
    let mut fills = Vec::new();

    for mut lot in lots {
        if remaining <= Decimal::ZERO {
            break;
        }

        let consumed = lot.quantity.min(remaining);
        // Unit cost before mutation; the consumed share of the cost basis
        // leaves the lot with it.
        let unit_cost = lot.unit_cost();
        lot.quantity -= consumed;
        lot.total_cost -= consumed * unit_cost;
        remaining -= consumed;

        fills.push(LotFill {
            lot_id: lot.id,
            quantity: consumed,
        });

        if lot.quantity <= LOT_EPSILON {
            closed.push(lot);
        } else {
            updated.push(lot);
        }
    }

    FifoConsumption {
        updated,
        closed,
        fills,
    }
}

fn ensure_positive(name: &str, value: Decimal) -> LedgerResult<()> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::ValidationError(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

fn ensure_non_negative(name: &str, value: Decimal) -> LedgerResult<()> {
    if value < Decimal::ZERO {
        return Err(LedgerError::ValidationError(format!(
            "{} must not be negative, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Checks the price fields an order category requires are present and positive.
fn validate_category_prices(
    category: OrderCategory,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
) -> LedgerResult<()> {
    let require = |name: &str, price: Option<Decimal>| -> LedgerResult<()> {
        match price {
            Some(value) => ensure_positive(name, value),
            None => Err(LedgerError::ValidationError(format!(
                "{:?} orders require a {}",
                category, name
            ))),
        }
    };

    match category {
        OrderCategory::Limit => require("limit_price", limit_price),
        OrderCategory::StopLimit => {
            require("limit_price", limit_price)?;
            require("stop_price", stop_price)
        }
        OrderCategory::StopMarket => require("stop_price", stop_price),
    }
}

/// The price a buy order's reservation was computed from: the limit price, or
/// the stop price for stop-market orders.
fn reservation_price(
    category: OrderCategory,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
) -> LedgerResult<Decimal> {
    let price = match category {
        OrderCategory::StopMarket => stop_price,
        OrderCategory::Limit | OrderCategory::StopLimit => limit_price,
    };
    price.ok_or_else(|| {
        LedgerError::ValidationError(format!("{:?} order is missing its reservation price", category))
    })
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
// | Name                                   | Description                                       |
// |----------------------------------------|---------------------------------------------------|
// | test_buy_creates_lot                   | First buy debits cash and creates the lot.        |
// | test_buy_merges_weighted_average       | Second buy merges to the weighted-average cost.   |
// | test_buy_insufficient_funds            | Over-budget buy fails and moves nothing.          |
// | test_sell_consumes_fifo                | Sale depletes the oldest lot first.               |
// | test_sell_closes_lot_within_epsilon    | Dust below the epsilon closes the lot.            |
// | test_sell_insufficient_holdings        | Overselling fails and moves nothing.              |
// | test_place_buy_order_reserves_funds    | Buy order debits its reservation.                 |
// | test_place_sell_order_checks_locked    | Sell order respects quantity locked by others.    |
// | test_place_order_validation            | Category/price pairing is enforced.               |
// | test_cancel_refunds_reservation        | Place + cancel nets zero balance change.          |
// | test_cancel_non_pending_fails          | Cancel of a filled order fails InvalidState.      |
// | test_stop_limit_state_machine          | Full stop-limit sell trigger walk-through.        |
// | test_stop_market_settles_at_current    | Stop-market sell credits the current price.       |
// | test_settle_buy_uses_reservation       | Settled buy merges at the reservation cost.       |
// | test_settle_sell_rechecks_holdings     | Settlement fails when holdings vanished.          |
// | test_busy_when_lock_held               | A held user lock fails the operation with Busy.   |
// | test_unavailable_store_surfaces        | A failing store apply maps to Unavailable.        |
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbounds::{MemoryStore, NullTransactionLog, StoreError, StoreResult};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn test_engine() -> (Arc<MemoryStore>, LedgerEngine<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = LedgerEngine::new(
            store.clone(),
            Arc::new(NullTransactionLog),
            LedgerConfig::default(),
        );
        (store, engine)
    }

    fn funded_user(store: &MemoryStore, id: &str) -> UserId {
        let user = UserId::from(id);
        store.seed_account(user.clone(), dec!(100000.00));
        user
    }

    fn asset(id: &str) -> AssetId {
        AssetId::from(id)
    }

    fn limit_request(user: &UserId, side: Side, price: Decimal, quantity: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            user_id: user.clone(),
            asset_id: asset("bitcoin"),
            side,
            category: OrderCategory::Limit,
            limit_price: Some(price),
            stop_price: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_buy_creates_lot() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");

        let receipt = engine
            .execute_market_buy(&user, &asset("bitcoin"), dec!(50.00), dec!(2), Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, dec!(99900.00));
        assert_eq!(receipt.lot.quantity, dec!(2));
        assert_eq!(receipt.lot.unit_cost(), dec!(50.00));
        assert_eq!(store.lot_count(), 1);
    }

    #[tokio::test]
    async fn test_buy_merges_weighted_average() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");

        engine
            .execute_market_buy(&user, &btc, dec!(50.00), dec!(2), Decimal::ZERO)
            .await
            .unwrap();
        let receipt = engine
            .execute_market_buy(&user, &btc, dec!(60.00), dec!(3), Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, dec!(99720.00));
        assert_eq!(receipt.lot.quantity, dec!(5));
        assert_eq!(receipt.lot.total_cost, dec!(280.00));
        assert_eq!(receipt.lot.unit_cost(), dec!(56.00));
        // Merged, not appended.
        assert_eq!(store.lot_count(), 1);
    }

    #[tokio::test]
    async fn test_buy_insufficient_funds() {
        let (store, engine) = test_engine();
        let user = UserId::from("user-1");
        store.seed_account(user.clone(), dec!(99.00));

        let err = engine
            .execute_market_buy(&user, &asset("bitcoin"), dec!(50.00), dec!(2), Decimal::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(store.account(&user).await.unwrap().cash_balance, dec!(99.00));
        assert_eq!(store.lot_count(), 0);
    }

    #[tokio::test]
    async fn test_sell_consumes_fifo() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");

        let old = Lot::new(
            user.clone(),
            btc.clone(),
            dec!(2),
            dec!(100.00),
            Utc::now() - Duration::hours(2),
        );
        let new = Lot::new(
            user.clone(),
            btc.clone(),
            dec!(3),
            dec!(180.00),
            Utc::now() - Duration::hours(1),
        );
        store.seed_lot(old.clone());
        store.seed_lot(new.clone());

        let receipt = engine
            .execute_market_sell(&user, &btc, dec!(70.00), dec!(3))
            .await
            .unwrap();

        assert_eq!(receipt.sale_amount, dec!(210.00));
        assert_eq!(receipt.lots_closed, 1);
        assert_eq!(receipt.lots_updated, 1);

        // The older lot is gone; the newer lot lost one unit at its own cost.
        let remaining = store.lots_by_asset(&user, &btc).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, new.id);
        assert_eq!(remaining[0].quantity, dec!(2));
        assert_eq!(remaining[0].total_cost, dec!(120.00));
    }

    #[tokio::test]
    async fn test_sell_closes_lot_within_epsilon() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");
        store.seed_lot(Lot::new(
            user.clone(),
            btc.clone(),
            dec!(1.000000005),
            dec!(50.00),
            Utc::now(),
        ));

        let receipt = engine
            .execute_market_sell(&user, &btc, dec!(50.00), dec!(1))
            .await
            .unwrap();

        // The residue is below the closing threshold.
        assert_eq!(receipt.lots_closed, 1);
        assert_eq!(receipt.lots_updated, 0);
        assert_eq!(store.lot_count(), 0);
    }

    #[tokio::test]
    async fn test_sell_insufficient_holdings() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");
        store.seed_lot(Lot::new(
            user.clone(),
            btc.clone(),
            dec!(1),
            dec!(50.00),
            Utc::now(),
        ));

        let err = engine
            .execute_market_sell(&user, &btc, dec!(50.00), dec!(2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientHoldings {
                owned,
                requested
            } if owned == dec!(1) && requested == dec!(2)
        ));
        assert_eq!(
            store.account(&user).await.unwrap().cash_balance,
            dec!(100000.00)
        );
        assert_eq!(store.lot_count(), 1);
    }

    #[tokio::test]
    async fn test_place_buy_order_reserves_funds() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");

        let order = engine
            .place_order(limit_request(&user, Side::Buy, dec!(45.00), dec!(10)))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.reserved_value, dec!(450.00));
        assert_eq!(
            store.account(&user).await.unwrap().cash_balance,
            dec!(99550.00)
        );
    }

    #[tokio::test]
    async fn test_place_sell_order_checks_locked() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");
        store.seed_lot(Lot::new(
            user.clone(),
            btc.clone(),
            dec!(5),
            dec!(250.00),
            Utc::now(),
        ));

        // First sell order locks 3 of the 5 owned units.
        engine
            .place_order(limit_request(&user, Side::Sell, dec!(60.00), dec!(3)))
            .await
            .unwrap();

        let err = engine
            .place_order(limit_request(&user, Side::Sell, dec!(60.00), dec!(3)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientAvailableHoldings {
                owned,
                locked,
                requested
            } if owned == dec!(5) && locked == dec!(3) && requested == dec!(3)
        ));

        // The remaining 2 units are still available.
        engine
            .place_order(limit_request(&user, Side::Sell, dec!(60.00), dec!(2)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_place_order_validation() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");

        let mut missing_limit = limit_request(&user, Side::Buy, dec!(45.00), dec!(1));
        missing_limit.limit_price = None;
        assert!(matches!(
            engine.place_order(missing_limit).await.unwrap_err(),
            LedgerError::ValidationError(_)
        ));

        let mut missing_stop = limit_request(&user, Side::Buy, dec!(45.00), dec!(1));
        missing_stop.category = OrderCategory::StopLimit;
        assert!(matches!(
            engine.place_order(missing_stop).await.unwrap_err(),
            LedgerError::ValidationError(_)
        ));

        let zero_quantity = limit_request(&user, Side::Buy, dec!(45.00), dec!(0));
        assert!(matches!(
            engine.place_order(zero_quantity).await.unwrap_err(),
            LedgerError::ValidationError(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_refunds_reservation() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");

        let order = engine
            .place_order(limit_request(&user, Side::Buy, dec!(45.00), dec!(10)))
            .await
            .unwrap();
        assert_eq!(
            store.account(&user).await.unwrap().cash_balance,
            dec!(99550.00)
        );

        let cancelled = engine.cancel_order(order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        // Place + cancel nets zero.
        assert_eq!(
            store.account(&user).await.unwrap().cash_balance,
            dec!(100000.00)
        );
    }

    #[tokio::test]
    async fn test_cancel_non_pending_fails() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");

        let order = engine
            .place_order(limit_request(&user, Side::Buy, dec!(45.00), dec!(1)))
            .await
            .unwrap();
        engine.cancel_order(order.id).await.unwrap();

        let err = engine.cancel_order(order.id).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidState {
                status: OrderStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_limit_state_machine() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");
        store.seed_lot(Lot::new(
            user.clone(),
            btc.clone(),
            dec!(1),
            dec!(45.00),
            Utc::now(),
        ));

        let order = engine
            .place_order(PlaceOrderRequest {
                user_id: user.clone(),
                asset_id: btc.clone(),
                side: Side::Sell,
                category: OrderCategory::StopLimit,
                limit_price: Some(dec!(38.00)),
                stop_price: Some(dec!(40.00)),
                quantity: dec!(1),
            })
            .await
            .unwrap();

        // Above the stop: nothing triggers.
        assert!(matches!(
            engine
                .evaluate_and_settle(order.id, dec!(41.00))
                .await
                .unwrap_err(),
            LedgerError::PriceConditionNotMet(_)
        ));

        // Stop hit: converts to a limit order, still pending.
        let settlement = engine
            .evaluate_and_settle(order.id, dec!(39.00))
            .await
            .unwrap();
        assert!(!settlement.settled);
        assert_eq!(settlement.order.category, OrderCategory::Limit);
        assert_eq!(settlement.order.status, OrderStatus::Pending);

        // Below the limit: a limit sell needs price >= limit.
        assert!(matches!(
            engine
                .evaluate_and_settle(order.id, dec!(37.50))
                .await
                .unwrap_err(),
            LedgerError::PriceConditionNotMet(_)
        ));

        // At or above the limit: settles and credits the limit price.
        let before = store.account(&user).await.unwrap().cash_balance;
        let settlement = engine
            .evaluate_and_settle(order.id, dec!(38.50))
            .await
            .unwrap();
        assert!(settlement.settled);
        assert_eq!(settlement.order.status, OrderStatus::Filled);
        assert_eq!(settlement.order.filled_quantity, dec!(1));
        let after = store.account(&user).await.unwrap().cash_balance;
        assert_eq!(after - before, dec!(38.00));

        // A settled order cannot settle again.
        assert!(matches!(
            engine
                .evaluate_and_settle(order.id, dec!(38.50))
                .await
                .unwrap_err(),
            LedgerError::AlreadySettled(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_market_settles_at_current() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");
        store.seed_lot(Lot::new(
            user.clone(),
            btc.clone(),
            dec!(2),
            dec!(100.00),
            Utc::now(),
        ));

        let order = engine
            .place_order(PlaceOrderRequest {
                user_id: user.clone(),
                asset_id: btc.clone(),
                side: Side::Sell,
                category: OrderCategory::StopMarket,
                limit_price: None,
                stop_price: Some(dec!(40.00)),
                quantity: dec!(2),
            })
            .await
            .unwrap();

        let before = store.account(&user).await.unwrap().cash_balance;
        let settlement = engine
            .evaluate_and_settle(order.id, dec!(39.50))
            .await
            .unwrap();
        assert!(settlement.settled);
        // Stop-market executes at the supplied market price, not the stop.
        let after = store.account(&user).await.unwrap().cash_balance;
        assert_eq!(after - before, dec!(79.00));
    }

    #[tokio::test]
    async fn test_settle_buy_uses_reservation() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");

        let order = engine
            .place_order(limit_request(&user, Side::Buy, dec!(45.00), dec!(2)))
            .await
            .unwrap();
        let balance_after_place = store.account(&user).await.unwrap().cash_balance;

        let settlement = engine
            .evaluate_and_settle(order.id, dec!(44.00))
            .await
            .unwrap();
        assert!(settlement.settled);

        // No balance movement on settlement; the lot carries the reservation
        // as its cost basis.
        assert_eq!(
            store.account(&user).await.unwrap().cash_balance,
            balance_after_place
        );
        let lots = store.lots_by_asset(&user, &btc).await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, dec!(2));
        assert_eq!(lots[0].total_cost, dec!(90.00));
        assert_eq!(lots[0].unit_cost(), dec!(45.00));
    }

    #[tokio::test]
    async fn test_settle_sell_rechecks_holdings() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");
        let btc = asset("bitcoin");
        store.seed_lot(Lot::new(
            user.clone(),
            btc.clone(),
            dec!(2),
            dec!(100.00),
            Utc::now(),
        ));

        let order = engine
            .place_order(limit_request(&user, Side::Sell, dec!(60.00), dec!(2)))
            .await
            .unwrap();

        // Market sell consumes the holdings the order was counting on.
        engine
            .execute_market_sell(&user, &btc, dec!(55.00), dec!(2))
            .await
            .unwrap();

        let balance_before = store.account(&user).await.unwrap().cash_balance;
        let err = engine
            .evaluate_and_settle(order.id, dec!(61.00))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientHoldings { .. }));

        // The aborted settlement moved nothing.
        assert_eq!(
            store.account(&user).await.unwrap().cash_balance,
            balance_before
        );
        let order = store.order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_busy_when_lock_held() {
        let (store, engine) = test_engine();
        let user = funded_user(&store, "user-1");

        let _held = engine.locks.try_acquire(&user).unwrap();
        let err = engine
            .execute_market_buy(&user, &asset("bitcoin"), dec!(50.00), dec!(1), Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Busy(_)));

        // A different user is unaffected.
        let other = funded_user(&store, "user-2");
        engine
            .execute_market_buy(&other, &asset("bitcoin"), dec!(50.00), dec!(1), Decimal::ZERO)
            .await
            .unwrap();
    }

    mod unavailable_store {
        use super::*;
        use crate::domain::models::types::Account;
        use crate::outbounds::WriteBatch;
        use async_trait::async_trait;

        mockall::mock! {
            pub Store {}

            #[async_trait]
            impl AccountStore for Store {
                async fn account(&self, user_id: &UserId) -> StoreResult<Account>;
            }

            #[async_trait]
            impl LotStore for Store {
                async fn lots_by_asset(
                    &self,
                    user_id: &UserId,
                    asset_id: &AssetId,
                ) -> StoreResult<Vec<Lot>>;
                async fn lots_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Lot>>;
            }

            #[async_trait]
            impl OrderStore for Store {
                async fn order(&self, order_id: Uuid) -> StoreResult<Order>;
                async fn pending_orders(
                    &self,
                    user_id: &UserId,
                    asset_id: &AssetId,
                    side: Side,
                ) -> StoreResult<Vec<Order>>;
                async fn orders_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Order>>;
            }

            #[async_trait]
            impl TransactionalStore for Store {
                async fn apply(&self, batch: WriteBatch) -> StoreResult<()>;
            }
        }

        #[tokio::test]
        async fn test_unavailable_store_surfaces() {
            let mut store = MockStore::new();
            store.expect_account().returning(|user_id| {
                Ok(Account::new(user_id.clone(), dec!(100000.00)))
            });
            store
                .expect_lots_by_asset()
                .returning(|_, _| Ok(Vec::new()));
            store.expect_apply().returning(|_| {
                Err(StoreError::Unavailable("connection lost".to_string()))
            });

            let engine = LedgerEngine::new(
                Arc::new(store),
                Arc::new(NullTransactionLog),
                LedgerConfig::default(),
            );

            let err = engine
                .execute_market_buy(
                    &UserId::from("user-1"),
                    &asset("bitcoin"),
                    dec!(50.00),
                    dec!(1),
                    Decimal::ZERO,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Unavailable(_)));
        }
    }
}
