use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::types::{OrderStatus, UserId};
use crate::outbounds::StoreError;

pub mod engine;
pub mod locks;
pub mod portfolio;

/// Re-export key types for convenience
pub use self::engine::{
    BuyReceipt, LedgerEngine, PlaceOrderRequest, SellReceipt, Settlement, LOT_EPSILON,
};
pub use self::locks::UserLocks;
pub use self::portfolio::HoldingSummary;

/// Errors that can occur during ledger engine operations.
///
/// Every failure is terminal to the triggering request; nothing is retried
/// internally. `Unavailable` is the one kind a caller may retry, and only for
/// reads, or after confirming the previous attempt did not commit.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The account balance cannot cover the requested debit.
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    /// The account does not hold enough of the asset to sell.
    #[error("insufficient holdings: owned {owned}, requested {requested}")]
    InsufficientHoldings { owned: Decimal, requested: Decimal },

    /// Enough is owned overall, but pending sell orders lock too much of it.
    #[error(
        "insufficient available holdings: owned {owned}, locked by open orders {locked}, requested {requested}"
    )]
    InsufficientAvailableHoldings {
        owned: Decimal,
        locked: Decimal,
        requested: Decimal,
    },

    /// The order is in the wrong status for the requested transition.
    #[error("order {id} is in status {status:?}, expected pending")]
    InvalidState { id: Uuid, status: OrderStatus },

    /// The supplied price does not satisfy the order's trigger condition.
    #[error("price condition not met for order {0}")]
    PriceConditionNotMet(Uuid),

    /// The order was already filled or cancelled.
    #[error("order {0} already settled")]
    AlreadySettled(Uuid),

    /// Unknown user, order or lot.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed quantity, price or category/price pairing.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Another operation holds the user's lock. The caller should retry later.
    #[error("user {0} has another ledger operation in flight")]
    Busy(UserId),

    /// Transient storage failure. Mutating operations must not be blindly
    /// retried unless the caller can confirm the previous attempt did not
    /// partially commit.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(user_id) => {
                LedgerError::NotFound(format!("account for user {}", user_id))
            }
            StoreError::OrderNotFound(order_id) => {
                LedgerError::NotFound(format!("order {}", order_id))
            }
            // Under the per-user lock a guard mismatch can only mean an
            // external writer raced the store; the caller must treat the
            // attempt as possibly-not-committed.
            StoreError::Conflict { user_id, .. } => {
                LedgerError::Unavailable(format!("balance write conflict for user {}", user_id))
            }
            StoreError::Unavailable(reason) => LedgerError::Unavailable(reason),
        }
    }
}

/// Type alias for Result with LedgerError
pub type LedgerResult<T> = Result<T, LedgerError>;
