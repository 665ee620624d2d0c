// Expose the modules
pub mod config;
pub mod domain;
pub mod outbounds;

// Re-export key types for easier usage
pub use config::LedgerConfig;
pub use domain::models::types::{
    Account, AssetId, Lot, Order, OrderCategory, OrderStatus, Side, TradeRecord, UserId,
};
pub use domain::services::ledger::{
    BuyReceipt, HoldingSummary, LedgerEngine, LedgerError, LedgerResult, PlaceOrderRequest,
    SellReceipt, Settlement, LOT_EPSILON,
};
pub use outbounds::{
    AccountStore, JournalTransactionLog, LotStore, MemoryStore, NullTransactionLog, OrderStore,
    StoreError, StoreResult, TransactionLog, TransactionalStore, WriteBatch,
};
