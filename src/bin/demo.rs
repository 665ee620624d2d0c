use std::sync::Arc;

use clap::Parser;
use rust_decimal_macros::dec;

use coinledger::{
    AssetId, JournalTransactionLog, LedgerConfig, LedgerEngine, MemoryStore, OrderCategory,
    PlaceOrderRequest, Side, UserId,
};

/// End-to-end walk-through of the ledger engine against the in-memory store.
#[derive(Parser)]
struct Args {
    /// User id to run the walk-through for.
    #[arg(long, default_value = "demo-user")]
    user: String,

    /// Directory for the trade journal. Overrides JOURNAL_DIR.
    #[arg(long)]
    journal_dir: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing (for logging)
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = LedgerConfig::from_env();
    if let Some(dir) = args.journal_dir {
        config.journal_dir = dir;
    }

    println!("Starting ledger engine walk-through");

    let store = Arc::new(MemoryStore::new());
    let journal = JournalTransactionLog::new(&config.journal_dir, config.journal_records_per_file)
        .expect("failed to create trade journal");
    let journal_dir = config.journal_dir.clone();
    let engine = LedgerEngine::new(store.clone(), Arc::new(journal), config.clone());

    let user = UserId::new(args.user);
    let asset = AssetId::new("bitcoin");
    store.seed_account(user.clone(), config.starting_balance);
    println!("User {} starts with {}", user, config.starting_balance);

    // Two market buys merge into one lot at the weighted-average cost.
    println!("\nBuying...");
    let receipt = engine
        .execute_market_buy(&user, &asset, dec!(50.00), dec!(2), dec!(0))
        .await
        .expect("first buy failed");
    println!(
        "Bought 2 @ 50.00 -> balance {}, lot {} @ {}",
        receipt.new_balance,
        receipt.lot.quantity,
        receipt.lot.unit_cost()
    );

    let receipt = engine
        .execute_market_buy(&user, &asset, dec!(60.00), dec!(3), dec!(0))
        .await
        .expect("second buy failed");
    println!(
        "Bought 3 @ 60.00 -> balance {}, lot {} @ {}",
        receipt.new_balance,
        receipt.lot.quantity,
        receipt.lot.unit_cost()
    );

    // FIFO sale back to the starting balance.
    println!("\nSelling...");
    let receipt = engine
        .execute_market_sell(&user, &asset, dec!(70.00), dec!(4))
        .await
        .expect("sell failed");
    println!(
        "Sold 4 @ 70.00 -> proceeds {}, balance {}, lots closed {}, updated {}",
        receipt.sale_amount, receipt.new_balance, receipt.lots_closed, receipt.lots_updated
    );

    // Stop-limit sell: stop at 40, limit at 38.
    println!("\nPlacing a stop-limit sell (stop 40.00, limit 38.00)...");
    let order = engine
        .place_order(PlaceOrderRequest {
            user_id: user.clone(),
            asset_id: asset.clone(),
            side: Side::Sell,
            category: OrderCategory::StopLimit,
            limit_price: Some(dec!(38.00)),
            stop_price: Some(dec!(40.00)),
            quantity: dec!(1),
        })
        .await
        .expect("order placement failed");
    println!("Order {} placed", order.id);

    for tick in [dec!(41.00), dec!(39.00), dec!(38.50)] {
        match engine.evaluate_and_settle(order.id, tick).await {
            Ok(settlement) if settlement.settled => {
                println!("Tick {}: settled ({:?})", tick, settlement.order.status)
            }
            Ok(settlement) => println!(
                "Tick {}: triggered, now {:?} and still pending",
                tick, settlement.order.category
            ),
            Err(err) => println!("Tick {}: {}", tick, err),
        }
    }

    println!("\nFinal state:");
    let balance = engine.balance(&user).await.expect("balance query failed");
    println!("Balance: {}", balance);
    for holding in engine.holdings(&user).await.expect("holdings query failed") {
        println!(
            "Holding {}: {} units, invested {}, avg cost {}",
            holding.asset_id, holding.total_quantity, holding.total_invested,
            holding.average_unit_cost
        );
    }

    println!("\nWalk-through completed! Trades journaled to {}", journal_dir);
}
