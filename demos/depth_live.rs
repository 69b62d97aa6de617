//! Keep live books for a few symbols and print best quote changes
//!
//! ```bash
//! RUST_LOG=book_sync=debug cargo run --example depth_live -- BTCUSDT ETHUSDT
//! ```

use book_sync::config::Environment;
use book_sync::orderbook::SyncEvent;
use book_sync::{Config, DepthClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut symbols: Vec<String> = std::env::args().skip(1).collect();
    if symbols.is_empty() {
        symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    }
    let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();

    let environment = match std::env::var("BOOK_SYNC_ENV").as_deref() {
        Ok("testnet") => Environment::Testnet,
        _ => Environment::Production,
    };
    let config = Config::new()
        .with_environment(environment)
        .with_depth_limit(1000);
    let client = DepthClient::new(config)?;

    println!("Connecting to {} for {:?}", client.config().websocket_url(), symbols);
    let stream = client.connect_stream(&symbols).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut driver = client.driver(tx);
    let handle = tokio::spawn(async move {
        let result = driver.run(stream.into_stream()).await;
        println!("Driver stopped: {:?}", driver.synchronizer().stats());
        result
    });

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(SyncEvent::Quote(quote)) => {
                    println!(
                        "{:<10} bid {:>14} x {:<12} ask {:>14} x {:<12}",
                        quote.symbol,
                        fmt_opt(quote.bid_price()),
                        fmt_opt(quote.bid_size()),
                        fmt_opt(quote.ask_price()),
                        fmt_opt(quote.ask_size()),
                    );
                }
                Some(SyncEvent::Trade(trade)) => {
                    println!("{:<10} trade {} @ {}", trade.symbol, trade.quantity, trade.price);
                }
                Some(SyncEvent::Warning(warning)) => {
                    eprintln!("{:<10} WARNING {}", warning.symbol, warning.message);
                }
                Some(SyncEvent::Removed(symbol)) => {
                    eprintln!("{:<10} removed", symbol);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
        }
    }

    handle.abort();
    Ok(())
}

fn fmt_opt(value: Option<rust_decimal::Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
