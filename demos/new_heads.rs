//! Example: follow new blocks and one pending transaction across reconnects
//!
//! Reads the endpoint from the environment:
//! ```bash
//! EVMUX_API_KEY=<key> EVMUX_NETWORK=eth-mainnet cargo run --example new_heads
//! # or against a local node
//! EVMUX_WS_URL=ws://127.0.0.1:8546 cargo run --example new_heads
//! ```
//!
//! Kill the network connection for a while to watch the subscription come
//! back under the same virtual id with a new physical id.

use evmux::{ClientBuilder, ConnectionState, EndpointConfig, EventType, ExponentialBackoff};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,evmux_client=debug".into()),
        )
        .init();

    let config = EndpointConfig::from_env()?;
    println!("Connecting to {} ...", config.network);

    let client = ClientBuilder::from_endpoint(&config)?
        .with_reconnect(Box::new(
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30))
                .with_max_attempts(20),
        ))
        .connect()
        .await?;

    let heads = client
        .subscribe(EventType::NewHeads, None, |head| async move {
            println!(
                "block {} hash {}",
                head["number"].as_str().unwrap_or("?"),
                head["hash"].as_str().unwrap_or("?")
            );
        })
        .await?;
    let physical_id = heads.confirmed().await?;
    println!("newHeads: virtual id {} physical id {}", heads.id(), physical_id);

    client
        .once(EventType::NewPendingTransactions, None, |tx| async move {
            println!("first pending transaction seen: {}", tx);
        })
        .await?;

    let mut states = client.state_changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                println!("connection state: {:?}", state);
                if let ConnectionState::Failed { attempts } = state {
                    eprintln!("giving up after {} attempts", attempts);
                    return Ok(());
                }
                if state == ConnectionState::Connected {
                    println!("newHeads now bound to {:?}", heads.physical_id());
                }
            }
        }
    }

    println!("Subscriptions at exit: {:#?}", client.subscriptions().await);
    client.unsubscribe_all().await?;
    Ok(())
}
