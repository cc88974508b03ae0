//! Connects to a running bridge server, subscribes to a code and drives one
//! market order through a local order manager.
//!
//! Usage: `bridge-client [code] [qty]`

use anyhow::Context;
use bridge_core::Side;
use bridge_order_manager::{NewOrder, OrderLifecycleManager, SubmissionThrottler};
use bridge_runner::{BridgeClient, PipeExecutor, load_from_env};
use bridge_ports::BrokerExecutor;
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let code = args.next().unwrap_or_else(|| "005930".to_string());
    let qty: u64 = match args.next() {
        Some(raw) => raw.parse().context("qty must be a positive integer")?,
        None => 1,
    };

    let config = load_from_env().context("loading bridge configuration")?;
    let client = BridgeClient::new(config.pipe.clone())?;
    client.start();
    client
        .wait_connected(Duration::from_millis(config.pipe.connect_timeout_ms))
        .await
        .context("waiting for the bridge server")?;

    let rtt = client.heartbeat().await?;
    info!("Connected, heartbeat round trip {:?}", rtt);
    client.subscribe(&[code.as_str()]).await?;

    let executor = Arc::new(PipeExecutor::new(client.clone()));
    let events = executor.event_stream();
    let manager = Arc::new(OrderLifecycleManager::new(
        executor,
        Arc::new(SubmissionThrottler::new(&config.throttle)),
        config.orders.clone(),
    ));
    let event_loop = manager.spawn_event_loop(events);

    let client_order_id = manager
        .submit(NewOrder::market(code.as_str(), Side::Buy, qty))
        .await?;
    let order = manager
        .wait_for_terminal(&client_order_id, Duration::from_secs(10))
        .await?;
    println!("{}", serde_json::to_string_pretty(&order)?);

    event_loop.abort();
    client.stop().await;
    Ok(())
}
