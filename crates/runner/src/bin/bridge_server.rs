use anyhow::Context;
use bridge_runner::{BridgeServer, PaperBroker, PaperConfig, load_from_env};
use log::info;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_from_env().context("loading bridge configuration")?;
    let paper = PaperBroker::new(PaperConfig::default());
    let server = BridgeServer::start(
        &config,
        Arc::new(paper.clone()),
        Arc::new(paper.clone()),
        Arc::new(paper.clone()),
    )
    .context("starting bridge server")?;

    info!("Serving on {}, Ctrl+C to stop", server.address());
    tokio::signal::ctrl_c().await?;

    server.stop().await;
    paper.stop();
    Ok(())
}
