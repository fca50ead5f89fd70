use anyhow::Context;
use clap::Parser;
use fluxnetes::cli::{Cli, Commands};
use fluxnetes::config;
use fluxnetes::scheduler::Engine;
use log::info;

/// The daemon hosts the engine's background tasks (job queue workers, the
/// periodic scheduling pass, the façade reconciler). Pod ingestion and the
/// façade's `PreFilter`/`Filter` hooks are the orchestrator's integration
/// points: this binary does not expose them over the network,
/// it just keeps `Engine` running until told to stop.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Start { config } => {
            let cfg = config::load_config(
                config
                    .to_str()
                    .context("config path is not valid UTF-8")?,
            )?;

            let mut engine = Engine::try_new(&cfg)
                .await
                .context("failed to build the fluxnetes engine")?;
            engine
                .run()
                .await
                .context("failed to start the fluxnetes engine")?;
            info!("fluxnetes started, store endpoints: {:?}", cfg.store_endpoints);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("shutting down");
            engine.shutdown().await;
        }
    }

    Ok(())
}
