use anyhow::Context;

use bazaar_engine::{Collaborators, Engine};
use bazaar_infra::EngineConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load().context("failed to load configuration")?;
    bazaar_observability::init_with(config.logging.format);

    let mut engine = Engine::build(config, Collaborators::in_memory()).context("failed to start engine")?;
    engine.start_jobs()?;
    tracing::info!("engine running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutdown requested");
    tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("engine shutdown panicked")?;
    Ok(())
}
