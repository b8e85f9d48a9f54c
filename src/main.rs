//! Bomber Arena Server
//!
//! Loads the map, then serves the arena until Ctrl-C.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bomber::{GameConfig, GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Bomber Server v{}", VERSION);
    info!("Tick Rate: {} Hz", config.tick_rate);

    let world = bomber::network::load_world(&config, GameConfig::default())
        .with_context(|| format!("loading map {}", config.map_path.display()))?;
    info!("Spawn slots: {}", world.free_slot_count());

    let server = GameServer::new(config);
    let run = server.run(world);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result.context("server stopped"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    run.await.context("server stopped")?;
    Ok(())
}
