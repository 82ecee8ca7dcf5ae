use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rv_catalog::{CatalogApp, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rv_catalog=info")),
        )
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let app = CatalogApp::from_config(config).await?;
    let local = app.start().await?;
    info!("Interactive with {} local items", local.len());

    app.loader().wait_for_background().await;

    let state = app.loader().loading_state().await;
    let metrics = app.loader().metrics().await;
    info!(
        "Cycle {} finished in phase {} ({} items, mode {})",
        state.cycle,
        state.phase,
        state.unified.count,
        state.mode.as_str()
    );
    if let Some(tti) = metrics.time_to_interactive {
        info!("Time to interactive: {:?}", tti);
    }
    for entry in &state.errors {
        warn!(
            "{} during {}: {} (recoverable: {}, rollback: {})",
            entry.context, entry.phase, entry.message, entry.recoverable, entry.rollback_performed
        );
    }

    println!("{}", serde_json::to_string_pretty(&state)?);

    app.shutdown().await;
    Ok(())
}
