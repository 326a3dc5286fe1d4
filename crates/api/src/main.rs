//! Gaze Proctor - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, AppConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.server).context("failed to initialize logging")?;

    info!("=== Gaze Proctor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Flagging after {} ms away, {} evidence images per streak, malpractice above {} flagged frames",
        config.gaze.away_threshold_ms, config.gaze.evidence_cap, config.evaluation.malpractice_threshold
    );

    run_server(config).await.context("server stopped")?;
    Ok(())
}
