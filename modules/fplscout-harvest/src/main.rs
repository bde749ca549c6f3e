use std::env;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fplscout_common::Config;
use fplscout_common::RunConfig;
use fplscout_harvest::harvest::Harvester;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fplscout=info".parse()?)
                .add_directive("fplscout_harvest=info".parse()?)
                .add_directive("fpl_client=info".parse()?),
        )
        .init();

    info!("FPL Scout harvester starting...");

    let config = Config::from_env();
    config.log_redacted();

    let run_config_path =
        PathBuf::from(env::var("HARVEST_CONFIG").unwrap_or_else(|_| "harvest.json".to_string()));
    let run_config = RunConfig::load(&run_config_path)?;
    info!(path = %run_config_path.display(), "Run configuration loaded");

    let harvester = Harvester::new(config, run_config)?;

    // Ctrl-C stops issuing new fetches; in-flight work drains and the
    // partial datasets plus the manifest still get written.
    let cancel = harvester.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, draining in-flight jobs");
            cancel.cancel();
        }
    });

    let stats = harvester.run().await?;
    info!("Harvest run complete. {stats}");

    Ok(())
}
