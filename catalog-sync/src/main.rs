use anyhow::Result;
use catalog_sync::cli::{run, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("catalog-sync startup, tracing initialised");

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("catalog-sync completed successfully"),
        Err(e) => tracing::error!(error = %e, "catalog-sync exited with error"),
    }
    result
}
