//! catalog-harvester binary entry point

use catalog_harvester::cli::{self, Cli};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("catalog_harvester=info"));

    // LOG_FORMAT=json switches to structured output for log aggregation.
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = cli::run(&cli).await {
        error!(error = %e, "run failed");
        std::process::exit(1);
    }
}
