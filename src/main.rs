use assetgraph::{CliArgs, LoggingConfig, ServerConfig, init_logging, run_server, shutdown_telemetry};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_logging(LoggingConfig::from_env())?;

    let config = ServerConfig::from_args(CliArgs::parse())?;
    let result = run_server(config).await;

    shutdown_telemetry();
    result
}
