use std::path::PathBuf;

use clap::Parser;
use simnix_shared::config::{self, CpuConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simnix-cpu", about = "simnix execution engine")]
struct Args {
    /// Path to the CPU config JSON file.
    #[arg(long)]
    config: PathBuf,
    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut cfg: CpuConfig = config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.port = port;
    }

    info!(port = cfg.port, memory = %cfg.memory, "cpu starting");
    simnix_cpu::server::run(cfg).await
}
