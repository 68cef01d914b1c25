use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use simnix_kernel::scheduler::Kernel;
use simnix_shared::config::{self, KernelConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simnix-kernel", about = "simnix kernel scheduler")]
struct Args {
    /// Path to the kernel config JSON file.
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
    let mut cfg: KernelConfig = config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if cfg.resources.len() != cfg.resource_instances.len() {
        bail!(
            "config lists {} resources but {} instance counts",
            cfg.resources.len(),
            cfg.resource_instances.len()
        );
    }

    info!(
        port = cfg.port,
        policy = ?cfg.policy,
        quantum = cfg.quantum,
        multiprogramming = cfg.multiprogramming,
        "kernel starting"
    );

    let kernel = Kernel::new(&cfg);
    tokio::spawn(kernel.clone().run_scheduler());
    simnix_kernel::server::run(cfg, kernel).await
}
