//! R0N ELB binary entry point.

use clap::Parser;
use r0n_elb::config::ConfigLoader;
use r0n_elb::logging;
use r0n_elb::module::{ModuleConfig, ModuleContract};
use r0n_elb::modules::load_balancer::LoadBalancer;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// L4/L7 load balancer.
#[derive(Debug, Parser)]
#[command(name = "r0n-elb", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "r0n-elb.toml")]
    config: PathBuf,

    /// Log filter directive, e.g. `debug` or `r0n_elb=trace`. Overrides
    /// `RUST_LOG` and the configured level.
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConfigLoader::new().load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("r0n-elb: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = logging::init(&config.logging, cli.log_level.as_deref()) {
        eprintln!("r0n-elb: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = ConfigLoader::standard().validate(&config) {
        error!(path = %cli.config.display(), error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }
    if cli.check {
        info!(path = %cli.config.display(), "Configuration is valid");
        return ExitCode::SUCCESS;
    }

    let mut balancer = match LoadBalancer::from_config(config) {
        Ok(balancer) => balancer,
        Err(e) => {
            error!(error = %e, "Failed to build load balancer");
            return ExitCode::FAILURE;
        },
    };

    info!(version = env!("CARGO_PKG_VERSION"), name = %balancer.name(), "Starting r0n-elb");
    if let Err(e) = balancer.start() {
        error!(error = %e, "Failed to start load balancer");
        return ExitCode::FAILURE;
    }

    if let Err(e) = run(&mut balancer, &cli.config).await {
        error!(error = %e, "Signal handling failed");
    }

    if let Err(e) = balancer.stop() {
        warn!(error = %e, "Stop failed");
    }
    ExitCode::SUCCESS
}

/// Serve until SIGINT or SIGTERM. SIGHUP reloads the configuration file.
#[cfg(unix)]
async fn run(balancer: &mut LoadBalancer, path: &std::path::Path) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Terminated, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!(path = %path.display(), "Reloading configuration");
                if let Err(e) = balancer.reload(ModuleConfig::from_path(path)) {
                    warn!(error = %e, "Reload failed");
                }
            }
        }
    }
}

/// Serve until Ctrl-C.
#[cfg(not(unix))]
async fn run(_balancer: &mut LoadBalancer, _path: &std::path::Path) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    Ok(())
}
