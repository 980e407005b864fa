//! Junction Controller - trust-weighted priority for one intersection

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use junction_controller::{Controller, ControllerConfig};
use junction_core::config::{load_json_with_retry, WaitPolicy};
use junction_core::shutdown_signal;

#[derive(Parser, Debug)]
#[command(name = "junction-controller")]
#[command(about = "Intersection controller for the junction testbed")]
struct Args {
    /// Controller configuration file
    #[arg(short, long, default_value = "/etc/junction/controller.json")]
    config: PathBuf,

    /// Override the simulation engine URL
    #[arg(long)]
    sim_url: Option<String>,

    /// Override the report directory
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Stop once this file exists
    #[arg(long)]
    ending_marker: Option<PathBuf>,

    /// Seconds to wait for the configuration file to appear
    #[arg(long, default_value_t = 30.0)]
    config_wait: f64,
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::from_default_env().add_directive("junction_controller=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("JUNCTION_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut config: ControllerConfig =
        load_json_with_retry(&args.config, WaitPolicy::from_secs(args.config_wait, 0.5))
            .await
            .with_context(|| format!("no usable controller config at {}", args.config.display()))?;
    if let Some(sim_url) = args.sim_url {
        config.sim_url = sim_url;
    }
    if let Some(report_dir) = args.report_dir {
        config.report_dir = report_dir;
    }
    if args.ending_marker.is_some() {
        config.ending_marker = args.ending_marker;
    }
    config.validate()?;

    let controller = Controller::new(config)?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let report = controller.run(shutdown_rx).await;
    tracing::info!(
        "Controller for node {} stopped: {}/{} cycles correct ({:.1}%)",
        report.node_id,
        report.cycles_correct,
        report.cycles_evaluated,
        report.success_ratio * 100.0
    );
    Ok(())
}
