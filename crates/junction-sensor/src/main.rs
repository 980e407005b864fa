//! Junction Sensor - serves one edge's traffic reading over TCP

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use junction_core::config::{load_json_with_retry, WaitPolicy};
use junction_core::shutdown_signal;
use junction_sensor::config::SensorConfig;
use junction_sensor::Sensor;

#[derive(Parser, Debug)]
#[command(name = "junction-sensor")]
#[command(about = "Edge traffic sensor for the junction testbed")]
struct Args {
    /// Sensor configuration file
    #[arg(short, long, default_value = "/etc/junction/sensor.json")]
    config: PathBuf,

    /// Override the simulation engine URL
    #[arg(long)]
    sim_url: Option<String>,

    /// Override the listen address
    #[arg(long)]
    listen: Option<String>,

    /// Seconds to wait for the configuration file to appear
    #[arg(long, default_value_t = 30.0)]
    config_wait: f64,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("junction_sensor=debug".parse()?);
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

    let mut config: SensorConfig =
        load_json_with_retry(&args.config, WaitPolicy::from_secs(args.config_wait, 0.5))
            .await
            .with_context(|| format!("no usable sensor config at {}", args.config.display()))?;
    if let Some(sim_url) = args.sim_url {
        config.sim_url = sim_url;
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    config.validate()?;

    let sensor = Sensor::bind(config).await?;
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    sensor.run(&shutdown_tx).await?;
    tracing::info!("Sensor stopped");
    Ok(())
}
