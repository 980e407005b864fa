//! Junction Sim - real-time traffic simulation with a JSON query API

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use junction_core::shutdown_signal;
use junction_sim::config::Config;
use junction_sim::state::AppState;
use junction_sim::{api, loops};

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("junction_sim=debug".parse()?);
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
    tracing::info!("Starting Junction simulation engine...");

    let config = Config::from_env();
    let port = config.port;
    let state = Arc::new(AppState::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let mut tick_loop = tokio::spawn(loops::tick_loop::run_tick_loop(
        state.clone(),
        config,
        shutdown_tx.subscribe(),
    ));

    let app: Router = api::routes().with_state(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.recv().await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        _ = shutdown_signal() => {}
        finished = &mut tick_loop => {
            // The loop only returns early when the topology never loaded.
            let _ = shutdown_tx.send(());
            let _ = server.await;
            return finished.context("tick loop panicked")?;
        }
        served = &mut server => {
            let _ = shutdown_tx.send(());
            served.context("server task panicked")?.context("server failed")?;
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(());
    tick_loop.await.context("tick loop panicked")??;
    server.await.context("server task panicked")??;
    tracing::info!("Simulation engine stopped");
    Ok(())
}
