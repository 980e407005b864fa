//! Sensor process: polls its edge's ground truth and serves it over TCP.

pub mod config;
pub mod noise;
pub mod poller;
pub mod server;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use config::SensorConfig;
use junction_core::backoff::Backoff;
use junction_sdk::SimClient;
use noise::NoiseModel;
use poller::{Poller, ReadingCache};
use server::Responder;

/// A bound sensor, ready to run.
pub struct Sensor {
    config: SensorConfig,
    listener: TcpListener,
    cache: Arc<ReadingCache>,
}

impl Sensor {
    /// Bind the listener, retrying per the configured bind policy.
    pub async fn bind(config: SensorConfig) -> Result<Self> {
        let backoff = Backoff::fixed(config.bind_retry()).with_max_attempts(config.bind_attempts);
        let listener = server::bind_with_retry(&config.listen_addr, backoff)
            .await
            .with_context(|| format!("could not bind {}", config.listen_addr))?;
        Ok(Self {
            config,
            listener,
            cache: Arc::new(ReadingCache::new()),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn cache(&self) -> Arc<ReadingCache> {
        self.cache.clone()
    }

    /// Run the poller and the server until `shutdown` fires.
    pub async fn run(self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let client = SimClient::new(self.config.sim_url.clone(), self.config.request_timeout())?;
        let poller = Poller::new(
            client,
            self.config.cluster_id,
            self.config.edge,
            self.cache.clone(),
        );

        let noise = self.config.noisy.then(|| NoiseModel::new(&self.config.noise));
        let responder = Arc::new(Responder::new(
            self.cache.clone(),
            noise,
            self.config.connection_timeout(),
        ));

        tracing::info!(
            "Sensor {} ({}) serving on {} (noisy: {})",
            self.config.cluster_id,
            self.config
                .edge
                .map(|e| e.label())
                .unwrap_or_else(|| "unknown edge".to_string()),
            self.config.listen_addr,
            self.config.noisy
        );

        let poll = tokio::spawn(poller.run(self.config.poll_interval(), shutdown.subscribe()));
        server::serve(self.listener, responder, shutdown.subscribe()).await;
        poll.await.context("poller panicked")?;
        Ok(())
    }
}
