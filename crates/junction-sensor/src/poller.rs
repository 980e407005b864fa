//! Background ground-truth poller.
//!
//! One request in flight at a time. The result, success or failure, replaces
//! whatever the cache held, so a failed poll is never masked by stale data.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use junction_core::models::EdgeKey;
use junction_sdk::SimClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedReading {
    /// No poll has completed yet
    Pending,
    Ready { traffic: u32, priority: bool },
    Failed,
}

#[derive(Debug)]
pub struct ReadingCache {
    latest: Mutex<CachedReading>,
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingCache {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(CachedReading::Pending),
        }
    }

    pub fn store(&self, reading: CachedReading) {
        match self.latest.lock() {
            Ok(mut latest) => *latest = reading,
            Err(poisoned) => *poisoned.into_inner() = reading,
        }
    }

    pub fn current(&self) -> CachedReading {
        match self.latest.lock() {
            Ok(latest) => *latest,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub struct Poller {
    client: SimClient,
    cluster_id: u32,
    expected_edge: Option<EdgeKey>,
    cache: Arc<ReadingCache>,
    reported_mismatch: Option<EdgeKey>,
}

impl Poller {
    pub fn new(
        client: SimClient,
        cluster_id: u32,
        expected_edge: Option<EdgeKey>,
        cache: Arc<ReadingCache>,
    ) -> Self {
        Self {
            client,
            cluster_id,
            expected_edge,
            cache,
            reported_mismatch: None,
        }
    }

    pub async fn poll_once(&mut self) -> CachedReading {
        let reading = match self.client.traffic(self.cluster_id).await {
            Ok(response) => {
                self.check_edge(response.edge());
                CachedReading::Ready {
                    traffic: response.current_traffic_count,
                    priority: response.priority_detected,
                }
            }
            Err(err) => {
                tracing::warn!("Sensor {}: engine query failed: {}", self.cluster_id, err);
                CachedReading::Failed
            }
        };
        self.cache.store(reading);
        reading
    }

    fn check_edge(&mut self, reported: EdgeKey) {
        let Some(expected) = self.expected_edge else {
            return;
        };
        if reported == expected {
            self.reported_mismatch = None;
        } else if self.reported_mismatch != Some(reported) {
            tracing::warn!(
                "Sensor {}: engine maps this cluster to edge {}, configured edge is {}",
                self.cluster_id,
                reported,
                expected
            );
            self.reported_mismatch = Some(reported);
        }
    }

    pub async fn run(mut self, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            "Sensor {}: polling {} every {:?}",
            self.cluster_id,
            self.client.base_url(),
            period
        );
        loop {
            let started = Instant::now();
            let reading = self.poll_once().await;
            tracing::debug!("Sensor {}: cached {:?}", self.cluster_id, reading);

            let pause = period.saturating_sub(started.elapsed());
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Sensor {}: poller shutting down", self.cluster_id);
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
