//! TCP side of the sensor: one request line in, one reply line out.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::noise::NoiseModel;
use crate::poller::{CachedReading, ReadingCache};
use junction_core::backoff::Backoff;
use junction_core::protocol::{SensorRequest, SensorResponse, MAX_LINE_BYTES};

/// Bind `addr`, retrying on failure until `backoff` gives up.
pub async fn bind_with_retry(addr: &str, mut backoff: Backoff) -> io::Result<TcpListener> {
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!("Bound {} on attempt {}", addr, backoff.attempts() + 1);
                return Ok(listener);
            }
            Err(err) => match backoff.fail() {
                Some(delay) => {
                    tracing::warn!(
                        "Bind attempt {} on {} failed: {}; retrying in {:?}",
                        backoff.attempts(),
                        addr,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!("Giving up on {} after {} attempts: {}", addr, backoff.attempts(), err);
                    return Err(err);
                }
            },
        }
    }
}

/// What a connection handler needs to answer.
pub struct Responder {
    cache: Arc<ReadingCache>,
    noise: Option<NoiseModel>,
    rng: Mutex<StdRng>,
    read_timeout: Duration,
}

impl Responder {
    pub fn new(cache: Arc<ReadingCache>, noise: Option<NoiseModel>, read_timeout: Duration) -> Self {
        Self {
            cache,
            noise,
            rng: Mutex::new(StdRng::from_os_rng()),
            read_timeout,
        }
    }

    /// Deterministic noise for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Reply for the current cache contents.
    pub fn respond(&self, request: SensorRequest) -> SensorResponse {
        if request != SensorRequest::GetTraffic {
            return SensorResponse::UnknownRequest;
        }
        match self.cache.current() {
            CachedReading::Ready { traffic, priority } => {
                let (traffic, priority) = match &self.noise {
                    Some(noise) => match self.rng.lock() {
                        Ok(mut rng) => noise.apply(&mut *rng, traffic, priority),
                        Err(poisoned) => noise.apply(&mut *poisoned.into_inner(), traffic, priority),
                    },
                    None => (traffic, priority),
                };
                SensorResponse::reading(traffic, priority)
            }
            CachedReading::Pending | CachedReading::Failed => SensorResponse::Failure,
        }
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read).take(MAX_LINE_BYTES as u64);
        let mut line = String::new();

        match tokio::time::timeout(self.read_timeout, reader.read_line(&mut line)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::warn!("Read from {} failed: {}", peer, err);
                return;
            }
            Err(_) => {
                tracing::debug!("Connection from {} timed out", peer);
                return;
            }
        }

        let request = SensorRequest::parse(&line);
        if request == SensorRequest::Unknown {
            tracing::warn!("Unknown request from {}: {:?}", peer, line.trim());
        }
        let response = self.respond(request);
        if let Err(err) = write.write_all(response.encode().as_bytes()).await {
            tracing::warn!("Reply to {} failed: {}", peer, err);
            return;
        }
        let _ = write.shutdown().await;
        tracing::debug!("Answered {} with {:?}", peer, response);
    }
}

/// Accept connections until shutdown, one task per connection.
pub async fn serve(
    listener: TcpListener,
    responder: Arc<Responder>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Sensor server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let responder = responder.clone();
                    tokio::spawn(async move { responder.handle(stream, peer).await });
                }
                Err(err) => tracing::warn!("Accept failed: {}", err),
            },
        }
    }
}
