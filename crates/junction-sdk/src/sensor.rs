//! Client side of the sensor line protocol.

use junction_core::protocol::{ProtocolError, SensorResponse, GET_TRAFFIC, MAX_LINE_BYTES};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor {addr} timed out")]
    Timeout { addr: String },

    #[error("sensor {addr} i/o error: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sensor {addr} sent a bad reply: {source}")]
    Protocol {
        addr: String,
        #[source]
        source: ProtocolError,
    },
}

/// Queries one sensor. Each query opens a fresh connection.
#[derive(Debug, Clone)]
pub struct SensorClient {
    addr: String,
    timeout: Duration,
}

impl SensorClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `GET_TRAFFIC` and decode the reply. The whole exchange,
    /// connect included, must finish within the client's timeout.
    pub async fn query(&self) -> Result<SensorResponse, SensorError> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout {
                addr: self.addr.clone(),
            }),
        }
    }

    async fn exchange(&self) -> Result<SensorResponse, SensorError> {
        let io = |source| SensorError::Io {
            addr: self.addr.clone(),
            source,
        };

        let mut stream = TcpStream::connect(&self.addr).await.map_err(io)?;
        stream
            .write_all(format!("{}\n", GET_TRAFFIC).as_bytes())
            .await
            .map_err(io)?;

        let mut reader = BufReader::new(stream).take(MAX_LINE_BYTES as u64);
        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(io)?;

        SensorResponse::parse(&line).map_err(|source| SensorError::Protocol {
            addr: self.addr.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn one_shot_server(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut line = String::new();
            BufReader::new(read).read_line(&mut line).await.unwrap();
            assert_eq!(line, "GET_TRAFFIC\n");
            write.write_all(reply.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn reads_reading() {
        let addr = one_shot_server("TRAFFIC=12;PRIORITY=true\n").await;
        let client = SensorClient::new(addr, Duration::from_secs(1));
        assert_eq!(
            client.query().await.unwrap(),
            SensorResponse::Reading {
                traffic: 12,
                priority: true
            }
        );
    }

    #[tokio::test]
    async fn reads_failure_sentinel() {
        let addr = one_shot_server("TRAFFIC=-1;PRIORITY=false\n").await;
        let client = SensorClient::new(addr, Duration::from_secs(1));
        assert_eq!(client.query().await.unwrap(), SensorResponse::Failure);
    }

    #[tokio::test]
    async fn garbage_is_protocol_error() {
        let addr = one_shot_server("HELLO\n").await;
        let client = SensorClient::new(addr, Duration::from_secs(1));
        assert!(matches!(
            client.query().await,
            Err(SensorError::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn silent_sensor_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client = SensorClient::new(addr, Duration::from_millis(100));
        assert!(matches!(
            client.query().await,
            Err(SensorError::Timeout { .. })
        ));
    }
}
