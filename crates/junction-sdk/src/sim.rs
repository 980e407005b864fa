//! HTTP client for the simulation engine's query API.

use junction_core::models::{
    ApproachingTrafficResponse, EdgeTrafficResponse, NodeId, PassageResponse, SimStatus,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("simulation unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Worth retrying later, as opposed to a request that will never succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::NotFound(_) => false,
            ClientError::Unavailable(_) | ClientError::Http(_) => true,
            ClientError::Status { status, .. } => status.is_server_error(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct SimClient {
    base_url: String,
    client: reqwest::Client,
}

impl SimClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn traffic(&self, cluster_id: u32) -> Result<EdgeTrafficResponse, ClientError> {
        self.get(&format!("/traffic/{}", cluster_id)).await
    }

    pub async fn approaching(&self, node: NodeId) -> Result<ApproachingTrafficResponse, ClientError> {
        self.get(&format!("/approaching_traffic/{}", node)).await
    }

    pub async fn passed_through(&self, node: NodeId) -> Result<PassageResponse, ClientError> {
        self.get(&format!("/passed_through_node_count/{}", node)).await
    }

    pub async fn status(&self) -> Result<SimStatus, ClientError> {
        self.get("/status").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| path.to_string());
        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::SERVICE_UNAVAILABLE => ClientError::Unavailable(message),
            status => ClientError::Status { status, url },
        })
    }
}
