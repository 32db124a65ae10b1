//! Object storage collaborator: downloading uploaded source files by reference.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::config::get_config;

/// Errors raised while fetching source files from object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage service could not be reached.
    #[error("Object storage unreachable: {0}")]
    Unreachable(String),
    /// The referenced file does not exist in the bucket.
    #[error("File not found in object storage: {0}")]
    NotFound(String),
    /// Storage responded with an unexpected status code.
    #[error("Unexpected object storage response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the storage service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Interface to the external object store holding uploaded documents.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Download the raw bytes of a stored file.
    async fn download(&self, file_ref: &str) -> Result<Vec<u8>, StorageError>;
}

/// HTTP-backed object storage client.
///
/// Issues `GET {base_url}/{file_ref}` with an optional bearer token; the upload side of the
/// protocol lives in the surrounding application.
pub struct HttpObjectStorage {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpObjectStorage {
    /// Construct a client from the loaded configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(
            config.storage_base_url.clone(),
            config.storage_auth_token.clone(),
        )
    }

    /// Construct a client for an explicit endpoint.
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent("ragpipe/0.1")
            .build()
            .expect("Failed to construct reqwest::Client for object storage");
        Self {
            client,
            base_url,
            auth_token,
        }
    }

    fn endpoint(&self, file_ref: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            file_ref.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn download(&self, file_ref: &str) -> Result<Vec<u8>, StorageError> {
        let mut request = self.client.get(self.endpoint(file_ref));
        if let Some(token) = &self.auth_token
            && !token.is_empty()
        {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| StorageError::Unreachable(error.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(file_ref.to_string())),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|error| StorageError::Unreachable(error.to_string()))?;
                tracing::debug!(file_ref, bytes = bytes.len(), "Downloaded source file");
                Ok(bytes.to_vec())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::UnexpectedStatus { status, body })
            }
        }
    }
}
