use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::warn;
use uuid::Uuid;

use crate::{config::StorageConfig, envelope::Output, error::ServiceError, model::Artifact};

/// Accepts bytes and returns a URL they can be fetched from.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<String, ServiceError>;
}

/// Uploads with a plain HTTP `PUT {upload_url}/{key}`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    upload_url: String,
    public_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ServiceError> {
        let mut request = self
            .client
            .put(format!("{}/{key}", self.upload_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(format!("{}/{key}", self.public_url))
    }
}

/// Result of persisting an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    pub output: Output,
    /// Why the artifact was inlined instead of uploaded.
    pub fallback: Option<String>,
}

/// Persists artifacts, degrading to inline base64 whenever the object store is
/// absent or fails. Never fails itself.
pub struct ArtifactStore {
    store: Option<Arc<dyn ObjectStore>>,
    prefix: String,
}

impl ArtifactStore {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn inline_only() -> Self {
        Self::new(None, "")
    }

    pub fn object_key(&self, operation: &str, extension: &str) -> String {
        let name = format!("{operation}/{}.{extension}", Uuid::new_v4());
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{name}", self.prefix)
        }
    }

    pub async fn persist(&self, operation: &str, artifact: &Artifact) -> Persisted {
        let Some(store) = &self.store else {
            return Persisted {
                output: Output::Inline(STANDARD.encode(&artifact.bytes)),
                fallback: None,
            };
        };

        let key = self.object_key(operation, artifact.format.extension);
        match store
            .put(&key, artifact.bytes.clone(), artifact.format.content_type)
            .await
        {
            Ok(url) => Persisted {
                output: Output::Url(url),
                fallback: None,
            },
            Err(err) => {
                warn!(operation, key = %key, error = %err, "upload failed, returning inline output");
                Persisted {
                    output: Output::Inline(STANDARD.encode(&artifact.bytes)),
                    fallback: Some(err.to_string()),
                }
            }
        }
    }
}
