//! Document store that delegates to a relay agent over HTTP.
//!
//! Used when the search roots and import folder live on another host.
//! Every call carries the shared bearer token.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::DocumentStore;
use crate::core::safety::{truncate_chars, MAX_RESPONSE_EXCERPT};
use crate::core::StepError;
use crate::domain::{
    content_digest, DocumentSource, Identifier, LocatedDocument, OutputBackup, StagedDocument,
    StagingRequest,
};
use crate::relay::protocol::{
    FetchXmlNotFound, FetchXmlResponse, HealthResponse, WriteCsvRequest, WriteCsvResponse,
    WriteXmlRequest, WriteXmlResponse,
};

/// Default relay request timeout in seconds
pub const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 30;

const TARGET: &str = "relay";

/// HTTP client for the relay agent
#[derive(Debug, Clone)]
pub struct RelayHttpStore {
    client: Client,
    base_url: Url,
    token: String,
    timeout: Duration,
}

impl RelayHttpStore {
    /// Create a relay store for `base_url` authenticated with `token`
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid relay URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Relay URL cannot be used as a base: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build relay HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send_error(&self, error: reqwest::Error) -> StepError {
        if error.is_timeout() {
            StepError::NetworkTimeout {
                target: TARGET.to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            StepError::Unreachable {
                target: TARGET.to_string(),
                reason: error.to_string(),
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StepError> {
        response.json::<T>().await.map_err(|e| StepError::Protocol {
            target: TARGET.to_string(),
            reason: e.to_string(),
        })
    }

    async fn unexpected(response: reqwest::Response) -> StepError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => StepError::RelayUnauthorized,
            _ => StepError::RelayStatus {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_RESPONSE_EXCERPT),
            },
        }
    }

    /// `GET /fetch-xml/{code}`
    pub async fn fetch(&self, code: &str) -> Result<FetchXmlResponse, StepError> {
        let url = self.endpoint(&["fetch-xml", code]);
        debug!(%url, "Fetching document from relay");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        match response.status() {
            StatusCode::OK => Self::decode(response).await,
            StatusCode::NOT_FOUND => {
                let body: FetchXmlNotFound = Self::decode(response).await.unwrap_or_default();
                let filename = if body.filename.is_empty() {
                    format!("{}.xml", code)
                } else {
                    body.filename
                };
                Err(StepError::NotFound {
                    filename,
                    searched_paths: body.searched_paths,
                })
            }
            StatusCode::FORBIDDEN => {
                warn!(target: "security", code, "Relay refused path outside its roots");
                Err(StepError::PathTraversal {
                    requested: code.to_string(),
                    root: self.base_url.to_string(),
                })
            }
            StatusCode::BAD_REQUEST => Err(StepError::InvalidIdentifier {
                raw: code.to_string(),
            }),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, StepError> {
        let response = self
            .client
            .post(self.endpoint(&[endpoint]))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        match response.status() {
            StatusCode::OK => Self::decode(response).await,
            _ => Err(Self::unexpected(response).await),
        }
    }

    /// `POST /write-xml`
    pub async fn write_xml(&self, filename: &str, content: &str) -> Result<WriteXmlResponse, StepError> {
        let request = WriteXmlRequest {
            filename: filename.to_string(),
            content: content.to_string(),
        };

        self.post("write-xml", &request).await.map_err(|e| match e {
            StepError::RelayStatus { status: 400, .. } => StepError::InvalidFilename(filename.to_string()),
            other => other,
        })
    }

    /// `POST /write-csv`
    pub async fn write_csv(&self, csv_content: &str) -> Result<WriteCsvResponse, StepError> {
        let request = WriteCsvRequest {
            csv_content: csv_content.to_string(),
        };
        self.post("write-csv", &request).await
    }
}

#[async_trait]
impl DocumentStore for RelayHttpStore {
    fn name(&self) -> &str {
        "relay"
    }

    async fn locate(&self, identifier: &Identifier) -> Result<LocatedDocument, StepError> {
        let fetched = self.fetch(identifier.as_str()).await?;
        if !fetched.found {
            return Err(StepError::Protocol {
                target: TARGET.to_string(),
                reason: "200 response without a document".to_string(),
            });
        }

        info!(
            code = %identifier,
            root_index = fetched.path_number,
            path = %fetched.path,
            "Document located via relay"
        );

        Ok(LocatedDocument {
            identifier: identifier.clone(),
            filename: fetched.filename,
            root_index: fetched.path_number,
            location: fetched.path,
            size_bytes: fetched.size_bytes,
            sha256: content_digest(fetched.content.as_bytes()),
            source: DocumentSource::Inline(fetched.content),
        })
    }

    async fn stage(&self, request: StagingRequest<'_>) -> Result<StagedDocument, StepError> {
        let document = request.document;
        let content = match &document.source {
            DocumentSource::Inline(content) => content.clone(),
            DocumentSource::Path(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| StepError::io(format!("Cannot read {}", path.display()), e))?,
        };

        let written = self.write_xml(&document.filename, &content).await?;

        let backup = match &written.backup {
            Some(backup) => OutputBackup::Created {
                backup: backup.clone(),
                source: written.path.clone(),
            },
            None => OutputBackup::Skipped,
        };

        let csv_path = match request.csv_content {
            Some(csv) => Some(self.write_csv(csv).await?.path),
            None => None,
        };

        info!(destination = %written.path, "Document staged via relay");

        Ok(StagedDocument {
            destination: written.path,
            sha256: content_digest(content.as_bytes()),
            backup,
            csv_path,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint(&["health"]))
            .send()
            .await
            .with_context(|| format!("Relay at {} is unreachable", self.base_url))?;

        if !response.status().is_success() {
            anyhow::bail!("Relay health check returned HTTP {}", response.status());
        }

        let health: HealthResponse = response
            .json()
            .await
            .context("Relay health response is not valid JSON")?;
        debug!(hostname = %health.hostname, version = %health.version, "Relay is healthy");
        Ok(())
    }
}
