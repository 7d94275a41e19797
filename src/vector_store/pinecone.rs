//! Pinecone REST client: control plane for index lifecycle, data plane for
//! vectors.

use super::{ChunkMetadata, IndexStats, ScoredChunk, VectorRecord, VectorStore, VectorStoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

const API_VERSION: &str = "2024-07";
const UPSERT_BATCH_SIZE: usize = 100;
const READY_POLL_ATTEMPTS: usize = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub index_name: String,
    pub controller_url: String,
    /// Data-plane host; looked up from the control plane when unset.
    pub host: Option<String>,
    pub cloud: String,
    pub region: String,
    pub namespace: String,
    pub dimension: usize,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: ServerlessSpec<'a>,
}

#[derive(Serialize)]
struct ServerlessSpec<'a> {
    serverless: CloudRegion<'a>,
}

#[derive(Serialize)]
struct CloudRegion<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "is_default_namespace")]
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "is_default_namespace")]
    namespace: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<ChunkMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    total_vector_count: u64,
}

pub struct PineconeStore {
    config: PineconeConfig,
    client: Client,
    host: RwLock<Option<String>>,
    poll_interval: Duration,
}

fn is_default_namespace(namespace: &&str) -> bool {
    namespace.is_empty()
}

/// Pinecone reports hosts without a scheme.
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn parse_matches(response: QueryResponse) -> Vec<ScoredChunk> {
    let mut chunks: Vec<ScoredChunk> = response
        .matches
        .into_iter()
        .filter_map(|m| {
            m.metadata.map(|metadata| ScoredChunk {
                id: m.id,
                score: m.score,
                metadata,
            })
        })
        .collect();
    chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    chunks
}

impl PineconeStore {
    pub fn new(config: PineconeConfig, client: Client) -> Self {
        Self {
            config,
            client,
            host: RwLock::new(None),
            poll_interval: READY_POLL_INTERVAL,
        }
    }

    /// Delay between control-plane polls while an index is created or deleted.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.config.index_name
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, VectorStoreError> {
        let resp = self.authorized(req).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            log::warn!("pinecone request failed with {}: {}", status, message);
            return Err(VectorStoreError::Api { status, message });
        }
        Ok(resp)
    }

    fn index_url(&self) -> String {
        format!("{}/indexes/{}", self.config.controller_url, self.config.index_name)
    }

    async fn describe_index(&self) -> Result<Option<IndexDescription>, VectorStoreError> {
        let resp = self
            .authorized(self.client.get(self.index_url()))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorStoreError::Api { status, message });
        }
        let description = resp
            .json::<IndexDescription>()
            .await
            .map_err(|e| VectorStoreError::Parse(e.to_string()))?;
        Ok(Some(description))
    }

    async fn create_index(&self) -> Result<(), VectorStoreError> {
        let body = CreateIndexRequest {
            name: &self.config.index_name,
            dimension: self.config.dimension,
            metric: "cosine",
            spec: ServerlessSpec {
                serverless: CloudRegion {
                    cloud: &self.config.cloud,
                    region: &self.config.region,
                },
            },
        };
        let url = format!("{}/indexes", self.config.controller_url);
        match self.send(self.client.post(url).json(&body)).await {
            Ok(_) => {
                log::info!(
                    "created Pinecone index '{}' (dimension {})",
                    self.config.index_name,
                    self.config.dimension
                );
                Ok(())
            }
            // Someone else created it first.
            Err(VectorStoreError::Api { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_until_ready(&self) -> Result<IndexDescription, VectorStoreError> {
        for _ in 0..READY_POLL_ATTEMPTS {
            if let Some(description) = self.describe_index().await? {
                if description.status.ready {
                    return Ok(description);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(VectorStoreError::NotReady(self.config.index_name.clone()))
    }

    /// Deletion finishes in the background; the index is listed as
    /// terminating until it is gone.
    async fn wait_until_deleted(&self) -> Result<(), VectorStoreError> {
        for _ in 0..READY_POLL_ATTEMPTS {
            if self.describe_index().await?.is_none() {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(VectorStoreError::NotReady(self.config.index_name.clone()))
    }

    /// Resolve and cache the data-plane host.
    async fn resolve_host(&self, create_if_missing: bool) -> Result<String, VectorStoreError> {
        if let Some(host) = self.host.read().await.as_ref() {
            return Ok(host.clone());
        }

        let mut cached = self.host.write().await;
        if let Some(host) = cached.as_ref() {
            return Ok(host.clone());
        }

        let host = match &self.config.host {
            Some(host) => normalize_host(host),
            None => {
                let description = match self.describe_index().await? {
                    Some(description) if description.status.ready => description,
                    Some(_) => self.wait_until_ready().await?,
                    None if create_if_missing => {
                        self.create_index().await?;
                        self.wait_until_ready().await?
                    }
                    None => {
                        return Err(VectorStoreError::IndexNotFound(
                            self.config.index_name.clone(),
                        ))
                    }
                };
                if description.dimension != self.config.dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: description.dimension,
                        actual: self.config.dimension,
                    });
                }
                normalize_host(&description.host)
            }
        };

        log::info!("using Pinecone index '{}' at {}", self.config.index_name, host);
        *cached = Some(host.clone());
        Ok(host)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn ensure_index(&self) -> Result<(), VectorStoreError> {
        self.resolve_host(true).await.map(|_| ())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, VectorStoreError> {
        if let Some(bad) = records.iter().find(|r| r.values.len() != self.config.dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: bad.values.len(),
            });
        }
        let host = self.resolve_host(true).await?;

        let mut upserted = 0;
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let body = UpsertRequest {
                vectors: batch,
                namespace: &self.config.namespace,
            };
            let resp = self
                .send(self.client.post(format!("{}/vectors/upsert", host)).json(&body))
                .await?;
            let data: UpsertResponse = resp
                .json()
                .await
                .map_err(|e| VectorStoreError::Parse(e.to_string()))?;
            upserted += data.upserted_count;
        }
        log::debug!("upserted {} vectors into '{}'", upserted, self.config.index_name);
        Ok(upserted)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let host = self.resolve_host(false).await?;
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: &self.config.namespace,
        };
        let resp = self
            .send(self.client.post(format!("{}/query", host)).json(&body))
            .await?;
        let data: QueryResponse = resp
            .json()
            .await
            .map_err(|e| VectorStoreError::Parse(e.to_string()))?;
        Ok(parse_matches(data))
    }

    async fn stats(&self) -> Result<IndexStats, VectorStoreError> {
        let host = self.resolve_host(false).await?;
        let resp = self
            .send(
                self.client
                    .post(format!("{}/describe_index_stats", host))
                    .json(&serde_json::json!({})),
            )
            .await?;
        let data: StatsResponse = resp
            .json()
            .await
            .map_err(|e| VectorStoreError::Parse(e.to_string()))?;
        Ok(IndexStats {
            index_name: self.config.index_name.clone(),
            dimension: data.dimension,
            total_vector_count: data.total_vector_count,
        })
    }

    async fn recreate_index(&self) -> Result<(), VectorStoreError> {
        let mut cached = self.host.write().await;
        match self.send(self.client.delete(self.index_url())).await {
            Ok(_) => log::info!("deleted Pinecone index '{}'", self.config.index_name),
            Err(VectorStoreError::Api { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }
        self.wait_until_deleted().await?;
        *cached = None;
        drop(cached);
        self.resolve_host(true).await.map(|_| ())
    }
}
