//! HTTP metadata client talking to the namespace proxy.
//!
//! The proxy fronts the meta2 services of a namespace with a JSON API:
//! `content/locate` lists the chunks of a content, `container/raw_insert` and
//! `container/raw_update` write chunk beans without touching the rest of the
//! content.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::{ChunkPosition, MetadataRecord};
use crate::client::MetadataClient;
use crate::context::ScanContext;
use crate::error::{MetaError, MetaResult};

const API_VERSION: &str = "v3.0";

/// Chunk as listed by `content/locate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedChunk {
    /// Chunk URL.
    pub url: String,
    /// Position, `M` or `M.S`.
    pub pos: String,
    /// Size in bytes.
    pub size: u64,
    /// Checksum.
    #[serde(default)]
    pub hash: Option<String>,
}

/// Chunk bean accepted by `raw_insert` and `raw_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBean {
    /// Always `"chunk"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Chunk URL.
    pub id: String,
    /// Checksum, empty when unknown.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Position, `M` or `M.S`.
    pub pos: String,
    /// Content id.
    pub content: String,
}

impl From<&MetadataRecord> for ChunkBean {
    fn from(record: &MetadataRecord) -> Self {
        Self {
            kind: "chunk".to_string(),
            id: record.location.clone(),
            hash: record.hash.clone().unwrap_or_default(),
            size: record.size,
            pos: record.position.to_string(),
            content: record.content_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UpdateBody {
    old: Vec<ChunkBean>,
    new: Vec<ChunkBean>,
}

/// Extracts the chunk id from a chunk URL (its last path segment).
pub fn chunk_id_from_url(url: &str) -> Option<String> {
    let path = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let (_, id) = path.split_once('/')?;
    let id = id.rsplit('/').next()?.split(['?', '#']).next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_ascii_uppercase())
    }
}

/// Converts a located chunk into a record of `container_id`/`content_id`.
pub fn record_from_located(container_id: &str, content_id: &str, chunk: LocatedChunk) -> MetaResult<MetadataRecord> {
    let chunk_id = chunk_id_from_url(&chunk.url)
        .ok_or_else(|| MetaError::Protocol(format!("chunk url without id: {}", chunk.url)))?;
    let position: ChunkPosition = chunk
        .pos
        .parse()
        .map_err(|e| MetaError::Protocol(format!("chunk {chunk_id}: {e}")))?;
    Ok(MetadataRecord {
        container_id: container_id.to_string(),
        content_id: content_id.to_string(),
        chunk_id,
        location: chunk.url,
        size: chunk.size,
        position,
        hash: chunk.hash.filter(|h| !h.is_empty()).map(|h| h.to_ascii_uppercase()),
    })
}

/// Maps a non-success HTTP status to a metadata error.
pub fn status_error(status: StatusCode, what: &str, body: &str) -> MetaError {
    let reason = if body.trim().is_empty() {
        format!("{what}: HTTP {status}")
    } else {
        format!("{what}: HTTP {status}: {}", body.trim())
    };
    match status {
        StatusCode::NOT_FOUND => MetaError::NotFound { what: reason },
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => MetaError::PermissionDenied { reason },
        StatusCode::CONFLICT => MetaError::Conflict {
            chunk_id: what.to_string(),
            reason,
        },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            MetaError::ServiceUnavailable { reason }
        }
        s if s.is_server_error() => MetaError::ServiceUnavailable { reason },
        _ => MetaError::Protocol(reason),
    }
}

fn transport_error(err: reqwest::Error) -> MetaError {
    if err.is_decode() {
        MetaError::Protocol(err.to_string())
    } else {
        MetaError::ServiceUnavailable {
            reason: err.to_string(),
        }
    }
}

/// [`MetadataClient`] backed by the namespace proxy.
#[derive(Debug, Clone)]
pub struct ProxyMetadataClient {
    http: Client,
    base: String,
}

impl ProxyMetadataClient {
    /// Creates a client for the namespace of `ctx` behind `proxy_url`.
    pub fn new(ctx: &ScanContext, proxy_url: &str, timeout: Duration) -> MetaResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetaError::Protocol(format!("cannot build HTTP client: {e}")))?;
        let root = if proxy_url.contains("://") {
            proxy_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", proxy_url.trim_end_matches('/'))
        };
        Ok(Self {
            http,
            base: format!("{}/{}/{}", root, API_VERSION, ctx.namespace()),
        })
    }

    /// Base URL of namespace requests.
    pub fn base(&self) -> &str {
        &self.base
    }

    async fn check(response: reqwest::Response, what: &str) -> MetaResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    async fn post_beans<B: Serialize + ?Sized>(&self, action: &str, container_id: &str, what: &str, body: &B) -> MetaResult<()> {
        let url = format!("{}/container/{}", self.base, action);
        debug!(%url, cid = container_id, what, "proxy request");
        let response = self
            .http
            .post(&url)
            .query(&[("cid", container_id)])
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response, what).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataClient for ProxyMetadataClient {
    async fn lookup(&self, container_id: &str, content_id: &str) -> MetaResult<Vec<MetadataRecord>> {
        let url = format!("{}/content/locate", self.base);
        debug!(%url, cid = container_id, content = content_id, "proxy request");
        let response = self
            .http
            .get(&url)
            .query(&[("cid", container_id), ("content", content_id)])
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check(response, content_id).await?;
        let chunks: Vec<LocatedChunk> = response.json().await.map_err(transport_error)?;
        chunks
            .into_iter()
            .map(|c| record_from_located(container_id, content_id, c))
            .collect()
    }

    async fn insert(&self, record: &MetadataRecord) -> MetaResult<()> {
        let beans = [ChunkBean::from(record)];
        self.post_beans("raw_insert", &record.container_id, &record.chunk_id, &beans[..])
            .await
    }

    async fn update(&self, record: &MetadataRecord) -> MetaResult<()> {
        let current = self
            .lookup(&record.container_id, &record.content_id)
            .await?
            .into_iter()
            .find(|r| r.chunk_id.eq_ignore_ascii_case(&record.chunk_id))
            .ok_or_else(|| MetaError::NotFound {
                what: format!("chunk {}", record.chunk_id),
            })?;
        let body = UpdateBody {
            old: vec![ChunkBean::from(&current)],
            new: vec![ChunkBean::from(record)],
        };
        self.post_beans("raw_update", &record.container_id, &record.chunk_id, &body)
            .await
    }
}
