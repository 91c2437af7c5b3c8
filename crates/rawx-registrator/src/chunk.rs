//! Chunk identity, metadata records and per-chunk outcomes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Position of a chunk inside its content: metachunk index plus an optional
/// sub-position for erasure-coded fragments (`"3"` or `"3.1"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkPosition {
    /// Metachunk index, 0 for the first slice of the content.
    pub metachunk: u32,
    /// Fragment index within the metachunk, if any.
    pub subchunk: Option<u32>,
}

impl ChunkPosition {
    /// Creates a plain (non-fragmented) position.
    pub fn new(metachunk: u32) -> Self {
        Self {
            metachunk,
            subchunk: None,
        }
    }

    /// Creates a fragment position.
    pub fn fragment(metachunk: u32, subchunk: u32) -> Self {
        Self {
            metachunk,
            subchunk: Some(subchunk),
        }
    }

    /// Returns true if the chunk belongs to the first metachunk.
    pub fn is_first(&self) -> bool {
        self.metachunk == 0
    }
}

impl fmt::Display for ChunkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subchunk {
            Some(sub) => write!(f, "{}.{}", self.metachunk, sub),
            None => write!(f, "{}", self.metachunk),
        }
    }
}

impl FromStr for ChunkPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (meta, sub) = match s.split_once('.') {
            Some((meta, sub)) => (meta, Some(sub)),
            None => (s, None),
        };
        let metachunk = meta
            .parse::<u32>()
            .map_err(|e| format!("invalid metachunk index {meta:?}: {e}"))?;
        let subchunk = sub
            .map(|sub| {
                sub.parse::<u32>()
                    .map_err(|e| format!("invalid sub-position {sub:?}: {e}"))
            })
            .transpose()?;
        Ok(Self {
            metachunk,
            subchunk,
        })
    }
}

/// A chunk discovered on the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Container (meta2 reference) the content belongs to.
    pub container_id: String,
    /// Content the chunk belongs to.
    pub content_id: String,
    /// Chunk identifier, the file name on the rawx volume.
    pub chunk_id: String,
    /// Position within the content.
    pub position: ChunkPosition,
    /// Physical path on the volume.
    pub path: PathBuf,
    /// Chunk size in bytes.
    pub size: u64,
    /// Chunk checksum, if recorded.
    pub hash: Option<String>,
    /// Object name of the content, if recorded.
    pub content_path: Option<String>,
    /// Content version, if recorded.
    pub content_version: Option<String>,
}

impl ChunkDescriptor {
    /// Location of this chunk as the metadata service records it.
    pub fn location(&self, service_id: &str) -> String {
        format!("http://{}/{}", service_id, self.chunk_id)
    }

    /// Builds the metadata record that would register this chunk.
    pub fn to_record(&self, service_id: &str) -> MetadataRecord {
        MetadataRecord {
            container_id: self.container_id.clone(),
            content_id: self.content_id.clone(),
            chunk_id: self.chunk_id.clone(),
            location: self.location(service_id),
            size: self.size,
            position: self.position,
            hash: self.hash.clone(),
        }
    }
}

/// The metadata service's view of one chunk of a content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Container the content belongs to.
    pub container_id: String,
    /// Content the chunk belongs to.
    pub content_id: String,
    /// Chunk identifier, unique within the content.
    pub chunk_id: String,
    /// Chunk URL on its rawx service.
    pub location: String,
    /// Chunk size in bytes.
    pub size: u64,
    /// Position within the content.
    pub position: ChunkPosition,
    /// Chunk checksum, if known.
    pub hash: Option<String>,
}

impl MetadataRecord {
    /// Compares this record with what the volume holds.
    ///
    /// Hashes are only compared when both sides carry one, ignoring case.
    pub fn agrees_with(&self, other: &MetadataRecord) -> bool {
        let hashes_agree = match (&self.hash, &other.hash) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        };
        self.location == other.location
            && self.size == other.size
            && self.position == other.position
            && hashes_agree
    }
}

/// Classification of one chunk against the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The service holds a matching record.
    Present,
    /// The service holds no record for the chunk.
    Missing,
    /// The service holds a record that differs from the volume.
    Divergent,
    /// Filtered out by policy before any service call.
    Skipped,
    /// The chunk could not be checked or acted upon.
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Present => write!(f, "present"),
            Outcome::Missing => write!(f, "missing"),
            Outcome::Divergent => write!(f, "divergent"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// Mutation applied to the metadata service for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutation {
    /// No mutating call was issued.
    None,
    /// The chunk record was inserted.
    Inserted,
    /// The chunk record was updated.
    Updated,
}

/// Result of reconciling one volume entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    /// Path of the volume entry.
    pub path: PathBuf,
    /// Chunk id, when the entry could be decoded.
    pub chunk_id: Option<String>,
    /// Final classification.
    pub outcome: Outcome,
    /// Mutation applied, if any.
    pub mutation: Mutation,
    /// Error message for failed chunks.
    pub error: Option<String>,
}
