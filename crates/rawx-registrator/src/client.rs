//! Abstract interface to the container metadata service (meta2).
//!
//! The engine only needs three operations, independent of transport. The
//! HTTP implementation lives in [`crate::proxy`]; [`MemoryMetadataClient`]
//! backs tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chunk::MetadataRecord;
use crate::error::{MetaError, MetaResult};

/// Operations the reconciliation engine issues against the metadata service.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Returns every chunk record of a content.
    ///
    /// Fails with `NotFound` when the content is unknown.
    async fn lookup(&self, container_id: &str, content_id: &str) -> MetaResult<Vec<MetadataRecord>>;

    /// Adds a chunk record to its content.
    ///
    /// Fails with `Conflict` if the chunk id already exists with a different
    /// position or location. An identical existing record is accepted.
    async fn insert(&self, record: &MetadataRecord) -> MetaResult<()>;

    /// Replaces the record holding the same chunk id.
    ///
    /// Fails with `NotFound` if no such record exists; never inserts.
    async fn update(&self, record: &MetadataRecord) -> MetaResult<()>;
}

/// Per-operation call counts of a [`MemoryMetadataClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Lookup calls, including failed attempts.
    pub lookups: u64,
    /// Insert calls, including failed attempts.
    pub inserts: u64,
    /// Update calls, including failed attempts.
    pub updates: u64,
}

impl CallCounts {
    /// Number of mutating calls.
    pub fn mutations(&self) -> u64 {
        self.inserts + self.updates
    }
}

type ContentKey = (String, String);

/// In-memory metadata service with call accounting and scripted failures.
#[derive(Default)]
pub struct MemoryMetadataClient {
    contents: Mutex<HashMap<ContentKey, Vec<MetadataRecord>>>,
    lookup_faults: Mutex<VecDeque<MetaError>>,
    insert_faults: Mutex<VecDeque<MetaError>>,
    update_faults: Mutex<VecDeque<MetaError>>,
    lookups: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
}

impl MemoryMetadataClient {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record directly, bypassing conflict checks and accounting.
    pub fn seed(&self, record: MetadataRecord) {
        let mut contents = self.contents.lock();
        let chunks = contents
            .entry((record.container_id.clone(), record.content_id.clone()))
            .or_default();
        chunks.retain(|c| c.chunk_id != record.chunk_id);
        chunks.push(record);
    }

    /// Fails the next lookups with the given errors, in order.
    pub fn fail_lookups(&self, errors: impl IntoIterator<Item = MetaError>) {
        self.lookup_faults.lock().extend(errors);
    }

    /// Fails the next inserts with the given errors, in order.
    pub fn fail_inserts(&self, errors: impl IntoIterator<Item = MetaError>) {
        self.insert_faults.lock().extend(errors);
    }

    /// Fails the next updates with the given errors, in order.
    pub fn fail_updates(&self, errors: impl IntoIterator<Item = MetaError>) {
        self.update_faults.lock().extend(errors);
    }

    /// Calls received so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            lookups: self.lookups.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
        }
    }

    /// Returns the stored record of a chunk, if any.
    pub fn record(&self, container_id: &str, content_id: &str, chunk_id: &str) -> Option<MetadataRecord> {
        self.contents
            .lock()
            .get(&(container_id.to_string(), content_id.to_string()))
            .and_then(|chunks| chunks.iter().find(|c| c.chunk_id == chunk_id).cloned())
    }
}

#[async_trait]
impl MetadataClient for MemoryMetadataClient {
    async fn lookup(&self, container_id: &str, content_id: &str) -> MetaResult<Vec<MetadataRecord>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.lookup_faults.lock().pop_front() {
            return Err(err);
        }
        self.contents
            .lock()
            .get(&(container_id.to_string(), content_id.to_string()))
            .cloned()
            .ok_or_else(|| MetaError::NotFound {
                what: format!("content {}/{}", container_id, content_id),
            })
    }

    async fn insert(&self, record: &MetadataRecord) -> MetaResult<()> {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.insert_faults.lock().pop_front() {
            return Err(err);
        }
        let mut contents = self.contents.lock();
        let chunks = contents
            .entry((record.container_id.clone(), record.content_id.clone()))
            .or_default();
        match chunks.iter().find(|c| c.chunk_id == record.chunk_id) {
            Some(existing) if existing.agrees_with(record) => Ok(()),
            Some(existing) => Err(MetaError::Conflict {
                chunk_id: record.chunk_id.clone(),
                reason: format!(
                    "already registered at {} position {}",
                    existing.location, existing.position
                ),
            }),
            None => {
                chunks.push(record.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, record: &MetadataRecord) -> MetaResult<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.update_faults.lock().pop_front() {
            return Err(err);
        }
        let mut contents = self.contents.lock();
        let existing = contents
            .get_mut(&(record.container_id.clone(), record.content_id.clone()))
            .and_then(|chunks| chunks.iter_mut().find(|c| c.chunk_id == record.chunk_id))
            .ok_or_else(|| MetaError::NotFound {
                what: format!("chunk {}", record.chunk_id),
            })?;
        *existing = record.clone();
        Ok(())
    }
}
