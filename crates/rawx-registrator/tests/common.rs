//! Shared fixtures for the registrator integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rawx_registrator::retry::RetryConfig;
use rawx_registrator::{
    ActionMode, ChunkDescriptor, ChunkPosition, EngineConfig, MemoryMetadataClient, ReconciliationEngine,
    ScanContext,
};

pub const NAMESPACE: &str = "OPENIO";
pub const SERVICE: &str = "10.0.0.1:6201";
pub const CONTAINER: &str = "3F2A9C0D6B1E47A58C2D0E9F1A2B3C4D5E6F708192A3B4C5D6E7F8091A2B3C4D";
pub const CONTENT: &str = "0A1B2C3D4E5F60718293A4B5C6D7E8F9";

pub fn chunk(id: &str, metachunk: u32) -> ChunkDescriptor {
    ChunkDescriptor {
        container_id: CONTAINER.to_string(),
        content_id: CONTENT.to_string(),
        chunk_id: id.to_string(),
        position: ChunkPosition::new(metachunk),
        path: PathBuf::from(format!("/srv/rawx/{}/{}", &id[..3], id)),
        size: 1_048_576,
        hash: Some("D41D8CD98F00B204E9800998ECF8427E".to_string()),
        content_path: Some("photos/cat.jpg".to_string()),
        content_version: Some("1700000000000000".to_string()),
    }
}

pub fn engine_on(volume: &Path, client: Arc<MemoryMetadataClient>, mode: ActionMode, first: bool) -> ReconciliationEngine {
    let ctx = Arc::new(ScanContext::new(NAMESPACE, volume, SERVICE));
    ReconciliationEngine::new(
        ctx,
        client,
        EngineConfig {
            mode,
            first,
            workers: 3,
            quiet: true,
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                jitter: false,
                ..Default::default()
            },
        },
    )
}

pub fn engine(client: Arc<MemoryMetadataClient>, mode: ActionMode) -> ReconciliationEngine {
    engine_on(Path::new("/srv/rawx"), client, mode, false)
}

/// Three chunks of one content: position 0 without a record, position 1
/// matching its record, position 2 recorded on another rawx.
pub fn three_chunk_fixture() -> (Arc<MemoryMetadataClient>, Vec<ChunkDescriptor>) {
    let client = Arc::new(MemoryMetadataClient::new());
    let chunks = vec![
        chunk("AAA0000000000000", 0),
        chunk("BBB1111111111111", 1),
        chunk("CCC2222222222222", 2),
    ];
    client.seed(chunks[1].to_record(SERVICE));
    client.seed(chunks[2].to_record("10.0.0.9:6201"));
    (client, chunks)
}
