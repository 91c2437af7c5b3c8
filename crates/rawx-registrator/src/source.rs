//! Chunk enumeration on a rawx volume.
//!
//! A rawx volume stores each chunk as a file named after its hexadecimal
//! chunk id, spread over hashed sub-directories. The logical identity of a
//! chunk (container, content, position) lives in user extended attributes set
//! by the rawx service when the chunk was uploaded.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::chunk::{ChunkDescriptor, ChunkPosition};
use crate::error::{ChunkReadError, RegistratorError, Result};

/// Container (meta2 reference) id.
pub const ATTR_CONTAINER_ID: &str = "user.grid.content.container";
/// Content id.
pub const ATTR_CONTENT_ID: &str = "user.grid.content.id";
/// Object name of the content.
pub const ATTR_CONTENT_PATH: &str = "user.grid.content.path";
/// Content version.
pub const ATTR_CONTENT_VERSION: &str = "user.grid.content.version";
/// Chunk id, defaults to the file name.
pub const ATTR_CHUNK_ID: &str = "user.grid.chunk.id";
/// Chunk position (`M` or `M.S`).
pub const ATTR_CHUNK_POSITION: &str = "user.grid.chunk.position";
/// Chunk size, defaults to the file length.
pub const ATTR_CHUNK_SIZE: &str = "user.grid.chunk.size";
/// Chunk checksum.
pub const ATTR_CHUNK_HASH: &str = "user.grid.chunk.hash";
/// Volume root attribute holding the rawx service address.
pub const ATTR_VOLUME_ADDRESS: &str = "user.rawx_server.address";

/// One item produced by a [`ChunkSource`].
pub type ChunkItem = std::result::Result<ChunkDescriptor, ChunkReadError>;

/// Lazy sequence of chunk items.
pub type ChunkIter = Box<dyn Iterator<Item = ChunkItem> + Send>;

/// Producer of chunk descriptors.
///
/// `scan` fails only when enumeration cannot start at all; entries that
/// cannot be decoded are yielded as `Err` items and the walk goes on.
pub trait ChunkSource: Send + Sync {
    /// Starts a new enumeration.
    fn scan(&self) -> Result<ChunkIter>;
}

/// Returns true if a file name looks like a chunk id.
pub fn is_chunk_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Reads the rawx service address recorded on the volume root.
pub fn read_service_id(volume: &Path) -> io::Result<Option<String>> {
    let value = xattr::get(volume, ATTR_VOLUME_ADDRESS)?;
    Ok(value
        .map(|v| String::from_utf8_lossy(&v).trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Builds a descriptor from the attributes of a chunk file.
///
/// `get` returns the raw value of an attribute, `None` when it is unset.
pub fn decode_chunk<F>(path: &Path, file_name: &str, file_len: u64, get: F) -> ChunkItem
where
    F: Fn(&'static str) -> io::Result<Option<Vec<u8>>>,
{
    let read = |name: &'static str| -> std::result::Result<Option<String>, ChunkReadError> {
        let raw = get(name).map_err(|source| ChunkReadError::Xattr {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(raw
            .map(|v| String::from_utf8_lossy(&v).trim().to_string())
            .filter(|v| !v.is_empty()))
    };
    let require = |name: &'static str| -> std::result::Result<String, ChunkReadError> {
        read(name)?.ok_or_else(|| ChunkReadError::MissingAttribute {
            path: path.to_path_buf(),
            name,
        })
    };

    let container_id = require(ATTR_CONTAINER_ID)?.to_ascii_uppercase();
    let content_id = require(ATTR_CONTENT_ID)?;
    let raw_position = require(ATTR_CHUNK_POSITION)?;
    let position: ChunkPosition =
        raw_position
            .parse()
            .map_err(|_| ChunkReadError::InvalidAttribute {
                path: path.to_path_buf(),
                name: ATTR_CHUNK_POSITION,
                value: raw_position.clone(),
            })?;

    let chunk_id = read(ATTR_CHUNK_ID)?
        .unwrap_or_else(|| file_name.to_string())
        .to_ascii_uppercase();

    let size = match read(ATTR_CHUNK_SIZE)? {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ChunkReadError::InvalidAttribute {
                path: path.to_path_buf(),
                name: ATTR_CHUNK_SIZE,
                value: raw,
            })?,
        None => file_len,
    };

    Ok(ChunkDescriptor {
        container_id,
        content_id,
        chunk_id,
        position,
        path: path.to_path_buf(),
        size,
        hash: read(ATTR_CHUNK_HASH)?.map(|h| h.to_ascii_uppercase()),
        content_path: read(ATTR_CONTENT_PATH)?,
        content_version: read(ATTR_CONTENT_VERSION)?,
    })
}

/// Walks a rawx volume and decodes every chunk file it holds.
#[derive(Debug, Clone)]
pub struct VolumeChunkSource {
    root: PathBuf,
    resume_after: Option<PathBuf>,
}

impl VolumeChunkSource {
    /// Creates a source over the volume rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resume_after: None,
        }
    }

    /// Skips every entry sorting at or before `marker`.
    ///
    /// The walk order is the component-wise path order, so a marker taken
    /// from a previous run over the same root resumes right after it.
    pub fn resume_after(mut self, marker: Option<PathBuf>) -> Self {
        self.resume_after = marker;
        self
    }

    /// Volume root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ChunkSource for VolumeChunkSource {
    fn scan(&self) -> Result<ChunkIter> {
        let meta = std::fs::metadata(&self.root).map_err(|source| RegistratorError::VolumeRead {
            path: self.root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(RegistratorError::VolumeRead {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }
        std::fs::read_dir(&self.root).map_err(|source| RegistratorError::VolumeRead {
            path: self.root.clone(),
            source,
        })?;

        debug!(root = %self.root.display(), resume_after = ?self.resume_after, "starting volume walk");

        let root = self.root.clone();
        let marker = self.resume_after.clone();
        let prune_marker = marker.clone();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| keep_entry(e, prune_marker.as_deref()));

        let iter = walker.filter_map(move |entry| match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    return None;
                }
                if let Some(marker) = &marker {
                    if entry.path() <= marker.as_path() {
                        return None;
                    }
                }
                let name = entry.file_name().to_str()?;
                if !is_chunk_name(name) {
                    return None;
                }
                Some(read_entry(&entry, name))
            }
            Err(err) => {
                let path = err.path().unwrap_or(root.as_path()).to_path_buf();
                warn!(path = %path.display(), error = %err, "cannot walk volume entry");
                Some(Err(ChunkReadError::Walk {
                    path,
                    reason: err.to_string(),
                }))
            }
        });

        Ok(Box::new(iter))
    }
}

/// Prunes directories lying entirely before the resume marker.
fn keep_entry(entry: &DirEntry, marker: Option<&Path>) -> bool {
    let Some(marker) = marker else {
        return true;
    };
    let path = entry.path();
    if entry.file_type().is_dir() {
        marker.starts_with(path) || path > marker
    } else {
        path > marker
    }
}

fn read_entry(entry: &DirEntry, name: &str) -> ChunkItem {
    let path = entry.path();
    let file_len = entry
        .metadata()
        .map_err(|err| ChunkReadError::Walk {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?
        .len();
    decode_chunk(path, name, file_len, |attr| xattr::get(path, attr))
}

#[derive(Clone)]
enum StaticEntry {
    Chunk(ChunkDescriptor),
    Unreadable { path: PathBuf, reason: String },
}

/// In-memory chunk source, used for tests and replays.
///
/// Counts how many items consumers actually pulled.
#[derive(Clone, Default)]
pub struct StaticChunkSource {
    entries: Arc<Vec<StaticEntry>>,
    reads: Arc<AtomicUsize>,
}

impl StaticChunkSource {
    /// Creates a source yielding the given descriptors in order.
    pub fn new(chunks: Vec<ChunkDescriptor>) -> Self {
        Self {
            entries: Arc::new(chunks.into_iter().map(StaticEntry::Chunk).collect()),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Appends an entry that fails to decode.
    pub fn with_unreadable(self, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        let mut entries = Vec::clone(&self.entries);
        entries.push(StaticEntry::Unreadable {
            path: path.into(),
            reason: reason.into(),
        });
        Self {
            entries: Arc::new(entries),
            reads: self.reads,
        }
    }

    /// Number of items pulled from all scans so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl StaticEntry {
    fn to_item(&self) -> ChunkItem {
        match self {
            StaticEntry::Chunk(c) => Ok(c.clone()),
            StaticEntry::Unreadable { path, reason } => Err(ChunkReadError::Walk {
                path: path.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

impl ChunkSource for StaticChunkSource {
    fn scan(&self) -> Result<ChunkIter> {
        let entries = Arc::clone(&self.entries);
        let reads = Arc::clone(&self.reads);
        let iter = (0..entries.len()).map(move |i| {
            reads.fetch_add(1, Ordering::Relaxed);
            entries[i].to_item()
        });
        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn attrs(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (*k, v.as_bytes().to_vec()))
            .collect()
    }

    fn decode(map: &HashMap<&'static str, Vec<u8>>) -> ChunkItem {
        decode_chunk(
            Path::new("/srv/rawx/ABC/ABCDEF0123"),
            "ABCDEF0123",
            4096,
            |name| Ok(map.get(name).cloned()),
        )
    }

    #[test]
    fn test_is_chunk_name() {
        assert!(is_chunk_name("ABCDEF0123456789"));
        assert!(is_chunk_name("abcdef"));
        assert!(!is_chunk_name(""));
        assert!(!is_chunk_name(".blob-registrator.lock"));
        assert!(!is_chunk_name("ABCDEF.pending"));
        assert!(!is_chunk_name("notes.txt"));
    }

    #[test]
    fn test_decode_full_attributes() {
        let map = attrs(&[
            (ATTR_CONTAINER_ID, "c0ffee"),
            (ATTR_CONTENT_ID, "0011BEEF"),
            (ATTR_CONTENT_PATH, "photos/cat.jpg"),
            (ATTR_CONTENT_VERSION, "1700000000000000"),
            (ATTR_CHUNK_ID, "abcdef0123"),
            (ATTR_CHUNK_POSITION, "2.1"),
            (ATTR_CHUNK_SIZE, "1234"),
            (ATTR_CHUNK_HASH, "d41d8cd98f00b204e9800998ecf8427e"),
        ]);
        let desc = decode(&map).unwrap();
        assert_eq!(desc.container_id, "C0FFEE");
        assert_eq!(desc.content_id, "0011BEEF");
        assert_eq!(desc.chunk_id, "ABCDEF0123");
        assert_eq!(desc.position, ChunkPosition::fragment(2, 1));
        assert_eq!(desc.size, 1234);
        assert_eq!(
            desc.hash.as_deref(),
            Some("D41D8CD98F00B204E9800998ECF8427E")
        );
        assert_eq!(desc.content_path.as_deref(), Some("photos/cat.jpg"));
        assert_eq!(desc.content_version.as_deref(), Some("1700000000000000"));
    }

    #[test]
    fn test_decode_defaults_from_file() {
        let map = attrs(&[
            (ATTR_CONTAINER_ID, "C0FFEE"),
            (ATTR_CONTENT_ID, "0011BEEF"),
            (ATTR_CHUNK_POSITION, "0"),
        ]);
        let desc = decode(&map).unwrap();
        assert_eq!(desc.chunk_id, "ABCDEF0123");
        assert_eq!(desc.size, 4096);
        assert!(desc.hash.is_none());
        assert!(desc.position.is_first());
    }

    #[test]
    fn test_decode_missing_position() {
        let map = attrs(&[(ATTR_CONTAINER_ID, "C0FFEE"), (ATTR_CONTENT_ID, "0011BEEF")]);
        match decode(&map) {
            Err(ChunkReadError::MissingAttribute { name, .. }) => {
                assert_eq!(name, ATTR_CHUNK_POSITION)
            }
            other => panic!("expected MissingAttribute, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_size() {
        let map = attrs(&[
            (ATTR_CONTAINER_ID, "C0FFEE"),
            (ATTR_CONTENT_ID, "0011BEEF"),
            (ATTR_CHUNK_POSITION, "1"),
            (ATTR_CHUNK_SIZE, "big"),
        ]);
        match decode(&map) {
            Err(ChunkReadError::InvalidAttribute { name, value, .. }) => {
                assert_eq!(name, ATTR_CHUNK_SIZE);
                assert_eq!(value, "big");
            }
            other => panic!("expected InvalidAttribute, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_xattr_failure() {
        let item = decode_chunk(Path::new("/srv/rawx/AB"), "AB", 0, |_| {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no xattr support"))
        });
        assert!(matches!(item, Err(ChunkReadError::Xattr { .. })));
    }

    #[test]
    fn test_volume_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let source = VolumeChunkSource::new(dir.path().join("absent"));
        assert!(matches!(
            source.scan(),
            Err(RegistratorError::VolumeRead { .. })
        ));
    }

    #[test]
    fn test_volume_root_is_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let source = VolumeChunkSource::new(&file);
        assert!(matches!(
            source.scan(),
            Err(RegistratorError::VolumeRead { .. })
        ));
    }

    #[test]
    fn test_volume_walk_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("BBB")).unwrap();
        std::fs::create_dir_all(root.join("AAA")).unwrap();
        std::fs::write(root.join("BBB/BBB111"), b"chunk").unwrap();
        std::fs::write(root.join("AAA/AAA222"), b"chunk").unwrap();
        std::fs::write(root.join("AAA/AAA111"), b"chunk").unwrap();
        std::fs::write(root.join("AAA/AAA333.pending"), b"tmp").unwrap();
        std::fs::write(root.join(".blob-registrator.lock"), b"{}").unwrap();

        let source = VolumeChunkSource::new(root);
        let paths: Vec<PathBuf> = source
            .scan()
            .unwrap()
            .map(|item| match item {
                Ok(desc) => desc.path,
                Err(err) => err.path().to_path_buf(),
            })
            .collect();

        // Files carry no grid attributes here, so every chunk is an Err item,
        // but each one is still reported once and in walk order.
        assert_eq!(
            paths,
            vec![
                root.join("AAA/AAA111"),
                root.join("AAA/AAA222"),
                root.join("BBB/BBB111"),
            ]
        );
    }

    #[test]
    fn test_volume_walk_resume_after() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("AAA")).unwrap();
        std::fs::create_dir_all(root.join("BBB")).unwrap();
        std::fs::write(root.join("AAA/AAA111"), b"chunk").unwrap();
        std::fs::write(root.join("AAA/AAA222"), b"chunk").unwrap();
        std::fs::write(root.join("BBB/BBB111"), b"chunk").unwrap();

        let source = VolumeChunkSource::new(root).resume_after(Some(root.join("AAA/AAA111")));
        let paths: Vec<PathBuf> = source
            .scan()
            .unwrap()
            .map(|item| match item {
                Ok(desc) => desc.path,
                Err(err) => err.path().to_path_buf(),
            })
            .collect();
        assert_eq!(paths, vec![root.join("AAA/AAA222"), root.join("BBB/BBB111")]);
    }

    #[test]
    fn test_static_source_counts_reads() {
        let source = StaticChunkSource::default().with_unreadable("/srv/rawx/AB", "boom");
        assert_eq!(source.reads(), 0);
        let items: Vec<ChunkItem> = source.scan().unwrap().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
        assert_eq!(source.reads(), 1);
    }

    #[test]
    fn test_static_source_extension_leaves_clones_alone() {
        let base = StaticChunkSource::default().with_unreadable("/srv/rawx/AA", "first");
        let extended = base.clone().with_unreadable("/srv/rawx/BB", "second");

        assert_eq!(base.scan().unwrap().count(), 1);
        let paths: Vec<PathBuf> = extended
            .scan()
            .unwrap()
            .map(|item| item.unwrap_err().path().to_path_buf())
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/srv/rawx/AA"), PathBuf::from("/srv/rawx/BB")]);
    }
}
