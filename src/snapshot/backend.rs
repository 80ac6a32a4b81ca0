//! Snapshot storage backends
//!
//! The file backend keeps one JSON document per product reference and
//! replaces it atomically (write temp file, then rename), so a crash never
//! leaves a torn record behind.

use dashmap::DashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::SnapshotError;
use super::record::SessionSnapshot;
use crate::core_types::ProductRef;

/// Durable key-value storage for snapshots, keyed by product reference
pub trait SnapshotBackend: Send + Sync {
    fn load(&self, product_ref: &ProductRef) -> Result<Option<SessionSnapshot>, SnapshotError>;

    /// Overwrite any prior record for the same product reference
    fn store(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError>;

    fn remove(&self, product_ref: &ProductRef) -> Result<(), SnapshotError>;
}

// ============================================================
// In-memory backend
// ============================================================

/// Volatile backend for tests and sessions without local storage
#[derive(Default)]
pub struct MemorySnapshotBackend {
    records: DashMap<ProductRef, SessionSnapshot>,
}

impl MemorySnapshotBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SnapshotBackend for MemorySnapshotBackend {
    fn load(&self, product_ref: &ProductRef) -> Result<Option<SessionSnapshot>, SnapshotError> {
        Ok(self.records.get(product_ref).map(|r| r.value().clone()))
    }

    fn store(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
        self.records
            .insert(snapshot.product_ref.clone(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, product_ref: &ProductRef) -> Result<(), SnapshotError> {
        self.records.remove(product_ref);
        Ok(())
    }
}

// ============================================================
// File backend
// ============================================================

pub struct FileSnapshotBackend {
    dir: PathBuf,
}

impl FileSnapshotBackend {
    /// Open (and create if needed) the snapshot directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a product reference; non-alphanumeric bytes are escaped
    fn path_for(&self, product_ref: &ProductRef) -> PathBuf {
        let mut name = String::with_capacity(product_ref.as_str().len() + 5);
        for b in product_ref.as_str().bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                name.push(b as char);
            } else {
                name.push_str(&format!("_{:02x}", b));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl SnapshotBackend for FileSnapshotBackend {
    fn load(&self, product_ref: &ProductRef) -> Result<Option<SessionSnapshot>, SnapshotError> {
        let path = self.path_for(product_ref);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<SessionSnapshot>(&content) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                // Unreadable record can never be resumed; drop it
                warn!(path = %path.display(), error = %e, "Discarding corrupt snapshot");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    fn store(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
        let path = self.path_for(&snapshot.product_ref);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        debug!(path = %path.display(), token = %snapshot.token, "Snapshot written");
        Ok(())
    }

    fn remove(&self, product_ref: &ProductRef) -> Result<(), SnapshotError> {
        match fs::remove_file(self.path_for(product_ref)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::IntentToken;
    use crate::snapshot::record::SNAPSHOT_FORMAT_VERSION;
    use chrono::Utc;

    fn snapshot(product_ref: &str, token: &str) -> SessionSnapshot {
        SessionSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            token: IntentToken::new(token),
            product_ref: ProductRef::new(product_ref),
            created_at: Utc::now(),
            ttl_seconds: 900,
            product_type: None,
            amount: None,
            rail: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_memory_backend_overwrites() {
        let backend = MemorySnapshotBackend::new();
        backend.store(&snapshot("c1", "tok_a")).unwrap();
        backend.store(&snapshot("c1", "tok_b")).unwrap();
        assert_eq!(backend.len(), 1);

        let loaded = backend.load(&ProductRef::new("c1")).unwrap().unwrap();
        assert_eq!(loaded.token.as_str(), "tok_b");

        backend.remove(&ProductRef::new("c1")).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_file_backend_roundtrip_and_overwrite() {
        let dir = format!("target/test_snapshot_backend_{}", std::process::id());
        let _ = fs::remove_dir_all(&dir);

        let backend = FileSnapshotBackend::open(&dir).unwrap();
        let product_ref = ProductRef::new("course/intro 101");

        backend.store(&snapshot("course/intro 101", "tok_a")).unwrap();
        backend.store(&snapshot("course/intro 101", "tok_b")).unwrap();

        let loaded = backend.load(&product_ref).unwrap().unwrap();
        assert_eq!(loaded.token.as_str(), "tok_b");

        // Escaped file name stays inside the directory
        let files: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);

        backend.remove(&product_ref).unwrap();
        assert!(backend.load(&product_ref).unwrap().is_none());
        // Removing twice is fine
        backend.remove(&product_ref).unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_backend_discards_corrupt_record() {
        let dir = format!("target/test_snapshot_corrupt_{}", std::process::id());
        let _ = fs::remove_dir_all(&dir);

        let backend = FileSnapshotBackend::open(&dir).unwrap();
        let product_ref = ProductRef::new("c1");
        fs::write(backend.path_for(&product_ref), "{not json").unwrap();

        assert!(backend.load(&product_ref).unwrap().is_none());
        assert!(!backend.path_for(&product_ref).exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
