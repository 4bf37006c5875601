/// Owned table of loaded compilation databases, one per resolved database path.

use super::compile_commands::{canonical_path, CompileDatabase};
use crate::core::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
pub struct IndexRegistry {
    indexes: Mutex<HashMap<PathBuf, Arc<CompileDatabase>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the database for `file`, loading it on first request.
    /// The table lock is not held while the file is read.
    pub fn get_or_load(&self, file: &Path) -> Result<Arc<CompileDatabase>> {
        let key = registry_key(file);
        if let Some(db) = self.get_by_key(&key) {
            return Ok(db);
        }

        let loaded = Arc::new(CompileDatabase::load(&key)?);
        let mut indexes = self.lock();
        Ok(indexes.entry(key).or_insert(loaded).clone())
    }

    pub fn get(&self, file: &Path) -> Option<Arc<CompileDatabase>> {
        self.get_by_key(&registry_key(file))
    }

    /// Register a database built elsewhere (e.g. from a pushed project model).
    pub fn insert(&self, key: &Path, db: Arc<CompileDatabase>) {
        self.lock().insert(registry_key(key), db);
    }

    /// Full reload after the backing file changed. A database that was never
    /// requested is left alone.
    pub fn reload(&self, file: &Path) -> Result<bool> {
        match self.get(file) {
            Some(db) => db.reload().map(|_| true),
            None => Ok(false),
        }
    }

    /// Tear down after the backing file was deleted; the next request rebuilds.
    pub fn remove(&self, file: &Path) -> Option<Arc<CompileDatabase>> {
        let removed = self.lock().remove(&registry_key(file));
        if let Some(db) = &removed {
            db.clear();
            log::info!("Dropped compilation database {}", db.origin().display());
        }
        removed
    }

    pub fn clear(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, db) in drained {
            db.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn get_by_key(&self, key: &Path) -> Option<Arc<CompileDatabase>> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<CompileDatabase>>> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Key by the canonical directory so a deleted file keeps the same identity.
fn registry_key(file: &Path) -> PathBuf {
    match (file.parent(), file.file_name()) {
        (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => canonical_path(dir).join(name),
        _ => canonical_path(file),
    }
}
