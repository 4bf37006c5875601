/// Per-source single-flight: starting a run cancels whatever run was current
/// for the same source file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct RunSlot {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
pub struct RunRegistry {
    slots: Mutex<HashMap<PathBuf, RunSlot>>,
    next_id: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new current run for `key`, cancelling the previous one.
    pub fn begin(&self, key: &Path) -> RunGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.lock().insert(
            key.to_path_buf(),
            RunSlot {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            log::debug!("Superseding run {} for {}", previous.id, key.display());
            previous.token.cancel();
        }
        RunGuard {
            registry: self,
            key: key.to_path_buf(),
            id,
            token,
            started: Instant::now(),
        }
    }

    /// Cancel the current run for `key`, if any.
    pub fn cancel(&self, key: &Path) -> bool {
        match self.lock().remove(key) {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, slot) in self.lock().drain() {
            slot.token.cancel();
        }
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn finish(&self, key: &Path, id: u64) {
        let mut slots = self.lock();
        if slots.get(key).map(|slot| slot.id) == Some(id) {
            slots.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, RunSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One in-flight run. Dropping it frees the slot unless a newer run owns it.
pub struct RunGuard<'a> {
    registry: &'a RunRegistry,
    key: PathBuf,
    id: u64,
    token: CancellationToken,
    started: Instant,
}

impl RunGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish(&self.key, self.id);
    }
}
