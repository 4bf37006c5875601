/// Watches a compile_commands.json and keeps its registry entry current.

use super::registry::IndexRegistry;
use crate::core::error::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Reload,
    Remove,
}

pub struct DatabaseWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DatabaseWatcher {
    /// Start watching `path`. The parent directory is watched so that
    /// atomic-rename saves and re-creation are seen.
    pub fn watch(registry: Arc<IndexRegistry>, path: &Path) -> Result<Self> {
        let target = path.to_path_buf();
        let handler_target = target.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Watch error on {}: {}", handler_target.display(), e);
                    return;
                }
            };
            match action_for(&event, &handler_target) {
                Some(WatchAction::Reload) => {
                    log::debug!("{} changed, reloading", handler_target.display());
                    if let Err(e) = registry.reload(&handler_target) {
                        log::warn!("Keeping previous compile commands: {}", e);
                    }
                }
                Some(WatchAction::Remove) => {
                    log::debug!("{} deleted", handler_target.display());
                    registry.remove(&handler_target);
                }
                None => {}
            }
        })
        .map_err(notify_error)?;

        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(notify_error)?;

        Ok(Self {
            path: target,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decide what a filesystem event means for the watched database file.
pub fn action_for(event: &Event, target: &Path) -> Option<WatchAction> {
    let name = target.file_name()?;
    if !event.paths.iter().any(|p| p.file_name() == Some(name)) {
        return None;
    }
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(WatchAction::Reload),
        EventKind::Remove(_) => Some(WatchAction::Remove),
        _ => None,
    }
}

fn notify_error(e: notify::Error) -> Error {
    Error::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_modify_triggers_reload() {
        let target = Path::new("/b/compile_commands.json");
        let ev = event(EventKind::Modify(ModifyKind::Any), "/b/compile_commands.json");
        assert_eq!(action_for(&ev, target), Some(WatchAction::Reload));
        let ev = event(EventKind::Create(CreateKind::File), "/b/compile_commands.json");
        assert_eq!(action_for(&ev, target), Some(WatchAction::Reload));
    }

    #[test]
    fn test_remove_triggers_teardown() {
        let target = Path::new("/b/compile_commands.json");
        let ev = event(EventKind::Remove(RemoveKind::File), "/b/compile_commands.json");
        assert_eq!(action_for(&ev, target), Some(WatchAction::Remove));
    }

    #[test]
    fn test_unrelated_file_ignored() {
        let target = Path::new("/b/compile_commands.json");
        let ev = event(EventKind::Modify(ModifyKind::Any), "/b/main.o");
        assert_eq!(action_for(&ev, target), None);
    }
}
