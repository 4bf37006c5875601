/// Compilation database: loads compile_commands.json (or a pushed project model)
/// and maps canonical source paths to normalized compiler invocations.

use super::tokenizer::split_whitespace;
use crate::core::config::normalize_lexically;
use crate::core::error::{Error, Result};
use crate::core::types::{CompileEntry, CompileInvocation};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

type CommandMap = HashMap<PathBuf, Arc<CompileInvocation>>;

pub struct CompileDatabase {
    origin: PathBuf,
    commands: RwLock<Arc<CommandMap>>,
}

impl CompileDatabase {
    /// Load a database file. Fails with `NotFound` when absent, `Parse` when malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_entries(path)?;
        let db = Self {
            origin: path.to_path_buf(),
            commands: RwLock::new(Arc::new(index_entries(&entries, base_of(path)))),
        };
        log::info!(
            "Loaded compilation database {} ({} entries)",
            path.display(),
            db.len()
        );
        Ok(db)
    }

    /// Build a database from entries pushed by a build-system integration.
    pub fn from_entries(origin: impl Into<PathBuf>, entries: &[CompileEntry]) -> Self {
        let origin = origin.into();
        let commands = index_entries(entries, base_of(&origin));
        Self {
            origin,
            commands: RwLock::new(Arc::new(commands)),
        }
    }

    /// The backing file (or project identity) this database was built from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Look up the invocation for `source`. Not being indexed is not an error.
    pub fn get(&self, source: &Path) -> Option<Arc<CompileInvocation>> {
        let snapshot = self.snapshot();
        if let Some(hit) = snapshot.get(source) {
            return Some(hit.clone());
        }
        snapshot.get(&canonical_path(source)).cloned()
    }

    /// Re-read the backing file and swap the mapping in one step.
    /// On failure the previous mapping stays in place.
    pub fn reload(&self) -> Result<usize> {
        let entries = read_entries(&self.origin)?;
        let count = self.swap(index_entries(&entries, base_of(&self.origin)));
        log::info!(
            "Reloaded compilation database {} ({} entries)",
            self.origin.display(),
            count
        );
        Ok(count)
    }

    /// Replace the mapping from freshly supplied entries.
    pub fn replace(&self, entries: &[CompileEntry]) -> usize {
        self.swap(index_entries(entries, base_of(&self.origin)))
    }

    pub fn clear(&self) {
        self.swap(CommandMap::new());
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self.snapshot().keys().cloned().collect();
        sources.sort();
        sources
    }

    fn snapshot(&self) -> Arc<CommandMap> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, commands: CommandMap) -> usize {
        let count = commands.len();
        *self.commands.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(commands);
        count
    }
}

/// Push interface for build-system integrations that publish a project model
/// instead of a compile_commands.json file.
pub trait ProjectModelSink {
    fn on_project_model_changed(&self, entries: Vec<CompileEntry>);
}

impl ProjectModelSink for CompileDatabase {
    fn on_project_model_changed(&self, entries: Vec<CompileEntry>) {
        let count = self.replace(&entries);
        log::info!(
            "Project model for {} changed ({} entries)",
            self.origin.display(),
            count
        );
    }
}

pub fn read_entries(path: &Path) -> Result<Vec<CompileEntry>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Relative `directory` fields resolve against the database's own directory.
fn base_of(origin: &Path) -> &Path {
    if origin.is_dir() {
        origin
    } else {
        origin.parent().unwrap_or(Path::new("."))
    }
}

fn index_entries(entries: &[CompileEntry], base: &Path) -> CommandMap {
    let mut commands = CommandMap::with_capacity(entries.len());
    for entry in entries {
        match normalize_entry(entry, base) {
            Some(invocation) => {
                commands.insert(invocation.source_path.clone(), Arc::new(invocation));
            }
            None => log::warn!("Skipping compile command without arguments for {}", entry.file),
        }
    }
    commands
}

/// Turn one raw record into an invocation; `None` when it carries no command.
pub fn normalize_entry(entry: &CompileEntry, base: &Path) -> Option<CompileInvocation> {
    let directory = base.join(&entry.directory);
    let joined = directory.join(&entry.file);
    let source_path = canonical_path(&joined);

    let raw = match entry.command.as_deref() {
        Some(command) if !command.trim().is_empty() => split_whitespace(command),
        _ => entry.arguments.clone().unwrap_or_default(),
    };

    let joined_str = joined.to_string_lossy();
    let source_str = source_path.to_string_lossy();
    let mut args = normalize_arguments(raw);
    args.retain(|arg| *arg != entry.file && *arg != joined_str && *arg != source_str);

    let mut args = args.into_iter();
    let executable = args.next()?;

    Some(CompileInvocation {
        source_path,
        working_directory: directory,
        executable,
        arguments: args.collect(),
    })
}

/// Drop `-c`, `-g`, and every `-o <value>` pair.
pub fn normalize_arguments(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut skip_value = false;
    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        match arg.as_str() {
            "-o" => skip_value = true,
            "-c" | "-g" => {}
            _ => out.push(arg),
        }
    }
    out
}

/// Resolve symlinks when the file exists, otherwise normalize lexically.
pub fn canonical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path))
}
