/// Central orchestrator: resolves the invocation for a source file, runs the
/// compile pipeline, and parses the result into an `AsmDocument`.

use super::config::Settings;
use super::error::{Error, Result};
use super::types::CompileInvocation;
use crate::analysis::asm_parser::AsmParser;
use crate::analysis::document::AsmDocument;
use crate::compdb::compile_commands::{canonical_path, CompileDatabase};
use crate::compdb::registry::IndexRegistry;
use crate::pipeline::runner::{CompilationPipeline, PipelineOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

pub struct Orchestrator {
    settings: Settings,
    registry: Arc<IndexRegistry>,
    pipeline: CompilationPipeline,
    parser: AsmParser,
    outputs: Mutex<HashMap<PathBuf, LastOutput>>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        Self::with_registry(settings, Arc::new(IndexRegistry::new()))
    }

    /// Share an index table with other components (e.g. a database watcher).
    pub fn with_registry(settings: Settings, registry: Arc<IndexRegistry>) -> Self {
        let pipeline = CompilationPipeline::new(PipelineOptions::from_settings(&settings));
        Self {
            settings,
            registry,
            pipeline,
            parser: AsmParser::new(),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &CompilationPipeline {
        &self.pipeline
    }

    /// Location of the database governing `source`.
    pub fn database_path(&self, source: &Path) -> PathBuf {
        self.settings.compile_commands_path(source)
    }

    /// Load (or reuse) the database for `source` off the async executor.
    pub async fn database_for(&self, source: &Path) -> Result<Arc<CompileDatabase>> {
        let path = self.database_path(source);
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || registry.get_or_load(&path))
            .await
            .map_err(join_error)?
    }

    /// The indexed invocation for `source`.
    ///
    /// With override arguments the database is optional: when it is missing
    /// or does not list the file, the invocation runs from the source's own
    /// directory.
    pub async fn invocation_for(
        &self,
        source: &Path,
        override_args: &[String],
    ) -> Result<Arc<CompileInvocation>> {
        let db_path = self.database_path(source);
        let registry = Arc::clone(&self.registry);
        let source = source.to_path_buf();
        let (source, found) = tokio::task::spawn_blocking(move || {
            let source = canonical_path(&source);
            let found = registry
                .get_or_load(&db_path)
                .and_then(|db| db.get(&source).ok_or_else(|| Error::NoCommand(source.clone())));
            (source, found)
        })
        .await
        .map_err(join_error)?;

        match found {
            Ok(invocation) => Ok(invocation),
            Err(Error::NotFound(_) | Error::NoCommand(_)) if !override_args.is_empty() => {
                log::debug!("No indexed command for {}, using override arguments", source.display());
                Ok(Arc::new(CompileInvocation {
                    working_directory: source.parent().map(Path::to_path_buf).unwrap_or_default(),
                    executable: override_args[0].clone(),
                    arguments: Vec::new(),
                    source_path: source,
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Compile `source` to demangled text. Empty `override_args` falls back
    /// to the configured extra arguments, then to the database.
    ///
    /// When neither the source file nor the command line changed since the
    /// last successful run, that run's output is returned without compiling.
    pub async fn compile(&self, source: &Path, override_args: &[String]) -> Result<String> {
        let override_args = if override_args.is_empty() {
            self.settings.extra_arguments.as_slice()
        } else {
            override_args
        };
        let invocation = self.invocation_for(source, override_args).await?;
        let command = self.pipeline.command_line(&invocation, override_args);
        let stamp = SourceStamp::read(&invocation.source_path).await;

        if let Some(stamp) = &stamp {
            if let Some(text) = self.up_to_date(&invocation.source_path, stamp, &command) {
                log::debug!("{} is up to date", invocation.source_path.display());
                // an older in-flight run must not deliver after this one
                self.pipeline.cancel(&invocation.source_path);
                return Ok(text);
            }
        }

        let text = self.pipeline.compile(&invocation, override_args).await?;
        if let Some(stamp) = stamp {
            self.lock_outputs().insert(
                invocation.source_path.clone(),
                LastOutput {
                    stamp,
                    command,
                    text: text.clone(),
                },
            );
        }
        Ok(text)
    }

    /// Forget the last output for `source` so the next request recompiles.
    pub fn invalidate(&self, source: &Path) {
        self.lock_outputs().remove(&canonical_path(source));
    }

    fn up_to_date(
        &self,
        source: &Path,
        stamp: &SourceStamp,
        command: &(String, Vec<String>),
    ) -> Option<String> {
        let outputs = self.lock_outputs();
        let last = outputs.get(source)?;
        (last.stamp == *stamp && last.command == *command).then(|| last.text.clone())
    }

    fn lock_outputs(&self) -> MutexGuard<'_, HashMap<PathBuf, LastOutput>> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compile and parse `source` with the configured filter.
    pub async fn explore(&self, source: &Path, override_args: &[String]) -> Result<AsmDocument> {
        let text = self.compile(source, override_args).await?;
        let parsed = self
            .parser
            .parse_for_source(&text, &self.settings.filter, source);
        Ok(AsmDocument::new(source, parsed))
    }

    pub fn cancel(&self, source: &Path) -> bool {
        self.pipeline.cancel(&canonical_path(source))
    }

    /// Cancel every run and drop all loaded databases.
    pub fn shutdown(&self) {
        self.pipeline.cancel_all();
        self.registry.clear();
        self.lock_outputs().clear();
    }
}

/// Modification time and size of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceStamp {
    modified: SystemTime,
    len: u64,
}

impl SourceStamp {
    async fn read(path: &Path) -> Option<Self> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        Some(Self {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

struct LastOutput {
    stamp: SourceStamp,
    command: (String, Vec<String>),
    text: String,
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
