/// Behavioral constants and user settings.

use super::error::{Error, Result};
use super::types::{FilterOptions, OutputKind};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

// --- Compilation database ---
pub const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";

// --- Pipeline ---
pub const DEFAULT_DEMANGLER: &str = "c++filt";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// --- Parser ---
pub const TAB_STOP: usize = 8;

/// User settings, read from a camelCase JSON file. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Directory holding compile_commands.json; may contain `${...}` variables.
    pub compilation_directory: String,
    pub workspace_folder: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Base name of the demangler looked up next to the compiler.
    pub demangler: String,
    /// Explicit demangler; skips lookup entirely.
    pub demangler_path: Option<PathBuf>,
    pub intel_syntax: bool,
    pub output: OutputKind,
    pub filter: FilterOptions,
    /// Full replacement command line (compiler first); empty means "use the database".
    pub extra_arguments: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compilation_directory: "${workspaceFolder}".to_string(),
            workspace_folder: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            demangler: DEFAULT_DEMANGLER.to_string(),
            demangler_path: None,
            intel_syntax: false,
            output: OutputKind::Assembly,
            filter: FilterOptions::default(),
            extra_arguments: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn workspace(&self) -> PathBuf {
        self.workspace_folder
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Location of the compilation database that governs `source`.
    pub fn compile_commands_path(&self, source: &Path) -> PathBuf {
        let dir = resolve_path(&self.compilation_directory, source, &self.workspace());
        dir.join(COMPILE_COMMANDS_FILE)
    }

    /// Flags that force the requested output to standard output.
    pub fn output_flags(&self) -> Vec<&'static str> {
        match self.output {
            OutputKind::Assembly => {
                let mut flags = vec!["-g", "-S"];
                if self.intel_syntax {
                    flags.push("-masm=intel");
                }
                flags.extend(["-o", "-"]);
                flags
            }
            OutputKind::LlvmIr => vec!["-g", "-S", "-emit-llvm", "-o", "-"],
            OutputKind::Preprocessed => vec!["-E", "-o", "-"],
        }
    }
}

/// Substitute `${var}` placeholders and normalize `.`/`..` components.
/// Unknown variables are left untouched.
pub fn resolve_path(template: &str, source: &Path, workspace: &Path) -> PathBuf {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup_variable(name, source, workspace) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    normalize_lexically(Path::new(&out))
}

fn lookup_variable(name: &str, source: &Path, workspace: &Path) -> Option<String> {
    let lossy = |p: &Path| p.to_string_lossy().into_owned();
    let value = match name {
        "workspaceFolder" => lossy(workspace),
        "workspaceFolderBasename" => lossy(Path::new(workspace.file_name()?)),
        "file" => lossy(source),
        "fileBasename" => lossy(Path::new(source.file_name()?)),
        "fileBasenameNoExtension" => lossy(Path::new(source.file_stem()?)),
        "fileDirname" => lossy(source.parent()?),
        "fileExtname" => source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default(),
        "relativeFile" => lossy(source.strip_prefix(workspace).unwrap_or(source)),
        "pathSeparator" => std::path::MAIN_SEPARATOR.to_string(),
        _ => return None,
    };
    Some(value)
}

/// Collapse `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
