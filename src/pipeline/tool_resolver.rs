/// Locates the demangler that belongs to a given compiler executable.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Compiler-name fragments replaced by the demangler name when guessing.
/// Longest first; only the first match is substituted.
const COMPILER_FRAGMENTS: &[&str] = &["clang++", "clang", "g++", "gcc", "c++", "cc"];

#[derive(Debug)]
enum ResolutionFailure {
    NoCandidate,
    GuessMissing(PathBuf),
}

pub struct ToolResolver {
    tool_name: String,
    /// Directories searched for bare compiler names; `None` means `$PATH`.
    search_path: Option<OsString>,
    cache: RwLock<HashMap<String, PathBuf>>,
}

impl ToolResolver {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            search_path: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Look bare compiler names up in `paths` instead of `$PATH`.
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Resolve the demangler for `compiler`. Never fails: when nothing is
    /// found the bare tool name is returned and left to PATH at spawn time.
    pub fn resolve(&self, compiler: &str) -> PathBuf {
        if let Some(hit) = self.cached(compiler) {
            return hit;
        }

        match self.lookup(compiler) {
            Ok(path) => {
                log::debug!("Resolved {} for {} -> {}", self.tool_name, compiler, path.display());
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(compiler.to_string(), path.clone());
                path
            }
            Err(failure) => {
                log::debug!(
                    "No {} found next to {} ({:?}), falling back to PATH",
                    self.tool_name,
                    compiler,
                    failure
                );
                PathBuf::from(&self.tool_name)
            }
        }
    }

    pub fn cached(&self, compiler: &str) -> Option<PathBuf> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(compiler)
            .cloned()
    }

    fn lookup(&self, compiler: &str) -> Result<PathBuf, ResolutionFailure> {
        let compiler_path = Path::new(compiler);
        let suffix = self.suffix_for(compiler_path);

        let dir = match compiler_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => Some(dir.to_path_buf()),
            _ => self
                .locate(compiler)
                .and_then(|found| found.parent().map(Path::to_path_buf)),
        };

        let preferred = self.guessed_name(compiler_path);
        if let Some(found) = dir
            .as_deref()
            .and_then(|d| scan_directory(d, &suffix, preferred.as_deref()))
        {
            return Ok(found);
        }

        self.guess_from_name(compiler_path)
    }

    fn locate(&self, compiler: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(compiler, Some(paths), cwd).ok()
            }
            None => which::which(compiler).ok(),
        }
    }

    /// Demangler base name plus the compiler's own extension (`.exe` etc.).
    fn suffix_for(&self, compiler: &Path) -> String {
        match compiler.extension() {
            Some(ext) => format!("{}.{}", self.tool_name, ext.to_string_lossy()),
            None => self.tool_name.clone(),
        }
    }

    /// The compiler's file name with its compiler fragment swapped for the
    /// tool name: `aarch64-linux-gnu-g++` -> `aarch64-linux-gnu-c++filt`.
    fn guessed_name(&self, compiler: &Path) -> Option<String> {
        let stem = compiler.file_stem()?.to_string_lossy().into_owned();
        let fragment = COMPILER_FRAGMENTS.iter().find(|f| stem.contains(*f))?;

        let mut name = stem.replacen(fragment, &self.tool_name, 1);
        if let Some(ext) = compiler.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        Some(name)
    }

    fn guess_from_name(&self, compiler: &Path) -> Result<PathBuf, ResolutionFailure> {
        let name = self
            .guessed_name(compiler)
            .ok_or(ResolutionFailure::NoCandidate)?;
        let guess = compiler.with_file_name(name);
        if guess.exists() {
            Ok(guess)
        } else {
            Err(ResolutionFailure::GuessMissing(guess))
        }
    }
}

/// Find an entry ending in `suffix`. The name matching the compiler's own
/// prefix wins, then the exact tool name, then the lexicographically first.
fn scan_directory(dir: &Path, suffix: &str, preferred: Option<&str>) -> Option<PathBuf> {
    let mut candidates: Vec<String> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(suffix))
        .collect();

    if let Some(preferred) = preferred.filter(|p| candidates.iter().any(|name| name == p)) {
        return Some(dir.join(preferred));
    }
    if candidates.iter().any(|name| name == suffix) {
        return Some(dir.join(suffix));
    }
    candidates.sort();
    candidates.into_iter().next().map(|name| dir.join(name))
}
