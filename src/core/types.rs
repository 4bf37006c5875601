/// Common type definitions shared by the database, pipeline, and parser stages.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A normalized compiler invocation for one source file.
///
/// `arguments` never contains `-c`, `-g`, an `-o <file>` pair, or the source
/// path itself; the pipeline appends those per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileInvocation {
    pub source_path: PathBuf,
    pub working_directory: PathBuf,
    pub executable: String,
    pub arguments: Vec<String>,
}

/// One raw record of a compilation database (or of a build-system project model).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompileEntry {
    pub directory: String,
    pub file: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: Option<Vec<String>>,
}

/// What the compiler is asked to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    #[default]
    Assembly,
    LlvmIr,
    Preprocessed,
}

/// Parser behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterOptions {
    /// Input is disassembled-binary text with leading addresses.
    pub binary: bool,
    /// Drop pure assembler directives.
    pub directives: bool,
    /// Drop lines that hold nothing but a comment.
    pub comment_only: bool,
    /// Drop label definitions nothing refers to.
    pub labels: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            binary: false,
            directives: true,
            comment_only: true,
            labels: true,
        }
    }
}

impl FilterOptions {
    /// Keep every line except correlation markers.
    pub fn passthrough() -> Self {
        Self {
            binary: false,
            directives: false,
            comment_only: false,
            labels: false,
        }
    }
}

/// One line of parsed assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyLine {
    pub text: String,
    pub source_line: Option<u32>,
    pub address: Option<u64>,
}

/// Source line number -> indices of the assembly lines generated for it.
///
/// Indices for a key are kept in first-seen order. A source line without an
/// entry produced no code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceToAsmMap {
    mapping: BTreeMap<u32, Vec<usize>>,
}

impl SourceToAsmMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_line: u32, asm_index: usize) {
        let indices = self.mapping.entry(source_line).or_default();
        if !indices.contains(&asm_index) {
            indices.push(asm_index);
        }
    }

    pub fn asm_lines_for(&self, source_line: u32) -> &[usize] {
        self.mapping
            .get(&source_line)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn source_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.mapping.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[usize])> + '_ {
        self.mapping.iter().map(|(line, idx)| (*line, idx.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
