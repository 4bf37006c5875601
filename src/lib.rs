pub mod analysis;
pub mod compdb;
pub mod core;
pub mod pipeline;

pub use crate::analysis::{AsmDocument, AsmParser, ParsedAsm};
pub use crate::compdb::{CompileDatabase, DatabaseWatcher, IndexRegistry, ProjectModelSink};
pub use crate::core::config::Settings;
pub use crate::core::error::{Error, Result};
pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::types::{AssemblyLine, CompileEntry, CompileInvocation, FilterOptions, OutputKind, SourceToAsmMap};
pub use crate::pipeline::{CompilationPipeline, PipelineOptions, ToolResolver};
