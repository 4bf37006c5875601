pub mod runner;
pub mod single_flight;
pub mod tool_resolver;

pub use runner::{CompilationPipeline, PipelineOptions};
pub use tool_resolver::ToolResolver;
