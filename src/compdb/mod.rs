pub mod compile_commands;
pub mod registry;
pub mod tokenizer;
pub mod watcher;

pub use compile_commands::{CompileDatabase, ProjectModelSink};
pub use registry::IndexRegistry;
pub use watcher::DatabaseWatcher;
