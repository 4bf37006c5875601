pub mod config;
pub mod error;
pub mod error_parser;
pub mod orchestrator;
pub mod types;
