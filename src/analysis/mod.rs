pub mod asm_parser;
pub mod document;

pub use asm_parser::{AsmParser, ParsedAsm};
pub use document::AsmDocument;
