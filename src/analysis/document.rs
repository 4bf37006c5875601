/// Parsed assembly for one source file, as handed to the presentation layer.

use super::asm_parser::ParsedAsm;
use crate::core::types::{AssemblyLine, SourceToAsmMap};
use std::fmt::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AsmDocument {
    source: PathBuf,
    lines: Vec<AssemblyLine>,
    map: SourceToAsmMap,
}

impl AsmDocument {
    pub fn new(source: &Path, parsed: ParsedAsm) -> Self {
        Self {
            source: source.to_path_buf(),
            lines: parsed.lines,
            map: parsed.map,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path of the virtual assembly document shown next to the source.
    pub fn asm_path(&self) -> PathBuf {
        asm_path_for(&self.source)
    }

    pub fn lines(&self) -> &[AssemblyLine] {
        &self.lines
    }

    pub fn map(&self) -> &SourceToAsmMap {
        &self.map
    }

    pub fn asm_lines_for(&self, source_line: u32) -> &[usize] {
        self.map.asm_lines_for(source_line)
    }

    pub fn source_line_of(&self, asm_index: usize) -> Option<u32> {
        self.lines.get(asm_index).and_then(|l| l.source_line)
    }

    /// Rendered text, one line per entry; disassembled lines carry their address.
    pub fn value(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line.address {
                Some(address) => {
                    let _ = writeln!(out, "<{:08x}> {}", address, line.text);
                }
                None => {
                    out.push_str(&line.text);
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Replace the source extension with `.S`.
pub fn asm_path_for(source: &Path) -> PathBuf {
    source.with_extension("S")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::asm_parser::AsmParser;
    use crate::core::types::FilterOptions;

    #[test]
    fn test_value_renders_addresses() {
        let filter = FilterOptions {
            binary: true,
            ..FilterOptions::default()
        };
        let parsed = AsmParser::new().parse("0000000000001139 <main>:\n    1139:\tc3\tret\n", &filter);
        let doc = AsmDocument::new(Path::new("/src/main.c"), parsed);
        assert_eq!(doc.value(), "<00001139> main:\n<00001139> ret\n");
    }

    #[test]
    fn test_bidirectional_lookup() {
        let parsed = AsmParser::new().parse(
            "\t.loc 1 2 0\n\tnop\n\t.loc 1 3 0\n\tnop\n\tret\n",
            &FilterOptions::default(),
        );
        let doc = AsmDocument::new(Path::new("/src/a.c"), parsed);
        assert_eq!(doc.asm_lines_for(3), &[1, 2]);
        assert_eq!(doc.source_line_of(0), Some(2));
        assert_eq!(doc.source_line_of(9), None);
        assert_eq!(doc.value(), "        nop\n        nop\n        ret\n");
    }

    #[test]
    fn test_asm_path() {
        assert_eq!(asm_path_for(Path::new("/src/main.cpp")), PathBuf::from("/src/main.S"));
        assert_eq!(asm_path_for(Path::new("/src/Makefile")), PathBuf::from("/src/Makefile.S"));
    }
}
