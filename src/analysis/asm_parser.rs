/// Assembly parser.
/// Turns compiler-emitted (or disassembled) text into display lines and maps
/// source lines to the assembly generated for them.

use crate::core::config::TAB_STOP;
use crate::core::types::{AssemblyLine, FilterOptions, SourceToAsmMap};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Parser output: display lines plus the source -> assembly index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAsm {
    pub lines: Vec<AssemblyLine>,
    pub map: SourceToAsmMap,
}

impl ParsedAsm {
    fn push(&mut self, text: String, source_line: Option<u32>, address: Option<u64>) {
        let index = self.lines.len();
        if let Some(line) = source_line {
            self.map.insert(line, index);
        }
        self.lines.push(AssemblyLine {
            text,
            source_line,
            address,
        });
    }

    pub fn source_line_of(&self, asm_index: usize) -> Option<u32> {
        self.lines.get(asm_index).and_then(|l| l.source_line)
    }
}

pub struct AsmParser {
    label_def: Regex,
    bare_label_def: Regex,
    loc: Regex,
    stabn: Regex,
    file: Regex,
    section: Regex,
    cfi_endproc: Regex,
    data_defn: Regex,
    comment_only: Regex,
    symbol_decl: Regex,
    identifier: Regex,
    binary_opcode: Regex,
    binary_label: Regex,
}

impl AsmParser {
    pub fn new() -> Self {
        let re = |pattern: &str| Regex::new(pattern).expect("assembly regex");
        Self {
            label_def: re(r"^\s*([.A-Za-z_$][\w$.@]*):(?:[^:]|$)"),
            // demangled names such as `foo(int) const:` at column 0
            bare_label_def: re(r"^([^\s#;@].*?):\s*(?:[#;@].*)?$"),
            loc: re(r"^\s*\.loc\s+(\d+)\s+(\d+)"),
            stabn: re(r"^\s*\.stabn\s+(\d+)\s*,\s*0\s*,\s*(\d+)\s*,"),
            file: re(r#"^\s*\.file\s+(?:(\d+)\s+)?"([^"]*)"(?:\s+"([^"]*)")?"#),
            section: re(
                r#"^\s*\.(?:(text|data|bss)\b|(?:section|pushsection)\s+"?([^\s",]+)|(popsection|previous)\b)"#,
            ),
            cfi_endproc: re(r"^\s*\.cfi_endproc\b"),
            data_defn: re(
                r"^\s*\.(?:string|asciz|ascii|[1248]?byte|short|x?word|long|quad|value|zero|float|double|octa|hword|int)\b",
            ),
            comment_only: re(r"^\s*(?:(?:#|@|;|//).*|/\*.*\*/)$"),
            symbol_decl: re(r"^\s*\.(?:globl|global|weak|type)\s+([^\s,]+)"),
            identifier: re(r"[.A-Za-z_$][\w$.]*"),
            binary_opcode: re(r"^\s*([0-9a-fA-F]+):\s*(?:[0-9a-fA-F]{2}[ \t])*\s*(.*)$"),
            binary_label: re(r"^([0-9a-fA-F]+)\s+<(.+)>:\s*$"),
        }
    }

    /// Parse `asm` with no knowledge of the main source file name.
    pub fn parse(&self, asm: &str, filter: &FilterOptions) -> ParsedAsm {
        self.parse_with_main(asm, filter, None)
    }

    /// Parse output compiled from `source`; correlation markers that point at
    /// other files (headers, inlined code) do not map.
    pub fn parse_for_source(&self, asm: &str, filter: &FilterOptions, source: &Path) -> ParsedAsm {
        let main = source.file_name().map(|n| n.to_string_lossy().into_owned());
        self.parse_with_main(asm, filter, main)
    }

    fn parse_with_main(&self, asm: &str, filter: &FilterOptions, main: Option<String>) -> ParsedAsm {
        let lines = split_lines(asm);
        if filter.binary {
            self.parse_binary(&lines, filter)
        } else {
            self.parse_text(&lines, filter, main)
        }
    }

    fn parse_text(&self, raw_lines: &[&str], filter: &FilterOptions, main: Option<String>) -> ParsedAsm {
        let used = if filter.labels {
            Some(self.used_labels(raw_lines))
        } else {
            None
        };
        let mut files = FileTable::new(main);
        let mut cursor: Option<u32> = None;
        let mut in_debug = false;
        let mut prev_label_kept = false;
        let mut parsed = ParsedAsm::default();

        for raw in raw_lines {
            if let Some(caps) = self.loc.captures(raw) {
                cursor = files.correlate(parse_u32(&caps[1]), parse_u32(&caps[2]));
                continue;
            }
            if let Some(caps) = self.stabn.captures(raw) {
                // N_SLINE
                if &caps[1] == "68" {
                    cursor = Some(parse_u32(&caps[2])).filter(|l| *l > 0);
                }
                continue;
            }
            if let Some(caps) = self.file.captures(raw) {
                let index = caps.get(1).map(|m| parse_u32(m.as_str()));
                if let Some(name) = caps.get(3).or_else(|| caps.get(2)) {
                    files.record(index, name.as_str());
                }
            }

            let section = self.section_name(raw);
            if let Some(name) = &section {
                in_debug = is_debug_section(name);
                cursor = None;
                prev_label_kept = false;
            }
            if filter.directives && in_debug {
                continue;
            }
            if filter.comment_only && self.comment_only.is_match(raw) {
                continue;
            }

            let end_block = self.cfi_endproc.is_match(raw);
            let keep = if let Some(label) = self.label_name(raw) {
                prev_label_kept = used.as_ref().map_or(true, |u| u.is_used(label));
                prev_label_kept
            } else if raw.trim_start().starts_with('.') {
                !filter.directives
                    || section.is_some()
                    || (prev_label_kept && self.data_defn.is_match(raw))
            } else {
                true
            };

            if keep {
                parsed.push(normalize(raw), cursor, None);
            }
            if end_block {
                cursor = None;
            }
        }

        parsed
    }

    fn parse_binary(&self, raw_lines: &[&str], filter: &FilterOptions) -> ParsedAsm {
        let mut parsed = ParsedAsm::default();
        for raw in raw_lines {
            if let Some(caps) = self.binary_label.captures(raw) {
                let address = u64::from_str_radix(&caps[1], 16).ok();
                parsed.push(format!("{}:", &caps[2]), None, address);
            } else if let Some(caps) = self.binary_opcode.captures(raw) {
                let address = u64::from_str_radix(&caps[1], 16).ok();
                parsed.push(normalize(&caps[2]), None, address);
            } else if !filter.directives {
                parsed.push(normalize(raw), None, None);
            }
        }
        parsed
    }

    fn label_name<'a>(&self, raw: &'a str) -> Option<&'a str> {
        self.label_def
            .captures(raw)
            .or_else(|| self.bare_label_def.captures(raw))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    fn section_name(&self, raw: &str) -> Option<String> {
        let caps = self.section.captures(raw)?;
        if let Some(simple) = caps.get(1) {
            return Some(format!(".{}", simple.as_str()));
        }
        if let Some(named) = caps.get(2) {
            return Some(named.as_str().to_string());
        }
        Some(".text".to_string())
    }

    /// Labels referenced from instructions, data, or symbol declarations.
    /// Debug sections are ignored, they refer to every label.
    fn used_labels(&self, raw_lines: &[&str]) -> UsedLabels {
        let mut used = UsedLabels::default();
        let mut in_debug = false;

        for raw in raw_lines {
            if let Some(name) = self.section_name(raw) {
                in_debug = is_debug_section(&name);
                continue;
            }
            if in_debug || self.comment_only.is_match(raw) {
                continue;
            }
            let trimmed = raw.trim_start();
            if let Some(caps) = self.symbol_decl.captures(raw) {
                used.tokens.insert(caps[1].to_string());
                used.add_to_corpus(trimmed);
                continue;
            }
            if self.label_name(raw).is_some() {
                continue;
            }
            if trimmed.starts_with('.') && !self.data_defn.is_match(raw) {
                continue;
            }
            for m in self.identifier.find_iter(trimmed) {
                used.tokens.insert(m.as_str().to_string());
            }
            used.add_to_corpus(trimmed);
        }

        used
    }
}

impl Default for AsmParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct UsedLabels {
    tokens: HashSet<String>,
    corpus: String,
}

impl UsedLabels {
    fn add_to_corpus(&mut self, line: &str) {
        self.corpus.push_str(line);
        self.corpus.push('\n');
    }

    fn is_used(&self, label: &str) -> bool {
        if self.tokens.contains(label) {
            return true;
        }
        // demangled names don't tokenize; fall back to a substring search
        !is_plain_identifier(label) && self.corpus.contains(label)
    }
}

/// `.file` table; decides which correlation markers belong to the main source.
struct FileTable {
    main: Option<String>,
    files: HashMap<u32, String>,
}

impl FileTable {
    fn new(main: Option<String>) -> Self {
        Self {
            main,
            files: HashMap::new(),
        }
    }

    fn record(&mut self, index: Option<u32>, name: &str) {
        match index {
            Some(index) => {
                self.files.insert(index, name.to_string());
            }
            None => {
                if self.main.is_none() {
                    self.main = file_name(name);
                }
            }
        }
    }

    fn correlate(&self, index: u32, line: u32) -> Option<u32> {
        if line == 0 {
            return None;
        }
        let is_main = match (&self.main, self.files.get(&index)) {
            (Some(main), Some(path)) => file_name(path).as_deref() == Some(main.as_str()),
            _ => index == 1,
        };
        if is_main {
            Some(line)
        } else {
            None
        }
    }
}

fn file_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn is_debug_section(name: &str) -> bool {
    name.starts_with(".debug") || name.starts_with(".note")
}

fn is_plain_identifier(label: &str) -> bool {
    label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '$'))
}

fn parse_u32(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

fn normalize(raw: &str) -> String {
    let mut text = expand_tabs(raw);
    text.truncate(text.trim_end().len());
    text
}

/// Split on `\n` / `\r\n`, dropping the empty line after a final terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Expand tabs to the next multiple of `TAB_STOP`; the column counter runs
/// across the whole line.
pub fn expand_tabs(line: &str) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + TAB_STOP);
    let mut column = 0;
    for ch in line.chars() {
        if ch == '\t' {
            let spaces = TAB_STOP - column % TAB_STOP;
            out.extend(std::iter::repeat(' ').take(spaces));
            column += spaces;
        } else {
            out.push(ch);
            column += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const GCC_OUTPUT: &str = "\t.file\t\"main.c\"
\t.text
.Ltext0:
\t.section\t.rodata
.LC0:
\t.string\t\"hi\"
.LC1:
\t.string\t\"unused\"
\t.text
\t.globl\tmain
\t.type\tmain, @function
main:
.LFB0:
\t.file 1 \"main.c\"
\t.loc 1 3 12
\t.cfi_startproc
\tpushq\t%rbp
\tmovq\t%rsp, %rbp
\t.loc 1 4 5
\tleaq\t.LC0(%rip), %rdi
\tcall\tputs@PLT
\t.loc 1 5 1
\tpopq\t%rbp
\tret
\t.cfi_endproc
.LFE0:
\t.size\tmain, .-main
\t.section\t.debug_info,\"\",@progbits
.Ldebug_info0:
\t.long\t0x8c
\t.quad\t.LFB0
\t.quad\t.LFE0
\t.ident\t\"GCC: 12.2.0\"
\t.section\t.note.GNU-stack,\"\",@progbits
";

    fn texts(parsed: &ParsedAsm) -> Vec<&str> {
        parsed.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_markers_build_map() {
        let asm = "\t.loc 1 10 0\n\tmovl\t$1, %eax\n\taddl\t$2, %eax\n\t.loc 1 11 0\n\tret\n";
        let parsed = AsmParser::new().parse(asm, &FilterOptions::default());
        assert_eq!(parsed.lines.len(), 3);
        assert!(parsed.lines.iter().all(|l| !l.text.contains(".loc")));
        assert_eq!(parsed.map.asm_lines_for(10), &[0, 1]);
        assert_eq!(parsed.map.asm_lines_for(11), &[2]);
        assert_eq!(parsed.map.len(), 2);
        assert_eq!(parsed.source_line_of(2), Some(11));
    }

    #[test]
    fn test_gcc_output_filtered() {
        let parsed = AsmParser::new().parse(GCC_OUTPUT, &FilterOptions::default());
        assert_eq!(
            texts(&parsed),
            vec![
                "        .text",
                "        .section        .rodata",
                ".LC0:",
                "        .string \"hi\"",
                "        .text",
                "main:",
                "        pushq   %rbp",
                "        movq    %rsp, %rbp",
                "        leaq    .LC0(%rip), %rdi",
                "        call    puts@PLT",
                "        popq    %rbp",
                "        ret",
            ]
        );
        assert_eq!(parsed.map.asm_lines_for(3), &[6, 7]);
        assert_eq!(parsed.map.asm_lines_for(4), &[8, 9]);
        assert_eq!(parsed.map.asm_lines_for(5), &[10, 11]);
        assert_eq!(parsed.source_line_of(5), None);
    }

    #[test]
    fn test_passthrough_keeps_directives_but_not_markers() {
        let parsed = AsmParser::new().parse(GCC_OUTPUT, &FilterOptions::passthrough());
        let texts = texts(&parsed);
        assert!(texts.iter().any(|t| t.contains(".cfi_startproc")));
        assert!(texts.iter().any(|t| t.contains(".LC1:")));
        assert!(texts.iter().any(|t| t.contains(".debug_info")));
        assert!(!texts.iter().any(|t| t.contains(".loc ")));
        let startproc = texts.iter().position(|t| t.contains(".cfi_startproc")).unwrap();
        assert_eq!(parsed.lines[startproc].source_line, Some(3));
        let size = texts.iter().position(|t| t.contains(".size")).unwrap();
        assert_eq!(parsed.lines[size].source_line, None);
    }

    #[test]
    fn test_every_mapped_index_is_valid() {
        let parsed = AsmParser::new().parse(GCC_OUTPUT, &FilterOptions::passthrough());
        for (line, indices) in parsed.map.iter() {
            assert!((1..=5).contains(&line));
            for &i in indices {
                assert!(i < parsed.lines.len());
                assert_eq!(parsed.lines[i].source_line, Some(line));
            }
        }
    }

    #[test]
    fn test_markers_for_other_files_do_not_map() {
        let asm = "\t.file 1 \"main.cpp\"\n\t.file 2 \"/usr/include/c++/vector\"\n\
                   \t.loc 1 7 3\n\tmovl\t$0, %eax\n\t.loc 2 1040 7\n\tcall\tfoo\n\t.loc 1 8 1\n\tret\n";
        let parsed = AsmParser::new().parse_for_source(
            asm,
            &FilterOptions::default(),
            Path::new("/proj/main.cpp"),
        );
        assert_eq!(parsed.lines.len(), 3);
        assert_eq!(parsed.map.asm_lines_for(7), &[0]);
        assert!(parsed.map.asm_lines_for(1040).is_empty());
        assert_eq!(parsed.lines[1].source_line, None);
        assert_eq!(parsed.map.asm_lines_for(8), &[2]);
    }

    #[test]
    fn test_clang_dwarf5_file_zero() {
        let asm = "\t.file\t\"main.c\"\n\t.file\t0 \"/proj\" \"main.c\" md5 0xabc\n\
                   \t.loc\t0 2 0\n\txorl\t%eax, %eax\n\tretq\n";
        let parsed = AsmParser::new().parse(asm, &FilterOptions::default());
        assert_eq!(parsed.map.asm_lines_for(2), &[0, 1]);
    }

    #[test]
    fn test_loc_line_zero_clears_cursor() {
        let asm = "\t.loc 1 4 0\n\tnop\n\t.loc 1 0 0\n\tnop\n";
        let parsed = AsmParser::new().parse(asm, &FilterOptions::default());
        assert_eq!(parsed.lines[0].source_line, Some(4));
        assert_eq!(parsed.lines[1].source_line, None);
    }

    #[test]
    fn test_stabs_markers() {
        let asm = "\t.stabn 68,0,12,.LM1-.LFBB1\n\tret\n";
        let parsed = AsmParser::new().parse(asm, &FilterOptions::default());
        assert_eq!(texts(&parsed), vec!["        ret"]);
        assert_eq!(parsed.map.asm_lines_for(12), &[0]);
    }

    #[test]
    fn test_demangled_labels_kept_when_referenced() {
        let asm = "foo(int):\n\tret\nbar(double) const:\n\tret\nmain:\n\tcall\tfoo(int)\n\t.globl\tmain\n";
        let parsed = AsmParser::new().parse(asm, &FilterOptions::default());
        let texts = texts(&parsed);
        assert!(texts.contains(&"foo(int):"));
        assert!(!texts.contains(&"bar(double) const:"));
        assert!(texts.contains(&"main:"));
    }

    #[test]
    fn test_namespaced_labels_use_full_name() {
        let parser = AsmParser::new();
        assert_eq!(parser.label_name("ns::unused():"), Some("ns::unused()"));
        assert_eq!(
            parser.label_name("std::vector<int>::size() const:"),
            Some("std::vector<int>::size() const")
        );
        assert_eq!(parser.label_name("main:"), Some("main"));
        assert_eq!(parser.label_name(".L2:\t# loop"), Some(".L2"));

        let asm = "ns::unused():\n\tret\nns::used():\n\tret\nmain:\n\tcall\tns::used()\n\t.globl\tmain\n";
        let parsed = parser.parse(asm, &FilterOptions::default());
        let texts = texts(&parsed);
        assert!(!texts.contains(&"ns::unused():"));
        assert!(texts.contains(&"ns::used():"));
        assert!(texts.contains(&"main:"));
    }

    #[test]
    fn test_unused_local_labels_dropped() {
        let asm = ".L2:\n\tjmp\t.L3\n.L3:\n\tret\n";
        let parsed = AsmParser::new().parse(asm, &FilterOptions::default());
        assert_eq!(texts(&parsed), vec!["        jmp     .L3", ".L3:", "        ret"]);
    }

    #[test]
    fn test_comment_only_lines() {
        let asm = "\t// prologue\n\t@ arm comment\n\tmov\tr0, #0 @ zero\n";
        let filtered = AsmParser::new().parse(asm, &FilterOptions::default());
        assert_eq!(texts(&filtered), vec!["        mov     r0, #0 @ zero"]);
        let kept = AsmParser::new().parse(asm, &FilterOptions::passthrough());
        assert_eq!(kept.lines.len(), 3);
    }

    #[test]
    fn test_binary_mode_addresses() {
        let dump = "\nmain.o:     file format elf64-x86-64\n\nDisassembly of section .text:\n\n\
                    0000000000000000 <main>:\n   0:\t55                   \tpush   %rbp\n\
                    \x20  1:\t48 89 e5             \tmov    %rsp,%rbp\n   4:\tc3                   \tret\n";
        let filter = FilterOptions {
            binary: true,
            ..FilterOptions::default()
        };
        let parsed = AsmParser::new().parse(dump, &filter);
        assert_eq!(
            texts(&parsed),
            vec!["main:", "push   %rbp", "mov    %rsp,%rbp", "ret"]
        );
        assert_eq!(parsed.lines[0].address, Some(0));
        assert_eq!(parsed.lines[2].address, Some(1));
        assert_eq!(parsed.lines[3].address, Some(4));
        assert!(parsed.map.is_empty());
    }

    #[test]
    fn test_binary_mode_template_labels() {
        let filter = FilterOptions {
            binary: true,
            ..FilterOptions::default()
        };
        let dump = "0000000000001139 <void foo<int>(int)>:\n    1139:\tc3\tret\n\
                    0000000000001140 <std::map<int, int>::operator[](int const&)>:\n";
        let parsed = AsmParser::new().parse(dump, &filter);
        assert_eq!(
            texts(&parsed),
            vec![
                "void foo<int>(int):",
                "ret",
                "std::map<int, int>::operator[](int const&):",
            ]
        );
        assert_eq!(parsed.lines[0].address, Some(0x1139));
        assert_eq!(parsed.lines[2].address, Some(0x1140));
    }

    #[test]
    fn test_binary_mode_ignores_debug_markers() {
        let dump = "  10:\tc3\tret\n\t.loc 1 3 0\n";
        let filter = FilterOptions {
            binary: true,
            directives: false,
            ..FilterOptions::default()
        };
        let parsed = AsmParser::new().parse(dump, &filter);
        assert_eq!(parsed.lines.len(), 2);
        assert!(parsed.map.is_empty());
        assert!(parsed.lines.iter().all(|l| l.source_line.is_none()));
    }

    #[test]
    fn test_expand_tabs_per_line() {
        assert_eq!(expand_tabs("a\tb"), "a       b");
        assert_eq!(expand_tabs("a\tb").find('b'), Some(8));
        assert_eq!(expand_tabs("\tmovl\t$1"), "        movl    $1");
        assert_eq!(expand_tabs("abcdefgh\tx"), "abcdefgh        x");
        // the counter restarts on each line
        let parsed = AsmParser::new().parse("abc\tdef\na\tb\n", &FilterOptions::passthrough());
        assert_eq!(parsed.lines[1].text.find('b'), Some(8));
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\r\nb\n"), vec!["a", "b"]);
        assert_eq!(split_lines("a\n\n"), vec!["a", ""]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_malformed_input_passes_through() {
        let parser = AsmParser::new();
        let parsed = parser.parse("???\n:::\n\t.loc x y\n", &FilterOptions::passthrough());
        assert_eq!(parsed.lines.len(), 3);
        assert!(parsed.map.is_empty());
        let parsed = parser.parse("???\n:::\n\t.loc x y\n", &FilterOptions::default());
        assert_eq!(parsed.lines[0].text, "???");
        assert!(parsed.map.is_empty());
    }
}
