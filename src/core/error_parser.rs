/// Compiler diagnostic parser for GCC/Clang and MSVC stderr output.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn from_str(s: &str) -> Self {
        match s {
            "error" | "fatal error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Note,
        }
    }
}

/// One diagnostic found in compiler stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

pub struct DiagnosticParser {
    gcc_re: Regex,
    msvc_re: Regex,
}

impl DiagnosticParser {
    pub fn new() -> Self {
        Self {
            gcc_re: Regex::new(r"^(.+?):(\d+):(\d+):\s*(fatal error|error|warning|note):\s*(.+)$")
                .expect("gcc diagnostic regex"),
            msvc_re: Regex::new(r"^(.+?)\((\d+)(?:,(\d+))?\):\s*(fatal error|error|warning|note)\s+(\w+):\s*(.+)$")
                .expect("msvc diagnostic regex"),
        }
    }

    pub fn parse(&self, stderr: &str) -> Vec<Diagnostic> {
        stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| self.try_gcc_clang(line).or_else(|| self.try_msvc(line)))
            .collect()
    }

    fn try_gcc_clang(&self, line: &str) -> Option<Diagnostic> {
        let caps = self.gcc_re.captures(line)?;
        Some(Diagnostic {
            file_path: caps[1].to_string(),
            line: caps[2].parse().ok()?,
            column: caps[3].parse().ok()?,
            severity: Severity::from_str(&caps[4]),
            code: String::new(),
            message: caps[5].to_string(),
        })
    }

    fn try_msvc(&self, line: &str) -> Option<Diagnostic> {
        let caps = self.msvc_re.captures(line)?;
        Some(Diagnostic {
            file_path: caps[1].to_string(),
            line: caps[2].parse().ok()?,
            column: caps.get(3).and_then(|c| c.as_str().parse().ok()).unwrap_or(0),
            severity: Severity::from_str(&caps[4]),
            code: caps[5].to_string(),
            message: caps[6].to_string(),
        })
    }
}

impl Default for DiagnosticParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Count (errors, warnings).
pub fn summarize(diagnostics: &[Diagnostic]) -> (usize, usize) {
    diagnostics.iter().fold((0, 0), |(e, w), d| match d.severity {
        Severity::Error => (e + 1, w),
        Severity::Warning => (e, w + 1),
        Severity::Note => (e, w),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcc_format() {
        let parser = DiagnosticParser::new();
        let diags = parser.parse("src/main.cpp:42:10: error: use of undeclared identifier 'foo'");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file_path, "src/main.cpp");
        assert_eq!(diags[0].line, 42);
        assert_eq!(diags[0].column, 10);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].message, "use of undeclared identifier 'foo'");
    }

    #[test]
    fn test_fatal_error() {
        let parser = DiagnosticParser::new();
        let diags = parser.parse("a.c:1:10: fatal error: missing.h: No such file or directory");
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].message, "missing.h: No such file or directory");
    }

    #[test]
    fn test_msvc_format() {
        let parser = DiagnosticParser::new();
        let diags = parser.parse(r"src\main.cpp(42): error C2065: 'foo': undeclared identifier");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file_path, r"src\main.cpp");
        assert_eq!(diags[0].line, 42);
        assert_eq!(diags[0].column, 0);
        assert_eq!(diags[0].code, "C2065");
    }

    #[test]
    fn test_mixed_output_and_summary() {
        let parser = DiagnosticParser::new();
        let output = r#"
In file included from src/a.cpp:3:
src/a.h:10:5: warning: unused variable 'x'
src/a.cpp:20:3: error: no matching function
src/a.cpp:20:3: note: candidate is 'f(int)'
1 error generated.
"#;
        let diags = parser.parse(output);
        assert_eq!(diags.len(), 3);
        assert_eq!(diags[0].file_path, "src/a.h");
        assert_eq!(summarize(&diags), (1, 1));
    }
}
