//! Line store for the function under analysis.

/// Immutable source text of one C/C++ function plus its line split.
///
/// Lines are produced with `split('\n')`, so a trailing newline yields a final
/// empty line and `line_count` matches what the policy sees when it counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFunction {
    text: String,
    lines: Vec<String>,
}

impl SourceFunction {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let lines = text.split('\n').map(str::to_string).collect();
        Self { text, lines }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

/// True for lines the forward scanners ignore: blank lines and lines that
/// open with a `//` or `/*` comment.
pub fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("/*")
}
