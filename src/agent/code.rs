//! The structured artifact produced by generation: explanation, imports, code.

use std::fmt;

use serde::{Deserialize, Serialize};

const FENCE: &str = "```";
/// Language tag written on rendered fences.
pub const FENCE_LANG: &str = "julia";

/// Generated code split into explanation, import statements and body.
///
/// Either `imports` and `code` are both empty (no code was produced) or
/// `code` is non-empty. `imports` holds only `using`/`import` lines and
/// `code` never starts with one. Constructors normalise input to keep that
/// true.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub prefix: String,
    pub imports: String,
    pub code: String,
}

impl CodeBlock {
    pub fn new(
        prefix: impl Into<String>,
        imports: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        let prefix = prefix.into().trim().to_string();
        let imports = imports.into();
        let code = code.into();
        let source = if imports.trim().is_empty() {
            code
        } else {
            format!("{imports}\n{code}")
        };
        let (imports, code) = split_imports(&source);
        if code.is_empty() {
            // An import-only snippet is still code worth running.
            return Self {
                prefix,
                imports: String::new(),
                code: imports,
            };
        }
        Self {
            prefix,
            imports,
            code,
        }
    }

    /// A response with no code at all.
    pub fn prose(prefix: impl Into<String>) -> Self {
        Self::new(prefix, "", "")
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty()
    }

    /// Source executed by the full validation phase.
    pub fn combined_source(&self) -> String {
        if self.imports.is_empty() {
            self.code.clone()
        } else {
            format!("{}\n{}", self.imports, self.code)
        }
    }

    /// Contents written to disk.
    pub fn file_contents(&self) -> String {
        if self.imports.is_empty() {
            format!("{}\n", self.code)
        } else {
            format!("{}\n\n{}\n", self.imports, self.code)
        }
    }

    /// Display format: prefix, blank line, fenced code.
    ///
    /// `CodeBlock::parse(&block.render()) == block` for every block whose
    /// text holds no fence line of its own.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return self.prefix.clone();
        }
        let mut out = String::new();
        if !self.prefix.is_empty() {
            out.push_str(&self.prefix);
            out.push_str("\n\n");
        }
        out.push_str(FENCE);
        out.push_str(FENCE_LANG);
        out.push('\n');
        if !self.imports.is_empty() {
            out.push_str(&self.imports);
            out.push_str("\n\n");
        }
        out.push_str(&self.code);
        out.push('\n');
        out.push_str(FENCE);
        out
    }

    /// Parse a model response. Text without a fenced code region becomes a
    /// prose-only block.
    pub fn parse(text: &str) -> Self {
        Self::extract(text).unwrap_or_else(|| Self::prose(text))
    }

    /// The first fenced region of `text`, if it holds any code.
    ///
    /// Text before the fence is the prefix. Leading `using`/`import` lines of
    /// the region become `imports`, the rest is `code`. An unterminated fence
    /// runs to the end of the text.
    pub fn extract(text: &str) -> Option<Self> {
        let lines: Vec<&str> = text.lines().collect();
        let open = lines
            .iter()
            .position(|line| line.trim_start().starts_with(FENCE))?;
        let close = lines[open + 1..]
            .iter()
            .position(|line| line.trim() == FENCE)
            .map_or(lines.len(), |offset| open + 1 + offset);

        let prefix = lines[..open].join("\n");
        let body = lines[open + 1..close].join("\n");

        let block = Self::new(prefix, "", body);
        (!block.is_empty()).then_some(block)
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn is_import_line(line: &str) -> bool {
    let line = line.trim_start();
    ["using ", "import "]
        .iter()
        .any(|keyword| line.starts_with(keyword))
}

/// Split leading `using`/`import` lines (and blank lines among them) off
/// `source`.
fn split_imports(source: &str) -> (String, String) {
    let lines: Vec<&str> = source.lines().collect();
    let split = lines
        .iter()
        .position(|line| !(line.trim().is_empty() || is_import_line(line)))
        .unwrap_or(lines.len());
    let imports = lines[..split]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (imports, trim_blank_lines(&lines[split..].join("\n")))
}

fn trim_blank_lines(text: &str) -> String {
    let trimmed = text.trim_end();
    let start = trimmed
        .lines()
        .take_while(|line| line.trim().is_empty())
        .map(|line| line.len() + 1)
        .sum::<usize>();
    trimmed.get(start..).unwrap_or("").to_string()
}
