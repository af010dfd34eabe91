//! Parsed git diffs with character level inline highlighting.

mod charset;
mod inline;
mod parser;

use std::sync::OnceLock;
use std::time::Duration;

use serde::Serialize;

pub use charset::{decode, detect_encoding};
pub use inline::{escape_html, Chunk, ChunkOp, InlineDiffer};
pub use parser::parse_diff;

/// Kind of a single line inside a diff section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Plain,
    Add,
    Delete,
    Section,
}

/// A line of a diff. `content` keeps the leading marker byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub content: String,
    /// Line number on the old side, 0 when the line does not exist there
    pub left_line: usize,
    /// Line number on the new side, 0 when the line does not exist there
    pub right_line: usize,
}

/// Knobs for inline highlighting
#[derive(Debug, Clone)]
pub struct HighlightOptions {
    pub disabled: bool,
    pub edit_cost: usize,
    pub timeout: Duration,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        HighlightOptions {
            disabled: false,
            edit_cost: 100,
            timeout: Duration::from_secs(1),
        }
    }
}

/// A hunk of a diff file
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffSection {
    pub name: String,
    pub lines: Vec<DiffLine>,
    #[serde(skip)]
    differ: OnceLock<InlineDiffer>,
}

impl DiffSection {
    pub fn new(name: impl Into<String>) -> Self {
        DiffSection {
            name: name.into(),
            lines: Vec::new(),
            differ: OnceLock::new(),
        }
    }

    /// Find the line of `kind` that pairs with line number `idx` of the
    /// opposite side. Only lines inside a balanced block of deletions and
    /// additions have a counterpart.
    pub fn line(&self, kind: DiffLineKind, idx: usize) -> Option<&DiffLine> {
        let mut difference: i64 = 0;
        let mut add_count = 0usize;
        let mut del_count = 0usize;
        let mut matched: Option<&DiffLine> = None;

        for line in &self.lines {
            match line.kind {
                DiffLineKind::Add => add_count += 1,
                DiffLineKind::Delete => del_count += 1,
                _ => {
                    if matched.is_some() {
                        break;
                    }
                    difference = line.right_line as i64 - line.left_line as i64;
                    add_count = 0;
                    del_count = 0;
                }
            }

            if line.kind != kind {
                continue;
            }
            match kind {
                DiffLineKind::Delete => {
                    if line.right_line == 0 && line.left_line as i64 == idx as i64 - difference {
                        matched = Some(line);
                    }
                }
                DiffLineKind::Add => {
                    if line.left_line == 0 && line.right_line as i64 == idx as i64 + difference {
                        matched = Some(line);
                    }
                }
                _ => {}
            }
        }

        if add_count == del_count {
            matched
        } else {
            None
        }
    }

    /// The section's diff engine, built on first use and shared afterwards.
    pub fn differ(&self, opts: &HighlightOptions) -> &InlineDiffer {
        self.differ
            .get_or_init(|| InlineDiffer::new(opts.edit_cost, opts.timeout))
    }

    /// Render `line` as HTML, marking the characters that differ from its
    /// counterpart on the other side.
    pub fn computed_inline_diff_for(&self, line: &DiffLine, opts: &HighlightOptions) -> String {
        if opts.disabled {
            return escape_html(&line.content);
        }

        let (old, new) = match line.kind {
            DiffLineKind::Add => match self.line(DiffLineKind::Delete, line.right_line) {
                Some(other) => (other.content.as_str(), line.content.as_str()),
                None => return escape_html(&line.content),
            },
            DiffLineKind::Delete => match self.line(DiffLineKind::Add, line.left_line) {
                Some(other) => (line.content.as_str(), other.content.as_str()),
                None => return escape_html(&line.content),
            },
            _ => return escape_html(&line.content),
        };

        let differ = self.differ(opts);
        let chunks = differ.diff_main(strip_marker(old), strip_marker(new));
        let chunks = differ.cleanup_efficiency(chunks);
        inline::chunks_to_html(&chunks, line.kind)
    }
}

fn strip_marker(content: &str) -> &str {
    content.get(1..).unwrap_or("")
}

/// Change type of a file in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffFileKind {
    Added,
    Changed,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffFile {
    pub name: String,
    pub old_name: String,
    pub index: String,
    pub kind: DiffFileKind,
    pub additions: usize,
    pub deletions: usize,
    pub is_binary: bool,
    pub is_submodule: bool,
    pub is_incomplete: bool,
    pub sections: Vec<DiffSection>,
}

impl DiffFile {
    pub fn new(name: impl Into<String>) -> Self {
        DiffFile {
            name: name.into(),
            old_name: String::new(),
            index: String::new(),
            kind: DiffFileKind::Changed,
            additions: 0,
            deletions: 0,
            is_binary: false,
            is_submodule: false,
            is_incomplete: false,
            sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diff {
    pub files: Vec<DiffFile>,
    pub total_additions: usize,
    pub total_deletions: usize,
    pub is_incomplete: bool,
}

impl Diff {
    pub fn num_files(&self) -> usize {
        self.files.len()
    }
}

/// Ceilings applied while parsing a diff; 0 disables a ceiling.
#[derive(Debug, Clone)]
pub struct DiffLimits {
    pub max_files: usize,
    pub max_file_lines: usize,
    pub max_line_chars: usize,
    pub timeout: Duration,
}

impl Default for DiffLimits {
    fn default() -> Self {
        DiffLimits {
            max_files: 100,
            max_file_lines: 1000,
            max_line_chars: 2000,
            timeout: Duration::from_secs(60),
        }
    }
}
