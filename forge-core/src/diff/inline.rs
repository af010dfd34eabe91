use std::time::Duration;

use similar::{Algorithm, ChangeTag, TextDiff};

use super::DiffLineKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOp {
    Equal,
    Insert,
    Delete,
}

/// A run of characters sharing one edit operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub op: ChunkOp,
    pub text: String,
}

impl Chunk {
    fn new(op: ChunkOp, text: impl Into<String>) -> Self {
        Chunk {
            op,
            text: text.into(),
        }
    }
}

/// Character level diff engine used for inline highlighting.
#[derive(Debug, Clone)]
pub struct InlineDiffer {
    edit_cost: usize,
    timeout: Duration,
}

impl InlineDiffer {
    pub fn new(edit_cost: usize, timeout: Duration) -> Self {
        InlineDiffer { edit_cost, timeout }
    }

    /// Diff two strings character by character.
    pub fn diff_main(&self, old: &str, new: &str) -> Vec<Chunk> {
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .timeout(self.timeout)
            .diff_chars(old, new);

        let mut chunks: Vec<Chunk> = Vec::new();
        for change in diff.iter_all_changes() {
            let op = match change.tag() {
                ChangeTag::Equal => ChunkOp::Equal,
                ChangeTag::Insert => ChunkOp::Insert,
                ChangeTag::Delete => ChunkOp::Delete,
            };
            match chunks.last_mut() {
                Some(last) if last.op == op => last.text.push_str(change.value()),
                _ => chunks.push(Chunk::new(op, change.value())),
            }
        }
        chunks
    }

    /// Fold short equalities that sit between edits into the edits, so the
    /// highlighted spans stay readable.
    pub fn cleanup_efficiency(&self, mut diffs: Vec<Chunk>) -> Vec<Chunk> {
        let mut changes = false;
        let mut equalities: Vec<usize> = Vec::new();
        let mut last_equality: Option<String> = None;
        let mut pointer: isize = 0;
        let mut pre_ins = false;
        let mut pre_del = false;
        let mut post_ins = false;
        let mut post_del = false;

        while (pointer as usize) < diffs.len() {
            let at = pointer as usize;
            if diffs[at].op == ChunkOp::Equal {
                if diffs[at].text.chars().count() < self.edit_cost && (post_ins || post_del) {
                    equalities.push(at);
                    pre_ins = post_ins;
                    pre_del = post_del;
                    last_equality = Some(diffs[at].text.clone());
                } else {
                    equalities.clear();
                    last_equality = None;
                }
                post_ins = false;
                post_del = false;
            } else {
                if diffs[at].op == ChunkOp::Delete {
                    post_del = true;
                } else {
                    post_ins = true;
                }

                if let (Some(equality), Some(&eq_at)) = (last_equality.clone(), equalities.last()) {
                    let edges = [pre_ins, pre_del, post_ins, post_del]
                        .iter()
                        .filter(|edge| **edge)
                        .count();
                    let short = equality.chars().count() < self.edit_cost / 2;
                    if (pre_ins && pre_del && post_ins && post_del) || (short && edges == 3) {
                        diffs.insert(eq_at, Chunk::new(ChunkOp::Delete, equality));
                        diffs[eq_at + 1].op = ChunkOp::Insert;
                        equalities.pop();
                        last_equality = None;
                        if pre_ins && pre_del {
                            post_ins = true;
                            post_del = true;
                            equalities.clear();
                        } else {
                            equalities.pop();
                            pointer = equalities.last().map(|&p| p as isize).unwrap_or(-1);
                            post_ins = false;
                            post_del = false;
                        }
                        changes = true;
                    }
                }
            }
            pointer += 1;
        }

        if changes {
            cleanup_merge(diffs)
        } else {
            diffs
        }
    }
}

/// Coalesce adjacent edits, put deletions before insertions and move text
/// shared by both sides of an edit back into the surrounding equalities.
fn cleanup_merge(diffs: Vec<Chunk>) -> Vec<Chunk> {
    let mut out: Vec<Chunk> = Vec::with_capacity(diffs.len());
    let mut deleted = String::new();
    let mut inserted = String::new();

    for chunk in diffs {
        match chunk.op {
            ChunkOp::Delete => deleted.push_str(&chunk.text),
            ChunkOp::Insert => inserted.push_str(&chunk.text),
            ChunkOp::Equal => {
                flush_edits(&mut out, &mut deleted, &mut inserted);
                push_equal(&mut out, chunk.text);
            }
        }
    }
    flush_edits(&mut out, &mut deleted, &mut inserted);
    out
}

fn flush_edits(out: &mut Vec<Chunk>, deleted: &mut String, inserted: &mut String) {
    let mut suffix = String::new();
    if !deleted.is_empty() && !inserted.is_empty() {
        let prefix_len = common_prefix_len(deleted, inserted);
        if prefix_len > 0 {
            push_equal(out, deleted[..prefix_len].to_string());
            deleted.drain(..prefix_len);
            inserted.drain(..prefix_len);
        }
        let suffix_len = common_suffix_len(deleted, inserted);
        if suffix_len > 0 {
            suffix = deleted[deleted.len() - suffix_len..].to_string();
            deleted.truncate(deleted.len() - suffix_len);
            inserted.truncate(inserted.len() - suffix_len);
        }
    }
    if !deleted.is_empty() {
        out.push(Chunk::new(ChunkOp::Delete, std::mem::take(deleted)));
    }
    if !inserted.is_empty() {
        out.push(Chunk::new(ChunkOp::Insert, std::mem::take(inserted)));
    }
    push_equal(out, suffix);
}

fn push_equal(out: &mut Vec<Chunk>, text: String) {
    if text.is_empty() {
        return;
    }
    match out.last_mut() {
        Some(last) if last.op == ChunkOp::Equal => last.text.push_str(&text),
        _ => out.push(Chunk::new(ChunkOp::Equal, text)),
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(c, _)| c.len_utf8())
        .sum()
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .map(|(c, _)| c.len_utf8())
        .sum()
}

/// Escape text for inclusion in HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render chunks for one side of a changed line pair. Insertions only
/// appear on added lines and deletions only on deleted ones.
pub(crate) fn chunks_to_html(chunks: &[Chunk], kind: DiffLineKind) -> String {
    let mut buf = String::new();
    match kind {
        DiffLineKind::Add => buf.push_str("+ "),
        DiffLineKind::Delete => buf.push_str("- "),
        _ => {}
    }

    for chunk in chunks {
        match (chunk.op, kind) {
            (ChunkOp::Insert, DiffLineKind::Add) => {
                buf.push_str("<span class=\"added-code\">");
                buf.push_str(&escape_html(&chunk.text));
                buf.push_str("</span>");
            }
            (ChunkOp::Delete, DiffLineKind::Delete) => {
                buf.push_str("<span class=\"removed-code\">");
                buf.push_str(&escape_html(&chunk.text));
                buf.push_str("</span>");
            }
            (ChunkOp::Equal, _) => buf.push_str(&escape_html(&chunk.text)),
            _ => {}
        }
    }
    buf
}
