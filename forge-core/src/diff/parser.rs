use super::{Diff, DiffFile, DiffFileKind, DiffLimits, DiffLine, DiffLineKind, DiffSection};

const DIFF_HEAD: &str = "diff --git ";

/// Parse unified `git diff` output into files, sections and lines.
///
/// Parsing stops once `limits.max_files` files were read; lines beyond
/// `limits.max_file_lines`, or longer than `limits.max_line_chars`, stop
/// being recorded for the file they belong to.
pub fn parse_diff(patch: &str, limits: &DiffLimits) -> Diff {
    let mut diff = Diff::default();
    let mut current: Option<DiffFile> = None;
    let mut file_lines = 0usize;
    let mut left_line = 0usize;
    let mut right_line = 0usize;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(DIFF_HEAD) {
            if let Some(file) = current.take() {
                diff.files.push(file);
            }
            if limits.max_files > 0 && diff.files.len() >= limits.max_files {
                diff.is_incomplete = true;
                return diff;
            }
            let (old_name, new_name) = parse_file_names(rest);
            let mut file = DiffFile::new(new_name);
            file.old_name = old_name;
            current = Some(file);
            file_lines = 0;
            in_hunk = false;
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        // File headers only come before the first hunk
        if !in_hunk && (line.starts_with("+++ ") || line.starts_with("--- ")) {
            continue;
        }

        match line.as_bytes()[0] {
            b'@' => {
                in_hunk = true;
                if record_line(file, &mut file_lines, line, limits) {
                    let (left, right) = parse_hunk_start(line);
                    left_line = left;
                    right_line = right;
                    let mut section = DiffSection::new(line);
                    section.lines.push(DiffLine {
                        kind: DiffLineKind::Section,
                        content: line.to_string(),
                        left_line: 0,
                        right_line: 0,
                    });
                    file.sections.push(section);
                }
            }
            b' ' => {
                let keep = record_line(file, &mut file_lines, line, limits);
                push_line(file, keep, DiffLineKind::Plain, line, left_line, right_line);
                left_line += 1;
                right_line += 1;
            }
            b'+' => {
                file.additions += 1;
                diff.total_additions += 1;
                let keep = record_line(file, &mut file_lines, line, limits);
                push_line(file, keep, DiffLineKind::Add, line, 0, right_line);
                right_line += 1;
            }
            b'-' => {
                file.deletions += 1;
                diff.total_deletions += 1;
                let keep = record_line(file, &mut file_lines, line, limits);
                push_line(file, keep, DiffLineKind::Delete, line, left_line, 0);
                if left_line > 0 {
                    left_line += 1;
                }
            }
            _ => parse_header_line(file, line),
        }
    }

    if let Some(file) = current.take() {
        diff.files.push(file);
    }
    diff
}

/// Count a content line against the file limits. Returns whether it should
/// still be stored.
fn record_line(file: &mut DiffFile, count: &mut usize, line: &str, limits: &DiffLimits) -> bool {
    if file.is_incomplete {
        return false;
    }
    *count += 1;
    let too_many = limits.max_file_lines > 0 && *count > limits.max_file_lines;
    let too_long = limits.max_line_chars > 0 && line.chars().count() > limits.max_line_chars;
    if too_many || too_long {
        file.is_incomplete = true;
        return false;
    }
    true
}

fn push_line(file: &mut DiffFile, keep: bool, kind: DiffLineKind, line: &str, left: usize, right: usize) {
    if !keep {
        return;
    }
    if let Some(section) = file.sections.last_mut() {
        section.lines.push(DiffLine {
            kind,
            content: line.to_string(),
            left_line: left,
            right_line: right,
        });
    }
}

fn parse_header_line(file: &mut DiffFile, line: &str) {
    if let Some(mode) = line.strip_prefix("new file mode ") {
        file.kind = DiffFileKind::Added;
        file.is_submodule = mode.trim() == "160000";
    } else if let Some(mode) = line.strip_prefix("deleted file mode ") {
        file.kind = DiffFileKind::Deleted;
        file.is_submodule = mode.trim() == "160000";
    } else if let Some(rest) = line.strip_prefix("index ") {
        let ids = rest.split_whitespace().next().unwrap_or("");
        if let Some((old, new)) = ids.split_once("..") {
            file.index = if file.kind == DiffFileKind::Deleted {
                old.to_string()
            } else {
                new.to_string()
            };
        }
        if rest.split_whitespace().nth(1) == Some("160000") {
            file.is_submodule = true;
        }
    } else if let Some(from) = line.strip_prefix("rename from ") {
        file.kind = DiffFileKind::Renamed;
        file.old_name = unquote(from);
    } else if let Some(to) = line.strip_prefix("rename to ") {
        file.kind = DiffFileKind::Renamed;
        file.name = unquote(to);
    } else if line.starts_with("Binary files ") || line == "GIT binary patch" {
        file.is_binary = true;
    }
}

/// Split the `a/<old> b/<new>` tail of a `diff --git` header.
fn parse_file_names(rest: &str) -> (String, String) {
    let quoted = rest.starts_with('"');
    let separator = if quoted { " \"b/" } else { " b/" };

    let Some(middle) = rest.find(separator) else {
        let name = rest.strip_prefix("a/").unwrap_or(rest).to_string();
        return (name.clone(), name);
    };

    let old = rest.get(..middle).unwrap_or("");
    let new = rest.get(middle + 1..).unwrap_or("");
    let old = unquote(old);
    let new = unquote(new);
    (
        old.strip_prefix("a/").unwrap_or(&old).to_string(),
        new.strip_prefix("b/").unwrap_or(&new).to_string(),
    )
}

fn unquote(name: &str) -> String {
    match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => name.to_string(),
    }
}

/// Starting line numbers from `@@ -l[,s] +r[,s] @@`.
fn parse_hunk_start(line: &str) -> (usize, usize) {
    let mut left = 0;
    let mut right = 0;
    for part in line.split_whitespace().skip(1).take(2) {
        let number = |s: &str| {
            s.split(',')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0)
        };
        if let Some(l) = part.strip_prefix('-') {
            left = number(l);
        } else if let Some(r) = part.strip_prefix('+') {
            right = number(r);
        }
    }
    (left, right)
}
