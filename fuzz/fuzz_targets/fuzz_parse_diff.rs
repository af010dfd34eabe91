#![no_main]

use arbitrary::Arbitrary;
use forge_core::diff::{parse_diff, DiffLimits};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    patch: String,
    max_files: u8,
    max_file_lines: u8,
    max_line_chars: u8,
}

fuzz_target!(|input: Input| {
    let limits = DiffLimits {
        max_files: input.max_files as usize,
        max_file_lines: input.max_file_lines as usize,
        max_line_chars: input.max_line_chars as usize,
        ..DiffLimits::default()
    };
    let diff = parse_diff(&input.patch, &limits);

    if limits.max_files > 0 {
        assert!(diff.num_files() <= limits.max_files);
    }
    let additions: usize = diff.files.iter().map(|f| f.additions).sum();
    let deletions: usize = diff.files.iter().map(|f| f.deletions).sum();
    assert_eq!(additions, diff.total_additions);
    assert_eq!(deletions, diff.total_deletions);
});
