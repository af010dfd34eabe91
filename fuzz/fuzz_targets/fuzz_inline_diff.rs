#![no_main]

use std::time::Duration;

use forge_core::diff::{ChunkOp, InlineDiffer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (String, String, u8)| {
    let (old, new, edit_cost) = input;
    let differ = InlineDiffer::new(edit_cost as usize, Duration::from_secs(1));
    let chunks = differ.cleanup_efficiency(differ.diff_main(&old, &new));

    // Both sides can be rebuilt from the chunks
    let mut rebuilt_old = String::new();
    let mut rebuilt_new = String::new();
    for chunk in &chunks {
        match chunk.op {
            ChunkOp::Equal => {
                rebuilt_old.push_str(&chunk.text);
                rebuilt_new.push_str(&chunk.text);
            }
            ChunkOp::Delete => rebuilt_old.push_str(&chunk.text),
            ChunkOp::Insert => rebuilt_new.push_str(&chunk.text),
        }
    }
    assert_eq!(rebuilt_old, old);
    assert_eq!(rebuilt_new, new);
});
