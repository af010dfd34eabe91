#![no_main]

use forge_core::paths::{clean_path, is_clean_request_path};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|path: &str| {
    let cleaned = clean_path(path);

    // Cleaning is idempotent
    assert_eq!(clean_path(&cleaned), cleaned, "clean_path not idempotent for {:?}", path);

    // A rooted path never climbs above the root
    if path.starts_with('/') {
        assert!(cleaned.starts_with('/'));
        assert!(!cleaned.split('/').any(|e| e == ".." || e == "."), "{:?}", cleaned);
        assert!(is_clean_request_path(&cleaned));
    }
});
