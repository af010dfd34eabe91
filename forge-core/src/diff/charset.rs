//! Decoding of diff content that is not UTF-8.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

/// Guess the encoding of a file's diff content. Valid UTF-8 is taken as is.
pub fn detect_encoding(content: &[u8]) -> &'static Encoding {
    if std::str::from_utf8(content).is_ok() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(content, true);
    detector.guess(None, true)
}

/// Decode `bytes`, replacing malformed sequences with U+FFFD.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}
