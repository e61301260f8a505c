//! Property-based tests for output normalization

use mudprod::terminal::output::{clean_text, normalize, TextDecoder};
use proptest::prelude::*;

fn server_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[a-zA-Z .,:>]{0,8}",
            Just("\x1b[1;31m".to_string()),
            Just("\x1b[0m".to_string()),
            Just("\x1b]0;title\x07".to_string()),
            Just("\x1b(B".to_string()),
            Just("\x1b[".to_string()),
            Just("\r\n".to_string()),
            Just("\x07".to_string()),
            Just("\t".to_string()),
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn test_clean_text_is_fixed_point(raw in server_text()) {
        let once = clean_text(&raw);
        prop_assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn test_clean_text_fixed_point_any_text(raw in "\\PC{0,200}") {
        let once = clean_text(&raw);
        prop_assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn test_clean_text_has_no_cr_or_bell(raw in server_text()) {
        let clean = clean_text(&raw);
        prop_assert!(!clean.contains('\r'));
        prop_assert!(!clean.contains('\x07'));
    }

    #[test]
    fn test_lines_are_trimmed_and_non_empty(raw in server_text()) {
        for line in normalize(&raw).lines {
            prop_assert!(!line.trim().is_empty());
            prop_assert_eq!(line.trim_end(), line.as_str());
        }
    }

    #[test]
    fn test_decoder_handles_any_bytes(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)
    ) {
        let mut decoder = TextDecoder::new();
        for chunk in &chunks {
            let _ = decoder.decode(chunk);
        }
        let _ = decoder.finish();
        prop_assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decoder_split_is_transparent(text in "\\PC{0,100}", at in 0usize..400) {
        let bytes = text.as_bytes();
        let at = at.min(bytes.len());
        let mut decoder = TextDecoder::new();
        let mut out = decoder.decode(&bytes[..at]);
        out.push_str(&decoder.decode(&bytes[at..]));
        prop_assert_eq!(out, text);
        prop_assert!(!decoder.has_pending());
    }
}
