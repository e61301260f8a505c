//! Property-based tests for prompt detection

use mudprod::terminal::prompt::{last_visible_char, tail, PromptDetector};
use mudprod::PromptConfig;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_end_chars_match_last_visible_char(text in "[a-zA-Z0-9 .,>:\\]\n\t]{0,80}") {
        let detector = PromptDetector::from_config(&PromptConfig::end_chars_only(">")).unwrap();
        prop_assert_eq!(detector.is_prompt(&text), last_visible_char(&text) == Some('>'));
    }

    #[test]
    fn test_whitespace_is_never_prompt(text in "[ \t\n\r]{0,20}") {
        let detector = PromptDetector::from_config(&PromptConfig::default()).unwrap();
        prop_assert!(!detector.is_prompt(&text));
    }

    #[test]
    fn test_tail_is_bounded_suffix(text in "\\PC{0,300}", max in 0usize..400) {
        let t = tail(&text, max);
        prop_assert!(t.len() <= max);
        prop_assert!(text.ends_with(t));
    }
}
