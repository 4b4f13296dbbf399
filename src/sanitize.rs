//! Filesystem-safe key names
//!
//! Origins and keys are both mapped through [`sanitize_key`] before they
//! touch the filesystem. Every run of disallowed characters becomes a
//! single `_`, so `https://host` maps to `https_host`.

/// Replacement for a run of disallowed characters
pub const PLACEHOLDER: char = '_';

/// Printable characters that are never allowed in a file name (sorted)
const RESERVED: [char; 9] = ['"', '*', '/', ':', '<', '>', '?', '\\', '|'];

/// True if `c` may not appear in a stored file name
pub fn is_disallowed(c: char) -> bool {
    (c as u32) < 32 || RESERVED.binary_search(&c).is_ok()
}

/// Map an arbitrary string to a filesystem-safe name
///
/// Idempotent: `sanitize_key(&sanitize_key(s)) == sanitize_key(s)`.
/// A disallowed character directly after a `_` (literal or placeholder)
/// adds nothing.
pub fn sanitize_key(raw: &str) -> String {
    let mut clean = String::with_capacity(raw.len());
    let mut last = None;

    for c in raw.chars() {
        if !is_disallowed(c) {
            clean.push(c);
            last = Some(c);
        } else {
            if last != Some(PLACEHOLDER) {
                clean.push(PLACEHOLDER);
            }
            last = Some(PLACEHOLDER);
        }
    }

    clean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_table_is_sorted() {
        let mut sorted = RESERVED;
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED);
    }

    #[test]
    fn test_origin_collapses_separator_run() {
        assert_eq!(sanitize_key("https://host"), "https_host");
        assert_eq!(
            sanitize_key("https://example.org:8443"),
            "https_example.org_8443"
        );
    }

    #[test]
    fn test_plain_key_unchanged() {
        assert_eq!(sanitize_key("eg.workstation.settings"), "eg.workstation.settings");
        assert_eq!(sanitize_key(""), "");
    }

    #[test]
    fn test_each_reserved_char_replaced() {
        for c in ['"', '<', '>', '|', ':', '*', '?', '\\', '/', '\0', '\n', '\u{1f}'] {
            let raw = format!("a{c}b");
            assert_eq!(sanitize_key(&raw), "a_b", "char {:?}", c);
        }
    }

    #[test]
    fn test_only_disallowed_yields_single_placeholder() {
        assert_eq!(sanitize_key("/"), "_");
        assert_eq!(sanitize_key("<>|:*?\\/\"\t\r\n\0"), "_");
    }

    #[test]
    fn test_literal_underscore_absorbs_following_run() {
        assert_eq!(sanitize_key("a_:b"), "a_b");
        assert_eq!(sanitize_key("a:_b"), "a__b");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "https://example.org",
            "a:_:b",
            "__//__",
            "key with spaces",
            "ümlaut/ключ",
            "..",
            "\u{7f}del",
        ];
        for s in samples {
            let once = sanitize_key(s);
            assert_eq!(sanitize_key(&once), once, "input {:?}", s);
        }
    }

    #[test]
    fn test_dots_are_not_disallowed() {
        assert!(!is_disallowed('.'));
        assert_eq!(sanitize_key(".."), "..");
    }
}
