//! Filename canonicalization
//!
//! Maps arbitrary user filenames to store-safe names. Applied identically
//! at upload time (to compute the final key) and at download time (to
//! resolve the requested key), so the mapping must stay deterministic and
//! idempotent forever: a change here orphans stored objects.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Characters that survive canonicalization unchanged.
fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '!' | '_' | '.' | '*' | '\'' | '(' | ')')
}

/// Canonicalize a user-supplied filename into a store-safe name.
///
/// Decodes one level of percent-encoding, failing open: escape sequences
/// that do not decode to valid UTF-8 are replaced rather than rejected
/// (the replacement character falls outside the safe set and ends up as
/// `_`). Every remaining character outside `[A-Za-z0-9\-!_.*'()]` becomes
/// `_`. Total, pure, and idempotent: the output contains no `%`, so a
/// second pass decodes nothing.
pub fn canonicalize(raw: &str) -> String {
    let decoded: Cow<'_, str> = percent_decode_str(raw).decode_utf8_lossy();
    decoded
        .chars()
        .map(|c| if is_safe(c) { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_names_pass_through() {
        assert_eq!(canonicalize("report-2024.pdf"), "report-2024.pdf");
        assert_eq!(canonicalize("it's_(fine)!.txt"), "it's_(fine)!.txt");
    }

    #[test]
    fn test_unsafe_chars_replaced() {
        assert_eq!(canonicalize("a b/c\\d.txt"), "a_b_c_d.txt");
        assert_eq!(canonicalize("über.png"), "_ber.png");
        assert_eq!(canonicalize("profile *% .png"), "profile_*__.png");
    }

    #[test]
    fn test_percent_decoding_one_level() {
        assert_eq!(canonicalize("a%20b.txt"), "a_b.txt");
        // %2e decodes to '.', which is safe
        assert_eq!(canonicalize("a%2etxt"), "a.txt");
        // double-encoded input only loses one level
        assert_eq!(canonicalize("a%2520b.txt"), "a_20b.txt");
    }

    #[test]
    fn test_invalid_escapes_fail_open() {
        // '%' not followed by two hex digits is kept by the decoder,
        // then replaced by the charset filter
        assert_eq!(canonicalize("100%.txt"), "100_.txt");
        // invalid UTF-8 after decoding becomes the replacement char, then '_'
        assert_eq!(canonicalize("a%ff.txt"), "a_.txt");
    }

    #[test]
    fn test_idempotent() {
        let cases = [
            "report-2024.pdf",
            "profile *% .png",
            "a%20b.txt",
            "100%.txt",
            "über schön.png",
            "a%2520b.txt",
        ];
        for raw in cases {
            let once = canonicalize(raw);
            assert_eq!(canonicalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(canonicalize("profile *% .png"), canonicalize("profile *% .png"));
    }
}
