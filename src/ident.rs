//! Identifier derivation: display name → stable, filename-safe slug.
//!
//! A slug is what names a character's JSON file under the characters directory,
//! so it must be ASCII `[a-z0-9-]` only and bounded in length.
//!
//! ```
//! use charsheet::ident::derive_id;
//!
//! assert_eq!(derive_id("Max Rockatansky"), "max-rockatansky");
//! assert_eq!(derive_id("Žluťoučký kůň"), "zlutoucky-kun");
//! assert_eq!(derive_id("   "), "postava");
//! ```

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Substituted when a name contains nothing usable.
pub const FALLBACK_ID: &str = "postava";

/// Upper bound on slug length (in bytes; slugs are pure ASCII).
pub const MAX_ID_LEN: usize = 64;

/// Derive a slug from a display name.
///
/// NFKD-decompose, drop combining marks, lowercase, collapse every run of
/// characters outside `[a-z0-9]` into one `-`, trim hyphens from both ends and
/// cap at [`MAX_ID_LEN`]. An empty result becomes [`FALLBACK_ID`].
///
/// Two different names may produce the same slug; see [`disambiguate`].
pub fn derive_id(name: &str) -> String {
    let folded: String = name
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    let mut slug = String::with_capacity(folded.len());
    let mut in_gap = false;
    for ch in folded.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
            in_gap = false;
        } else if !in_gap {
            slug.push('-');
            in_gap = true;
        }
    }

    let mut slug = slug.trim_matches('-').to_string();
    slug.truncate(MAX_ID_LEN);
    if slug.is_empty() {
        FALLBACK_ID.to_string()
    } else {
        slug
    }
}

/// Return `base` if it is free, otherwise the first `base-N` (N = 2, 3, ...)
/// for which `taken` is false. The result never exceeds [`MAX_ID_LEN`].
pub fn disambiguate(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut n: u32 = 2;
    loop {
        let suffix = format!("-{n}");
        let keep = MAX_ID_LEN.saturating_sub(suffix.len()).min(base.len());
        let stem = base[..keep].trim_end_matches('-');
        let candidate = format!("{stem}{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        n = n.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_collapses_separators() {
        assert_eq!(derive_id("Příliš  --  žluťoučký!"), "prilis-zlutoucky");
        assert_eq!(derive_id("__Dogmeat__"), "dogmeat");
        assert_eq!(derive_id("Vault 101"), "vault-101");
    }

    #[test]
    fn compatibility_forms_are_decomposed() {
        // U+FB01 LATIN SMALL LIGATURE FI and fullwidth digits
        assert_eq!(derive_id("\u{FB01}nder \u{FF11}\u{FF12}"), "finder-12");
    }

    #[test]
    fn truncates_to_limit() {
        let long = "a".repeat(100);
        assert_eq!(derive_id(&long).len(), MAX_ID_LEN);
    }

    #[test]
    fn fallback_for_unusable_names() {
        assert_eq!(derive_id(""), FALLBACK_ID);
        assert_eq!(derive_id(" \t\n"), FALLBACK_ID);
        assert_eq!(derive_id("☢☢☢"), FALLBACK_ID);
    }

    #[test]
    fn disambiguate_appends_first_free_suffix() {
        let taken = ["max", "max-2"];
        let id = disambiguate("max", |c| taken.contains(&c));
        assert_eq!(id, "max-3");
        assert_eq!(disambiguate("furiosa", |c| taken.contains(&c)), "furiosa");
    }

    #[test]
    fn disambiguate_respects_length_cap() {
        let base = "b".repeat(MAX_ID_LEN);
        let id = disambiguate(&base, |c| c == base);
        assert_eq!(id.len(), MAX_ID_LEN);
        assert!(id.ends_with("-2"));
    }
}
