//! Title and author normalization used for catalog matching and
//! metadata-candidate scoring.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static BRACKETED: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"\([^)]*\)").unwrap(),
        Regex::new(r"\[[^\]]*\]").unwrap(),
        Regex::new(r"\{[^}]*\}").unwrap(),
        Regex::new(r"<[^>]*>").unwrap(),
    ]
});

static SERIES_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(vol|volume|book|part|series)\.?\s*\d+\b").unwrap());
static NUMBER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(#|no\.?|number)\s*\d+\b").unwrap());
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'`~!@#$%^*_=+|\\/;:,?.-]"#).unwrap());
static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+\s+").unwrap());
static TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\d+\s*$").unwrap());

/// Decompose and drop everything outside ASCII, so `Brontë` becomes `Bronte`.
pub fn fold_to_ascii(value: &str) -> String {
    value.nfkd().filter(char::is_ascii).collect()
}

/// Remove bracketed segments, repeating until nested brackets are gone.
pub fn strip_bracketed(value: &str) -> String {
    let mut cleaned = value.to_string();
    loop {
        let previous = cleaned.clone();
        for pattern in BRACKETED.iter() {
            cleaned = pattern.replace_all(&cleaned, " ").into_owned();
        }
        if cleaned == previous {
            return cleaned;
        }
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_title(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let text = strip_bracketed(&fold_to_ascii(value));
    let text = text.replace('&', " and ");
    let text = SERIES_MARKER.replace_all(&text, " ");
    let text = NUMBER_MARKER.replace_all(&text, " ");
    let text = PUNCTUATION.replace_all(&text, " ");
    let text = LEADING_NUMBER.replace_all(&text, " ");
    let text = TRAILING_NUMBER.replace_all(&text, " ");
    let text = collapse_whitespace(&text).to_lowercase();
    (!text.is_empty()).then_some(text)
}

pub fn normalize_author(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let mut text = strip_bracketed(&fold_to_ascii(value));

    // "Last, First" -> "First Last"
    if let Some((last, rest)) = text.split_once(',') {
        let (last, rest) = (last.trim(), rest.trim());
        if !rest.is_empty() {
            text = format!("{} {}", rest, last);
        }
    }

    let text = text.replace('&', " and ");
    let text = PUNCTUATION.replace_all(&text, " ");
    let text = collapse_whitespace(&text).to_lowercase();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Brontë"), "Bronte");
        assert_eq!(fold_to_ascii("Æon"), "on");
    }

    #[test]
    fn test_strip_nested_brackets() {
        assert_eq!(strip_bracketed("A (b [c]) d").split_whitespace().collect::<Vec<_>>(), vec!["A", "d"]);
    }

    #[test]
    fn test_author_comma_swap() {
        assert_eq!(normalize_author("Tolkien, J.R.R.").as_deref(), Some("j r r tolkien"));
    }
}
