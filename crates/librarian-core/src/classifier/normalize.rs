use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Matching key for filenames, catalog titles and path segments alike:
/// compatibility-decomposed, diacritics dropped, lowercased, ASCII
/// alphanumerics only.
pub fn normalize(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}
