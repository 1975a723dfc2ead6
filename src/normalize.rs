// 🔤 Normalization - one place for trim + case folding
//
// Category names, keywords and descriptions all go through `normalize_key`
// before any comparison so the store and the matcher agree on identity.

use regex::Regex;
use std::sync::OnceLock;

/// Sentinel category for descriptions no keyword matched
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Trim and case-fold a name, keyword or description
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Trimmed display form, `None` if nothing is left
pub fn clean_display(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// True when `name` collides with the Uncategorized sentinel
pub fn is_reserved_name(name: &str) -> bool {
    normalize_key(name) == normalize_key(UNCATEGORIZED)
}

fn numeric_token() -> &'static Regex {
    static NUMERIC: OnceLock<Regex> = OnceLock::new();
    NUMERIC.get_or_init(|| Regex::new(r"^\d+(\.\d+)?$").expect("static regex"))
}

/// Suggest a keyword for a description
///
/// Picks the longest whitespace-separated token that is at least three
/// characters and not a plain number. Ties go to the earliest token.
/// Example: "COMPRA LULU HYPERMARKET 12.50" → "HYPERMARKET"
pub fn suggest_keyword(description: &str) -> Option<String> {
    description
        .split_whitespace()
        .filter(|token| token.chars().count() >= 3 && !numeric_token().is_match(token))
        .rev()
        .max_by_key(|token| token.chars().count())
        .map(|token| token.to_uppercase())
}
