// 🏷️ Category Entity - a named bucket defined by its keywords
//
// "Category name is a VALUE (can change), Category UUID is IDENTITY (never changes)"
//
// - Renaming keeps the UUID, so audit events stay attached to the same category
// - `position` is the explicit listing order the matcher relies on
// - Keywords keep their display casing; `key` is the normalized form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize_key;

// ============================================================================
// KEYWORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// Pattern as the user typed it (trimmed)
    pub pattern: String,

    /// Normalized pattern used for dedup and matching
    pub key: String,

    /// Order within the owning category
    pub position: i64,

    /// Disabled keywords are stored but never matched
    pub enabled: bool,

    pub created_at: DateTime<Utc>,
}

impl Keyword {
    pub fn new(pattern: &str, position: i64) -> Self {
        Keyword {
            pattern: pattern.trim().to_string(),
            key: normalize_key(pattern),
            position,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Case-insensitive comparison against raw user input
    pub fn is(&self, pattern: &str) -> bool {
        self.key == normalize_key(pattern)
    }
}

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

/// Category Entity
///
/// Identity: UUID (never changes)
/// Values: name, position, keywords (change over time)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    /// Display name (e.g., "Groceries", "Travel")
    pub name: String,

    /// Listing order across categories (lower = earlier = wins ties)
    pub position: i64,

    /// Keywords in listing order
    pub keywords: Vec<Keyword>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Create new category entity with UUID
    pub fn new(name: &str, position: i64) -> Self {
        let now = Utc::now();

        Category {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            position,
            keywords: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Normalized name used as the case-insensitive identity
    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.key() == normalize_key(name)
    }

    pub fn find_keyword(&self, pattern: &str) -> Option<&Keyword> {
        self.keywords.iter().find(|k| k.is(pattern))
    }

    /// Keywords the matcher will actually test
    pub fn active_keywords(&self) -> impl Iterator<Item = &Keyword> {
        self.keywords.iter().filter(|k| k.enabled)
    }

    /// A category with no enabled keyword can never be matched
    pub fn is_reachable(&self) -> bool {
        self.active_keywords().next().is_some()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_creation() {
        let category = Category::new("  Groceries ", 3);

        assert!(!category.id.is_empty());
        assert_eq!(category.name, "Groceries");
        assert_eq!(category.position, 3);
        assert!(category.keywords.is_empty());
        assert!(!category.is_reachable());
        assert_eq!(category.created_at, category.updated_at);
    }

    #[test]
    fn test_category_name_is_case_insensitive() {
        let category = Category::new("Food", 1);

        assert!(category.has_name("food"));
        assert!(category.has_name("  FOOD "));
        assert!(!category.has_name("Foods"));
    }

    #[test]
    fn test_keyword_keeps_display_casing() {
        let keyword = Keyword::new("  Uber Eats ", 1);

        assert_eq!(keyword.pattern, "Uber Eats");
        assert_eq!(keyword.key, "uber eats");
        assert!(keyword.is("UBER EATS"));
        assert!(keyword.enabled);
    }

    #[test]
    fn test_disabled_keywords_make_category_unreachable() {
        let mut category = Category::new("Travel", 1);
        let mut keyword = Keyword::new("uber", 1);
        keyword.enabled = false;
        category.keywords.push(keyword);

        assert!(category.find_keyword("UBER").is_some());
        assert!(!category.is_reachable());
    }
}
