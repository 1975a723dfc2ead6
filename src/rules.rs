// 🏷️ Classification Rules - keyword matching against a snapshot
//
// A RuleSnapshot is an immutable copy of every category and keyword at one
// instant. Matching is first category, then first keyword, in listing order.
// Longest or most specific match does NOT win.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::entities::Category;
use crate::normalize::{normalize_key, UNCATEGORIZED};

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Winning category, `None` means Uncategorized
    pub category: Option<String>,

    /// Keyword (display form) that produced the match
    pub matched_keyword: Option<String>,
}

impl Classification {
    pub fn uncategorized() -> Self {
        Classification::default()
    }

    pub fn is_categorized(&self) -> bool {
        self.category.is_some()
    }

    /// Category name with the Uncategorized sentinel filled in
    pub fn category_name(&self) -> &str {
        self.category.as_deref().unwrap_or(UNCATEGORIZED)
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Same keyword living in more than one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordConflict {
    pub keyword: String,
    /// Owning categories in listing order; the first one wins
    pub categories: Vec<String>,
}

impl KeywordConflict {
    pub fn winner(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    categories: Arc<[Category]>,
    taken_at: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Build a snapshot; iteration order is the order of `categories`
    pub fn new(categories: Vec<Category>) -> Self {
        RuleSnapshot {
            categories: categories.into(),
            taken_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.categories.iter().map(|c| c.keywords.len()).sum()
    }

    /// Apply rules to classify a transaction description
    pub fn classify(&self, description: &str) -> Classification {
        let text = normalize_key(description);
        if text.is_empty() {
            return Classification::uncategorized();
        }

        for category in self.categories.iter() {
            for keyword in category.active_keywords() {
                if !keyword.key.is_empty() && text.contains(&keyword.key) {
                    tracing::debug!(
                        category = %category.name,
                        keyword = %keyword.pattern,
                        "description matched"
                    );
                    return Classification {
                        category: Some(category.name.clone()),
                        matched_keyword: Some(keyword.pattern.clone()),
                    };
                }
            }
        }

        Classification::uncategorized()
    }

    /// Keywords that appear in more than one category
    pub fn keyword_conflicts(&self) -> Vec<KeywordConflict> {
        let mut conflicts: Vec<KeywordConflict> = Vec::new();
        let mut seen: Vec<(String, Vec<String>)> = Vec::new();

        for category in self.categories.iter() {
            for keyword in &category.keywords {
                match seen.iter_mut().find(|(key, _)| *key == keyword.key) {
                    Some((_, owners)) => {
                        if !owners.contains(&category.name) {
                            owners.push(category.name.clone());
                        }
                    }
                    None => seen.push((keyword.key.clone(), vec![category.name.clone()])),
                }
            }
        }

        for (keyword, categories) in seen {
            if categories.len() > 1 {
                conflicts.push(KeywordConflict { keyword, categories });
            }
        }

        conflicts
    }
}

impl Default for RuleSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Classify `description` against `snapshot` (pure, never fails)
pub fn classify(description: &str, snapshot: &RuleSnapshot) -> Classification {
    snapshot.classify(description)
}

// ============================================================================
// TESTS
// ============================================================================
