// ⚠️ Rule Errors - everything the Rule Store and Legacy Importer can refuse
// Matching never fails: an unresolvable description is just Uncategorized.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Category already exists: '{0}'")]
    DuplicateCategory(String),

    #[error("Category not found: '{0}'")]
    CategoryNotFound(String),

    #[error("Keyword '{keyword}' not found in category '{category}'")]
    KeywordNotFound { category: String, keyword: String },

    #[error("Keyword is empty")]
    EmptyKeyword,

    #[error("Category name is empty")]
    EmptyCategoryName,

    #[error("Category name '{0}' is reserved")]
    ReservedCategoryName(String),

    #[error("Legacy source {path} is unreadable: {reason}")]
    LegacySourceUnreadable { path: String, reason: String },

    #[error("Rule store persistence failure: {0}")]
    StorePersistence(#[from] rusqlite::Error),
}

impl RuleError {
    /// Category or keyword lookups that came up empty
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuleError::CategoryNotFound(_) | RuleError::KeywordNotFound { .. }
        )
    }

    /// Input the caller can fix (blank or reserved names)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RuleError::EmptyKeyword
                | RuleError::EmptyCategoryName
                | RuleError::ReservedCategoryName(_)
                | RuleError::LegacySourceUnreadable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
