// Bank Categorizer - Core Library
// Keyword rules for bank transactions, shared by the CLI, API server, and tests

pub mod error;
pub mod normalize;
pub mod entities;
pub mod rules;     // Matcher over an immutable snapshot
pub mod db;        // Schema, metadata flags, audit trail
pub mod store;     // Rule Store (single writer, durable)
pub mod legacy;    // One-time legacy JSON import
pub mod batch;     // Batch Classifier
pub mod ingest;    // CSV in, annotated CSV out
pub mod config;

// Re-export commonly used types
pub use error::{Result, RuleError};
pub use normalize::{normalize_key, suggest_keyword, UNCATEGORIZED};
pub use entities::{Category, Keyword};
pub use rules::{classify, Classification, KeywordConflict, RuleSnapshot};
pub use db::{setup_database, RuleEvent};
pub use store::RuleStore;
pub use legacy::{ImportReport, LegacyCategory, LegacyImportStatus, LegacySource};
pub use batch::{
    classify_all, BatchOutcome, BatchSummary, CategoryTally, ClassifiedRecord, Describable,
    Direction,
};
pub use ingest::{load_transactions, write_classified, TransactionFile, TransactionRecord};
pub use config::{load_config, Config};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
