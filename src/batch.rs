// 📊 Batch Classifier - classify a whole import against one snapshot
//
// Output is positionally aligned with input. One bad record never aborts
// the batch: a missing description is simply Uncategorized.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::normalize::{normalize_key, UNCATEGORIZED};
use crate::rules::{Classification, RuleSnapshot};

// ============================================================================
// INPUT
// ============================================================================

/// Money leaving (Debit) or entering (Credit) the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    /// Case-insensitive "Debit" / "Credit"
    pub fn parse(text: &str) -> Option<Self> {
        match normalize_key(text).as_str() {
            "debit" => Some(Direction::Debit),
            "credit" => Some(Direction::Credit),
            _ => None,
        }
    }
}

/// Anything the ingestion layer produces that carries a description
pub trait Describable {
    fn description(&self) -> Option<&str>;

    /// Amount as exported, used only for totals
    fn amount(&self) -> Option<f64> {
        None
    }

    fn direction(&self) -> Option<Direction> {
        None
    }
}

impl Describable for String {
    fn description(&self) -> Option<&str> {
        Some(self)
    }
}

impl Describable for &str {
    fn description(&self) -> Option<&str> {
        Some(self)
    }
}

impl Describable for Option<String> {
    fn description(&self) -> Option<&str> {
        self.as_deref()
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedRecord<R> {
    pub record: R,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTally {
    pub category: String,
    pub count: usize,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Categories that received at least one record, in snapshot order
    pub per_category: Vec<CategoryTally>,
    pub uncategorized_count: usize,
    pub uncategorized_amount: f64,
    /// Magnitudes of Debit records
    pub debit_total: f64,
    /// Magnitudes of Credit records
    pub credit_total: f64,
    /// credit_total - debit_total
    pub balance: f64,
}

impl BatchSummary {
    pub fn count_for(&self, category: &str) -> usize {
        if normalize_key(category) == normalize_key(UNCATEGORIZED) {
            return self.uncategorized_count;
        }
        self.per_category
            .iter()
            .find(|t| normalize_key(&t.category) == normalize_key(category))
            .map_or(0, |t| t.count)
    }

    pub fn categorized_count(&self) -> usize {
        self.total - self.uncategorized_count
    }

    pub fn summary(&self) -> String {
        format!(
            "{} transactions: {} categorized into {} categories, {} uncategorized",
            self.total,
            self.categorized_count(),
            self.per_category.len(),
            self.uncategorized_count
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome<R> {
    pub results: Vec<ClassifiedRecord<R>>,
    pub summary: BatchSummary,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classify every record in input order against a single snapshot
pub fn classify_all<R, I>(records: I, snapshot: &RuleSnapshot) -> BatchOutcome<R>
where
    R: Describable,
    I: IntoIterator<Item = R>,
{
    let slot_by_name: HashMap<&str, usize> = snapshot
        .categories()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();
    let mut tallies: Vec<Option<CategoryTally>> = vec![None; snapshot.category_count()];

    let mut results = Vec::new();
    let mut summary = BatchSummary::default();

    for (index, record) in records.into_iter().enumerate() {
        let classification = match record.description() {
            Some(description) => snapshot.classify(description),
            None => {
                tracing::debug!(index, "record has no description");
                Classification::uncategorized()
            }
        };

        let amount = record.amount().unwrap_or(0.0);
        summary.total += 1;
        match record.direction() {
            Some(Direction::Debit) => summary.debit_total += amount.abs(),
            Some(Direction::Credit) => summary.credit_total += amount.abs(),
            None => {}
        }

        match classification
            .category
            .as_deref()
            .and_then(|name| slot_by_name.get(name).copied())
        {
            Some(slot) => {
                let tally = tallies[slot].get_or_insert_with(|| CategoryTally {
                    category: snapshot.categories()[slot].name.clone(),
                    count: 0,
                    total_amount: 0.0,
                });
                tally.count += 1;
                tally.total_amount += amount;
            }
            None => {
                summary.uncategorized_count += 1;
                summary.uncategorized_amount += amount;
            }
        }

        results.push(ClassifiedRecord {
            record,
            classification,
        });
    }

    summary.per_category = tallies.into_iter().flatten().collect();
    summary.balance = summary.credit_total - summary.debit_total;

    tracing::info!(
        total = summary.total,
        uncategorized = summary.uncategorized_count,
        "batch classified"
    );

    BatchOutcome { results, summary }
}

// ============================================================================
// TESTS
// ============================================================================
