// 📥 CSV Ingestion - bank export rows in, annotated rows out
//
// Expected export columns: Date, Amount, Details, Debit/Credit.
// Headers are matched after trimming and case-folding; extra columns are kept
// verbatim so the annotated export round-trips the original file.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::batch::{BatchOutcome, Describable, Direction};

const COL_DATE: &str = "Date";
const COL_AMOUNT: &str = "Amount";
const COL_DETAILS: &str = "Details";
const COL_DIRECTION: &str = "Debit/Credit";

const COL_CATEGORY: &str = "Category";
const COL_MATCHED_KEYWORD: &str = "Matched_Keyword";

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    /// 1-indexed line in the source file (header is line 1)
    pub line_number: usize,
    pub date: String,
    pub amount: Option<f64>,
    pub description: Option<String>,
    /// Present when the export carries a readable Debit/Credit cell
    pub direction: Option<Direction>,
    /// Original cells, in header order
    #[serde(skip)]
    pub fields: Vec<String>,
}

impl Describable for TransactionRecord {
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn amount(&self) -> Option<f64> {
        self.amount
    }

    fn direction(&self) -> Option<Direction> {
        self.direction
    }
}

#[derive(Debug, Clone)]
pub struct TransactionFile {
    pub headers: Vec<String>,
    pub records: Vec<TransactionRecord>,
}

impl TransactionFile {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct Columns {
    date: usize,
    amount: usize,
    details: usize,
    direction: Option<usize>,
}

impl Columns {
    fn locate(headers: &[String]) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };

        let mut missing = Vec::new();
        let mut require = |name: &'static str| {
            let idx = find(name);
            if idx.is_none() {
                missing.push(name);
            }
            idx.unwrap_or_default()
        };

        let date = require(COL_DATE);
        let amount = require(COL_AMOUNT);
        let details = require(COL_DETAILS);

        if !missing.is_empty() {
            bail!("CSV is missing required columns: {}", missing.join(", "));
        }

        Ok(Columns {
            date,
            amount,
            details,
            direction: find(COL_DIRECTION),
        })
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load a bank export; rows with unreadable cells are kept with `None` values
pub fn load_transactions(path: &Path) -> Result<TransactionFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers in {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let columns = Columns::locate(&headers)?;

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line_number = idx + 2;
        let row = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line_number, path.display())
        })?;

        let cell = |i: usize| row.get(i).unwrap_or("").trim();

        let amount_text = cell(columns.amount);
        let amount = parse_amount(amount_text);
        if amount.is_none() && !amount_text.is_empty() {
            tracing::warn!(line = line_number, amount = amount_text, "unreadable amount");
        }

        let direction = columns.direction.and_then(|i| {
            let text = cell(i);
            let parsed = Direction::parse(text);
            if parsed.is_none() && !text.is_empty() {
                tracing::warn!(line = line_number, direction = text, "unreadable Debit/Credit");
            }
            parsed
        });

        let description = Some(cell(columns.details))
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        records.push(TransactionRecord {
            line_number,
            date: cell(columns.date).to_string(),
            amount,
            description,
            direction,
            fields: row.iter().map(str::to_string).collect(),
        });
    }

    tracing::info!(path = %path.display(), rows = records.len(), "transactions loaded");

    Ok(TransactionFile { headers, records })
}

/// Parse "1,234.50", "$-12.00" or "(45.10)" style amounts
pub fn parse_amount(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

// ============================================================================
// EXPORT
// ============================================================================

/// Write the input rows back out with Category and Matched_Keyword appended
pub fn write_classified(
    path: &Path,
    headers: &[String],
    outcome: &BatchOutcome<TransactionRecord>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    let mut header_row: Vec<&str> = headers.iter().map(String::as_str).collect();
    header_row.push(COL_CATEGORY);
    header_row.push(COL_MATCHED_KEYWORD);
    writer.write_record(&header_row)?;

    for classified in &outcome.results {
        let mut row: Vec<&str> = classified.record.fields.iter().map(String::as_str).collect();
        row.resize(headers.len(), "");
        row.push(classified.classification.category_name());
        row.push(classified.classification.matched_keyword.as_deref().unwrap_or(""));
        writer.write_record(&row)?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::classify_all;
    use crate::store::RuleStore;
    use std::fs;

    const EXPORT: &str = "\
Date, Amount ,Details,Debit/Credit,Reference
2024-03-01,\"1,234.50\",SALARY MARCH,credit,A1
2024-03-02,-4.50,Corner COFFEE shop,DEBIT,A2
2024-03-03,-60.00,,debit,A3
2024-03-04,abc,HARDWARE STORE,Debit,A4
";

    #[test]
    fn test_load_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        fs::write(&path, EXPORT).unwrap();

        let file = load_transactions(&path).unwrap();

        assert_eq!(file.len(), 4);
        assert_eq!(file.headers[1], "Amount");

        let salary = &file.records[0];
        assert_eq!(salary.line_number, 2);
        assert_eq!(salary.amount, Some(1234.50));
        assert_eq!(salary.direction, Some(Direction::Credit));
        assert_eq!(salary.description.as_deref(), Some("SALARY MARCH"));

        assert_eq!(file.records[1].direction, Some(Direction::Debit));
        assert_eq!(file.records[2].description, None);
        assert_eq!(file.records[3].amount, None);
        assert_eq!(file.records[3].fields[4], "A4");
    }

    #[test]
    fn test_missing_columns_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "Date,Memo\n2024-01-01,x\n").unwrap();

        let err = load_transactions(&path).unwrap_err().to_string();

        assert!(err.contains("Amount"));
        assert!(err.contains("Details"));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.50"), Some(1234.5));
        assert_eq!(parse_amount(" -12 "), Some(-12.0));
        assert_eq!(parse_amount("$99.99"), Some(99.99));
        assert_eq!(parse_amount("(45.10)"), Some(-45.10));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_classify_and_write_annotated_export() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("export.csv");
        let output = dir.path().join("classified.csv");
        fs::write(&input, EXPORT).unwrap();

        let store = RuleStore::open_in_memory().unwrap();
        store.add_category("Food").unwrap();
        store.add_keyword("Food", "coffee").unwrap();
        store.add_category("Income").unwrap();
        store.add_keyword("Income", "Salary").unwrap();

        let file = load_transactions(&input).unwrap();
        let outcome = classify_all(file.records.clone(), &store.snapshot().unwrap());

        assert_eq!(outcome.summary.uncategorized_count, 2);
        assert_eq!(outcome.summary.count_for("Income"), 1);
        assert!((outcome.summary.per_category[0].total_amount - (-4.5)).abs() < 1e-9);
        assert!((outcome.summary.credit_total - 1234.5).abs() < 1e-9);
        assert!((outcome.summary.debit_total - 64.5).abs() < 1e-9);
        assert!((outcome.summary.balance - 1170.0).abs() < 1e-9);

        write_classified(&output, &file.headers, &outcome).unwrap();

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(5), Some("Category"));
        assert_eq!(headers.get(6), Some("Matched_Keyword"));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].get(5), Some("Income"));
        assert_eq!(rows[0].get(6), Some("Salary"));
        assert_eq!(rows[1].get(5), Some("Food"));
        assert_eq!(rows[2].get(5), Some("Uncategorized"));
        assert_eq!(rows[2].get(6), Some(""));
        assert_eq!(rows[3].get(4), Some("A4"));
    }
}
