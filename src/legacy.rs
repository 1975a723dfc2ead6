// 📦 Legacy Importer - one-time migration of the old JSON rule file
//
// Old format (categories.json):
//   { "Groceries": ["LULU", "CARREFOUR"], "Streaming": ["NETFLIX"] }
//
// The import is guarded by a marker in `store_meta`, not by the file being
// present: the old file usually stays on disk after migration.

use chrono::Utc;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::db::{get_meta, set_meta, META_LEGACY_FINGERPRINT, META_LEGACY_IMPORTED_AT, META_LEGACY_ORIGIN};
use crate::error::{Result, RuleError};
use crate::normalize::{clean_display, is_reserved_name, normalize_key};
use crate::store::{find_category, insert_category, insert_keyword, RuleStore};

const IMPORT_ACTOR: &str = "legacy_importer";

// ============================================================================
// LEGACY SOURCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCategory {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Parsed legacy document, entries in document order
#[derive(Debug, Clone)]
pub struct LegacySource {
    pub origin: String,
    pub fingerprint: String,
    pub categories: Vec<LegacyCategory>,
}

impl LegacySource {
    /// Read and parse a legacy rule file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let origin = path.as_ref().display().to_string();
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RuleError::LegacySourceUnreadable {
                path: origin.clone(),
                reason: e.to_string(),
            }
        })?;

        Self::parse(&origin, &content)
    }

    /// Parse a legacy document; `origin` only labels errors and the marker
    ///
    /// A name listed more than once (case-insensitive) is merged into its
    /// first occurrence, so no keyword list is dropped.
    pub fn parse(origin: &str, content: &str) -> Result<Self> {
        let LegacyEntries(categories) =
            serde_json::from_str::<LegacyEntries>(content).map_err(|e| {
                RuleError::LegacySourceUnreadable {
                    path: origin.to_string(),
                    reason: format!("invalid legacy document: {e}"),
                }
            })?;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());

        Ok(LegacySource {
            origin: origin.to_string(),
            fingerprint: format!("{:x}", hasher.finalize()),
            categories,
        })
    }

    pub fn keyword_count(&self) -> usize {
        self.categories.iter().map(|c| c.keywords.len()).sum()
    }
}

/// Top-level legacy object, read entry by entry in document order
struct LegacyEntries(Vec<LegacyCategory>);

impl<'de> Deserialize<'de> for LegacyEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = LegacyEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of category -> keyword list")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut categories: Vec<LegacyCategory> = Vec::new();

                while let Some((name, keywords)) = map.next_entry::<String, Vec<String>>()? {
                    let key = normalize_key(&name);
                    match categories.iter_mut().find(|c| normalize_key(&c.name) == key) {
                        Some(existing) => existing.keywords.extend(keywords),
                        None => categories.push(LegacyCategory { name, keywords }),
                    }
                }

                Ok(LegacyEntries(categories))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

// ============================================================================
// IMPORT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub categories_added: usize,
    pub keywords_added: usize,
    pub keywords_skipped: usize,

    /// Legacy entries ignored because their name was blank or reserved
    pub categories_skipped: usize,

    /// True when an earlier import already completed and nothing was done
    pub already_imported: bool,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        if self.already_imported {
            return "legacy rules already imported, nothing to do".to_string();
        }
        format!(
            "{} categories added, {} keywords added, {} keywords skipped",
            self.categories_added, self.keywords_added, self.keywords_skipped
        )
    }
}

/// Marker written when the import commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyImportStatus {
    pub completed_at: String,
    pub origin: Option<String>,
    pub fingerprint: Option<String>,
}

// ============================================================================
// IMPORTER
// ============================================================================

impl RuleStore {
    /// Merge a legacy source into the store, at most once per store
    ///
    /// Everything (categories, keywords and the completion marker) is
    /// committed in one transaction, so a failure writes nothing.
    pub fn import_legacy(&self, source: &LegacySource) -> Result<ImportReport> {
        let report = self.write(|tx| {
            if get_meta(tx, META_LEGACY_IMPORTED_AT)?.is_some() {
                return Ok(ImportReport {
                    already_imported: true,
                    ..ImportReport::default()
                });
            }

            let mut report = ImportReport::default();

            for entry in &source.categories {
                let name = match clean_display(&entry.name) {
                    Some(name) if !is_reserved_name(&name) => name,
                    _ => {
                        tracing::warn!(name = %entry.name, "skipping legacy category");
                        report.categories_skipped += 1;
                        report.keywords_skipped += entry.keywords.len();
                        continue;
                    }
                };

                let row = match find_category(tx, &name)? {
                    Some(row) => row,
                    None => {
                        report.categories_added += 1;
                        insert_category(tx, &name, IMPORT_ACTOR)?
                    }
                };

                for keyword in &entry.keywords {
                    match insert_keyword(tx, &row, keyword, IMPORT_ACTOR) {
                        Ok(true) => report.keywords_added += 1,
                        Ok(false) | Err(RuleError::EmptyKeyword) => report.keywords_skipped += 1,
                        Err(e) => return Err(e),
                    }
                }
            }

            set_meta(tx, META_LEGACY_IMPORTED_AT, &Utc::now().to_rfc3339())?;
            set_meta(tx, META_LEGACY_FINGERPRINT, &source.fingerprint)?;
            set_meta(tx, META_LEGACY_ORIGIN, &source.origin)?;

            Ok(report)
        })?;

        if report.already_imported {
            tracing::debug!(origin = %source.origin, "legacy import already completed");
        } else {
            tracing::info!(
                origin = %source.origin,
                categories_added = report.categories_added,
                keywords_added = report.keywords_added,
                keywords_skipped = report.keywords_skipped,
                "legacy rules imported"
            );
        }

        Ok(report)
    }

    /// Import `path` if it exists; `None` when there is no legacy file
    ///
    /// Once the marker is set the file is not even read, so a stale or
    /// damaged leftover file cannot fail later startups.
    pub fn import_legacy_if_present<P: AsRef<Path>>(&self, path: P) -> Result<Option<ImportReport>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        if self.legacy_import_completed()? {
            return Ok(Some(ImportReport {
                already_imported: true,
                ..ImportReport::default()
            }));
        }

        let source = LegacySource::from_path(path)?;
        self.import_legacy(&source).map(Some)
    }

    pub fn legacy_import_completed(&self) -> Result<bool> {
        Ok(self.legacy_import_status()?.is_some())
    }

    pub fn legacy_import_status(&self) -> Result<Option<LegacyImportStatus>> {
        self.read(|conn| {
            let Some(completed_at) = get_meta(conn, META_LEGACY_IMPORTED_AT)? else {
                return Ok(None);
            };

            Ok(Some(LegacyImportStatus {
                completed_at,
                origin: get_meta(conn, META_LEGACY_ORIGIN)?,
                fingerprint: get_meta(conn, META_LEGACY_FINGERPRINT)?,
            }))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "Supermercado": ["LULU", "carrefour", "Lulu"],
        "Streaming": ["NETFLIX", "  "],
        "Uncategorized": ["misc"]
    }"#;

    fn source(content: &str) -> LegacySource {
        LegacySource::parse("categories.json", content).unwrap()
    }

    fn dump(store: &RuleStore) -> Vec<(String, Vec<String>)> {
        store
            .list_categories()
            .unwrap()
            .into_iter()
            .map(|c| (c.name, c.keywords.into_iter().map(|k| k.pattern).collect()))
            .collect()
    }

    #[test]
    fn test_parse_keeps_document_order() {
        let parsed = source(r#"{"Zeta": ["z"], "Alpha": ["a", "b"]}"#);

        assert_eq!(parsed.categories[0].name, "Zeta");
        assert_eq!(parsed.categories[1].keywords, vec!["a", "b"]);
        assert_eq!(parsed.keyword_count(), 3);
        assert_eq!(parsed.fingerprint.len(), 64);
    }

    #[test]
    fn test_repeated_category_names_are_merged() {
        let parsed = source(r#"{"Food": ["coffee"], "Travel": ["uber"], "FOOD": ["bakery", "Coffee"]}"#);

        assert_eq!(parsed.categories.len(), 2);
        assert_eq!(parsed.categories[0].name, "Food");
        assert_eq!(parsed.categories[0].keywords, vec!["coffee", "bakery", "Coffee"]);

        let store = RuleStore::open_in_memory().unwrap();
        let report = store.import_legacy(&parsed).unwrap();

        assert_eq!(report.categories_added, 2);
        assert_eq!(report.keywords_added, 3);
        assert_eq!(report.keywords_skipped, 1);
        assert_eq!(
            dump(&store)[0],
            ("Food".to_string(), vec!["coffee".to_string(), "bakery".to_string()])
        );
    }

    #[test]
    fn test_parse_rejects_wrong_shapes() {
        for bad in [
            "not json",
            r#"["Food", "coffee"]"#,
            r#"{"Food": "coffee"}"#,
            r#"{"Food": ["coffee", 42]}"#,
        ] {
            let err = LegacySource::parse("categories.json", bad).unwrap_err();
            assert!(matches!(err, RuleError::LegacySourceUnreadable { .. }), "{bad}");
        }
    }

    #[test]
    fn test_import_creates_and_counts() {
        let store = RuleStore::open_in_memory().unwrap();

        let report = store.import_legacy(&source(LEGACY)).unwrap();

        assert_eq!(report.categories_added, 2);
        assert_eq!(report.keywords_added, 3);
        // duplicate "Lulu", blank keyword, and the reserved entry's keyword
        assert_eq!(report.keywords_skipped, 3);
        assert_eq!(report.categories_skipped, 1);
        assert_eq!(
            dump(&store),
            vec![
                ("Supermercado".to_string(), vec!["LULU".to_string(), "carrefour".to_string()]),
                ("Streaming".to_string(), vec!["NETFLIX".to_string()]),
            ]
        );
    }

    #[test]
    fn test_import_merges_into_existing_category() {
        let store = RuleStore::open_in_memory().unwrap();
        store.add_category("streaming").unwrap();
        store.add_keyword("streaming", "netflix").unwrap();
        store.add_keyword("streaming", "hbo").unwrap();

        let report = store
            .import_legacy(&source(r#"{"Streaming": ["NETFLIX", "disney"]}"#))
            .unwrap();

        assert_eq!(report.categories_added, 0);
        assert_eq!(report.keywords_added, 1);
        assert_eq!(report.keywords_skipped, 1);
        assert_eq!(
            dump(&store),
            vec![(
                "streaming".to_string(),
                vec!["netflix".to_string(), "hbo".to_string(), "disney".to_string()]
            )]
        );
    }

    #[test]
    fn test_second_import_is_a_noop() {
        let store = RuleStore::open_in_memory().unwrap();
        let legacy = source(LEGACY);

        store.import_legacy(&legacy).unwrap();
        let after_first = dump(&store);

        let report = store.import_legacy(&legacy).unwrap();

        assert!(report.already_imported);
        assert_eq!(report.categories_added, 0);
        assert_eq!(report.keywords_added, 0);
        assert_eq!(dump(&store), after_first);
    }

    #[test]
    fn test_import_marker_gates_even_after_user_edits() {
        let store = RuleStore::open_in_memory().unwrap();
        store.import_legacy(&source(LEGACY)).unwrap();
        store.delete_category("Streaming").unwrap();

        store.import_legacy(&source(LEGACY)).unwrap();

        assert!(store.get_category("Streaming").is_err());
    }

    #[test]
    fn test_failed_import_commits_nothing() {
        let store = RuleStore::open_in_memory().unwrap();
        store.add_category("Food").unwrap();

        // Valid document, but a failure part-way through must roll back
        let legacy = source(r#"{"Travel": ["uber"], "Food": ["coffee"]}"#);
        let result = store.write(|tx| {
            let row = find_category(tx, "Food")?.expect("food exists");
            insert_keyword(tx, &row, "bakery", IMPORT_ACTOR)?;
            Err::<(), _>(RuleError::LegacySourceUnreadable {
                path: legacy.origin.clone(),
                reason: "simulated".to_string(),
            })
        });
        assert!(result.is_err());

        assert!(store.get_category("Food").unwrap().keywords.is_empty());
        assert!(!store.legacy_import_completed().unwrap());

        let report = store.import_legacy(&legacy).unwrap();
        assert_eq!(report.categories_added, 1);
        assert_eq!(report.keywords_added, 2);
    }

    #[test]
    fn test_import_if_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categories.json");
        let store = RuleStore::open_in_memory().unwrap();

        assert_eq!(store.import_legacy_if_present(&path).unwrap(), None);

        fs::write(&path, LEGACY).unwrap();
        let first = store.import_legacy_if_present(&path).unwrap().unwrap();
        assert_eq!(first.keywords_added, 3);

        let status = store.legacy_import_status().unwrap().unwrap();
        assert_eq!(status.origin, Some(path.display().to_string()));
        assert_eq!(status.fingerprint, Some(source(LEGACY).fingerprint));

        // A damaged leftover file no longer matters once imported
        fs::write(&path, "{ broken").unwrap();
        let second = store.import_legacy_if_present(&path).unwrap().unwrap();
        assert!(second.already_imported);
    }

    #[test]
    fn test_unreadable_file_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categories.json");
        fs::write(&path, r#"{"Food": ["coffee"], "Travel": 7}"#).unwrap();
        let store = RuleStore::open_in_memory().unwrap();

        let err = store.import_legacy_if_present(&path).unwrap_err();

        assert!(matches!(err, RuleError::LegacySourceUnreadable { .. }));
        assert!(store.list_categories().unwrap().is_empty());
        assert!(!store.legacy_import_completed().unwrap());
    }

    #[test]
    fn test_imported_rules_are_attributed_to_importer() {
        let store = RuleStore::open_in_memory().unwrap();
        store.import_legacy(&source(r#"{"Food": ["coffee"]}"#)).unwrap();

        let events = store.history("Food").unwrap();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.actor == IMPORT_ACTOR));
    }
}
