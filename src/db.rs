// 🗄️ Database - schema, metadata flags and the rule audit trail
//
// SQLite in WAL mode with synchronous=FULL: a commit is on disk before the
// call returns, and a crash mid-write never damages earlier commits.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Key in `store_meta` set once the legacy rule file has been merged
pub const META_LEGACY_IMPORTED_AT: &str = "legacy_import_completed_at";
pub const META_LEGACY_FINGERPRINT: &str = "legacy_import_fingerprint";
pub const META_LEGACY_ORIGIN: &str = "legacy_import_origin";

/// Event for audit trail (Rich Hickey: "Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RuleEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl RuleEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory" and that's fine
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    // ==========================================================================
    // Categories (position = listing order = match priority)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_uuid TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            name_key TEXT UNIQUE NOT NULL,
            position INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Keywords (unique per category by normalized key)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS keywords (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            pattern_key TEXT NOT NULL,
            position INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            UNIQUE (category_id, pattern_key),
            FOREIGN KEY (category_id) REFERENCES categories (id) ON DELETE CASCADE
        )",
        [],
    )?;

    // ==========================================================================
    // Store metadata (legacy import marker)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Rule events (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rule_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_position ON categories(position)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_keywords_category ON keywords(category_id, position)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rule_events_entity ON rule_events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Parse an RFC 3339 column, reporting the column index on failure
pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value)
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &RuleEvent) -> Result<()> {
    let data_json = event.data.to_string();

    conn.execute(
        "INSERT INTO rule_events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<RuleEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM rule_events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(RuleEvent {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('categories', 'keywords', 'store_meta', 'rule_events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_meta_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(get_meta(&conn, "flag").unwrap(), None);

        set_meta(&conn, "flag", "one").unwrap();
        set_meta(&conn, "flag", "two").unwrap();

        assert_eq!(get_meta(&conn, "flag").unwrap(), Some("two".to_string()));
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = RuleEvent::new(
            "category_added",
            "category",
            "cat-123",
            serde_json::json!({"name": "Food"}),
            "test_actor",
        );
        let second = RuleEvent::new(
            "keyword_added",
            "category",
            "cat-123",
            serde_json::json!({"keyword": "coffee"}),
            "test_actor",
        );

        insert_event(&conn, &first).unwrap();
        insert_event(&conn, &second).unwrap();

        let events = get_events_for_entity(&conn, "category", "cat-123").unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "category_added");
        assert_eq!(events[1].data["keyword"], "coffee");
        assert_eq!(events[0].actor, "test_actor");
    }
}
