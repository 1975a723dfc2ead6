// 📚 Rule Store - durable categories and keywords
//
// Single source of truth for classification rules. Every mutation runs in
// one SQLite transaction under a whole-store mutex: either all of it commits
// or the previous committed state is left untouched.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::db::{get_events_for_entity, insert_event, parse_timestamp, setup_database, RuleEvent};
use crate::entities::{Category, Keyword};
use crate::error::{Result, RuleError};
use crate::normalize::{clean_display, is_reserved_name, normalize_key, suggest_keyword};
use crate::rules::RuleSnapshot;

const ENTITY_CATEGORY: &str = "category";

/// Category plus its SQLite row id (never leaves the crate)
pub(crate) struct CategoryRow {
    pub row_id: i64,
    pub category: Category,
}

pub struct RuleStore {
    conn: Mutex<Connection>,
    actor: String,
}

impl RuleStore {
    /// Open (or create) a store backed by a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "opened rule store");
        Self::from_connection(conn)
    }

    /// Store that lives only as long as the process (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(RuleStore {
            conn: Mutex::new(conn),
            actor: "user".to_string(),
        })
    }

    /// Name recorded on audit events for mutations made through this handle
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-operation leaves an uncommitted transaction that SQLite
        // already rolled back, so the connection is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside one transaction; commit only if it succeeds
    pub(crate) fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside one deferred transaction so every SELECT it issues
    /// sees the same committed state, even with other processes writing
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// All categories with their keywords, in listing order
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        self.read(load_categories)
    }

    /// Immutable copy of the rules for classification
    pub fn snapshot(&self) -> Result<RuleSnapshot> {
        let categories = self.list_categories()?;
        Ok(RuleSnapshot::new(categories))
    }

    pub fn get_category(&self, name: &str) -> Result<Category> {
        self.read(|conn| {
            let row = require_category(conn, name)?;
            let mut category = row.category;
            category.keywords = load_keywords(conn, row.row_id)?;
            Ok(category)
        })
    }

    /// Audit events for a category, oldest first
    pub fn history(&self, name: &str) -> Result<Vec<RuleEvent>> {
        self.read(|conn| {
            let row = require_category(conn, name)?;
            get_events_for_entity(conn, ENTITY_CATEGORY, &row.category.id)
        })
    }

    // ========================================================================
    // CATEGORY MUTATIONS
    // ========================================================================

    pub fn add_category(&self, name: &str) -> Result<Category> {
        let category = self.write(|tx| insert_category(tx, name, &self.actor))?.category;
        tracing::info!(category = %category.name, "category added");
        Ok(category)
    }

    /// Rename a category; a case-only rename of the same category is allowed
    pub fn rename_category(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.write(|tx| {
            let row = require_category(tx, old_name)?;
            let display = validate_category_name(new_name)?;
            let key = normalize_key(&display);

            if let Some(other) = find_category(tx, &display)? {
                if other.row_id != row.row_id {
                    return Err(RuleError::DuplicateCategory(other.category.name));
                }
            }

            tx.execute(
                "UPDATE categories SET name = ?1, name_key = ?2, updated_at = ?3 WHERE id = ?4",
                params![display, key, Utc::now().to_rfc3339(), row.row_id],
            )?;

            record(
                tx,
                "category_renamed",
                &row.category.id,
                serde_json::json!({"from": row.category.name, "to": display}),
                &self.actor,
            )
        })?;

        tracing::info!(from = old_name, to = new_name, "category renamed");
        Ok(())
    }

    /// Delete a category and all of its keywords
    pub fn delete_category(&self, name: &str) -> Result<()> {
        self.write(|tx| {
            let row = require_category(tx, name)?;

            let removed = tx.execute(
                "DELETE FROM keywords WHERE category_id = ?1",
                params![row.row_id],
            )?;
            tx.execute("DELETE FROM categories WHERE id = ?1", params![row.row_id])?;

            record(
                tx,
                "category_deleted",
                &row.category.id,
                serde_json::json!({"name": row.category.name, "keywords_removed": removed}),
                &self.actor,
            )
        })?;

        tracing::info!(category = name, "category deleted");
        Ok(())
    }

    /// Move a category to `index` (0-based) in the listing order
    ///
    /// Listing order decides which category wins when several match, so this
    /// is how a user gives one category priority over another.
    pub fn move_category(&self, name: &str, index: usize) -> Result<()> {
        self.write(|tx| {
            let row = require_category(tx, name)?;

            let mut order: Vec<i64> = {
                let mut stmt =
                    tx.prepare("SELECT id FROM categories ORDER BY position ASC, id ASC")?;
                let ids = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                ids
            };

            order.retain(|id| *id != row.row_id);
            let target = index.min(order.len());
            order.insert(target, row.row_id);

            for (i, id) in order.iter().enumerate() {
                tx.execute(
                    "UPDATE categories SET position = ?1 WHERE id = ?2",
                    params![i as i64 + 1, id],
                )?;
            }

            record(
                tx,
                "category_moved",
                &row.category.id,
                serde_json::json!({"index": target}),
                &self.actor,
            )
        })?;

        tracing::info!(category = name, index, "category moved");
        Ok(())
    }

    // ========================================================================
    // KEYWORD MUTATIONS
    // ========================================================================

    /// Add a keyword; returns `false` if the category already had it
    pub fn add_keyword(&self, category: &str, keyword: &str) -> Result<bool> {
        let added = self.write(|tx| {
            let row = require_category(tx, category)?;
            insert_keyword(tx, &row, keyword, &self.actor)
        })?;

        if added {
            tracing::info!(category, keyword = keyword.trim(), "keyword added");
        } else {
            tracing::debug!(category, keyword = keyword.trim(), "keyword already present");
        }
        Ok(added)
    }

    pub fn remove_keyword(&self, category: &str, keyword: &str) -> Result<()> {
        self.write(|tx| {
            let row = require_category(tx, category)?;

            let removed = tx.execute(
                "DELETE FROM keywords WHERE category_id = ?1 AND pattern_key = ?2",
                params![row.row_id, normalize_key(keyword)],
            )?;
            if removed == 0 {
                return Err(keyword_not_found(&row, keyword));
            }

            touch_category(tx, row.row_id)?;
            record(
                tx,
                "keyword_removed",
                &row.category.id,
                serde_json::json!({"keyword": keyword.trim()}),
                &self.actor,
            )
        })?;

        tracing::info!(category, keyword = keyword.trim(), "keyword removed");
        Ok(())
    }

    /// Teach `category` the keyword suggested by a description the user
    /// filed there by hand
    ///
    /// Returns the keyword when it was added; `None` when the description
    /// has no usable token or the category already had it.
    pub fn learn_keyword(&self, category: &str, description: &str) -> Result<Option<String>> {
        let learned = self.write(|tx| {
            let row = require_category(tx, category)?;
            let Some(keyword) = suggest_keyword(description) else {
                return Ok(None);
            };
            let added = insert_keyword(tx, &row, &keyword, &self.actor)?;
            Ok(added.then_some(keyword))
        })?;

        match &learned {
            Some(keyword) => tracing::info!(category, keyword = %keyword, "keyword learned"),
            None => tracing::debug!(category, description, "nothing new to learn"),
        }
        Ok(learned)
    }

    /// Enable or disable a keyword without deleting it
    pub fn set_keyword_enabled(&self, category: &str, keyword: &str, enabled: bool) -> Result<()> {
        self.write(|tx| {
            let row = require_category(tx, category)?;

            let updated = tx.execute(
                "UPDATE keywords SET enabled = ?1 WHERE category_id = ?2 AND pattern_key = ?3",
                params![enabled, row.row_id, normalize_key(keyword)],
            )?;
            if updated == 0 {
                return Err(keyword_not_found(&row, keyword));
            }

            touch_category(tx, row.row_id)?;
            record(
                tx,
                if enabled { "keyword_enabled" } else { "keyword_disabled" },
                &row.category.id,
                serde_json::json!({"keyword": keyword.trim()}),
                &self.actor,
            )
        })?;

        tracing::info!(category, keyword = keyword.trim(), enabled, "keyword toggled");
        Ok(())
    }
}

// ============================================================================
// ROW HELPERS (shared with the legacy importer)
// ============================================================================

fn validate_category_name(name: &str) -> Result<String> {
    let display = clean_display(name).ok_or(RuleError::EmptyCategoryName)?;
    if is_reserved_name(&display) {
        return Err(RuleError::ReservedCategoryName(display));
    }
    Ok(display)
}

fn keyword_not_found(row: &CategoryRow, keyword: &str) -> RuleError {
    RuleError::KeywordNotFound {
        category: row.category.name.clone(),
        keyword: keyword.trim().to_string(),
    }
}

fn record(
    conn: &Connection,
    event_type: &str,
    category_id: &str,
    data: serde_json::Value,
    actor: &str,
) -> Result<()> {
    let event = RuleEvent::new(event_type, ENTITY_CATEGORY, category_id, data, actor);
    insert_event(conn, &event)
}

fn touch_category(conn: &Connection, row_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE categories SET updated_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), row_id],
    )?;
    Ok(())
}

fn category_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CategoryRow> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(CategoryRow {
        row_id: row.get(0)?,
        category: Category {
            id: row.get(1)?,
            name: row.get(2)?,
            position: row.get(3)?,
            keywords: Vec::new(),
            created_at: parse_timestamp(4, &created_at)?,
            updated_at: parse_timestamp(5, &updated_at)?,
        },
    })
}

/// Look a category up by name (case-insensitive)
pub(crate) fn find_category(conn: &Connection, name: &str) -> Result<Option<CategoryRow>> {
    let row = conn
        .query_row(
            "SELECT id, category_uuid, name, position, created_at, updated_at
             FROM categories WHERE name_key = ?1",
            params![normalize_key(name)],
            category_from_row,
        )
        .optional()?;

    Ok(row)
}

pub(crate) fn require_category(conn: &Connection, name: &str) -> Result<CategoryRow> {
    find_category(conn, name)?.ok_or_else(|| RuleError::CategoryNotFound(name.trim().to_string()))
}

/// Insert a new category at the end of the listing order
pub(crate) fn insert_category(conn: &Connection, name: &str, actor: &str) -> Result<CategoryRow> {
    let display = validate_category_name(name)?;

    if let Some(existing) = find_category(conn, &display)? {
        return Err(RuleError::DuplicateCategory(existing.category.name));
    }

    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM categories",
        [],
        |row| row.get(0),
    )?;

    let category = Category::new(&display, position);

    conn.execute(
        "INSERT INTO categories (category_uuid, name, name_key, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            category.id,
            category.name,
            category.key(),
            category.position,
            category.created_at.to_rfc3339(),
            category.updated_at.to_rfc3339(),
        ],
    )?;
    let row_id = conn.last_insert_rowid();

    record(
        conn,
        "category_added",
        &category.id,
        serde_json::json!({"name": category.name, "position": position}),
        actor,
    )?;

    Ok(CategoryRow {
        row_id,
        category,
    })
}

/// Append a keyword to a category; `Ok(false)` if it is already there
pub(crate) fn insert_keyword(
    conn: &Connection,
    row: &CategoryRow,
    keyword: &str,
    actor: &str,
) -> Result<bool> {
    let pattern = clean_display(keyword).ok_or(RuleError::EmptyKeyword)?;
    let key = normalize_key(&pattern);

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM keywords WHERE category_id = ?1 AND pattern_key = ?2)",
        params![row.row_id, key],
        |r| r.get(0),
    )?;
    if exists {
        return Ok(false);
    }

    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM keywords WHERE category_id = ?1",
        params![row.row_id],
        |r| r.get(0),
    )?;

    let kw = Keyword::new(&pattern, position);

    conn.execute(
        "INSERT INTO keywords (category_id, pattern, pattern_key, position, enabled, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.row_id,
            kw.pattern,
            kw.key,
            kw.position,
            kw.enabled,
            kw.created_at.to_rfc3339(),
        ],
    )?;

    touch_category(conn, row.row_id)?;
    record(
        conn,
        "keyword_added",
        &row.category.id,
        serde_json::json!({"keyword": kw.pattern}),
        actor,
    )?;

    Ok(true)
}

fn keyword_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Keyword> {
    let created_at: String = row.get(offset + 4)?;

    Ok(Keyword {
        pattern: row.get(offset)?,
        key: row.get(offset + 1)?,
        position: row.get(offset + 2)?,
        enabled: row.get(offset + 3)?,
        created_at: parse_timestamp(offset + 4, &created_at)?,
    })
}

fn load_keywords(conn: &Connection, category_row_id: i64) -> Result<Vec<Keyword>> {
    let mut stmt = conn.prepare(
        "SELECT pattern, pattern_key, position, enabled, created_at
         FROM keywords
         WHERE category_id = ?1
         ORDER BY position ASC, id ASC",
    )?;

    let keywords = stmt
        .query_map(params![category_row_id], |row| keyword_from_row(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(keywords)
}

/// Every category with keywords attached, in listing order
pub(crate) fn load_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, category_uuid, name, position, created_at, updated_at
         FROM categories
         ORDER BY position ASC, id ASC",
    )?;

    let rows = stmt
        .query_map([], category_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut index_by_row: HashMap<i64, usize> = HashMap::new();
    let mut categories: Vec<Category> = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        index_by_row.insert(row.row_id, i);
        categories.push(row.category);
    }

    let mut stmt = conn.prepare(
        "SELECT category_id, pattern, pattern_key, position, enabled, created_at
         FROM keywords
         ORDER BY category_id ASC, position ASC, id ASC",
    )?;

    let keywords = stmt
        .query_map([], |row| {
            let category_id: i64 = row.get(0)?;
            Ok((category_id, keyword_from_row(row, 1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (category_id, keyword) in keywords {
        if let Some(&i) = index_by_row.get(&category_id) {
            categories[i].keywords.push(keyword);
        }
    }

    Ok(categories)
}

// ============================================================================
// TESTS
// ============================================================================
