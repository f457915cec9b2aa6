use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Meal, NewSelection, SelectOutcome, Selection};

const MEALS_SYNCED_AT: &str = "meals_synced_at";

/// One connection shared by the cache, the selection store, and the scheduler.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock the shared database. A panic while holding the lock leaves the
/// connection usable, so poisoning is ignored.
pub fn lock(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS meals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    position INTEGER,
                    synced_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS selections (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    meal_id INTEGER NOT NULL REFERENCES meals(id),
                    selected_date TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, selected_date)
                );

                CREATE INDEX IF NOT EXISTS idx_meals_position ON meals(position);
                CREATE INDEX IF NOT EXISTS idx_selections_meal ON selections(meal_id);

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn meal_from_row(row: &rusqlite::Row) -> rusqlite::Result<Meal> {
        Ok(Meal {
            id: row.get(0)?,
            name: row.get(1)?,
            position: row.get(2)?,
            synced_at: row.get(3)?,
        })
    }

    // Expects columns:
    // 0: s.id, 1: s.user_id, 2: s.meal_id, 3: s.selected_date, 4: s.created_at, 5: m.name
    fn selection_from_row(row: &rusqlite::Row) -> rusqlite::Result<Selection> {
        Ok(Selection {
            id: row.get(0)?,
            user_id: row.get(1)?,
            meal_id: row.get(2)?,
            selected_date: row.get(3)?,
            created_at: row.get(4)?,
            meal_name: row.get(5)?,
        })
    }

    // --- Meals ---

    /// Make `names` the current menu, in order.
    ///
    /// Existing names keep their id. Names missing from `names` are deleted
    /// unless a selection still points at them, in which case they are retired.
    /// The refresh time is stamped in the same transaction.
    pub fn replace_meals(&self, names: &[String], synced_at: DateTime<Utc>) -> Result<Vec<Meal>> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("UPDATE meals SET position = NULL", [])?;
        for (position, name) in names.iter().enumerate() {
            tx.execute(
                "INSERT INTO meals (name, position, synced_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET position = excluded.position, synced_at = excluded.synced_at",
                params![name, i64::try_from(position)?, synced_at],
            )?;
        }
        let removed = tx.execute(
            "DELETE FROM meals
             WHERE position IS NULL AND id NOT IN (SELECT meal_id FROM selections)",
            [],
        )?;
        Self::put_setting(&tx, MEALS_SYNCED_AT, &synced_at.to_rfc3339())?;
        tx.commit()?;

        debug!(count = names.len(), removed, "replaced meal cache");
        self.list_meals()
    }

    pub fn list_meals(&self) -> Result<Vec<Meal>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, position, synced_at FROM meals
             WHERE position IS NOT NULL ORDER BY position",
        )?;
        let meals = stmt
            .query_map([], Self::meal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meals)
    }

    /// Look up a meal by id, retired meals included.
    pub fn get_meal_by_id(&self, id: i64) -> Result<Option<Meal>> {
        let meal = self
            .conn
            .query_row(
                "SELECT id, name, position, synced_at FROM meals WHERE id = ?1",
                params![id],
                Self::meal_from_row,
            )
            .optional()?;
        Ok(meal)
    }

    /// Look up a meal by exact name, retired meals included.
    pub fn get_meal_by_name(&self, name: &str) -> Result<Option<Meal>> {
        let meal = self
            .conn
            .query_row(
                "SELECT id, name, position, synced_at FROM meals WHERE name = ?1",
                params![name],
                Self::meal_from_row,
            )
            .optional()?;
        Ok(meal)
    }

    pub fn meals_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.get_setting(MEALS_SYNCED_AT)? else {
            return Ok(None);
        };
        let at = DateTime::parse_from_rfc3339(&raw)
            .with_context(|| format!("Invalid {MEALS_SYNCED_AT} setting: '{raw}'"))?;
        Ok(Some(at.with_timezone(&Utc)))
    }

    // --- Selections ---

    /// Record `new` as the user's meal for that day, replacing any earlier pick.
    ///
    /// Fails with [`StoreError::UnknownMeal`] when the meal id does not exist
    /// and [`StoreError::MealRetired`] when it is no longer on the menu.
    pub fn upsert_selection(&self, new: &NewSelection, now: DateTime<Utc>) -> Result<SelectOutcome> {
        if let Some(meal) = self.get_meal_by_id(new.meal_id)? {
            if meal.is_retired() {
                return Err(StoreError::MealRetired(meal.name).into());
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        let previous = Self::selection_for_day(&tx, new.user_id, new.selected_date)?;
        if let Some(previous) = previous.as_ref().filter(|p| p.meal_id == new.meal_id) {
            return Ok(SelectOutcome::Unchanged {
                selection: previous.clone(),
            });
        }

        tx.execute(
            "INSERT INTO selections (user_id, meal_id, selected_date, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, selected_date) DO UPDATE
             SET meal_id = excluded.meal_id, created_at = excluded.created_at",
            params![new.user_id, new.meal_id, new.selected_date, now],
        )
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                anyhow::Error::new(StoreError::UnknownMeal(new.meal_id))
            } else {
                anyhow::Error::new(e)
            }
        })?;

        let selection = Self::selection_for_day(&tx, new.user_id, new.selected_date)?
            .context("Selection missing after write")?;
        tx.commit()?;

        Ok(match previous {
            Some(previous) => SelectOutcome::Replaced {
                previous,
                selection,
            },
            None => SelectOutcome::Created { selection },
        })
    }

    pub fn get_selection(&self, user_id: i64, date: NaiveDate) -> Result<Option<Selection>> {
        Self::selection_for_day(&self.conn, user_id, date)
    }

    fn selection_for_day(
        conn: &Connection,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<Selection>> {
        let selection = conn
            .query_row(
                "SELECT s.id, s.user_id, s.meal_id, s.selected_date, s.created_at, m.name
                 FROM selections s
                 JOIN meals m ON s.meal_id = m.id
                 WHERE s.user_id = ?1 AND s.selected_date = ?2",
                params![user_id, date],
                Self::selection_from_row,
            )
            .optional()?;
        Ok(selection)
    }

    /// Selections for `user_id` with `start <= selected_date <= end`, oldest first.
    pub fn get_selections_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Selection>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.user_id, s.meal_id, s.selected_date, s.created_at, m.name
             FROM selections s
             JOIN meals m ON s.meal_id = m.id
             WHERE s.user_id = ?1 AND s.selected_date >= ?2 AND s.selected_date <= ?3
             ORDER BY s.selected_date",
        )?;
        let selections = stmt
            .query_map(params![user_id, start, end], Self::selection_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(selections)
    }

    pub fn delete_selection(&self, user_id: i64, date: NaiveDate) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM selections WHERE user_id = ?1 AND selected_date = ?2",
            params![user_id, date],
        )?;
        Ok(rows > 0)
    }

    // --- Settings ---

    fn put_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
