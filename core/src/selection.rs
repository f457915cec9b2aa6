use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::info;

use crate::db::{SharedDatabase, lock};
use crate::models::{NewSelection, SelectOutcome, Selection};
use crate::week::Week;

/// Per-user meal picks, at most one per calendar day.
///
/// Picking again for a day that already has a meal replaces it.
#[derive(Clone)]
pub struct SelectionStore {
    db: SharedDatabase,
}

impl SelectionStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn select(&self, user_id: i64, meal_id: i64, date: NaiveDate) -> Result<SelectOutcome> {
        self.select_at(user_id, meal_id, date, Utc::now())
    }

    pub fn select_at(
        &self,
        user_id: i64,
        meal_id: i64,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SelectOutcome> {
        let outcome = lock(&self.db).upsert_selection(
            &NewSelection {
                user_id,
                meal_id,
                selected_date: date,
            },
            now,
        )?;

        match &outcome {
            SelectOutcome::Created { selection } => {
                info!(user_id, meal = %selection.meal_name, %date, "meal selected");
            }
            SelectOutcome::Replaced {
                previous,
                selection,
            } => {
                info!(
                    user_id,
                    meal = %selection.meal_name,
                    previous = %previous.meal_name,
                    %date,
                    "meal selection replaced"
                );
            }
            SelectOutcome::Unchanged { .. } => {}
        }
        Ok(outcome)
    }

    /// Selections whose date falls in `week_start ..= week_start + 6`, by date.
    pub fn week_selections(&self, user_id: i64, week_start: NaiveDate) -> Result<Vec<Selection>> {
        let end = week_start + Days::new(6);
        lock(&self.db).get_selections_between(user_id, week_start, end)
    }

    pub fn selections_for_week(&self, user_id: i64, week: &Week) -> Result<Vec<Selection>> {
        self.week_selections(user_id, week.start())
    }

    pub fn get(&self, user_id: i64, date: NaiveDate) -> Result<Option<Selection>> {
        lock(&self.db).get_selection(user_id, date)
    }

    /// Remove the user's pick for `date`. Returns false when there was none.
    pub fn clear(&self, user_id: i64, date: NaiveDate) -> Result<bool> {
        let removed = lock(&self.db).delete_selection(user_id, date)?;
        if removed {
            info!(user_id, %date, "meal selection cleared");
        }
        Ok(removed)
    }
}
