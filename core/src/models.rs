use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A meal offered by the source sheet.
///
/// `position` is the row order in the sheet at the last refresh. Meals that
/// dropped out of the sheet but are still referenced by a selection keep their
/// row with `position = None` so history survives the refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meal {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    pub synced_at: DateTime<Utc>,
}

impl Meal {
    pub fn is_retired(&self) -> bool {
        self.position.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub id: i64,
    pub user_id: i64,
    pub meal_id: i64,
    pub selected_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    // Joined field for display
    pub meal_name: String,
}

#[derive(Debug, Clone)]
pub struct NewSelection {
    pub user_id: i64,
    pub meal_id: i64,
    pub selected_date: NaiveDate,
}

/// What `select` did to the user's plan for that day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelectOutcome {
    Created { selection: Selection },
    Replaced { previous: Selection, selection: Selection },
    Unchanged { selection: Selection },
}

impl SelectOutcome {
    pub fn selection(&self) -> &Selection {
        match self {
            SelectOutcome::Created { selection }
            | SelectOutcome::Replaced { selection, .. }
            | SelectOutcome::Unchanged { selection } => selection,
        }
    }
}

/// Trim, drop blanks, and keep the first occurrence of each name.
pub fn normalize_meal_names<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .filter_map(|name| {
            let name = name.as_ref().trim();
            if name.is_empty() || !seen.insert(name.to_string()) {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_skips_blanks() {
        let names = normalize_meal_names(["  Oatmeal ", "", "   ", "Salad"]);
        assert_eq!(names, vec!["Oatmeal", "Salad"]);
    }

    #[test]
    fn test_normalize_keeps_first_duplicate() {
        let names = normalize_meal_names(["Soup", "Salad", "Soup ", "Oatmeal"]);
        assert_eq!(names, vec!["Soup", "Salad", "Oatmeal"]);
    }

    #[test]
    fn test_normalize_preserves_order() {
        let names = normalize_meal_names(vec!["C".to_string(), "A".to_string(), "B".to_string()]);
        assert_eq!(names, vec!["C", "A", "B"]);
    }
}
