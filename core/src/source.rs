use std::future::Future;
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, bail};

/// Where the menu comes from.
///
/// The binary implements this with the Google Sheets API; tests use
/// [`StaticSource`]. Implementations return raw cell values in row order;
/// the cache normalizes them.
pub trait MealSource: Send + Sync {
    fn fetch_meals(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// A source that also accepts new menu entries.
pub trait EditableMealSource: MealSource {
    /// Add `name` as a new row after the last one.
    fn append_meal(&self, name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// A fixed in-memory menu.
#[derive(Debug, Default)]
pub struct StaticSource {
    meals: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn new<I, S>(meals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            meals: Mutex::new(meals.into_iter().map(Into::into).collect()),
        }
    }
}

impl MealSource for StaticSource {
    async fn fetch_meals(&self) -> Result<Vec<String>> {
        Ok(self
            .meals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

impl EditableMealSource for StaticSource {
    async fn append_meal(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Meal name cannot be empty");
        }
        self.meals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
        Ok(())
    }
}
