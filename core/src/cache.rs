use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::db::{SharedDatabase, lock};
use crate::models::{Meal, normalize_meal_names};
use crate::source::MealSource;

/// The locally cached menu plus the time it was last filled.
///
/// The cache goes stale at local midnight in `tz`. A failed refresh leaves
/// the previous menu and timestamp in place.
pub struct MealCache {
    db: SharedDatabase,
    tz: Tz,
    refreshed_at: Mutex<Option<DateTime<Utc>>>,
}

impl MealCache {
    /// Build a cache over `db`, picking up the refresh time a previous
    /// process recorded.
    pub fn new(db: SharedDatabase, tz: Tz) -> Result<Self> {
        let refreshed_at = lock(&db).meals_synced_at()?;
        Ok(Self {
            db,
            tz,
            refreshed_at: Mutex::new(refreshed_at),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self
            .refreshed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn refresh<S: MealSource>(&self, source: &S) -> Result<Vec<Meal>> {
        self.refresh_at(source, Utc::now()).await
    }

    /// Replace the cached menu with what `source` returns, stamped `now`.
    pub async fn refresh_at<S: MealSource>(
        &self,
        source: &S,
        now: DateTime<Utc>,
    ) -> Result<Vec<Meal>> {
        let raw = source
            .fetch_meals()
            .await
            .context("Failed to fetch meals from source")?;
        let names = normalize_meal_names(raw);
        if names.is_empty() {
            warn!("Meal source returned no meals");
        }

        let meals = lock(&self.db).replace_meals(&names, now)?;
        *self
            .refreshed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);

        info!(count = meals.len(), "Meal cache refreshed");
        Ok(meals)
    }

    pub async fn refresh_if_stale<S: MealSource>(&self, source: &S) -> Result<Option<Vec<Meal>>> {
        self.refresh_if_stale_at(source, Utc::now()).await
    }

    /// Refresh only when the cache predates the latest local midnight.
    /// Returns `None` when the cache was already fresh.
    pub async fn refresh_if_stale_at<S: MealSource>(
        &self,
        source: &S,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Meal>>> {
        if !self.is_stale_at(now) {
            return Ok(None);
        }
        self.refresh_at(source, now).await.map(Some)
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// True when no refresh has happened since the most recent local midnight.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh() {
            None => true,
            Some(at) => {
                at.with_timezone(&self.tz).date_naive() < now.with_timezone(&self.tz).date_naive()
            }
        }
    }

    /// The current menu, in source order.
    pub fn list(&self) -> Result<Vec<Meal>> {
        lock(&self.db).list_meals()
    }

    /// The menu entry with exactly this name, if it is on the current menu.
    pub fn lookup(&self, name: &str) -> Result<Option<Meal>> {
        let meal = lock(&self.db).get_meal_by_name(name.trim())?;
        Ok(meal.filter(|m| !m.is_retired()))
    }

    /// The menu entry with this id, if it is on the current menu.
    pub fn get(&self, id: i64) -> Result<Option<Meal>> {
        let meal = lock(&self.db).get_meal_by_id(id)?;
        Ok(meal.filter(|m| !m.is_retired()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::source::StaticSource;
    use anyhow::bail;
    use chrono::TimeZone;

    struct UnreachableSource;

    impl MealSource for UnreachableSource {
        async fn fetch_meals(&self) -> Result<Vec<String>> {
            bail!("connection refused")
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn cache(tz: Tz) -> MealCache {
        MealCache::new(Database::open_in_memory().unwrap().into_shared(), tz).unwrap()
    }

    fn listed_names(cache: &MealCache) -> Vec<String> {
        cache.list().unwrap().into_iter().map(|m| m.name).collect()
    }

    #[tokio::test]
    async fn test_refresh_lists_source_rows_in_order() {
        let cache = cache(Tz::UTC);
        let source = StaticSource::new(["Oatmeal", "Salad", "Soup"]);

        let meals = cache.refresh_at(&source, at(3, 8)).await.unwrap();
        assert_eq!(meals.len(), 3);

        let listed = cache.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Oatmeal", "Salad", "Soup"]);
        assert!(listed.iter().all(|m| m.synced_at == at(3, 8)));
        assert_eq!(cache.last_refresh(), Some(at(3, 8)));
    }

    #[tokio::test]
    async fn test_refresh_replaces_previous_menu() {
        let cache = cache(Tz::UTC);
        cache
            .refresh_at(&StaticSource::new(["Oatmeal", "Salad"]), at(3, 8))
            .await
            .unwrap();
        cache
            .refresh_at(&StaticSource::new(["Soup", "Salad"]), at(4, 0))
            .await
            .unwrap();
        assert_eq!(listed_names(&cache), vec!["Soup", "Salad"]);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let cache = cache(Tz::UTC);
        let source = StaticSource::new(["Oatmeal", "Salad"]);
        let first = cache.refresh_at(&source, at(3, 8)).await.unwrap();
        let second = cache.refresh_at(&source, at(3, 8)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_refresh_normalizes_cells() {
        let cache = cache(Tz::UTC);
        let source = StaticSource::new([" Oatmeal ", "", "Salad", "Oatmeal"]);
        cache.refresh_at(&source, at(3, 8)).await.unwrap();
        assert_eq!(listed_names(&cache), vec!["Oatmeal", "Salad"]);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_menu() {
        let cache = cache(Tz::UTC);
        cache
            .refresh_at(&StaticSource::new(["Oatmeal", "Salad"]), at(3, 8))
            .await
            .unwrap();
        let before = cache.list().unwrap();

        let err = cache
            .refresh_at(&UnreachableSource, at(4, 0))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));

        assert_eq!(cache.list().unwrap(), before);
        assert_eq!(cache.last_refresh(), Some(at(3, 8)));
    }

    #[test]
    fn test_new_cache_is_stale() {
        let cache = cache(Tz::UTC);
        assert!(cache.last_refresh().is_none());
        assert!(cache.is_stale_at(at(3, 8)));
    }

    #[tokio::test]
    async fn test_stale_after_local_midnight() {
        let cache = cache(Tz::UTC);
        cache
            .refresh_at(&StaticSource::new(["Oatmeal"]), at(3, 8))
            .await
            .unwrap();
        assert!(!cache.is_stale_at(at(3, 23)));
        assert!(cache.is_stale_at(at(4, 0)));
    }

    #[tokio::test]
    async fn test_staleness_follows_configured_timezone() {
        // Tokyo is UTC+9: 16:00 UTC on the 3rd is 01:00 on the 4th there
        let cache = cache(chrono_tz::Asia::Tokyo);
        cache
            .refresh_at(&StaticSource::new(["Oatmeal"]), at(3, 8))
            .await
            .unwrap();
        assert!(!cache.is_stale_at(at(3, 14)));
        assert!(cache.is_stale_at(at(3, 16)));
    }

    #[tokio::test]
    async fn test_refresh_if_stale() {
        let cache = cache(Tz::UTC);
        let source = StaticSource::new(["Oatmeal"]);

        let first = cache.refresh_if_stale_at(&source, at(3, 8)).await.unwrap();
        assert!(first.is_some());
        let again = cache.refresh_if_stale_at(&source, at(3, 9)).await.unwrap();
        assert!(again.is_none());
        assert_eq!(cache.last_refresh(), Some(at(3, 8)));

        let next_day = cache.refresh_if_stale_at(&source, at(4, 1)).await.unwrap();
        assert!(next_day.is_some());
        assert_eq!(cache.last_refresh(), Some(at(4, 1)));
    }

    #[tokio::test]
    async fn test_new_cache_reads_persisted_refresh_time() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let first = MealCache::new(db.clone(), Tz::UTC).unwrap();
        first
            .refresh_at(&StaticSource::new(["Oatmeal"]), at(3, 8))
            .await
            .unwrap();

        let second = MealCache::new(db, Tz::UTC).unwrap();
        assert_eq!(second.last_refresh(), Some(at(3, 8)));
        assert!(!second.is_stale_at(at(3, 12)));
    }

    #[tokio::test]
    async fn test_lookup_by_name() {
        let cache = cache(Tz::UTC);
        cache
            .refresh_at(&StaticSource::new(["Oatmeal", "Salad"]), at(3, 8))
            .await
            .unwrap();

        let salad = cache.lookup("Salad").unwrap().unwrap();
        assert_eq!(salad.name, "Salad");
        assert_eq!(cache.get(salad.id).unwrap().unwrap(), salad);
        assert!(cache.lookup(" Salad ").unwrap().is_some());
        assert!(cache.lookup("Pizza").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_skips_meals_dropped_from_menu() {
        let cache = cache(Tz::UTC);
        cache
            .refresh_at(&StaticSource::new(["Oatmeal", "Salad"]), at(3, 8))
            .await
            .unwrap();
        cache
            .refresh_at(&StaticSource::new(["Salad"]), at(4, 8))
            .await
            .unwrap();
        assert!(cache.lookup("Oatmeal").unwrap().is_none());
    }
}
