use anyhow::{Result, bail};
use serde::Serialize;

use mealbot_core::cache::MealCache;
use mealbot_core::models::Meal;
use mealbot_core::source::{EditableMealSource, MealSource};

use super::helpers::print_meal_table;

pub(crate) fn cmd_meals(cache: &MealCache, json: bool) -> Result<()> {
    let meals = cache.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
    } else if meals.is_empty() {
        eprintln!("No meals cached. Use `mealbot sync` to fetch the menu.");
    } else {
        print_meal_table(&meals);
        if let Some(at) = cache.last_refresh() {
            let local = at.with_timezone(&cache.timezone());
            println!("Last refreshed {}", local.format("%Y-%m-%d %H:%M %Z"));
        }
    }

    Ok(())
}

pub(crate) async fn cmd_sync<S: MealSource>(cache: &MealCache, source: &S, json: bool) -> Result<()> {
    let meals = cache.refresh(source).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
    } else {
        println!("Synced {} meals", meals.len());
    }

    Ok(())
}

pub(crate) async fn cmd_add_meal<S: EditableMealSource>(
    cache: &MealCache,
    source: &S,
    name: &str,
    json: bool,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Meal name cannot be empty");
    }
    if cache.lookup(name)?.is_some() {
        bail!("'{name}' is already on the menu");
    }

    source.append_meal(name).await?;
    let meals = cache.refresh(source).await?;
    let Some(added) = meals.into_iter().find(|m| m.name == name) else {
        bail!("'{name}' was added to the sheet but did not come back on refresh");
    };

    if json {
        #[derive(Serialize)]
        struct Added<'a> {
            added: &'a Meal,
        }
        println!("{}", serde_json::to_string_pretty(&Added { added: &added })?);
    } else {
        println!("Added '{}' (ID: {})", added.name, added.id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use mealbot_core::db::Database;
    use mealbot_core::source::StaticSource;

    fn cache() -> MealCache {
        let db = Database::open_in_memory().unwrap().into_shared();
        MealCache::new(db, Tz::UTC).unwrap()
    }

    #[tokio::test]
    async fn test_sync_then_list() {
        let cache = cache();
        let source = StaticSource::new(["Oatmeal", "Salad"]);
        cmd_sync(&cache, &source, true).await.unwrap();
        assert_eq!(cache.list().unwrap().len(), 2);
        cmd_meals(&cache, false).unwrap();
    }

    #[tokio::test]
    async fn test_add_meal() {
        let cache = cache();
        let source = StaticSource::new(["Oatmeal"]);
        cmd_add_meal(&cache, &source, " Soup ", false).await.unwrap();
        assert!(cache.lookup("Soup").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_meal_rejects_duplicates_and_blanks() {
        let cache = cache();
        let source = StaticSource::new(["Oatmeal"]);
        cmd_sync(&cache, &source, false).await.unwrap();

        let err = cmd_add_meal(&cache, &source, "Oatmeal", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already on the menu"));
        assert!(cmd_add_meal(&cache, &source, "  ", false).await.is_err());
        assert_eq!(cache.list().unwrap().len(), 1);
    }
}
