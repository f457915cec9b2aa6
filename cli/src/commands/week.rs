use anyhow::{Result, bail};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use mealbot_core::cache::MealCache;
use mealbot_core::models::{SelectOutcome, Selection};
use mealbot_core::selection::SelectionStore;
use mealbot_core::week::Week;

use super::helpers::{json_error, parse_date, truncate};

#[derive(Serialize)]
struct WeekView<'a> {
    user_id: i64,
    week: Week,
    selections: &'a [Selection],
}

pub(crate) fn cmd_week(
    store: &SelectionStore,
    tz: Tz,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let week = Week::containing(parse_date(date, tz)?);
    let selections = store.selections_for_week(user_id, &week)?;

    if json {
        let view = WeekView {
            user_id,
            week,
            selections: &selections,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Week of {week}");
    if selections.is_empty() {
        eprintln!("No meals selected. Use `mealbot select` or the bot's /meals.");
    } else {
        print_week_table(&week, &selections);
    }
    Ok(())
}

fn print_week_table(week: &Week, selections: &[Selection]) {
    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Date")]
        date: NaiveDate,
        #[tabled(rename = "Meal")]
        meal: String,
    }

    let rows: Vec<DayRow> = week
        .days()
        .into_iter()
        .map(|date| DayRow {
            day: date.format("%a").to_string(),
            date,
            meal: selections
                .iter()
                .find(|s| s.selected_date == date)
                .map_or_else(|| "-".to_string(), |s| truncate(&s.meal_name, 40)),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
}

pub(crate) fn cmd_select(
    cache: &MealCache,
    store: &SelectionStore,
    user_id: i64,
    meal_name: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date, cache.timezone())?;
    let Some(meal) = cache.lookup(meal_name)? else {
        bail!("Meal '{}' is not on the menu. Use `mealbot meals` to list it", meal_name.trim());
    };

    let outcome = store.select(user_id, meal.id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        let s = outcome.selection();
        match &outcome {
            SelectOutcome::Created { .. } => {
                println!("Selected '{}' for {}", s.meal_name, s.selected_date);
            }
            SelectOutcome::Replaced { previous, .. } => println!(
                "Selected '{}' for {} (was '{}')",
                s.meal_name, s.selected_date, previous.meal_name
            ),
            SelectOutcome::Unchanged { .. } => {
                println!("'{}' was already selected for {}", s.meal_name, s.selected_date);
            }
        }
    }

    Ok(())
}

pub(crate) fn cmd_clear(
    store: &SelectionStore,
    tz: Tz,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date, tz)?;
    let removed = store.clear(user_id, date)?;

    if json {
        if removed {
            println!("{}", serde_json::json!({ "cleared": date }));
        } else {
            println!("{}", json_error(&format!("No selection on {date}")));
        }
    } else if removed {
        println!("Cleared selection for {date}");
    } else {
        eprintln!("No selection on {date}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealbot_core::db::Database;
    use mealbot_core::source::StaticSource;

    async fn setup() -> (MealCache, SelectionStore) {
        let db = Database::open_in_memory().unwrap().into_shared();
        let cache = MealCache::new(db.clone(), Tz::UTC).unwrap();
        cache
            .refresh(&StaticSource::new(["Oatmeal", "Salad"]))
            .await
            .unwrap();
        (cache, SelectionStore::new(db))
    }

    #[tokio::test]
    async fn test_select_by_name() {
        let (cache, store) = setup().await;
        cmd_select(&cache, &store, 42, " Salad ", Some("2024-06-03".into()), false).unwrap();

        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(store.get(42, monday).unwrap().unwrap().meal_name, "Salad");
        cmd_week(&store, Tz::UTC, 42, Some("2024-06-05".into()), true).unwrap();
    }

    #[tokio::test]
    async fn test_select_unknown_name() {
        let (cache, store) = setup().await;
        let err = cmd_select(&cache, &store, 42, "Tacos", None, false).unwrap_err();
        assert!(err.to_string().contains("not on the menu"));
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, store) = setup().await;
        let date = Some("2024-06-04".to_string());
        cmd_select(&cache, &store, 42, "Oatmeal", date.clone(), false).unwrap();
        cmd_clear(&store, Tz::UTC, 42, date.clone(), false).unwrap();

        let tuesday = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        assert!(store.get(42, tuesday).unwrap().is_none());
        // Clearing again is not an error
        cmd_clear(&store, Tz::UTC, 42, date, true).unwrap();
    }
}
