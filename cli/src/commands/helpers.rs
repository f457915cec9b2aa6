use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealbot_core::models::Meal;

/// Today in `tz`.
pub(crate) fn today(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

pub(crate) fn parse_date(date_str: Option<String>, tz: Tz) -> Result<NaiveDate> {
    parse_date_at(date_str, tz, Utc::now())
}

/// Resolve `today`/`yesterday`/`tomorrow` or `YYYY-MM-DD` against the local
/// date in `tz` at `now`.
pub(crate) fn parse_date_at(
    date_str: Option<String>,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<NaiveDate> {
    let today = today(tz, now);
    match date_str {
        None => Ok(today),
        Some(s) => match s.as_str() {
            "today" => Ok(today),
            "yesterday" => Ok(today - chrono::Duration::days(1)),
            "tomorrow" => Ok(today + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn print_meal_table(meals: &[Meal]) {
    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
    }

    let rows: Vec<MealRow> = meals
        .iter()
        .enumerate()
        .map(|(i, m)| MealRow {
            idx: i + 1,
            id: m.id,
            name: truncate(&m.name, 40),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(0..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
