use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mealbot_core::cache::MealCache;
use mealbot_core::error::StoreError;
use mealbot_core::models::{Meal, SelectOutcome, Selection};
use mealbot_core::selection::SelectionStore;
use mealbot_core::source::EditableMealSource;
use mealbot_core::week::Week;

use crate::telegram::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, TelegramClient, Update,
    User, escape_html,
};

const POLL_TIMEOUT_SECS: u32 = 30;
const POLL_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);
/// After a failed inline refresh, `/meals` serves the cached menu for this
/// long before asking the sheet again.
const REFRESH_COOLDOWN_MINUTES: i64 = 10;

const HELP: &str = "Commands:\n\
    /meals - pick meals for this week\n\
    /week - show this week's plan\n\
    /add &lt;name&gt; - add a meal to the menu";
const MEAL_GONE: &str = "That meal is no longer on the menu. Use /meals for the current list.";
const GENERIC_ERROR: &str = "An error occurred. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Meals,
    Week,
    Add(String),
    Help,
}

/// Parse `/name[@bot] [args]`. Plain text is not a command.
pub fn parse_command(text: &str) -> Option<Command> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    Some(match name.as_str() {
        "start" => Command::Start,
        "meals" => Command::Meals,
        "week" | "view" => Command::Week,
        "add" => Command::Add(arg.trim().to_string()),
        _ => Command::Help,
    })
}

/// Inline-button payloads. Telegram caps these at 64 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    PickMeal(i64),
    PickDay { meal_id: i64, date: NaiveDate },
}

impl Callback {
    pub fn encode(&self) -> String {
        match self {
            Callback::PickMeal(id) => format!("meal:{id}"),
            Callback::PickDay { meal_id, date } => format!("day:{meal_id}:{date}"),
        }
    }
}

pub fn parse_callback(data: &str) -> Option<Callback> {
    let mut parts = data.split(':');
    match (parts.next()?, parts.next(), parts.next(), parts.next()) {
        ("meal", Some(id), None, None) => id.parse().ok().map(Callback::PickMeal),
        ("day", Some(id), Some(date), None) => Some(Callback::PickDay {
            meal_id: id.parse().ok()?,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }
}

/// Answer to a button press: an optional toast, plus an optional rewrite of
/// the message that carried the button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReply {
    pub notice: Option<String>,
    pub alert: bool,
    pub edit: Option<Reply>,
}

impl CallbackReply {
    fn alert(text: &str) -> Self {
        Self {
            notice: Some(text.to_string()),
            alert: true,
            edit: None,
        }
    }
}

pub fn welcome(first_name: &str) -> String {
    let greeting = if first_name.trim().is_empty() {
        "Welcome to Meal Planner Bot! 🍽️".to_string()
    } else {
        format!("Hi {}, welcome to Meal Planner Bot! 🍽️", escape_html(first_name.trim()))
    };
    format!(
        "{greeting}\n\n\
         Use /meals to see available meals and plan your week.\n\
         Use /week to see your selected meals for this week."
    )
}

pub fn day_label(date: NaiveDate) -> String {
    date.format("%a %d %b").to_string()
}

pub fn meals_keyboard(meals: &[Meal]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: meals
            .iter()
            .map(|meal| {
                vec![InlineKeyboardButton::new(
                    meal.name.clone(),
                    Callback::PickMeal(meal.id).encode(),
                )]
            })
            .collect(),
    }
}

pub fn day_picker(meal: &Meal, week: &Week, today: NaiveDate) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: week
            .days()
            .iter()
            .map(|&date| {
                let mut label = day_label(date);
                if date == today {
                    label.push_str(" (today)");
                }
                vec![InlineKeyboardButton::new(
                    label,
                    Callback::PickDay {
                        meal_id: meal.id,
                        date,
                    }
                    .encode(),
                )]
            })
            .collect(),
    }
}

pub fn render_week(week: &Week, selections: &[Selection]) -> String {
    if selections.is_empty() {
        return "You haven't selected any meals for this week yet.".to_string();
    }
    let mut text = format!("<b>Your meals for {week}:</b>\n\n");
    for day in week.days() {
        let meal = selections
            .iter()
            .find(|s| s.selected_date == day)
            .map_or_else(|| "-".to_string(), |s| escape_html(&s.meal_name));
        let label = day_label(day);
        text.push_str(&format!("<b>{label}:</b> {meal}\n"));
    }
    text
}

fn selection_reply(outcome: &SelectOutcome) -> CallbackReply {
    let selection = outcome.selection();
    let meal = escape_html(&selection.meal_name);
    let day = day_label(selection.selected_date);
    let (notice, text) = match outcome {
        SelectOutcome::Created { .. } => (
            "✅ Meal selected!",
            format!("<b>{meal}</b> planned for {day}. Use /week to see all your selections."),
        ),
        SelectOutcome::Replaced { previous, .. } => {
            let previous = escape_html(&previous.meal_name);
            (
                "✅ Meal updated!",
                format!(
                    "<b>{meal}</b> planned for {day} instead of {previous}. Use /week to see all your selections."
                ),
            )
        }
        SelectOutcome::Unchanged { .. } => (
            "Already planned",
            format!("<b>{meal}</b> was already planned for {day}."),
        ),
    };
    CallbackReply {
        notice: Some(notice.to_string()),
        alert: false,
        edit: Some(Reply::text(text)),
    }
}

/// Turns commands and button presses into replies. Holds no connection to
/// Telegram, so every decision the bot makes can be exercised offline.
pub struct Planner<S> {
    cache: Arc<MealCache>,
    store: SelectionStore,
    source: Arc<S>,
    failed_refresh_at: Mutex<Option<DateTime<Utc>>>,
}

impl<S: EditableMealSource> Planner<S> {
    pub fn new(cache: Arc<MealCache>, store: SelectionStore, source: Arc<S>) -> Self {
        Self {
            cache,
            store,
            source,
            failed_refresh_at: Mutex::new(None),
        }
    }

    pub async fn handle_command(
        &self,
        command: Command,
        from: &User,
        now: DateTime<Utc>,
    ) -> Result<Reply> {
        match command {
            Command::Start => Ok(Reply::text(welcome(&from.first_name))),
            Command::Help => Ok(Reply::text(HELP)),
            Command::Meals => self.show_meals(now).await,
            Command::Week => self.show_week(from.id, now),
            Command::Add(name) => self.add_meal(&name, now).await,
        }
    }

    /// True while a failed inline refresh is younger than the cooldown.
    fn refresh_cooling_down(&self, now: DateTime<Utc>) -> bool {
        let failed_at = *self
            .failed_refresh_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failed_at.is_some_and(|at| now - at < chrono::Duration::minutes(REFRESH_COOLDOWN_MINUTES))
    }

    async fn show_meals(&self, now: DateTime<Utc>) -> Result<Reply> {
        if self.cache.is_stale_at(now) && !self.refresh_cooling_down(now) {
            let failed_at = match self.cache.refresh_at(self.source.as_ref(), now).await {
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Stale meal cache could not be refreshed; serving cached menu");
                    Some(now)
                }
            };
            *self
                .failed_refresh_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = failed_at;
        }

        let meals = self.cache.list()?;
        if meals.is_empty() {
            return Ok(Reply::text(
                "No meals available at the moment. Please try again later.",
            ));
        }
        Ok(Reply {
            text: "Select a meal to plan for this week:".to_string(),
            keyboard: Some(meals_keyboard(&meals)),
        })
    }

    fn show_week(&self, user_id: i64, now: DateTime<Utc>) -> Result<Reply> {
        let week = Week::current(&self.cache.timezone(), now);
        let selections = self.store.selections_for_week(user_id, &week)?;
        Ok(Reply::text(render_week(&week, &selections)))
    }

    async fn add_meal(&self, name: &str, now: DateTime<Utc>) -> Result<Reply> {
        if name.is_empty() {
            return Ok(Reply::text("Usage: /add &lt;meal name&gt;"));
        }
        let escaped = escape_html(name);
        if self.cache.lookup(name)?.is_some() {
            return Ok(Reply::text(format!(
                "<b>{escaped}</b> is already on the menu."
            )));
        }

        self.source.append_meal(name).await?;
        self.cache.refresh_at(self.source.as_ref(), now).await?;
        Ok(Reply::text(format!("Added <b>{escaped}</b> to the menu.")))
    }

    pub fn handle_callback(
        &self,
        callback: Callback,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CallbackReply> {
        let tz = self.cache.timezone();
        let week = Week::current(&tz, now);

        match callback {
            Callback::PickMeal(meal_id) => {
                let Some(meal) = self.cache.get(meal_id)? else {
                    return Ok(CallbackReply::alert(MEAL_GONE));
                };
                let today = now.with_timezone(&tz).date_naive();
                Ok(CallbackReply {
                    notice: None,
                    alert: false,
                    edit: Some(Reply {
                        text: format!("Pick a day for <b>{}</b>:", escape_html(&meal.name)),
                        keyboard: Some(day_picker(&meal, &week, today)),
                    }),
                })
            }
            Callback::PickDay { meal_id, date } => {
                if !week.contains(date) {
                    return Ok(CallbackReply::alert(
                        "That week is over. Use /meals to plan this week.",
                    ));
                }
                match self.store.select_at(user_id, meal_id, date, now) {
                    Ok(outcome) => Ok(selection_reply(&outcome)),
                    Err(e) if e.downcast_ref::<StoreError>().is_some() => {
                        Ok(CallbackReply::alert(MEAL_GONE))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

/// Long-polling Telegram front end.
pub struct Bot<S> {
    api: TelegramClient,
    planner: Planner<S>,
}

impl<S: EditableMealSource> Bot<S> {
    pub fn new(api: TelegramClient, planner: Planner<S>) -> Self {
        Self { api, planner }
    }

    /// Poll for updates until `shutdown` flips or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut offset = None;
        info!("Bot is running. Polling for messages...");

        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.api.get_updates(offset, POLL_TIMEOUT_SECS) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Err(e) = self.handle_update(update).await {
                            error!(error = %format!("{e:#}"), "Failed to handle update");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Polling Telegram failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Bot stopped polling");
        Ok(())
    }

    async fn handle_update(&self, update: Update) -> Result<()> {
        if let Some(message) = update.message {
            self.handle_message(message).await
        } else if let Some(query) = update.callback_query {
            self.handle_callback_query(query).await
        } else {
            Ok(())
        }
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
            return Ok(());
        };
        let Some(command) = parse_command(text) else {
            return Ok(());
        };
        debug!(user_id = from.id, ?command, "Command received");

        let reply = match self
            .planner
            .handle_command(command, from, Utc::now())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(user_id = from.id, error = %format!("{e:#}"), "Command failed");
                Reply::text(GENERIC_ERROR)
            }
        };
        self.api
            .send_message(message.chat.id, &reply.text, reply.keyboard.as_ref())
            .await?;
        Ok(())
    }

    async fn handle_callback_query(&self, query: CallbackQuery) -> Result<()> {
        let Some(callback) = query.data.as_deref().and_then(parse_callback) else {
            return self.api.answer_callback_query(&query.id, None, false).await;
        };
        debug!(user_id = query.from.id, ?callback, "Button pressed");

        let reply = match self
            .planner
            .handle_callback(callback, query.from.id, Utc::now())
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(user_id = query.from.id, error = %format!("{e:#}"), "Callback failed");
                CallbackReply::alert(GENERIC_ERROR)
            }
        };

        self.api
            .answer_callback_query(&query.id, reply.notice.as_deref(), reply.alert)
            .await?;
        if let (Some(edit), Some(message)) = (reply.edit, query.message) {
            self.api
                .edit_message_text(
                    message.chat.id,
                    message.message_id,
                    &edit.text,
                    edit.keyboard.as_ref(),
                )
                .await?;
        }
        Ok(())
    }
}
