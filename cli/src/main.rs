mod bot;
mod commands;
mod config;
mod scheduler;
mod sheets;
mod telegram;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bot::{Bot, Planner};
use crate::commands::{cmd_add_meal, cmd_clear, cmd_meals, cmd_select, cmd_sync, cmd_week};
use crate::config::Config;
use crate::scheduler::spawn_midnight_refresh;
use crate::sheets::SheetsClient;
use crate::telegram::TelegramClient;
use mealbot_core::cache::MealCache;
use mealbot_core::db::Database;
use mealbot_core::selection::SelectionStore;

#[derive(Parser)]
#[command(
    name = "mealbot",
    version,
    about = "A Telegram bot for planning the week's meals from a shared spreadsheet"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot until Ctrl-C
    Run,
    /// Refresh the meal cache from the spreadsheet
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List cached meals
    Meals {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's selections for a week
    Week {
        /// Telegram user ID
        #[arg(short, long)]
        user: i64,
        /// Any date in the week (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Select a meal for a user on a date
    Select {
        /// Telegram user ID
        #[arg(short, long)]
        user: i64,
        /// Meal name, exactly as it appears on the menu
        meal: String,
        /// Date to plan for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a user's selection for a date
    Clear {
        /// Telegram user ID
        #[arg(short, long)]
        user: i64,
        /// Date to clear (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Append a meal to the spreadsheet and refresh
    AddMeal {
        /// Meal name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?.into_shared();
    let cache = Arc::new(MealCache::new(db.clone(), config.timezone)?);
    let store = SelectionStore::new(db);

    match cli.command {
        Commands::Run => run_bot(&config, cache, store).await,
        Commands::Sync { json } => {
            let sheets = SheetsClient::new(config.sheet_settings()?)?;
            cmd_sync(&cache, &sheets, json).await
        }
        Commands::Meals { json } => cmd_meals(&cache, json),
        Commands::Week { user, date, json } => {
            cmd_week(&store, config.timezone, user, date, json)
        }
        Commands::Select {
            user,
            meal,
            date,
            json,
        } => cmd_select(&cache, &store, user, &meal, date, json),
        Commands::Clear { user, date, json } => {
            cmd_clear(&store, config.timezone, user, date, json)
        }
        Commands::AddMeal { name, json } => {
            let sheets = SheetsClient::new(config.sheet_settings()?)?;
            cmd_add_meal(&cache, &sheets, &name, json).await
        }
    }
}

async fn run_bot(config: &Config, cache: Arc<MealCache>, store: SelectionStore) -> Result<()> {
    let api = TelegramClient::new(config.require_bot_token()?)?;
    let sheets = Arc::new(SheetsClient::new(config.sheet_settings()?)?);
    info!(
        timezone = %config.timezone,
        db = %config.db_path.display(),
        "Starting meal planner bot"
    );

    // The bot still starts on a failed fetch and serves whatever is cached
    if let Err(e) = cache.refresh(sheets.as_ref()).await {
        error!(error = %format!("{e:#}"), "Initial meal cache refresh failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = spawn_midnight_refresh(cache.clone(), sheets.clone(), shutdown_rx.clone());

    let bot = Bot::new(api, Planner::new(cache, store, sheets));
    let polling = bot.run(shutdown_rx);
    tokio::pin!(polling);

    let result = tokio::select! {
        result = &mut polling => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
            polling.await
        }
    };

    let _ = shutdown_tx.send(true);
    refresher.await.context("Midnight refresh task failed")?;
    result
}

