use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use directories::ProjectDirs;

use crate::sheets::SheetSettings;

pub struct Config {
    pub db_path: PathBuf,
    pub timezone: Tz,
    pub telegram_bot_token: Option<String>,
    pub sheet_id: Option<String>,
    pub credentials_path: PathBuf,
    pub sheet_name: String,
    pub sheet_column: String,
}

impl Config {
    /// Read settings from the environment, after loading `.env` if present.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let proj_dirs =
            ProjectDirs::from("", "", "mealbot").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Build a config from `lookup`, which maps variable names to values.
    /// Blank values count as unset.
    pub fn from_lookup<F>(data_dir: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let timezone = match var("TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow!("Invalid TIMEZONE '{name}': {e}"))?,
            None => Tz::UTC,
        };

        let sheet_column = var("SHEET_COLUMN").unwrap_or_else(|| "A".to_string());
        if !sheet_column.chars().all(|c| c.is_ascii_alphabetic()) {
            bail!("Invalid SHEET_COLUMN '{sheet_column}'. Use a column letter like 'A'");
        }

        Ok(Config {
            db_path: var("DATABASE_PATH").map_or_else(|| data_dir.join("mealbot.db"), PathBuf::from),
            credentials_path: var("GOOGLE_CREDENTIALS_PATH")
                .map_or_else(|| data_dir.join("credentials.json"), PathBuf::from),
            timezone,
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            sheet_id: var("GOOGLE_SHEET_ID"),
            sheet_name: var("SHEET_NAME").unwrap_or_else(|| "Sheet1".to_string()),
            sheet_column: sheet_column.to_ascii_uppercase(),
        })
    }

    pub fn require_bot_token(&self) -> Result<&str> {
        self.telegram_bot_token
            .as_deref()
            .context("TELEGRAM_BOT_TOKEN not set in environment")
    }

    /// Everything needed to talk to the menu spreadsheet.
    pub fn sheet_settings(&self) -> Result<SheetSettings> {
        let spreadsheet_id = self
            .sheet_id
            .clone()
            .context("GOOGLE_SHEET_ID not set in environment")?;
        if !self.credentials_path.exists() {
            bail!(
                "Google credentials file not found at {}",
                self.credentials_path.display()
            );
        }
        Ok(SheetSettings {
            spreadsheet_id,
            sheet_name: self.sheet_name.clone(),
            column: self.sheet_column.clone(),
            credentials_path: self.credentials_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(PathBuf::from("/data/mealbot"), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.db_path, PathBuf::from("/data/mealbot/mealbot.db"));
        assert_eq!(
            config.credentials_path,
            PathBuf::from("/data/mealbot/credentials.json")
        );
        assert_eq!(config.sheet_name, "Sheet1");
        assert_eq!(config.sheet_column, "A");
        assert!(config.telegram_bot_token.is_none());
        assert!(config.sheet_id.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("TIMEZONE", "Europe/Warsaw"),
            ("DATABASE_PATH", "/tmp/meals.db"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("GOOGLE_SHEET_ID", "sheet-id"),
            ("SHEET_NAME", "Menu"),
            ("SHEET_COLUMN", "b"),
        ])
        .unwrap();
        assert_eq!(config.timezone, chrono_tz::Europe::Warsaw);
        assert_eq!(config.db_path, PathBuf::from("/tmp/meals.db"));
        assert_eq!(config.require_bot_token().unwrap(), "123:abc");
        assert_eq!(config.sheet_id.as_deref(), Some("sheet-id"));
        assert_eq!(config.sheet_name, "Menu");
        assert_eq!(config.sheet_column, "B");
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config_from(&[("TELEGRAM_BOT_TOKEN", "  "), ("TIMEZONE", "")]).unwrap();
        assert!(config.require_bot_token().is_err());
        assert_eq!(config.timezone, Tz::UTC);
    }

    #[test]
    fn test_invalid_timezone() {
        let err = config_from(&[("TIMEZONE", "Mars/Olympus")]).err().unwrap();
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn test_invalid_column() {
        assert!(config_from(&[("SHEET_COLUMN", "A1")]).is_err());
    }

    #[test]
    fn test_sheet_settings_requires_sheet_id() {
        let config = config_from(&[]).unwrap();
        let err = config.sheet_settings().unwrap_err();
        assert!(err.to_string().contains("GOOGLE_SHEET_ID"));
    }

    #[test]
    fn test_sheet_settings_requires_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let config = config_from(&[
            ("GOOGLE_SHEET_ID", "sheet-id"),
            ("GOOGLE_CREDENTIALS_PATH", missing.to_str().unwrap()),
        ])
        .unwrap();
        assert!(config.sheet_settings().is_err());

        std::fs::write(&missing, "{}").unwrap();
        let settings = config.sheet_settings().unwrap();
        assert_eq!(settings.spreadsheet_id, "sheet-id");
        assert_eq!(settings.credentials_path, missing);
    }
}
