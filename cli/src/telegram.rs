use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u32,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    show_alert: bool,
}

/// Just enough of the Telegram Bot API for long polling and inline keyboards.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("mealbot/{} (meal planner)", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: format!("{API_URL}/bot{token}"),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: std::time::Duration) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp: ApiResponse<T> = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .with_context(|| format!("Failed to reach Telegram API ({method})"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;
        unwrap_response(method, resp)
    }

    /// Long-poll for new updates. The request stays open for up to
    /// `timeout_secs` when there is nothing to deliver.
    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32) -> Result<Vec<Update>> {
        let params = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: &["message", "callback_query"],
        };
        let http_timeout = std::time::Duration::from_secs(u64::from(timeout_secs) + 10);
        self.call("getUpdates", &params, http_timeout).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message> {
        let params = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            reply_markup: keyboard,
        };
        self.call("sendMessage", &params, std::time::Duration::from_secs(10))
            .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let params = EditMessageText {
            chat_id,
            message_id,
            text,
            parse_mode: "HTML",
            reply_markup: keyboard,
        };
        // Returns the edited Message, or `true` for inline messages
        let _: serde_json::Value = self
            .call("editMessageText", &params, std::time::Duration::from_secs(10))
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        let params = AnswerCallbackQuery {
            callback_query_id,
            text,
            show_alert,
        };
        let _: bool = self
            .call("answerCallbackQuery", &params, std::time::Duration::from_secs(10))
            .await?;
        Ok(())
    }
}

fn unwrap_response<T>(method: &str, resp: ApiResponse<T>) -> Result<T> {
    if !resp.ok {
        let description = resp.description.as_deref().unwrap_or("unknown error");
        bail!("Telegram {method} failed: {description}");
    }
    resp.result
        .with_context(|| format!("Telegram {method} returned no result"))
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}
