use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::types::{ChatId, Message, ParseMode, Update, User};

/// Client for the subset of the Telegram Bot API the bot relies on.
#[derive(Clone)]
pub struct BotApiClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl BotApiClient {
    /// Creates a new client. `base_url` is normally `https://api.telegram.org/`.
    pub fn new(token: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
        }
    }

    /// Returns the bot's own account; used to validate the token at startup.
    pub async fn get_me(&self) -> Result<User, BotApiError> {
        let response = self
            .http
            .post(self.method_url("getMe")?)
            .send()
            .await
            .map_err(BotApiError::from_http)?;

        parse_result(response).await
    }

    /// Long-polls for new updates.
    pub async fn get_updates(&self, params: &GetUpdatesParams) -> Result<Vec<Update>, BotApiError> {
        let response = self
            .http
            .post(self.method_url("getUpdates")?)
            .json(params)
            .send()
            .await
            .map_err(BotApiError::from_http)?;

        parse_result(response).await
    }

    /// Sends a text message.
    pub async fn send_message(
        &self,
        request: &SendMessageRequest<'_>,
    ) -> Result<Message, BotApiError> {
        let response = self
            .http
            .post(self.method_url("sendMessage")?)
            .json(request)
            .send()
            .await
            .map_err(BotApiError::from_http)?;

        parse_result(response).await
    }

    fn method_url(&self, method: &str) -> Result<Url, BotApiError> {
        // the leading "./" keeps the token's ':' from being read as a scheme
        Ok(self
            .base_url
            .join(&format!("./bot{}/{}", self.token, method))?)
    }
}

/// Parameters for `getUpdates`.
#[derive(Debug, Clone, Serialize)]
pub struct GetUpdatesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Server-side long-poll timeout in seconds.
    pub timeout: u32,
    pub allowed_updates: Vec<&'static str>,
}

impl GetUpdatesParams {
    pub fn messages(offset: Option<i64>, timeout: u32) -> Self {
        Self {
            offset,
            timeout,
            allowed_updates: vec!["message"],
        }
    }
}

/// Parameters for `sendMessage`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: ChatId,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
}

impl<'a> SendMessageRequest<'a> {
    pub fn new(chat_id: impl Into<ChatId>, text: &'a str) -> Self {
        Self {
            chat_id: chat_id.into(),
            text,
            parse_mode: None,
            reply_to_message_id: None,
        }
    }

    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

/// Errors produced by the Bot API client.
#[derive(Debug, Error)]
pub enum BotApiError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("bot api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("bot api response is missing its result")]
    MissingResult,
}

impl BotApiError {
    // Request URLs embed the bot token, so they are stripped before the error can be logged.
    fn from_http(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }
}

async fn parse_result<T>(response: Response) -> Result<T, BotApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let body = response.text().await.map_err(BotApiError::from_http)?;

    let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) => return Err(BotApiError::Status { status, body }),
    };

    if !parsed.ok {
        return Err(BotApiError::Api {
            code: parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
            description: parsed.description.unwrap_or_default(),
        });
    }

    parsed.result.ok_or(BotApiError::MissingResult)
}
