pub mod bot_api;
pub mod types;

pub use bot_api::{BotApiClient, BotApiError, GetUpdatesParams, SendMessageRequest};
pub use types::{Chat, ChatId, Message, ParseMode, Update, User};
