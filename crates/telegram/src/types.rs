use std::fmt;

use serde::{Deserialize, Serialize};

/// Incoming update. Only message updates are requested from the API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_forum: bool,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Destination chat: numeric id or `@channelusername`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl ChatId {
    /// Parses configuration values such as `-1001234` or `@alerts`.
    pub fn parse(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Username(value.trim().to_string()),
        }
    }
}

impl From<i64> for ChatId {
    fn from(value: i64) -> Self {
        Self::Id(value)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    /// Legacy Markdown (`Markdown`), used for backtick-quoted domains.
    Markdown,
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_id_parses_numbers_and_usernames() {
        assert_eq!(ChatId::parse("-100200300"), ChatId::Id(-100_200_300));
        assert_eq!(ChatId::parse("@alerts"), ChatId::Username("@alerts".to_string()));
        assert_eq!(serde_json::to_value(ChatId::Id(5)).expect("json"), json!(5));
    }

    #[test]
    fn update_without_message_deserializes() {
        let update: Update =
            serde_json::from_value(json!({ "update_id": 9, "edited_message": {} })).expect("update");
        assert_eq!(update.update_id, 9);
        assert!(update.message.is_none());
    }
}
