//! Conversation helpers on top of the endpoint wrappers: envelope unwrapping,
//! media upload-then-send, and the preview strings shown in conversation lists.

use crate::client::KinKeepClient;
use crate::error::ApiError;
use crate::request::{RequestOptions, UploadForm};
use crate::types::{MessageKind, OutgoingMessage};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::fmt::Display;
use tracing::error;

pub const MEDIA_FOLDER: &str = "messages";
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

fn array_field(mut body: Value, key: &str) -> Vec<Value> {
    match body.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn logged<T>(what: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    if let Err(e) = &result {
        error!(error = %e, "error {what}");
    }
    result
}

#[derive(Clone)]
pub struct MessageService {
    client: KinKeepClient,
}

impl MessageService {
    pub fn new(client: KinKeepClient) -> Self {
        Self { client }
    }

    pub async fn conversations(&self) -> Result<Vec<Value>, ApiError> {
        let body = logged(
            "fetching conversations",
            self.client.get_conversations().await,
        )?;
        Ok(array_field(body, "conversations"))
    }

    pub async fn messages(
        &self,
        conversation_id: impl Display,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Value>, ApiError> {
        let options = RequestOptions::default()
            .with_query("page", page)
            .with_query("limit", limit);
        let body = logged(
            "fetching messages",
            self.client.get_messages(conversation_id, options).await,
        )?;
        Ok(array_field(body, "messages"))
    }

    /// Returns the `message_data` object of the created message.
    pub async fn send_message(
        &self,
        conversation_id: impl Display,
        message: &OutgoingMessage,
    ) -> Result<Value, ApiError> {
        let payload = serde_json::to_value(message)?;
        let mut body = logged(
            "sending message",
            self.client.send_message(conversation_id, payload).await,
        )?;
        Ok(body
            .get_mut("message_data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Returns the new conversation's id.
    pub async fn create_conversation(
        &self,
        participant_ids: &[Value],
        name: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut body = logged(
            "creating conversation",
            self.client.create_conversation(participant_ids, name).await,
        )?;
        Ok(body
            .get_mut("conversation_id")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<Value>, ApiError> {
        let body = logged("searching users", self.client.search_users(query).await)?;
        Ok(array_field(body, "users"))
    }

    /// Uploads into the messages folder and returns the hosted URL.
    pub async fn upload_media(
        &self,
        file: &MediaFile,
        kind: MessageKind,
    ) -> Result<Option<String>, ApiError> {
        let form = UploadForm {
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
            bytes: file.bytes.clone(),
            kind: kind.as_str().to_string(),
            folder: MEDIA_FOLDER.to_string(),
        };
        let body = logged("uploading media", self.client.upload(form).await)?;
        Ok(body.get("url").and_then(Value::as_str).map(str::to_string))
    }

    pub async fn send_media_message(
        &self,
        conversation_id: impl Display,
        file: &MediaFile,
        caption: &str,
    ) -> Result<Value, ApiError> {
        let kind = MessageKind::from_mime(&file.mime_type);
        let media_url = self.upload_media(file, kind).await?;
        let message = OutgoingMessage {
            content: caption.to_string(),
            message_type: kind,
            media_url,
            reply_to_id: None,
        };
        self.send_message(conversation_id, &message).await
    }
}

fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    let trimmed = timestamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    // naive timestamps from the backend are UTC
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Relative time for a message list: `now`, `HH:MM`, `<n>d`, or the date.
/// Times are rendered in `now`'s timezone. Unparseable input is returned as-is.
pub fn format_message_time<Tz>(timestamp: &str, now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(parsed) = parse_timestamp(timestamp) else {
        return timestamp.to_string();
    };
    let local = parsed.with_timezone(&now.timezone());
    let diff_hours = (now - local.clone()).num_seconds() as f64 / 3600.0;

    if diff_hours < 1.0 {
        "now".to_string()
    } else if diff_hours < 24.0 {
        local.format("%H:%M").to_string()
    } else if diff_hours < 168.0 {
        format!("{}d", (diff_hours / 24.0).floor() as i64)
    } else {
        local.format("%Y-%m-%d").to_string()
    }
}

/// One-line preview of a conversation's last message.
pub fn format_last_message(message: Option<&Value>) -> String {
    let Some(message) = message.filter(|m| !m.is_null()) else {
        return "Start a conversation".to_string();
    };

    match message.get("message_type").and_then(Value::as_str) {
        Some("image") => "📷 Photo".to_string(),
        Some("video") => "🎥 Video".to_string(),
        Some("audio") => "🎵 Voice message".to_string(),
        _ => message
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("Message")
            .to_string(),
    }
}
