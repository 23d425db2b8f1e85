//! Normalized chat message shared by every channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound or stored chat turn.
///
/// Gateways normalize platform events into this shape before handing them to
/// the processor. Field names on disk follow the session file layout used by
/// existing deployments, so files written earlier stay loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Channel the message arrived on (e.g. "telegram")
    #[serde(rename = "Channel", default)]
    pub channel: String,
    /// Sender identifier (channel-specific)
    #[serde(rename = "UserID", default)]
    pub user_id: String,
    /// Chat / conversation identifier (channel-specific)
    #[serde(rename = "ChatID", default)]
    pub chat_id: String,
    /// Text payload
    #[serde(rename = "Text", default)]
    pub text: String,
    /// When the message was received; `None` until normalized
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new message stamped with the current time
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    /// Replace the timestamp
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Trimmed text with the timestamp defaulted to now.
    pub fn normalized(mut self) -> Self {
        self.text = self.text.trim().to_string();
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_trims_and_stamps() {
        let msg = Message::new("telegram", "1", "2", "  hi there \n").with_timestamp(None);
        let msg = msg.normalized();
        assert_eq!(msg.text, "hi there");
        assert!(msg.timestamp.is_some());
    }

    #[test]
    fn test_normalized_keeps_existing_timestamp() {
        let ts = Utc::now() - chrono::Duration::hours(1);
        let msg = Message::new("telegram", "1", "2", "hi").with_timestamp(Some(ts));
        assert_eq!(msg.normalized().timestamp, Some(ts));
    }

    #[test]
    fn test_serialized_field_names() {
        let msg = Message::new("telegram", "10", "42", "hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Channel"], "telegram");
        assert_eq!(json["UserID"], "10");
        assert_eq!(json["ChatID"], "42");
        assert_eq!(json["Text"], "hello");
        assert!(json["Timestamp"].is_string());
    }

    #[test]
    fn test_deserialize_stored_message() {
        let raw = r#"{"Channel":"whatsapp","UserID":"u","ChatID":"c","Text":"t","Timestamp":"2024-05-01T10:00:00.123456789+08:00"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.channel, "whatsapp");
        assert_eq!(msg.text, "t");
        assert!(msg.timestamp.is_some());
    }
}
