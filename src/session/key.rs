//! Session key derivation and file naming

use crate::channels::Message;
use crate::error::{Error, Result};

/// Key of the session that receives every message
pub const GLOBAL_SESSION_KEY: &str = "global";

/// Extension of persisted session files
pub const SESSION_FILE_EXTENSION: &str = "json";

/// Derive the conversation key for a message.
///
/// `channel:chat` when both are present, `user:<id>` when only the sender is
/// known, otherwise [`GLOBAL_SESSION_KEY`].
pub fn session_key(message: &Message) -> String {
    let channel = message.channel.trim();
    let chat = message.chat_id.trim();
    if !channel.is_empty() && !chat.is_empty() {
        return format!("{}:{}", message.channel, message.chat_id);
    }

    let user = message.user_id.trim();
    if !user.is_empty() {
        return format!("user:{}", user);
    }

    GLOBAL_SESSION_KEY.to_string()
}

/// Every key a message is persisted under: its own key, then `global`.
pub fn fan_out_keys(message: &Message) -> Vec<String> {
    let key = session_key(message);
    if key == GLOBAL_SESSION_KEY {
        vec![key]
    } else {
        vec![key, GLOBAL_SESSION_KEY.to_string()]
    }
}

/// Trimmed key, blank keys mapping to `global`
pub(crate) fn canonical_key(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        GLOBAL_SESSION_KEY.to_string()
    } else {
        key.to_string()
    }
}

/// File stem for a session key; colons become underscores.
///
/// Keys that could escape the storage root are rejected.
pub fn session_file_stem(key: &str) -> Result<String> {
    let stem = key.trim().replace(':', "_");

    if stem.is_empty()
        || stem == "."
        || stem == ".."
        || stem.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidSessionKey(key.to_string()));
    }

    Ok(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_and_chat_key() {
        let msg = Message::new("telegram", "10", "42", "hi");
        assert_eq!(session_key(&msg), "telegram:42");
        assert_eq!(fan_out_keys(&msg), vec!["telegram:42", "global"]);
    }

    #[test]
    fn test_user_key_when_chat_missing() {
        let msg = Message::new("telegram", " 10 ", "  ", "hi");
        assert_eq!(session_key(&msg), "user:10");

        let msg = Message::new("", "10", "42", "hi");
        assert_eq!(session_key(&msg), "user:10");
    }

    #[test]
    fn test_global_key_fans_out_once() {
        let msg = Message::new("", "", "", "hi");
        assert_eq!(session_key(&msg), GLOBAL_SESSION_KEY);
        assert_eq!(fan_out_keys(&msg), vec!["global"]);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(session_file_stem("telegram:42").unwrap(), "telegram_42");
        assert_eq!(session_file_stem(" global ").unwrap(), "global");
        assert_eq!(
            session_file_stem("whatsapp:6012@s.whatsapp.net").unwrap(),
            "whatsapp_6012@s.whatsapp.net"
        );
    }

    #[test]
    fn test_file_stem_rejects_traversal() {
        for key in ["", "  ", ".", "..", "../etc", "a/b", "a\\b", "user:../../x", "nul\0"] {
            assert!(
                matches!(session_file_stem(key), Err(Error::InvalidSessionKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("  "), "global");
        assert_eq!(canonical_key(" telegram:1 "), "telegram:1");
    }
}
