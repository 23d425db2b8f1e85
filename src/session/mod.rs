//! Conversation sessions and their durable storage

mod key;
mod store;

pub use key::{fan_out_keys, session_file_stem, session_key, GLOBAL_SESSION_KEY, SESSION_FILE_EXTENSION};
pub use store::{Session, SessionStore};
