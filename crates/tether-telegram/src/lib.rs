//! Telegram Bot API transport for the tether bridge.
//!
//! Outbound delivery goes through `sendMessage`; inbound user messages come
//! from a `getUpdates` long poll with update-offset bookkeeping. Only
//! private chats are marked as such; the command interpreter drops the rest.

pub mod telegram_client;

pub use telegram_client::TelegramClient;
