pub mod adapter;
pub mod commands;
pub mod context;
pub mod error;
pub mod handler;
pub mod history;
pub mod send;

pub use adapter::DiscordAdapter;
pub use context::BotContext;
pub use error::DiscordError;
