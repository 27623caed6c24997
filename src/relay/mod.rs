//! Relay core - scoped conversation state and command routing.

pub mod command;
pub mod discord;
pub mod dispatch;
pub mod registry;
pub mod resolve;
pub mod transcript;


pub use discord::DiscordClient;
pub use dispatch::{BotIdentity, Dispatcher};
pub use registry::{GlobalConfig, ScopeRegistry};
