//! Discord transport using serenity.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::ChannelId;
use tracing::{info, warn};

use crate::relay::dispatch::{ChatTransport, InboundMessage, MentionedUser};

/// Discord rejects messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

pub struct DiscordClient {
    http: Arc<Http>,
}

impl DiscordClient {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatTransport for DiscordClient {
    async fn start_typing(&self, channel_id: u64) {
        let http: &Http = &self.http;
        if let Err(e) = ChannelId::new(channel_id).broadcast_typing(http).await {
            warn!("Failed to send typing to channel {}: {e}", channel_id);
        }
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<(), String> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);
        if chunks.len() > 1 {
            info!("Splitting reply to channel {} into {} parts", channel_id, chunks.len());
        }
        let http: &Http = &self.http;
        for chunk in chunks {
            ChannelId::new(channel_id)
                .say(http, chunk)
                .await
                .map_err(|e| format!("Failed to send: {e}"))?;
        }
        Ok(())
    }
}

/// Convert a gateway message into the dispatcher's input.
pub fn to_inbound(msg: &Message) -> InboundMessage {
    let timestamp = DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now);

    InboundMessage {
        channel_id: msg.channel_id.get(),
        author_id: msg.author.id.get(),
        author_name: display_name(msg.author.global_name.as_deref(), &msg.author.name),
        author_is_bot: msg.author.bot,
        content: msg.content.clone(),
        is_private: msg.guild_id.is_none(),
        // Usernames, so the bot's own mention matches its classifier name.
        mentions: msg
            .mentions
            .iter()
            .map(|u| MentionedUser {
                id: u.id.get(),
                name: u.name.clone(),
            })
            .collect(),
        timestamp,
    }
}

/// Global display name if the user has one, else the account username.
fn display_name(global_name: Option<&str>, username: &str) -> String {
    global_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(username)
        .to_string()
}

/// Split text into pieces of at most `limit` chars, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > limit {
        // Byte offset of the first char past the limit
        let hard_end = rest.char_indices().nth(limit).map(|(i, _)| i).unwrap_or(rest.len());
        let end = match rest[..hard_end].rfind('\n') {
            Some(i) if i > 0 => i + 1,
            _ => hard_end,
        };
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}
