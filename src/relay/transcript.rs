//! Prompt rendering and turn bookkeeping.

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::relay::registry::{Conversation, Message};

/// Personality header, a blank line, then one `author: content` line per turn.
pub fn build_prompt(conversation: &Conversation, personality: &str) -> String {
    let mut prompt = format!("{personality}\n\n");
    for m in &conversation.messages {
        prompt.push_str(&m.author);
        prompt.push_str(": ");
        prompt.push_str(&m.content);
        prompt.push('\n');
    }
    prompt
}

pub fn append_turn(
    conversation: &mut Conversation,
    timestamp: DateTime<Utc>,
    author: impl Into<String>,
    content: impl Into<String>,
) {
    conversation.messages.push(Message::new(timestamp, author, content));
}

/// Removes the `<botname>:` label a completion sometimes starts with.
pub struct EchoFilter {
    label: Regex,
}

impl EchoFilter {
    pub fn new(bot_name: &str) -> Result<Self, regex::Error> {
        let name = regex::escape(bot_name.trim());
        Ok(Self {
            label: Regex::new(&format!(r"(?i)^\s*{name}\s*:\s*"))?,
        })
    }

    pub fn clean(&self, completion: &str) -> String {
        self.label.replace(completion, "").trim().to_string()
    }
}
