//! Effective personality/model lookup across the scope hierarchy.

use crate::relay::registry::{ChannelState, Conversation, GlobalConfig, Scope};

/// Returned when no scope has a value.
pub const NOT_SET: &str = "(not set)";

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Scope(Scope),
    Nowhere,
}

impl Source {
    /// Reply fragment, e.g. "This is set globally."
    pub fn describe(self) -> &'static str {
        match self {
            Source::Scope(Scope::Conversation) => "only on this conversation",
            Source::Scope(Scope::Channel) => "for this channel only",
            Source::Scope(Scope::Global) => "globally",
            Source::Nowhere => "nowhere at all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub source: Source,
}

impl Resolved {
    pub fn is_set(&self) -> bool {
        self.source != Source::Nowhere
    }
}

/// Conversation beats channel beats global. Empty strings count as unset.
pub fn resolve(conversation: Option<&str>, channel: Option<&str>, global: &str) -> Resolved {
    let candidates = [
        (conversation, Scope::Conversation),
        (channel, Scope::Channel),
        (Some(global), Scope::Global),
    ];
    candidates
        .into_iter()
        .find_map(|(value, scope)| {
            value.filter(|v| !v.is_empty()).map(|v| Resolved {
                value: v.to_string(),
                source: Source::Scope(scope),
            })
        })
        .unwrap_or_else(|| Resolved {
            value: NOT_SET.to_string(),
            source: Source::Nowhere,
        })
}

pub fn resolve_personality(conversation: &Conversation, channel: &ChannelState, global: &GlobalConfig) -> Resolved {
    resolve(
        conversation.personality.as_deref(),
        channel.personality.as_deref(),
        &global.default_personality,
    )
}

pub fn resolve_model(conversation: &Conversation, channel: &ChannelState, global: &GlobalConfig) -> Resolved {
    resolve(
        conversation.model.as_deref(),
        channel.model.as_deref(),
        &global.default_model,
    )
}
