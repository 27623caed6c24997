//! Scope registry: global settings, channels and conversations.
//!
//! Lock order is always Global -> Channel -> Conversation. The top-level
//! `RwLock` guards the global settings and the channel map; each channel and
//! each conversation has its own mutex. Nothing here holds a lower lock while
//! waiting on a higher one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// The three levels a personality or model can be configured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Conversation,
    Channel,
    Global,
}

/// Which per-scope setting a command touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Personality,
    Model,
}

impl Setting {
    pub fn noun(self) -> &'static str {
        match self {
            Setting::Personality => "personality",
            Setting::Model => "model",
        }
    }
}

/// Bot-wide settings. Personality and model can be changed at runtime.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub default_personality: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub top_p: f32,
    pub shared_conversation_default: bool,
}

/// One stored turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    /// Display name, not the numeric ID.
    pub author: String,
    pub content: String,
}

impl Message {
    pub fn new(timestamp: DateTime<Utc>, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp,
            author: author.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Conversation {
    pub personality: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn reset(&mut self) {
        self.messages.clear();
    }
}

/// Conversation lookup key inside a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Author(u64),
    /// Every author in a shared channel maps here.
    Shared,
}

#[derive(Debug)]
pub struct ChannelState {
    pub id: u64,
    pub personality: Option<String>,
    pub model: Option<String>,
    /// Fixed when the channel is first seen.
    pub shared_conversation: bool,
    conversations: HashMap<ConversationKey, Arc<Mutex<Conversation>>>,
}

impl ChannelState {
    fn new(id: u64, shared_conversation: bool) -> Self {
        Self {
            id,
            personality: None,
            model: None,
            shared_conversation,
            conversations: HashMap::new(),
        }
    }

    fn key_for(&self, author_id: u64) -> ConversationKey {
        if self.shared_conversation {
            ConversationKey::Shared
        } else {
            ConversationKey::Author(author_id)
        }
    }
}

/// Live references to one conversation and its channel.
///
/// Cloning the handle clones the `Arc`s, never the state behind them.
#[derive(Clone)]
pub struct ConversationHandle {
    pub channel_id: u64,
    pub key: ConversationKey,
    channel: Arc<Mutex<ChannelState>>,
    conversation: Arc<Mutex<Conversation>>,
}

impl ConversationHandle {
    /// True if both handles point at the same stored conversation.
    pub fn same_conversation(&self, other: &ConversationHandle) -> bool {
        Arc::ptr_eq(&self.conversation, &other.conversation)
    }
}

struct RegistryState {
    global: GlobalConfig,
    channels: HashMap<u64, Arc<Mutex<ChannelState>>>,
}

pub struct ScopeRegistry {
    state: RwLock<RegistryState>,
}

impl ScopeRegistry {
    pub fn new(global: GlobalConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                global,
                channels: HashMap::new(),
            }),
        }
    }

    /// Find or lazily create the conversation for this channel/author pair.
    ///
    /// In a shared channel the author is ignored and every caller gets the
    /// channel's single conversation.
    pub async fn get_or_create_conversation(&self, channel_id: u64, author_id: u64) -> ConversationHandle {
        let existing = self.state.read().await.channels.get(&channel_id).cloned();
        let channel = match existing {
            Some(channel) => channel,
            None => {
                let mut state = self.state.write().await;
                let shared = state.global.shared_conversation_default;
                state
                    .channels
                    .entry(channel_id)
                    .or_insert_with(|| {
                        info!("New channel {} (shared conversation: {})", channel_id, shared);
                        Arc::new(Mutex::new(ChannelState::new(channel_id, shared)))
                    })
                    .clone()
            }
        };

        let (key, conversation) = {
            let mut guard = channel.lock().await;
            let key = guard.key_for(author_id);
            let conversation = guard.conversations.entry(key).or_default().clone();
            (key, conversation)
        };

        ConversationHandle {
            channel_id,
            key,
            channel,
            conversation,
        }
    }

    /// Clear the conversation's history. Overrides are kept.
    pub async fn reset(&self, handle: &ConversationHandle) {
        handle.conversation.lock().await.reset();
        info!("Reset conversation {:?} in channel {}", handle.key, handle.channel_id);
    }

    /// Set or clear (`None`) an override at one scope.
    pub async fn set(&self, handle: &ConversationHandle, setting: Setting, scope: Scope, value: Option<String>) {
        match scope {
            Scope::Global => {
                let mut state = self.state.write().await;
                let slot = match setting {
                    Setting::Personality => &mut state.global.default_personality,
                    Setting::Model => &mut state.global.default_model,
                };
                *slot = value.unwrap_or_default();
            }
            Scope::Channel => {
                let mut channel = handle.channel.lock().await;
                match setting {
                    Setting::Personality => channel.personality = value,
                    Setting::Model => channel.model = value,
                }
                debug!("Channel {} {} override updated", channel.id, setting.noun());
            }
            Scope::Conversation => {
                let mut conversation = handle.conversation.lock().await;
                match setting {
                    Setting::Personality => conversation.personality = value,
                    Setting::Model => conversation.model = value,
                }
            }
        }
        info!("Set {} at {:?} scope (channel {})", setting.noun(), scope, handle.channel_id);
    }

    /// Run `f` with all three scopes locked, in Global -> Channel ->
    /// Conversation order. The conversation is mutable so a read and an
    /// append can share one critical section.
    pub async fn with_scopes<R>(
        &self,
        handle: &ConversationHandle,
        f: impl FnOnce(&GlobalConfig, &ChannelState, &mut Conversation) -> R,
    ) -> R {
        let state = self.state.read().await;
        let channel = handle.channel.lock().await;
        let mut conversation = handle.conversation.lock().await;
        f(&state.global, &channel, &mut conversation)
    }

    /// Append one turn under the conversation lock only.
    pub async fn append(&self, handle: &ConversationHandle, message: Message) {
        handle.conversation.lock().await.messages.push(message);
    }

    #[cfg(test)]
    pub async fn message_count(&self, handle: &ConversationHandle) -> usize {
        handle.conversation.lock().await.messages.len()
    }

    #[cfg(test)]
    pub async fn global(&self) -> GlobalConfig {
        self.state.read().await.global.clone()
    }

    #[cfg(test)]
    pub async fn channel_count(&self) -> usize {
        self.state.read().await.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(shared: bool) -> GlobalConfig {
        GlobalConfig {
            default_personality: "A cat.".to_string(),
            default_model: "base-model".to_string(),
            max_tokens: 100,
            top_p: 1.0,
            shared_conversation_default: shared,
        }
    }

    fn msg(author: &str, content: &str) -> Message {
        Message::new(Utc::now(), author, content)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = ScopeRegistry::new(global(false));
        let a = registry.get_or_create_conversation(1, 10).await;
        registry.append(&a, msg("Alice", "hi")).await;

        let b = registry.get_or_create_conversation(1, 10).await;
        assert!(a.same_conversation(&b));
        assert_eq!(registry.message_count(&a).await, 1);
        assert_eq!(registry.message_count(&b).await, 1);
        assert_eq!(registry.channel_count().await, 1);
    }

    #[tokio::test]
    async fn test_new_conversation_keeps_existing_ones() {
        let registry = ScopeRegistry::new(global(false));
        let alice = registry.get_or_create_conversation(1, 10).await;
        registry.append(&alice, msg("Alice", "hi")).await;

        let _bob = registry.get_or_create_conversation(1, 20).await;
        let alice_again = registry.get_or_create_conversation(1, 10).await;
        assert!(alice.same_conversation(&alice_again));
        assert_eq!(registry.message_count(&alice_again).await, 1);
    }

    #[tokio::test]
    async fn test_shared_channel_collapses_authors() {
        let registry = ScopeRegistry::new(global(true));
        let alice = registry.get_or_create_conversation(1, 10).await;
        let bob = registry.get_or_create_conversation(1, 20).await;
        assert_eq!(alice.key, ConversationKey::Shared);
        assert!(alice.same_conversation(&bob));
    }

    #[tokio::test]
    async fn test_separate_channels_are_separate() {
        let registry = ScopeRegistry::new(global(true));
        let one = registry.get_or_create_conversation(1, 10).await;
        let two = registry.get_or_create_conversation(2, 10).await;
        assert!(!one.same_conversation(&two));
        assert_eq!(registry.channel_count().await, 2);
    }

    #[tokio::test]
    async fn test_reset_keeps_overrides() {
        let registry = ScopeRegistry::new(global(false));
        let handle = registry.get_or_create_conversation(1, 10).await;
        registry.set(&handle, Setting::Personality, Scope::Conversation, Some("Grumpy.".into())).await;
        registry.set(&handle, Setting::Model, Scope::Channel, Some("m2".into())).await;
        registry.append(&handle, msg("Alice", "hi")).await;

        registry.reset(&handle).await;

        let (personality, model, count) = registry
            .with_scopes(&handle, |_, channel, conversation| {
                (conversation.personality.clone(), channel.model.clone(), conversation.messages.len())
            })
            .await;
        assert_eq!(personality.as_deref(), Some("Grumpy."));
        assert_eq!(model.as_deref(), Some("m2"));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_conversation_override_does_not_touch_channel() {
        let registry = ScopeRegistry::new(global(false));
        let handle = registry.get_or_create_conversation(1, 10).await;
        registry.set(&handle, Setting::Personality, Scope::Conversation, Some("Mine.".into())).await;

        let channel_personality = registry
            .with_scopes(&handle, |_, channel, _| channel.personality.clone())
            .await;
        assert_eq!(channel_personality, None);
    }

    #[tokio::test]
    async fn test_global_set_changes_defaults() {
        let registry = ScopeRegistry::new(global(false));
        let handle = registry.get_or_create_conversation(1, 10).await;
        registry.set(&handle, Setting::Model, Scope::Global, Some("m3".into())).await;
        registry.set(&handle, Setting::Personality, Scope::Global, None).await;

        let g = registry.global().await;
        assert_eq!(g.default_model, "m3");
        assert_eq!(g.default_personality, "");
    }

    #[tokio::test]
    async fn test_shared_flag_fixed_at_creation() {
        let registry = ScopeRegistry::new(global(false));
        let handle = registry.get_or_create_conversation(1, 10).await;
        let shared = registry.with_scopes(&handle, |_, channel, _| channel.shared_conversation).await;
        assert!(!shared);
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let registry = Arc::new(ScopeRegistry::new(global(true)));
        let mut tasks = Vec::new();
        for author in 0..16u64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let handle = registry.get_or_create_conversation(7, author).await;
                registry.append(&handle, msg("someone", "hi")).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let handle = registry.get_or_create_conversation(7, 0).await;
        assert_eq!(registry.message_count(&handle).await, 16);
    }
}
