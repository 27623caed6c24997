//! Per-message dispatch: classify, touch the registry, maybe call the backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::openai::{Completer, CompletionRequest};
use crate::relay::command::{Classifier, Command, Lookup};
use crate::relay::registry::{ConversationHandle, Message, Scope, ScopeRegistry, Setting};
use crate::relay::resolve::{resolve_model, resolve_personality};
use crate::relay::transcript::{append_turn, build_prompt, EchoFilter};

const RESET_REPLY: &str = "Sure, let's start over!";
const SET_REPLY: &str = "Got it! I'll remember that.";
const FAILURE_REPLY: &str = "Sorry, something went wrong while I was thinking about that. Please try again.";
const NO_MODEL_REPLY: &str = "I don't have a model configured anywhere, so I can't answer that yet.";

/// Where replies go. Sends are best effort.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn start_typing(&self, channel_id: u64);
    async fn send_message(&self, channel_id: u64, text: &str) -> Result<(), String>;
}

/// The bot's own account.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MentionedUser {
    pub id: u64,
    pub name: String,
}

/// One message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
    pub is_private: bool,
    pub mentions: Vec<MentionedUser>,
    pub timestamp: DateTime<Utc>,
}

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not for us, or nothing to do.
    Ignored,
    /// A control command ran, or the backend had nothing to say.
    Handled,
    /// A completion was sent back.
    Replied,
    /// The backend call failed; the user got a failure notice.
    Failed,
}

pub struct Dispatcher {
    bot: BotIdentity,
    registry: Arc<ScopeRegistry>,
    classifier: Classifier,
    echo: EchoFilter,
    backend: Arc<dyn Completer>,
    transport: Arc<dyn ChatTransport>,
}

impl Dispatcher {
    pub fn new(
        bot: BotIdentity,
        registry: Arc<ScopeRegistry>,
        backend: Arc<dyn Completer>,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            classifier: Classifier::new(&bot.name)?,
            echo: EchoFilter::new(&bot.name)?,
            bot,
            registry,
            backend,
            transport,
        })
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<ScopeRegistry> {
        &self.registry
    }

    pub async fn handle_message(&self, msg: InboundMessage) -> Outcome {
        if msg.author_is_bot || msg.author_id == self.bot.id {
            return Outcome::Ignored;
        }

        let mentioned = msg.mentions.iter().any(|u| u.id == self.bot.id);
        let content = substitute_mentions(&msg.content, &msg.mentions);
        let command = self.classifier.classify(&content, msg.is_private || mentioned);
        if command == Command::Ignore {
            return Outcome::Ignored;
        }

        info!(
            "📨 {} ({}) in channel {} [private: {}, mentioned: {}]: {:?}",
            msg.author_name, msg.author_id, msg.channel_id, msg.is_private, mentioned, command
        );

        let handle = self
            .registry
            .get_or_create_conversation(msg.channel_id, msg.author_id)
            .await;
        self.transport.start_typing(msg.channel_id).await;

        match command {
            Command::ChatQuery { text } => self.complete(&msg, &handle, text).await,
            control => {
                let mut next = Some(control);
                while let Some(command) = next.take() {
                    let reply = self.run_control(&handle, &command).await;
                    self.reply(msg.channel_id, &reply).await;
                    next = command.follow_up();
                }
                Outcome::Handled
            }
        }
    }

    /// Apply a control command and return the reply text.
    async fn run_control(&self, handle: &ConversationHandle, command: &Command) -> String {
        match command {
            Command::ResetConversation => {
                self.registry.reset(handle).await;
                RESET_REPLY.to_string()
            }
            Command::SetPersonality { scope, text } => {
                self.set(handle, Setting::Personality, *scope, text).await
            }
            Command::SetModel { scope, name } => self.set(handle, Setting::Model, *scope, name).await,
            Command::GetPersonality { scope } => self.describe(handle, Setting::Personality, *scope).await,
            Command::GetModel { scope } => self.describe(handle, Setting::Model, *scope).await,
            Command::Ignore | Command::ChatQuery { .. } => String::new(),
        }
    }

    async fn set(&self, handle: &ConversationHandle, setting: Setting, scope: Scope, value: &str) -> String {
        let value = value.trim();
        let value = (!value.is_empty()).then(|| value.to_string());
        self.registry.set(handle, setting, scope, value).await;
        SET_REPLY.to_string()
    }

    async fn describe(&self, handle: &ConversationHandle, setting: Setting, lookup: Lookup) -> String {
        let noun = setting.noun();
        self.registry
            .with_scopes(handle, |global, channel, conversation| match lookup {
                Lookup::Effective => {
                    let resolved = match setting {
                        Setting::Personality => resolve_personality(conversation, channel, global),
                        Setting::Model => resolve_model(conversation, channel, global),
                    };
                    format!(
                        "My {noun} is:\n```{}```This is set {}.",
                        resolved.value,
                        resolved.source.describe()
                    )
                }
                Lookup::At(scope) => {
                    let value = match (setting, scope) {
                        (Setting::Personality, Scope::Conversation) => conversation.personality.clone(),
                        (Setting::Personality, Scope::Channel) => channel.personality.clone(),
                        (Setting::Personality, Scope::Global) => Some(global.default_personality.clone()),
                        (Setting::Model, Scope::Conversation) => conversation.model.clone(),
                        (Setting::Model, Scope::Channel) => channel.model.clone(),
                        (Setting::Model, Scope::Global) => Some(global.default_model.clone()),
                    };
                    let level = scope_name(scope);
                    let value = value
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| format!("(not set at the {level} level)"));
                    format!("My {noun} for {} is:\n```{value}```", scope_phrase(scope))
                }
            })
            .await
    }

    async fn complete(&self, msg: &InboundMessage, handle: &ConversationHandle, text: String) -> Outcome {
        // User turn and prompt are one critical section, so a concurrent
        // reset lands entirely before or after this prompt.
        let request = self
            .registry
            .with_scopes(handle, |global, channel, conversation| {
                let model = resolve_model(conversation, channel, global);
                if !model.is_set() {
                    return None;
                }
                let personality = resolve_personality(conversation, channel, global);
                append_turn(conversation, msg.timestamp, msg.author_name.clone(), text);
                Some(CompletionRequest {
                    model: model.value,
                    prompt: build_prompt(conversation, &personality.value),
                    max_tokens: global.max_tokens,
                    top_p: global.top_p,
                })
            })
            .await;

        let Some(request) = request else {
            warn!("No model configured for channel {}", msg.channel_id);
            self.reply(msg.channel_id, NO_MODEL_REPLY).await;
            return Outcome::Handled;
        };

        debug!("Prompt for {:?} in channel {}:\n{}", handle.key, msg.channel_id, request.prompt);

        let completion = match self.backend.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                error!("Completion failed for channel {} (model {}): {}", msg.channel_id, request.model, e);
                self.reply(msg.channel_id, FAILURE_REPLY).await;
                return Outcome::Failed;
            }
        };

        let response = self.echo.clean(&completion);
        if response.is_empty() {
            warn!("Empty completion for channel {}", msg.channel_id);
            return Outcome::Handled;
        }

        self.registry
            .append(handle, Message::new(Utc::now(), self.bot.name.clone(), response.clone()))
            .await;
        self.reply(msg.channel_id, &response).await;
        Outcome::Replied
    }

    async fn reply(&self, channel_id: u64, text: &str) {
        if let Err(e) = self.transport.send_message(channel_id, text).await {
            warn!("Reply to channel {} failed: {}", channel_id, e);
        }
    }
}

fn scope_name(scope: Scope) -> &'static str {
    match scope {
        Scope::Conversation => "conversation",
        Scope::Channel => "channel",
        Scope::Global => "global",
    }
}

fn scope_phrase(scope: Scope) -> &'static str {
    match scope {
        Scope::Conversation => "this conversation",
        Scope::Channel => "this channel",
        Scope::Global => "the entire bot",
    }
}

/// Replace `<@id>` / `<@!id>` tokens with the mentioned users' names.
pub fn substitute_mentions(content: &str, mentions: &[MentionedUser]) -> String {
    let mut content = content.to_string();
    for user in mentions {
        content = content
            .replace(&format!("<@{}>", user.id), &user.name)
            .replace(&format!("<@!{}>", user.id), &user.name);
    }
    content.trim().to_string()
}
