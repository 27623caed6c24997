use std::sync::Arc;
use std::time::Duration;

use serenity::http::Http;
use serenity::model::id::ChannelId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::relay::discord::{split_message, MAX_MESSAGE_CHARS};

/// Flush buffered INFO lines once this many are waiting.
const MAX_BUFFERED: usize = 50;

/// Log message with priority.
enum LogMessage {
    /// High priority (WARN/ERROR) - send immediately
    Urgent(String),
    /// Low priority (INFO) - batch and send periodically
    Info(String),
}

/// Forwards this crate's log events to a Discord channel.
pub struct DiscordLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl DiscordLogLayer {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(Duration::from_secs(5));

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(&http, channel_id, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= MAX_BUFFERED {
                                    flush_buffer(&http, channel_id, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        if !info_buffer.is_empty() {
                            flush_buffer(&http, channel_id, &mut info_buffer).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn send_log(http: &Http, channel_id: ChannelId, text: &str) {
    for chunk in split_message(text, MAX_MESSAGE_CHARS) {
        // Not logged through tracing, that would feed back into this layer
        if let Err(e) = channel_id.say(http, chunk).await {
            eprintln!("Failed to send log to Discord: {e}");
            return;
        }
    }
}

async fn flush_buffer(http: &Http, channel_id: ChannelId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(http, channel_id, &combined).await;
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

/// Only our own events; dependency logs (serenity's HTTP layer included)
/// would otherwise trigger more sends.
fn is_own_target(target: &str) -> bool {
    let crate_name = env!("CARGO_CRATE_NAME");
    target == crate_name || target.starts_with(&format!("{crate_name}::"))
}

impl<S: Subscriber> Layer<S> for DiscordLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        if level > Level::INFO || !is_own_target(event.metadata().target()) {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
