mod config;
mod discord_log;
mod openai;
mod relay;

use std::sync::Arc;

use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use config::Config;
use relay::{BotIdentity, DiscordClient, Dispatcher, ScopeRegistry};

struct Handler {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Connected to Discord as {} ({})", ready.user.name, ready.user.id);
    }

    // serenity runs each gateway event in its own task
    async fn message(&self, _ctx: Context, msg: Message) {
        let outcome = self.dispatcher.handle_message(relay::discord::to_inbound(&msg)).await;
        debug!("Message {} in channel {}: {:?}", msg.id, msg.channel_id, outcome);
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Console, file and Discord log layers, each optional.
fn init_logging(config: &Config, http: &Arc<Http>) -> Option<WorkerGuard> {
    let console = config.console_log.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(env_filter())
    });

    let mut guard = None;
    let file = config.log_dir.as_ref().and_then(|dir| {
        let opened = std::fs::create_dir_all(dir).and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("maru.log"))
        });
        match opened {
            Ok(log_file) => {
                let (non_blocking, worker) = tracing_appender::non_blocking(log_file);
                guard = Some(worker);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(env_filter()),
                )
            }
            Err(e) => {
                eprintln!("Failed to open log file in {}: {e}", dir.display());
                None
            }
        }
    });

    let discord = config
        .discord
        .log_channel_id
        .map(|id| discord_log::DiscordLogLayer::new(http.clone(), ChannelId::new(id)));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(discord)
        .init();

    guard
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let http = Arc::new(Http::new(&config.discord.api_key));
    let _guard = init_logging(&config, &http);

    info!("🚀 Starting maru...");
    info!("Loaded config from {config_path}");
    info!(
        "Model: {}, max tokens: {}, top-p: {}, shared conversations: {}",
        config.openai.model, config.openai.max_tokens, config.openai.top_p, config.discord.shared_conversation
    );

    if let Err(e) = run(config, http).await {
        error!("Fatal: {e}");
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: Config, http: Arc<Http>) -> Result<(), Box<dyn std::error::Error>> {
    let me = http.get_current_user().await?;
    let bot = BotIdentity {
        id: me.id.get(),
        name: me.name.clone(),
    };
    info!("Bot user: {} ({})", bot.name, bot.id);

    let backend = openai::Client::new(
        config.openai.api_key.clone(),
        config.openai.base_url.clone(),
        config.openai.timeout,
    )?;
    let registry = Arc::new(ScopeRegistry::new(config.global_config()));
    let transport = Arc::new(DiscordClient::new(http));
    let dispatcher = Dispatcher::new(bot, registry, Arc::new(backend), transport)?;

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let handler = Handler {
        dispatcher: Arc::new(dispatcher),
    };
    let mut client = Client::builder(&config.discord.api_key, intents)
        .event_handler(handler)
        .await?;

    client.start().await?;
    Ok(())
}
