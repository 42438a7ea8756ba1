use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use gatebot::config::Config;
use gatebot::dashboard;
use gatebot::gate_http::HttpGate;
use gatebot::log_history::LogHistory;
use gatebot::notify::PushoverNotifier;
use gatebot::openai::Client as OpenAiClient;
use gatebot::orchestrator::{ChatMessage, Collaborators, Engine, EngineConfig, InboundEvent};
use gatebot::telegram::TelegramClient;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.session_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("❌ Failed to create {}: {e}", log_dir.display());
        std::process::exit(1);
    }
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gatebot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("❌ Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let history = LogHistory::default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(history.layer())
        .init();

    info!("🚀 Starting gatebot...");
    info!("Loaded config from {config_path}");

    let bot = Bot::new(&config.telegram_bot_token);
    let telegram = Arc::new(TelegramClient::new(bot.clone()));

    let engine = Engine::new(
        EngineConfig::from_config(&config),
        Collaborators {
            messenger: telegram.clone(),
            assistant: Arc::new(OpenAiClient::new(&config)),
            notifier: Arc::new(PushoverNotifier::new(
                config.pushover_token.clone(),
                config.pushover_user.clone(),
            )),
            gate: Arc::new(HttpGate::new(
                config.gate_open_url.clone(),
                config.gate_close_url.clone(),
            )),
        },
    );

    let app = dashboard::build_app(engine.clone(), history, config.redacted_settings());
    let addr = config.dashboard_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = dashboard::serve(&addr, app).await {
            error!("Dashboard stopped: {e}");
        }
    });

    match bot.get_me().await {
        Ok(me) => info!("Bot user ID: {}, username: @{}", me.id, me.username()),
        Err(e) => warn!("Failed to get bot info: {e}"),
    }
    engine.handle_event(InboundEvent::Ready).await;

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    // Updates from one chat are handled in order, different chats concurrently.
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine, telegram])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(
    msg: Message,
    engine: Arc<Engine>,
    telegram: Arc<TelegramClient>,
) -> ResponseResult<()> {
    if let Some(chat_msg) = telegram_to_chat_message(&msg, &telegram).await {
        engine.handle_event(InboundEvent::Message(chat_msg)).await;
    }
    Ok(())
}

/// Text or caption plus the largest photo size, if any.
async fn telegram_to_chat_message(msg: &Message, telegram: &TelegramClient) -> Option<ChatMessage> {
    let text = msg.text().or(msg.caption()).unwrap_or("");
    let mut chat_msg = ChatMessage::inbound(
        &msg.chat.id.0.to_string(),
        &msg.id.0.to_string(),
        text,
        msg.date.timestamp_millis(),
    );
    chat_msg.is_group = !msg.chat.is_private();

    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        match telegram.download_image(&photo.file.id.0).await {
            Ok(image) => chat_msg.images.push(image),
            Err(e) => warn!("Failed to download photo: {e}"),
        }
    }

    if chat_msg.text.trim().is_empty() && chat_msg.images.is_empty() {
        return None;
    }
    Some(chat_msg)
}
