mod config;
mod engine;
mod llm_client;
mod telegram;

use std::sync::Arc;

use anyhow::{Context, Result};
use flume::unbounded;
use tracing_subscriber::EnvFilter;

use config::BotConfig;
use engine::state::StateStore;
use engine::{Completer, Engine, EngineEvent, Messenger};
use llm_client::LlmClient;
use telegram::TelegramClient;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aureia=debug")),
        )
        .init();

    let config = BotConfig::load();
    config.validate().context("invalid configuration")?;

    tracing::info!(
        "Aureia starting (tick {} min, gap {} min, cap {}/day)",
        config.tick_interval_minutes,
        config.min_gap_minutes,
        config.daily_cap
    );

    let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    rt.block_on(run(config))
}

async fn run(config: BotConfig) -> Result<()> {
    let telegram = Arc::new(TelegramClient::new(
        &config.telegram_bot_token,
        config.telegram_chat_id,
    ));
    let llm = Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_model.clone(),
        config.llm_api_key.clone(),
    ));

    let store = StateStore::new(&config.state_path);
    let (event_tx, event_rx) = unbounded();

    let messenger: Arc<dyn Messenger> = telegram.clone();
    let completer: Arc<dyn Completer> = llm.clone();
    let engine = Arc::new(Engine::new(
        config.clone(),
        store,
        messenger,
        completer,
        event_tx,
    ));

    telegram::spawn_bot(engine.clone(), telegram, llm, config);

    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            match event {
                EngineEvent::ReminderFired { id, text } => {
                    tracing::info!("Reminder fired [{}]: {}", id, text);
                }
                EngineEvent::PushSent { reason } => {
                    tracing::info!("Push sent because {}", reason);
                }
                EngineEvent::DeliveryFailed { detail } => {
                    tracing::warn!("Delivery failed: {}", detail);
                }
                EngineEvent::PersistFailed { detail } => {
                    tracing::error!("STATE PERSIST FAILED: {}", detail);
                }
            }
        }
    });

    engine.run_loop().await;
    Ok(())
}
