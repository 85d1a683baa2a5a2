//! Telegram transport for Aureia.
//!
//! One long-polling tokio task receives messages, records user activity on
//! the engine, routes the small command set (`/remind`, `/topic`, ...), and
//! answers plain messages with an LLM chat reply. Outbound delivery goes
//! through [`TelegramClient`], which is also the engine's [`Messenger`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use regex_lite::Regex;
use serde::Deserialize;

use crate::config::BotConfig;
use crate::engine::{Completer, Engine, Messenger};
use crate::llm_client::LlmClient;

// ─── Telegram API types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
}

// ─── Outbound client ─────────────────────────────────────────────────────────

pub struct TelegramClient {
    api_base: String,
    default_chat_id: i64,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: &str, default_chat_id: i64) -> Self {
        Self {
            api_base: format!("https://api.telegram.org/bot{}", token.trim()),
            default_chat_id,
            client: reqwest::Client::new(),
        }
    }

    pub async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        // Telegram enforces a 4096-character limit per message.
        const MAX_LEN: usize = 4096;
        let text = if text.len() > MAX_LEN {
            let mut end = MAX_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let url = format!("{}/sendMessage", self.api_base);
        let payload = serde_json::json!({ "chat_id": chat_id, "text": text });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        if !response.status().is_success() {
            bail!("Telegram sendMessage failed: HTTP {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn deliver(&self, text: &str) -> Result<()> {
        self.send_to(self.default_chat_id, text).await
    }
}

// ─── Inbound router ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Start,
    Ping,
    Status,
    Remind(String),
    Topic { name: String, delta: f64 },
    FollowUp(String),
    Note { name: String, text: String },
    Unknown,
    Chat(String),
}

const USAGE_REPLY: &str = "Usage:\n\
     /remind <10m|2h|1d|HH:MM> <text>\n\
     /topic <name> [delta]\n\
     /followup <name>\n\
     /note <name> <text>\n\
     /status";

fn parse_command(text: &str) -> Command {
    let text = text.trim();
    if !text.starts_with('/') {
        return Command::Chat(text.to_string());
    }

    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };

    match head.to_ascii_lowercase().as_str() {
        "/start" => Command::Start,
        "/ping" => Command::Ping,
        "/status" => Command::Status,
        "/remind" => Command::Remind(rest.to_string()),
        "/topic" => {
            if rest.is_empty() {
                return Command::Unknown;
            }
            // Trailing number, if any, is the salience delta.
            let mut parts: Vec<&str> = rest.split_whitespace().collect();
            let mut delta = 0.1;
            if let Some(parsed) = parts.last().and_then(|last| last.parse::<f64>().ok()) {
                delta = parsed;
                parts.pop();
            }
            if parts.is_empty() {
                return Command::Unknown;
            }
            Command::Topic {
                name: parts.join(" "),
                delta,
            }
        }
        "/followup" => {
            if rest.is_empty() {
                Command::Unknown
            } else {
                Command::FollowUp(rest.to_string())
            }
        }
        "/note" => match rest.split_once(char::is_whitespace) {
            Some((name, note)) if !note.trim().is_empty() => Command::Note {
                name: name.to_string(),
                text: note.trim().to_string(),
            },
            _ => Command::Unknown,
        },
        _ => Command::Unknown,
    }
}

/// `/remind` time syntax: a relative duration (`10m`, `2h`, `1d`) or a local
/// clock time (`HH:MM`, next occurrence). Anything else is rejected here,
/// before it can reach the engine.
fn parse_remind_spec(raw: &str, now: DateTime<Utc>) -> Result<(DateTime<Utc>, String)> {
    let raw = raw.trim();

    let duration_re = Regex::new(r"^(\d+)\s*([mhd])\s+(\S.*)$").expect("static regex");
    if let Some(caps) = duration_re.captures(raw) {
        let amount: i64 = caps[1].parse().context("duration amount out of range")?;
        let due_at = match &caps[2] {
            "m" => now + Duration::minutes(amount),
            "h" => now + Duration::hours(amount),
            _ => now + Duration::days(amount),
        };
        return Ok((due_at, caps[3].trim().to_string()));
    }

    let clock_re = Regex::new(r"^(\d{1,2}):(\d{2})\s+(\S.*)$").expect("static regex");
    if let Some(caps) = clock_re.captures(raw) {
        let hour: u32 = caps[1].parse().context("bad hour")?;
        let minute: u32 = caps[2].parse().context("bad minute")?;
        if hour > 23 || minute > 59 {
            bail!("clock time out of range: {hour:02}:{minute:02}");
        }

        let local_now = now.with_timezone(&Local);
        let today = local_now
            .date_naive()
            .and_hms_opt(hour, minute, 0)
            .context("invalid clock time")?;
        let mut due_at = resolve_local(today)?;
        if due_at <= now {
            due_at = resolve_local(today + Duration::days(1))?;
        }
        return Ok((due_at, caps[3].trim().to_string()));
    }

    bail!("could not parse reminder time in {raw:?}");
}

fn resolve_local(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => bail!("local time {naive} does not exist (DST gap)"),
    }
}

// ─── Bot task ────────────────────────────────────────────────────────────────

pub fn spawn_bot(
    engine: Arc<Engine>,
    client: Arc<TelegramClient>,
    llm: Arc<LlmClient>,
    config: BotConfig,
) {
    tokio::spawn(async move {
        tracing::info!(
            "Telegram bot active (authorized chat: {})",
            config.telegram_chat_id
        );
        run_bot(engine, client, llm, config).await;
    });
}

async fn run_bot(
    engine: Arc<Engine>,
    client: Arc<TelegramClient>,
    llm: Arc<LlmClient>,
    config: BotConfig,
) {
    let mut offset: i64 = 0;

    loop {
        let updates = match poll_updates(&client, offset).await {
            Some(u) => u,
            None => continue,
        };

        for update in updates {
            offset = update.update_id + 1;

            let msg = match update.message {
                Some(m) => m,
                None => continue,
            };

            let chat_id = msg.chat.id;
            if chat_id != config.telegram_chat_id {
                tracing::debug!("Ignoring message from unauthorized chat {}", chat_id);
                continue;
            }

            let text = match msg.text {
                Some(t) if !t.trim().is_empty() => t.trim().to_string(),
                _ => continue,
            };

            tracing::info!("Telegram [chat {}]: {:?}", chat_id, text);
            handle_message(&engine, &client, &llm, &config, chat_id, &text).await;
        }
    }
}

async fn handle_message(
    engine: &Engine,
    client: &TelegramClient,
    llm: &LlmClient,
    config: &BotConfig,
    chat_id: i64,
    text: &str,
) {
    let now = Utc::now();
    if let Err(e) = engine.record_user_activity(now).await {
        tracing::error!("Failed to record user activity: {e:#}");
    }

    let reply = match parse_command(text) {
        Command::Start => format!(
            "Hi 👋 I'm {}. Talk to me, or try /remind and /status.",
            config.persona_name
        ),
        Command::Ping => "pong".to_string(),
        Command::Status => engine.status_summary().await,
        Command::Remind(spec) => match parse_remind_spec(&spec, now) {
            Ok((due_at, reminder_text)) => {
                match engine.schedule_reminder(due_at, &reminder_text).await {
                    Ok(_) => format!(
                        "Okay — I'll remind you at {}.",
                        due_at.with_timezone(&Local).format("%H:%M on %b %-d")
                    ),
                    Err(e) => {
                        tracing::error!("Failed to schedule reminder: {e:#}");
                        "I couldn't save that reminder, sorry.".to_string()
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Rejected reminder spec: {e:#}");
                USAGE_REPLY.to_string()
            }
        },
        Command::Topic { name, delta } => match engine.touch_topic(&name, delta).await {
            Ok(()) => format!("Noted — \"{name}\" is on my mind."),
            Err(e) => {
                tracing::error!("Failed to touch topic: {e:#}");
                "I couldn't save that, sorry.".to_string()
            }
        },
        Command::FollowUp(name) => match engine.mark_follow_up(&name).await {
            Ok(()) => format!("I'll circle back to \"{name}\"."),
            Err(e) => {
                tracing::error!("Failed to mark follow-up: {e:#}");
                "I couldn't save that, sorry.".to_string()
            }
        },
        Command::Note { name, text } => match engine.append_note(&name, &text).await {
            Ok(()) => "Got it.".to_string(),
            Err(e) => {
                tracing::error!("Failed to append note: {e:#}");
                "I couldn't save that, sorry.".to_string()
            }
        },
        Command::Unknown => USAGE_REPLY.to_string(),
        Command::Chat(message) => {
            if let Err(e) = engine.note_mentions(&message).await {
                tracing::warn!("Topic mention touch failed: {e:#}");
            }
            llm.complete(&config.system_prompt, &message).await
        }
    };

    if reply.trim().is_empty() {
        return;
    }
    if let Err(e) = client.send_to(chat_id, &reply).await {
        tracing::warn!("Failed to send reply: {e:#}");
    }
}

async fn poll_updates(client: &TelegramClient, offset: i64) -> Option<Vec<Update>> {
    let url = format!("{}/getUpdates", client.api_base);
    let params = serde_json::json!({
        "offset": offset,
        "timeout": 30,
        "allowed_updates": ["message"]
    });

    let resp = match client.client.post(&url).json(&params).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Telegram getUpdates error: {}", e);
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            return None;
        }
    };

    let body: TelegramResponse<Vec<Update>> = match resp.json().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("Telegram getUpdates parse error: {}", e);
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            return None;
        }
    };

    if !body.ok {
        tracing::warn!("Telegram API returned ok=false");
        tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
        return None;
    }

    Some(body.result.unwrap_or_default())
}
