use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // Telegram transport
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: i64,

    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,

    // Persona
    #[serde(default = "default_persona_name")]
    pub persona_name: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    // Engine cadence and push limits
    #[serde(default = "default_tick_interval_minutes")]
    pub tick_interval_minutes: u64,
    #[serde(default = "default_min_gap_minutes")]
    pub min_gap_minutes: u64,
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,

    // Durable state
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_persona_name() -> String {
    "Aureia".to_string()
}

fn default_system_prompt() -> String {
    "You are Aureia, a warm and attentive companion. \
     You keep your messages short and personal, you remember what matters to the person \
     you talk with, and you never pretend to be human."
        .to_string()
}

fn default_tick_interval_minutes() -> u64 {
    5
}

fn default_min_gap_minutes() -> u64 {
    45
}

fn default_daily_cap() -> u32 {
    6
}

fn default_window_minutes() -> u32 {
    15
}

fn default_state_path() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("aureia").join("aureia_state.json"))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| "aureia_state.json".to_string())
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_chat_id: 0,
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            persona_name: default_persona_name(),
            system_prompt: default_system_prompt(),
            tick_interval_minutes: default_tick_interval_minutes(),
            min_gap_minutes: default_min_gap_minutes(),
            daily_cap: default_daily_cap(),
            window_minutes: default_window_minutes(),
            state_path: default_state_path(),
        }
    }
}

impl BotConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("aureia_config.toml")
    }

    /// Load config from aureia_config.toml (next to the executable), then
    /// apply environment overrides on top.
    pub fn load() -> Self {
        let path = Self::config_path();

        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<BotConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No config file at {:?}, using defaults + env vars", path);
                Self::default()
            }
        };

        config.apply_env();
        config
    }

    /// Environment overrides. Secrets in particular are expected to arrive
    /// this way rather than sitting in the config file.
    fn apply_env(&mut self) {
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram_bot_token = token.trim().to_string();
            }
        }

        if let Ok(raw) = env::var("TELEGRAM_CHAT_ID") {
            if let Ok(id) = raw.trim().parse() {
                self.telegram_chat_id = id;
            }
        }

        if let Ok(url) = env::var("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }

        if let Ok(raw) = env::var("AUREIA_TICK_INTERVAL_MINUTES") {
            if let Ok(minutes) = raw.parse() {
                self.tick_interval_minutes = minutes;
            }
        }

        if let Ok(raw) = env::var("AUREIA_MIN_GAP_MINUTES") {
            if let Ok(minutes) = raw.parse() {
                self.min_gap_minutes = minutes;
            }
        }

        if let Ok(raw) = env::var("AUREIA_DAILY_CAP") {
            if let Ok(cap) = raw.parse() {
                self.daily_cap = cap;
            }
        }

        if let Ok(raw) = env::var("AUREIA_WINDOW_MINUTES") {
            if let Ok(minutes) = raw.parse() {
                self.window_minutes = minutes;
            }
        }

        if let Ok(path) = env::var("AUREIA_STATE_PATH") {
            if !path.trim().is_empty() {
                self.state_path = path;
            }
        }
    }

    /// Startup validation: bad values are rejected here, before anything
    /// reaches the engine state.
    pub fn validate(&self) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            bail!("telegram_bot_token is required (set TELEGRAM_BOT_TOKEN)");
        }
        if self.telegram_chat_id == 0 {
            bail!("telegram_chat_id is required (set TELEGRAM_CHAT_ID)");
        }
        if self.tick_interval_minutes == 0 {
            bail!("tick_interval_minutes must be at least 1");
        }
        if self.state_path.trim().is_empty() {
            bail!("state_path must not be empty");
        }
        if self.llm_api_url.trim().is_empty() {
            bail!("llm_api_url must not be empty");
        }
        Ok(())
    }
}
