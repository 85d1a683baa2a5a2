use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The engine's whole durable record. Written in full on every tick so the
/// file on disk is always a self-contained, human-inspectable snapshot.
///
/// Mutated only while the engine's mutex is held; both the tick loop and the
/// inbound message handlers go through that single critical section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub last_user_message_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub affect: AffectState,
    #[serde(default)]
    pub topics: BTreeMap<String, Topic>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    pub limits: PushLimits,
    #[serde(default)]
    pub day_counter: BTreeMap<String, u32>,
}

/// Bounded affect signals. All fields live in [0, 100] except `mood`, which
/// is a [0, 1] blend of energy and satisfaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectState {
    pub energy: f64,
    pub mood: f64,
    pub social: f64,
    pub curiosity: f64,
    pub focus: f64,
    pub stress: f64,
    pub satisfaction: f64,
    pub last_tick_at: DateTime<Utc>,
}

impl AffectState {
    /// Mid-range starting point for a fresh deployment.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            energy: 60.0,
            mood: 0.6,
            social: 40.0,
            curiosity: 50.0,
            focus: 55.0,
            stress: 20.0,
            satisfaction: 60.0,
            last_tick_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub salience: f64,
    pub follow_up: bool,
    #[serde(default)]
    pub notes: Vec<TopicNote>,
}

impl Default for Topic {
    fn default() -> Self {
        Self {
            salience: 0.3,
            follow_up: false,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicNote {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// A reminder record is never deleted; `sent` flipping to true is its whole
/// lifecycle, and the flipped record stays behind as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub due_at: DateTime<Utc>,
    pub text: String,
    pub sent: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PushLimits {
    pub min_gap_minutes: u64,
    pub daily_cap: u32,
}

impl Default for PushLimits {
    fn default() -> Self {
        Self {
            min_gap_minutes: 45,
            daily_cap: 6,
        }
    }
}

impl EngineState {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            last_user_message_at: None,
            last_push_at: None,
            affect: AffectState::initial(now),
            topics: BTreeMap::new(),
            reminders: Vec::new(),
            limits: PushLimits::default(),
            day_counter: BTreeMap::new(),
        }
    }

    pub fn pending_reminders(&self) -> usize {
        self.reminders.iter().filter(|r| !r.sent).count()
    }

    /// One-line snapshot used for `/status` replies and as the state context
    /// handed to the completion model when composing a push.
    pub fn summary(&self) -> String {
        let a = &self.affect;
        format!(
            "energy {:.0}, mood {:.2}, social {:.0}, curiosity {:.0}, focus {:.0}, \
             stress {:.0}, satisfaction {:.0}; {} topic(s), {} pending reminder(s)",
            a.energy,
            a.mood,
            a.social,
            a.curiosity,
            a.focus,
            a.stress,
            a.satisfaction,
            self.topics.len(),
            self.pending_reminders(),
        )
    }
}

/// Durable storage for the engine state: one JSON document, replaced
/// atomically on every save so a crash mid-write leaves the previous record
/// intact.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted record, or start fresh. An unreadable or corrupt
    /// file is logged and replaced with defaults on the next save; the
    /// atomic-rename discipline means corruption only happens from outside
    /// interference, never from our own crashes.
    pub fn load_or_init(&self, now: DateTime<Utc>) -> EngineState {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<EngineState>(&contents) {
                Ok(state) => {
                    tracing::info!("Loaded engine state from {:?}", self.path);
                    state
                }
                Err(e) => {
                    tracing::warn!(
                        "Engine state at {:?} is unreadable ({}); starting fresh",
                        self.path,
                        e
                    );
                    EngineState::initial(now)
                }
            },
            Err(_) => {
                tracing::info!("No engine state at {:?}; starting fresh", self.path);
                EngineState::initial(now)
            }
        }
    }

    /// Write the full record to a sibling temp file, then rename over the
    /// real path. Rename is atomic on the same filesystem.
    pub fn save(&self, state: &EngineState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create state dir {:?}", parent))?;
            }
        }

        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write state temp file {:?}", tmp_path))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace state file {:?}", self.path))?;

        Ok(())
    }
}
