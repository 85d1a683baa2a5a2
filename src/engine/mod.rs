//! The proactive engagement engine.
//!
//! A periodic tick advances the affect model, fires due reminders, and
//! decides whether to reach out unprompted. All engine state lives behind
//! one mutex shared with the inbound message handlers; every mutation is
//! persisted before the critical section is released.

pub mod affect;
pub mod decision;
pub mod limiter;
pub mod reminders;
pub mod state;
pub mod topics;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flume::Sender;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::config::BotConfig;
use decision::PushReason;
use state::{EngineState, PushLimits, StateStore};

/// Salience bump applied when an inbound message mentions a known topic.
const MENTION_TOUCH_DELTA: f64 = 0.1;

/// Deliver a text message to the user. Implemented by the Telegram client;
/// failures are reported to the caller, logged, and absorbed, never fatal.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<()>;
}

/// Generate a short natural-language utterance. Implementations must come
/// back with *some* string; a fallback line on error is a valid result.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> String;
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    ReminderFired { id: String, text: String },
    PushSent { reason: String },
    DeliveryFailed { detail: String },
    PersistFailed { detail: String },
}

pub struct Engine {
    config: BotConfig,
    state: Mutex<EngineState>,
    store: StateStore,
    messenger: Arc<dyn Messenger>,
    completer: Arc<dyn Completer>,
    event_tx: Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        config: BotConfig,
        store: StateStore,
        messenger: Arc<dyn Messenger>,
        completer: Arc<dyn Completer>,
        event_tx: Sender<EngineEvent>,
    ) -> Self {
        let mut state = store.load_or_init(Utc::now());
        // Limits come from validated config, refreshed on every start.
        state.limits = PushLimits {
            min_gap_minutes: config.min_gap_minutes,
            daily_cap: config.daily_cap,
        };
        tracing::debug!("Engine state persists to {:?}", store.path());

        Self {
            config,
            state: Mutex::new(state),
            store,
            messenger,
            completer,
            event_tx,
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn persist(&self, state: &EngineState) -> Result<()> {
        self.store.save(state).map_err(|e| {
            self.emit(EngineEvent::PersistFailed {
                detail: format!("{e:#}"),
            });
            e
        })
    }

    // ─── Inbound entry points (message router) ───────────────────────────

    pub async fn record_user_activity(&self, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.last_user_message_at = Some(now);
        self.persist(&state)
    }

    pub async fn touch_topic(&self, name: &str, delta: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        topics::touch(&mut state, name, delta);
        self.persist(&state)
    }

    pub async fn mark_follow_up(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        topics::mark_follow_up(&mut state, name);
        self.persist(&state)
    }

    pub async fn append_note(&self, name: &str, text: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        topics::append_note(&mut state, name, text, Utc::now());
        self.persist(&state)
    }

    /// Bump topics mentioned in free text; returns the touched names.
    pub async fn note_mentions(&self, text: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let touched = topics::touch_mentions(&mut state, text, MENTION_TOUCH_DELTA);
        if !touched.is_empty() {
            self.persist(&state)?;
        }
        Ok(touched)
    }

    pub async fn schedule_reminder(&self, due_at: DateTime<Utc>, text: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let id = reminders::schedule(&mut state, due_at, text);
        self.persist(&state)?;
        Ok(id)
    }

    pub async fn status_summary(&self) -> String {
        self.state.lock().await.summary()
    }

    // ─── Tick loop ───────────────────────────────────────────────────────

    /// Periodic driver. Skipping missed ticks guarantees a slow cycle is
    /// never overlapped by the next one.
    pub async fn run_loop(self: Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.tick_interval_minutes * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Engine loop starting (tick every {} min)",
            self.config.tick_interval_minutes
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle(Utc::now()).await {
                tracing::error!("Tick cycle failed: {e:#}");
            }
        }
    }

    /// One full cycle: advance affect, fire due reminders, maybe push, then
    /// persist everything once. Delivery failures are logged and absorbed;
    /// a persist failure aborts loudly and leaves the previous durable
    /// record authoritative.
    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;

        affect::advance(&mut state, now);

        let due = reminders::collect_due(&mut state, now);
        for reminder in &due {
            let text = format!("Reminder: {}", reminder.text);
            match self.messenger.deliver(&text).await {
                Ok(()) => {
                    tracing::info!("Reminder {} delivered", reminder.id);
                    self.emit(EngineEvent::ReminderFired {
                        id: reminder.id.clone(),
                        text: reminder.text.clone(),
                    });
                }
                Err(e) => {
                    // The sent flip still persists below; a reminder fires
                    // at most once even when its delivery is lost.
                    tracing::warn!("Reminder {} delivery failed: {e:#}", reminder.id);
                    self.emit(EngineEvent::DeliveryFailed {
                        detail: format!("reminder {}: {e:#}", reminder.id),
                    });
                }
            }
        }

        if let Some(reason) = decision::evaluate(&state, now, self.config.window_minutes) {
            if limiter::allow_push(&state, now) {
                self.attempt_push(&mut state, now, &reason).await;
            } else {
                tracing::debug!("Push wanted ({reason:?}) but rate limiter said no");
            }
        }

        self.persist(&state)
            .context("tick could not persist engine state")
    }

    async fn attempt_push(&self, state: &mut EngineState, now: DateTime<Utc>, reason: &PushReason) {
        let user_prompt = format!(
            "Reason to reach out: {}.\nYour current inner state: {}.\n\
             Write one short, warm message (at most two sentences) to send right now. \
             Reply with the message text only.",
            reason.describe(),
            state.summary(),
        );
        let text = self
            .completer
            .complete(&self.config.system_prompt, &user_prompt)
            .await;

        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("Completer returned nothing usable; skipping push this tick");
            return;
        }

        match self.messenger.deliver(text).await {
            Ok(()) => {
                limiter::record_push(state, now);
                tracing::info!("Proactive push sent ({reason:?})");
                self.emit(EngineEvent::PushSent {
                    reason: reason.describe(),
                });
            }
            Err(e) => {
                // No record_push: an undelivered push consumes neither the
                // gap nor the daily cap.
                tracing::warn!("Push delivery failed: {e:#}");
                self.emit(EngineEvent::DeliveryFailed {
                    detail: format!("push: {e:#}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct RecordingMessenger {
        sent: StdMutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingMessenger {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                fail,
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn deliver(&self, text: &str) -> Result<()> {
            if self.fail {
                anyhow::bail!("simulated transport outage");
            }
            self.sent.lock().expect("lock").push(text.to_string());
            Ok(())
        }
    }

    struct CannedCompleter;

    #[async_trait]
    impl Completer for CannedCompleter {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> String {
            "hey, just thinking of you".to_string()
        }
    }

    fn test_engine(
        dir: &TempDir,
        messenger: Arc<RecordingMessenger>,
    ) -> (Arc<Engine>, flume::Receiver<EngineEvent>) {
        let mut config = BotConfig::default();
        config.state_path = dir
            .path()
            .join("state.json")
            .to_string_lossy()
            .into_owned();
        // Natural window off so tests control candidates exactly.
        config.window_minutes = 0;

        let store = StateStore::new(&config.state_path);
        let (event_tx, event_rx) = flume::unbounded();
        let engine = Arc::new(Engine::new(
            config,
            store,
            messenger,
            Arc::new(CannedCompleter),
            event_tx,
        ));
        (engine, event_rx)
    }

    /// Shape the state so the quiet-stretch candidate and the global gate
    /// both hold deterministically after the next affect advance.
    async fn prime_for_push(engine: &Engine, now: DateTime<Utc>) {
        let mut state = engine.state.lock().await;
        state.last_user_message_at = Some(now - Duration::hours(8));
        state.affect.energy = 60.0;
        state.affect.satisfaction = 60.0;
    }

    #[tokio::test]
    async fn due_reminder_fires_exactly_once_across_ticks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let messenger = RecordingMessenger::new(false);
        let (engine, _events) = test_engine(&dir, messenger.clone());

        let now = Utc::now();
        engine
            .schedule_reminder(now - Duration::seconds(1), "drink water")
            .await
            .expect("schedule");
        // Keep the push path quiet for this test.
        engine.record_user_activity(now).await.expect("activity");

        engine.run_cycle(now).await.expect("first tick");
        engine
            .run_cycle(now + Duration::seconds(1))
            .await
            .expect("second tick");

        let sent = messenger.sent();
        let reminder_sends: Vec<_> = sent.iter().filter(|t| t.contains("drink water")).collect();
        assert_eq!(reminder_sends.len(), 1);

        // The sent flip survives a reload from disk.
        let reloaded = engine.store.load_or_init(Utc::now());
        assert_eq!(reloaded.reminders.len(), 1);
        assert!(reloaded.reminders[0].sent);
    }

    #[tokio::test]
    async fn push_records_limiter_bookkeeping_together() {
        let dir = tempfile::tempdir().expect("tempdir");
        let messenger = RecordingMessenger::new(false);
        let (engine, events) = test_engine(&dir, messenger.clone());

        let now = Utc::now();
        prime_for_push(&engine, now).await;

        engine.run_cycle(now).await.expect("tick");

        assert_eq!(messenger.sent().len(), 1);
        let state = engine.state.lock().await;
        assert_eq!(state.last_push_at, Some(now));
        assert_eq!(
            state.day_counter.get(&limiter::local_day_key(now)),
            Some(&1)
        );
        drop(state);

        let got_push_event = events
            .try_iter()
            .any(|e| matches!(e, EngineEvent::PushSent { .. }));
        assert!(got_push_event);
    }

    #[tokio::test]
    async fn rate_limited_tick_stays_silent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let messenger = RecordingMessenger::new(false);
        let (engine, _events) = test_engine(&dir, messenger.clone());

        let now = Utc::now();
        prime_for_push(&engine, now).await;
        {
            let mut state = engine.state.lock().await;
            state.last_push_at = Some(now - Duration::minutes(1));
        }

        engine.run_cycle(now).await.expect("tick");
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_keeps_state_but_not_push_bookkeeping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let messenger = RecordingMessenger::new(true);
        let (engine, events) = test_engine(&dir, messenger.clone());

        let now = Utc::now();
        engine
            .schedule_reminder(now - Duration::seconds(1), "stretch")
            .await
            .expect("schedule");
        prime_for_push(&engine, now).await;

        engine.run_cycle(now).await.expect("tick survives outage");

        let state = engine.state.lock().await;
        // Reminder flip persisted, push budget untouched.
        assert!(state.reminders[0].sent);
        assert_eq!(state.last_push_at, None);
        assert!(state.day_counter.is_empty());
        drop(state);

        let failures = events
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::DeliveryFailed { .. }))
            .count();
        assert!(failures >= 1);
    }

    #[tokio::test]
    async fn inbound_activity_is_persisted_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let messenger = RecordingMessenger::new(false);
        let (engine, _events) = test_engine(&dir, messenger.clone());

        let now = Utc::now();
        engine.record_user_activity(now).await.expect("activity");
        engine.touch_topic("garden", 0.2).await.expect("touch");

        let reloaded = engine.store.load_or_init(Utc::now());
        assert_eq!(reloaded.last_user_message_at, Some(now));
        assert!(reloaded.topics.contains_key("garden"));
    }
}
