//! Topic salience ledger. Topics are created on first touch and never
//! removed; salience moves only when a caller applies a delta.

use chrono::{DateTime, Utc};

use super::state::{EngineState, Topic, TopicNote};

pub const NOTE_TOUCH_BONUS: f64 = 0.05;

/// Notes per topic are capped so the persisted record stays bounded.
const MAX_NOTES_PER_TOPIC: usize = 50;

/// Topic names shorter than this are too ambiguous to match inside free text.
const MIN_MENTION_PROBE_LEN: usize = 3;

/// Create the topic with defaults if absent, then shift its salience,
/// clamped to [0, 1].
pub fn touch(state: &mut EngineState, name: &str, delta: f64) {
    let topic = state
        .topics
        .entry(name.to_string())
        .or_insert_with(Topic::default);
    topic.salience = (topic.salience + delta).clamp(0.0, 1.0);
}

pub fn mark_follow_up(state: &mut EngineState, name: &str) {
    state
        .topics
        .entry(name.to_string())
        .or_insert_with(Topic::default)
        .follow_up = true;
}

/// Append a timestamped note and give the topic a small salience bump.
pub fn append_note(state: &mut EngineState, name: &str, text: &str, now: DateTime<Utc>) {
    let topic = state
        .topics
        .entry(name.to_string())
        .or_insert_with(Topic::default);
    topic.notes.push(TopicNote {
        at: now,
        text: text.to_string(),
    });
    if topic.notes.len() > MAX_NOTES_PER_TOPIC {
        let excess = topic.notes.len() - MAX_NOTES_PER_TOPIC;
        topic.notes.drain(0..excess);
    }
    touch(state, name, NOTE_TOUCH_BONUS);
}

/// Bump every topic whose name appears in `text` (case-insensitive).
/// Returns the touched names. This is the inbound router's pre-classified
/// topic feed: the router passes message text through here so a mention
/// keeps a topic warm without any model in the loop.
pub fn touch_mentions(state: &mut EngineState, text: &str, delta: f64) -> Vec<String> {
    let haystack = text.to_ascii_lowercase();
    if haystack.trim().is_empty() {
        return Vec::new();
    }

    let touched: Vec<String> = state
        .topics
        .keys()
        .filter(|name| {
            let probe = name.to_ascii_lowercase();
            probe.len() >= MIN_MENTION_PROBE_LEN && haystack.contains(&probe)
        })
        .cloned()
        .collect();

    for name in &touched {
        touch(state, name, delta);
    }
    touched
}
