//! Outreach decision policy.
//!
//! Every trigger whose conditions hold contributes a candidate; one winner
//! is then sampled uniformly. The contract is collect-all-then-sample, not
//! first-match-wins. Wanting to speak and being allowed to speak stay
//! separate: the rate limiter is the tick cycle's problem, never consulted
//! here.

use chrono::{DateTime, Local, Timelike, Utc};
use rand::seq::SliceRandom;

use super::affect::hours_since_user_message;
use super::state::EngineState;

const SILENCE_TRIGGER_HOURS: f64 = 6.0;
const SILENCE_SOCIAL_FLOOR: f64 = 65.0;
const SILENCE_ENERGY_FLOOR: f64 = 45.0;
const FOLLOW_UP_SALIENCE_FLOOR: f64 = 0.55;
const STRESS_TRIGGER: f64 = 65.0;
const STRESS_MOOD_FLOOR: f64 = 0.25;
const GATE_MOOD_FLOOR: f64 = 0.2;
const GATE_ENERGY_FLOOR: f64 = 35.0;

/// Natural check-in anchors, minutes after local midnight (09:00 and 21:00).
const WINDOW_ANCHORS_MIN: [u32; 2] = [9 * 60, 21 * 60];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushReason {
    QuietStretch,
    NaturalWindow,
    FollowUpTopic(String),
    StressRelief,
}

impl PushReason {
    /// Short phrasing handed to the completion model.
    pub fn describe(&self) -> String {
        match self {
            PushReason::QuietStretch => {
                "it has been quiet for a while and you feel like checking in".to_string()
            }
            PushReason::NaturalWindow => {
                "it is a natural moment of the day to say hello".to_string()
            }
            PushReason::FollowUpTopic(name) => {
                format!("you wanted to follow up on \"{name}\"")
            }
            PushReason::StressRelief => {
                "you feel tense and reaching out would help you unwind".to_string()
            }
        }
    }
}

/// Evaluate the trigger conditions at `now` and pick at most one reason to
/// reach out. Side-effect free; the caller still has to clear the rate
/// limiter before sending anything.
pub fn evaluate(
    state: &EngineState,
    now: DateTime<Utc>,
    window_minutes: u32,
) -> Option<PushReason> {
    let local = now.with_timezone(&Local);
    let minute_of_day = local.hour() * 60 + local.minute();

    let candidates = collect_candidates(state, now, minute_of_day, window_minutes);
    if candidates.is_empty() {
        return None;
    }

    // Global gate: too flat or too drained means no outreach at all, even
    // with candidates on the table.
    if state.affect.mood < GATE_MOOD_FLOOR || state.affect.energy <= GATE_ENERGY_FLOOR {
        return None;
    }

    candidates.choose(&mut rand::thread_rng()).cloned()
}

fn collect_candidates(
    state: &EngineState,
    now: DateTime<Utc>,
    minute_of_day: u32,
    window_minutes: u32,
) -> Vec<PushReason> {
    let mut candidates = Vec::new();
    let a = &state.affect;

    if hours_since_user_message(state, now) >= SILENCE_TRIGGER_HOURS
        && a.social > SILENCE_SOCIAL_FLOOR
        && a.energy > SILENCE_ENERGY_FLOOR
    {
        candidates.push(PushReason::QuietStretch);
    }

    if in_natural_window(minute_of_day, window_minutes) {
        candidates.push(PushReason::NaturalWindow);
    }

    if let Some((name, _)) = state
        .topics
        .iter()
        .find(|(_, topic)| topic.follow_up && topic.salience > FOLLOW_UP_SALIENCE_FLOOR)
    {
        candidates.push(PushReason::FollowUpTopic(name.clone()));
    }

    if a.stress > STRESS_TRIGGER && a.mood >= STRESS_MOOD_FLOOR {
        candidates.push(PushReason::StressRelief);
    }

    candidates
}

/// Within the first `window_minutes` after either anchor. The width is an
/// explicit configuration value, independent of the tick cadence.
fn in_natural_window(minute_of_day: u32, window_minutes: u32) -> bool {
    WINDOW_ANCHORS_MIN
        .iter()
        .any(|&start| minute_of_day >= start && minute_of_day < start + window_minutes)
}
