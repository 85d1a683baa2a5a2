//! Reminder scheduling with an at-most-once firing guarantee.
//!
//! Both operations run inside the engine's critical section, so the
//! read-and-flip in `collect_due` can never race a concurrent tick.

use chrono::{DateTime, Utc};

use super::state::{EngineState, Reminder};

/// Append a reminder. Duplicates are allowed; each gets its own id.
pub fn schedule(state: &mut EngineState, due_at: DateTime<Utc>, text: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    state.reminders.push(Reminder {
        id: id.clone(),
        due_at,
        text: text.to_string(),
        sent: false,
    });
    id
}

/// Return every unsent reminder that is due at `now`, in insertion order,
/// flipping each to `sent` in the same call. A reminder flipped by an
/// earlier tick is never returned again. Records stay in the state as an
/// audit trail.
pub fn collect_due(state: &mut EngineState, now: DateTime<Utc>) -> Vec<Reminder> {
    let mut due = Vec::new();
    for reminder in &mut state.reminders {
        if !reminder.sent && reminder.due_at <= now {
            reminder.sent = true;
            due.push(reminder.clone());
        }
    }
    due
}
