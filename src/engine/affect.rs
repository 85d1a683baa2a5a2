//! Affect dynamics: one bounded update per tick.
//!
//! Each signal drifts with circadian phase, user silence, and reminder
//! backlog, plus a small symmetric noise term per field. The formulas assume
//! roughly fixed-size ticks; `advance` must be called once per tick and not
//! more often, or the implied elapsed-time semantics break down.

use chrono::{DateTime, Local, Timelike, Utc};
use rand::Rng;

use super::state::EngineState;

/// Circadian peak anchor, local fractional hour. A single-period cosine
/// bottoms out 12 hours later, at 23:00.
const CIRCADIAN_PEAK_HOUR: f64 = 11.0;

/// Silence horizon assumed when the user has never written.
pub(crate) const DEFAULT_SILENCE_HOURS: f64 = 24.0;

/// Circadian factor in [0, 1]: one full cosine period per 24h, peaking at
/// [`CIRCADIAN_PEAK_HOUR`].
pub fn circadian_factor(fractional_hour: f64) -> f64 {
    let phase = std::f64::consts::TAU * (fractional_hour - CIRCADIAN_PEAK_HOUR) / 24.0;
    0.5 * (1.0 + phase.cos())
}

pub(crate) fn local_fractional_hour(now: DateTime<Utc>) -> f64 {
    let local = now.with_timezone(&Local);
    local.hour() as f64 + local.minute() as f64 / 60.0
}

pub(crate) fn hours_since_user_message(state: &EngineState, now: DateTime<Utc>) -> f64 {
    match state.last_user_message_at {
        Some(at) => (now - at).num_seconds().max(0) as f64 / 3600.0,
        None => DEFAULT_SILENCE_HOURS,
    }
}

fn noise(rng: &mut impl Rng) -> f64 {
    rng.gen_range(-1.0..=1.0)
}

/// Advance all affect signals to `now`. Pure in everything except the noise
/// draws; every output stays inside its declared closed interval.
pub fn advance(state: &mut EngineState, now: DateTime<Utc>) {
    let mut rng = rand::thread_rng();

    let c = circadian_factor(local_fractional_hour(now));
    let silent_hours = hours_since_user_message(state, now);
    let pending = state.pending_reminders() as f64;

    let a = &mut state.affect;

    a.energy = (a.energy + (c * 30.0 - 15.0) / 60.0 + noise(&mut rng) * 0.2).clamp(5.0, 95.0);
    a.social = (40.0 + silent_hours * 5.0 + noise(&mut rng) * 2.0).clamp(10.0, 95.0);
    a.curiosity =
        (a.curiosity + noise(&mut rng) * 1.4 - 0.25 * ((a.focus - 50.0) / 50.0)).clamp(10.0, 95.0);
    a.stress = (a.stress + pending * 0.6 - 0.4 + noise(&mut rng) * 0.4).clamp(5.0, 95.0);
    a.satisfaction = (a.satisfaction + (a.energy - 50.0) / 200.0 - pending * 0.2
        + noise(&mut rng) * 0.3)
        .clamp(5.0, 95.0);
    // Mood blends the values computed above, not the pre-tick ones.
    a.mood = (0.45 * (a.energy / 100.0) + 0.45 * (a.satisfaction / 100.0)
        + noise(&mut rng) * 0.05)
        .clamp(0.0, 1.0);
    a.focus = (55.0 + (c - 0.5) * 40.0 + noise(&mut rng) * 2.0).clamp(10.0, 95.0);
    a.last_tick_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::Reminder;
    use chrono::Duration;
    use rand::Rng;

    #[test]
    fn circadian_factor_peaks_and_bottoms() {
        assert!((circadian_factor(11.0) - 1.0).abs() < 1e-9);
        assert!(circadian_factor(23.0).abs() < 1e-9);
        for h in 0..24 {
            let c = circadian_factor(h as f64);
            assert!((0.0..=1.0).contains(&c), "c({h}) = {c}");
        }
    }

    #[test]
    fn advance_keeps_every_field_in_bounds() {
        let mut rng = rand::thread_rng();
        let now = Utc::now();

        for _ in 0..500 {
            let mut state = EngineState::initial(now);
            state.affect.energy = rng.gen_range(5.0..=95.0);
            state.affect.mood = rng.gen_range(0.0..=1.0);
            state.affect.social = rng.gen_range(10.0..=95.0);
            state.affect.curiosity = rng.gen_range(10.0..=95.0);
            state.affect.focus = rng.gen_range(10.0..=95.0);
            state.affect.stress = rng.gen_range(5.0..=95.0);
            state.affect.satisfaction = rng.gen_range(5.0..=95.0);
            state.last_user_message_at =
                Some(now - Duration::minutes(rng.gen_range(0..(72 * 60))));
            for i in 0..rng.gen_range(0..20) {
                state.reminders.push(Reminder {
                    id: format!("r{i}"),
                    due_at: now + Duration::hours(1),
                    text: "x".to_string(),
                    sent: false,
                });
            }

            advance(&mut state, now);

            let a = &state.affect;
            assert!((5.0..=95.0).contains(&a.energy), "energy {}", a.energy);
            assert!((0.0..=1.0).contains(&a.mood), "mood {}", a.mood);
            assert!((10.0..=95.0).contains(&a.social), "social {}", a.social);
            assert!(
                (10.0..=95.0).contains(&a.curiosity),
                "curiosity {}",
                a.curiosity
            );
            assert!((10.0..=95.0).contains(&a.focus), "focus {}", a.focus);
            assert!((5.0..=95.0).contains(&a.stress), "stress {}", a.stress);
            assert!(
                (5.0..=95.0).contains(&a.satisfaction),
                "satisfaction {}",
                a.satisfaction
            );
            assert_eq!(a.last_tick_at, now);
        }
    }

    #[test]
    fn social_grows_with_silence() {
        let now = Utc::now();

        let mut fresh = EngineState::initial(now);
        fresh.last_user_message_at = Some(now);
        advance(&mut fresh, now);

        let mut silent = EngineState::initial(now);
        silent.last_user_message_at = Some(now - Duration::hours(8));
        advance(&mut silent, now);

        // 40 + 0*5 vs 40 + 8*5, noise is at most +-2 on each side.
        assert!(silent.affect.social > fresh.affect.social + 30.0);
    }

    #[test]
    fn never_contacted_counts_as_a_full_day_of_silence() {
        let now = Utc::now();
        let state = EngineState::initial(now);
        assert_eq!(hours_since_user_message(&state, now), DEFAULT_SILENCE_HOURS);
    }

    #[test]
    fn reminder_backlog_raises_stress() {
        let now = Utc::now();

        let mut loaded = EngineState::initial(now);
        for i in 0..10 {
            loaded.reminders.push(Reminder {
                id: format!("r{i}"),
                due_at: now + Duration::hours(2),
                text: "pending".to_string(),
                sent: false,
            });
        }
        let before = loaded.affect.stress;
        advance(&mut loaded, now);

        // 10 * 0.6 - 0.4 = +5.6 drift, noise at most +-0.4.
        assert!(loaded.affect.stress > before + 4.0);
    }
}
