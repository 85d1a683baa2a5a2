//! Push rate limiting: a minimum gap between unsolicited messages plus a
//! per-local-day cap. One gate shared by every trigger, checked once per
//! tick by the cycle, never per candidate.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};

use super::state::EngineState;

/// Old day-counter keys are pruned on push so the persisted record stays
/// small enough to read by eye.
const DAY_COUNTER_RETENTION_DAYS: i64 = 14;

/// Calendar-date key in the deployment's local timezone.
pub fn local_day_key(now: DateTime<Utc>) -> String {
    now.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// May the engine push right now? No recorded push counts as infinitely
/// long ago. The daily cap closes the gate for the rest of the local day.
pub fn allow_push(state: &EngineState, now: DateTime<Utc>) -> bool {
    if let Some(last) = state.last_push_at {
        if now - last < Duration::minutes(state.limits.min_gap_minutes as i64) {
            return false;
        }
    }

    let today = state
        .day_counter
        .get(&local_day_key(now))
        .copied()
        .unwrap_or(0);
    today < state.limits.daily_cap
}

/// Record a delivered push: stamp `last_push_at` and bump today's counter in
/// the same critical section, so the pair is always consistent.
pub fn record_push(state: &mut EngineState, now: DateTime<Utc>) {
    state.last_push_at = Some(now);
    *state.day_counter.entry(local_day_key(now)).or_insert(0) += 1;

    let horizon = now.with_timezone(&Local).date_naive() - Duration::days(DAY_COUNTER_RETENTION_DAYS);
    state.day_counter.retain(|key, _| {
        NaiveDate::parse_from_str(key, "%Y-%m-%d")
            .map(|date| date >= horizon)
            .unwrap_or(false)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Local noon today, as Utc, so the short offsets these tests add never
    /// cross a local midnight.
    fn local_noon() -> DateTime<Utc> {
        let noon = Local::now()
            .date_naive()
            .and_hms_opt(12, 0, 0)
            .expect("valid time");
        match Local.from_local_datetime(&noon) {
            chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
            chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
            chrono::LocalResult::None => Utc::now(),
        }
    }

    #[test]
    fn never_pushed_means_allowed() {
        let state = EngineState::initial(local_noon());
        assert!(allow_push(&state, local_noon()));
    }

    #[test]
    fn min_gap_blocks_then_releases() {
        let now = local_noon();
        let mut state = EngineState::initial(now);
        state.limits.min_gap_minutes = 20;
        state.limits.daily_cap = 10;

        record_push(&mut state, now);
        assert!(!allow_push(&state, now + Duration::minutes(10)));
        assert!(allow_push(&state, now + Duration::minutes(21)));
    }

    #[test]
    fn record_push_bumps_exactly_one_day_count() {
        let now = local_noon();
        let mut state = EngineState::initial(now);

        record_push(&mut state, now);
        assert_eq!(state.last_push_at, Some(now));
        assert_eq!(state.day_counter.get(&local_day_key(now)), Some(&1));

        record_push(&mut state, now + Duration::minutes(90));
        assert_eq!(state.day_counter.get(&local_day_key(now)), Some(&2));
        assert_eq!(state.day_counter.len(), 1);
    }

    #[test]
    fn daily_cap_closes_the_gate_for_the_day() {
        let now = local_noon();
        let mut state = EngineState::initial(now);
        state.limits.min_gap_minutes = 0;
        state.limits.daily_cap = 2;

        assert!(allow_push(&state, now));
        record_push(&mut state, now);
        assert!(allow_push(&state, now + Duration::minutes(1)));
        record_push(&mut state, now + Duration::minutes(1));

        // Third attempt the same day: blocked regardless of the gap.
        assert!(!allow_push(&state, now + Duration::minutes(2)));
        assert!(!allow_push(&state, now + Duration::hours(5)));
    }

    #[test]
    fn zero_cap_never_allows() {
        let now = local_noon();
        let mut state = EngineState::initial(now);
        state.limits.daily_cap = 0;
        assert!(!allow_push(&state, now));
    }

    #[test]
    fn stale_day_keys_are_pruned_on_push() {
        let now = local_noon();
        let mut state = EngineState::initial(now);
        state.day_counter.insert("2001-01-01".to_string(), 4);
        state.day_counter.insert("not-a-date".to_string(), 1);

        record_push(&mut state, now);
        assert_eq!(state.day_counter.len(), 1);
        assert!(state.day_counter.contains_key(&local_day_key(now)));
    }
}
