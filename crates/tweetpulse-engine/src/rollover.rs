//! Day rollover and history retention.
//!
//! Both functions are pure: they mutate a [`State`] in memory and report
//! whether anything changed. Persisting the result is the caller's job.

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::state::{DailyCounts, HistoryMap, State};

/// Move the live bucket into history when its date is not `target`.
///
/// The bucket is archived under its own date, replacing any entry already
/// there. Days between the old date and `target` get no entry. Returns
/// whether a rollover happened.
///
/// If history already holds `target` (the clock went backwards), that entry
/// is taken back out and becomes the live bucket, so history never contains
/// the live date.
pub fn rollover_if_needed(state: &mut State, target: NaiveDate) -> bool {
    if state.daily.date == target {
        return false;
    }

    let previous = std::mem::replace(&mut state.daily, DailyCounts::empty(target));
    info!(
        from = %previous.date,
        to = %target,
        tweets = previous.tweets,
        replies = previous.replies,
        "rolling over daily counters"
    );
    state.history.insert(previous.date, previous.snapshot());

    if let Some(resumed) = state.history.remove(&target) {
        warn!(date = %target, "live date found in history, resuming its counters");
        state.daily.tweets = resumed.tweets;
        state.daily.replies = resumed.replies;
        state.daily.seconds = resumed.seconds;
    }
    true
}

/// Drop history entries older than `retention_days` before `today`.
///
/// Returns how many entries were removed.
pub fn prune_history(history: &mut HistoryMap, today: NaiveDate, retention_days: u32) -> usize {
    let Some(cutoff) = today.checked_sub_signed(Duration::days(i64::from(retention_days))) else {
        return 0;
    };
    let before = history.len();
    history.retain(|date, _| *date >= cutoff);
    let removed = before - history.len();
    if removed > 0 {
        debug!(removed, %cutoff, "pruned archived days");
    }
    removed
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DaySnapshot;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn state_on(day: &str, tweets: u32, replies: u32, seconds: u64) -> State {
        let mut state = State::new(date(day));
        state.daily.tweets = tweets;
        state.daily.replies = replies;
        state.daily.seconds = seconds;
        state
    }

    #[test]
    fn same_day_is_a_no_op() {
        let mut state = state_on("2024-01-02", 1, 2, 3);
        let before = state.clone();
        assert!(!rollover_if_needed(&mut state, date("2024-01-02")));
        assert_eq!(state, before);
    }

    #[test]
    fn new_day_archives_and_resets() {
        let mut state = state_on("2024-01-02", 3, 5, 120);
        assert!(rollover_if_needed(&mut state, date("2024-01-03")));

        assert_eq!(state.daily, DailyCounts::empty(date("2024-01-03")));
        assert_eq!(
            state.history[&date("2024-01-02")],
            DaySnapshot {
                tweets: 3,
                replies: 5,
                seconds: 120
            }
        );
    }

    #[test]
    fn second_call_does_not_archive_twice() {
        let mut state = state_on("2024-01-02", 3, 5, 120);
        rollover_if_needed(&mut state, date("2024-01-03"));
        let once = state.clone();
        assert!(!rollover_if_needed(&mut state, date("2024-01-03")));
        assert_eq!(state, once);
    }

    #[test]
    fn skipped_days_leave_a_gap() {
        let mut state = state_on("2024-01-02", 1, 1, 0);
        rollover_if_needed(&mut state, date("2024-01-05"));

        assert_eq!(state.history.len(), 1);
        assert!(state.history.contains_key(&date("2024-01-02")));
        assert!(!state.history.contains_key(&date("2024-01-03")));
        assert!(!state.history.contains_key(&date("2024-01-04")));
        assert_eq!(state.daily.date, date("2024-01-05"));
    }

    #[test]
    fn archive_overwrites_existing_entry() {
        let mut state = state_on("2024-01-02", 7, 0, 0);
        state.history.insert(
            date("2024-01-02"),
            DaySnapshot {
                tweets: 1,
                replies: 1,
                seconds: 1,
            },
        );
        rollover_if_needed(&mut state, date("2024-01-03"));
        assert_eq!(state.history[&date("2024-01-02")].tweets, 7);
        assert_eq!(state.history[&date("2024-01-02")].replies, 0);
    }

    #[test]
    fn clock_going_backwards_resumes_archived_day() {
        let mut state = state_on("2024-01-03", 2, 0, 0);
        state.history.insert(
            date("2024-01-02"),
            DaySnapshot {
                tweets: 4,
                replies: 6,
                seconds: 30,
            },
        );

        assert!(rollover_if_needed(&mut state, date("2024-01-02")));

        assert_eq!(state.daily.date, date("2024-01-02"));
        assert_eq!(state.daily.tweets, 4);
        assert_eq!(state.daily.replies, 6);
        assert!(!state.history.contains_key(&date("2024-01-02")));
        assert_eq!(state.history[&date("2024-01-03")].tweets, 2);
    }

    #[test]
    fn prune_keeps_recent_days() {
        let mut history = HistoryMap::new();
        for day in ["2024-01-01", "2024-01-05", "2024-01-09", "2024-01-10"] {
            history.insert(date(day), DaySnapshot::default());
        }

        let removed = prune_history(&mut history, date("2024-01-11"), 6);

        assert_eq!(removed, 2);
        assert_eq!(
            history.keys().copied().collect::<Vec<_>>(),
            vec![date("2024-01-05"), date("2024-01-09"), date("2024-01-10")]
        );
    }

    #[test]
    fn prune_with_nothing_old_is_a_no_op() {
        let mut history = HistoryMap::new();
        history.insert(date("2024-01-10"), DaySnapshot::default());
        assert_eq!(prune_history(&mut history, date("2024-01-11"), 30), 0);
        assert_eq!(history.len(), 1);
    }
}
