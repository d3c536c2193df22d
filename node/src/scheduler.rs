//! Recurring jobs: the session reaper and the daily jackpot clock.

use crate::{engine::Engine, pvp::PvpController, transport::Transport};
use arbuz_execution::{
    daily::{DailyClock, DailySchedule},
    pvp::{JACKPOT_TRIGGER_ID, SPLIT_LAUNCH_ID, SPLIT_TEASER_ID},
    State,
};
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub reap_interval: Duration,
    pub schedule: DailySchedule,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_millis(crate::defaults::DEFAULT_REAP_INTERVAL_MS),
            schedule: DailySchedule::default(),
        }
    }
}

/// Work triggered by a finished match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowUp {
    OpenJackpot,
    SplitTeaser,
    SplitLaunch,
}

pub fn follow_up(match_id: u64) -> Option<FollowUp> {
    match match_id {
        JACKPOT_TRIGGER_ID => Some(FollowUp::OpenJackpot),
        SPLIT_TEASER_ID => Some(FollowUp::SplitTeaser),
        SPLIT_LAUNCH_ID => Some(FollowUp::SplitLaunch),
        _ => None,
    }
}

/// Calendar day number and seconds since midnight in `now`'s time zone.
pub fn day_and_seconds<Tz: TimeZone>(now: &DateTime<Tz>) -> (u32, u32) {
    let day = now.date_naive().num_days_from_ce().max(0) as u32;
    (day, now.num_seconds_from_midnight())
}

/// Unix time in milliseconds.
pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub fn spawn_reaper<S, T>(engine: Arc<Engine<S, T>>, interval: Duration) -> JoinHandle<()>
where
    S: State + 'static,
    T: Transport,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = engine.reap_stale();
            if reaped > 0 {
                debug!(reaped, "reaper pass");
            }
        }
    })
}

/// Runs one poll of the daily clock at local `day`/`seconds` and returns the delay until
/// the next poll.
pub async fn poll_daily<S, T>(
    pvp: &PvpController<S, T>,
    clock: &mut DailyClock,
    day: u32,
    seconds: u32,
) -> Duration
where
    S: State + 'static,
    T: Transport,
{
    let due = clock.poll(day, seconds);
    if due.reminder {
        match pvp.jackpot_reminder().await {
            Ok(true) => info!(day, "jackpot reminder sent"),
            Ok(false) => debug!(day, "no open jackpot to remind about"),
            Err(err) => warn!(day, ?err, "jackpot reminder failed"),
        }
    }
    if due.finalize {
        match pvp.finalize_jackpot().await {
            Ok(Some(outcome)) => info!(day, ?outcome, "jackpot finalized"),
            Ok(None) => info!(day, "jackpot finalize skipped"),
            Err(err) => warn!(day, ?err, "jackpot finalize failed"),
        }
    }
    clock.next_interval(seconds)
}

pub fn spawn_daily<S, T>(pvp: Arc<PvpController<S, T>>, schedule: DailySchedule) -> JoinHandle<()>
where
    S: State + 'static,
    T: Transport,
{
    tokio::spawn(async move {
        let mut clock = DailyClock::new(schedule);
        loop {
            let (day, seconds) = day_and_seconds(&chrono::Local::now());
            let wait = poll_daily(&pvp, &mut clock, day, seconds).await;
            tokio::time::sleep(wait).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{fund, harness};
    use arbuz_execution::pvp;
    use arbuz_types::{Amount, MatchStatus};
    use chrono::{FixedOffset, Utc};

    #[test]
    fn follow_ups_by_match_id() {
        assert_eq!(follow_up(99), Some(FollowUp::OpenJackpot));
        assert_eq!(follow_up(400), Some(FollowUp::SplitTeaser));
        assert_eq!(follow_up(499), Some(FollowUp::SplitLaunch));
        assert_eq!(follow_up(100), None);
        assert_eq!(follow_up(1), None);
    }

    #[test]
    fn local_day_and_seconds() {
        let offset = FixedOffset::east_opt(3 * 3_600).unwrap();
        let utc = Utc.with_ymd_and_hms(2024, 3, 1, 20, 30, 15).unwrap();
        let local = utc.with_timezone(&offset);
        let (day, seconds) = day_and_seconds(&local);
        assert_eq!(seconds, 23 * 3_600 + 30 * 60 + 15);
        let (utc_day, _) = day_and_seconds(&utc);
        assert_eq!(day, utc_day);

        let next = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
        let (next_day, next_seconds) = day_and_seconds(&next.with_timezone(&offset));
        assert_eq!(next_day, day + 1);
        assert_eq!(next_seconds, 3_600);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_task_clears_stuck_sessions() {
        let h = harness(&[]).await;
        let handle = spawn_reaper(h.engine.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.engine.active_sessions(), 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn daily_clock_reminds_then_finalizes_once() {
        let h = harness(&[30, 2]).await;
        fund(&h.store, 1, Amount::from_units(1), Amount::ZERO).await;
        fund(&h.store, 2, Amount::from_units(1), Amount::ZERO).await;
        {
            let mut store = h.store.lock().await;
            pvp::ensure(&mut *store, pvp::new_jackpot(0)).await.unwrap();
        }
        h.pvp.join(pvp::JACKPOT_LINK, 1, None).await.unwrap();
        h.pvp.join(pvp::JACKPOT_LINK, 2, None).await.unwrap();

        let mut clock = DailyClock::new(DailySchedule::default());
        let wait = poll_daily(&h.pvp, &mut clock, 10, 22 * 3_600).await;
        assert_eq!(wait, Duration::from_secs(60));
        assert!(h.transport.texts_to(h.channel).is_empty());

        let wait = poll_daily(&h.pvp, &mut clock, 10, 22 * 3_600 + 55 * 60 + 3).await;
        assert_eq!(wait, Duration::from_secs(10));
        let texts = h.transport.texts_to(h.channel);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("10 minutes left"));

        poll_daily(&h.pvp, &mut clock, 10, 23 * 3_600 + 5 * 60 + 1).await;
        let m = h.pvp.get_by_link(pvp::JACKPOT_LINK).await.unwrap();
        assert_eq!(m.status, MatchStatus::Finished);
        assert_eq!(m.winner_id(), Some(2));

        // Already finalized today.
        let sent = h.transport.sent().len();
        poll_daily(&h.pvp, &mut clock, 10, 23 * 3_600 + 6 * 60).await;
        assert_eq!(h.transport.sent().len(), sent);
    }
}
