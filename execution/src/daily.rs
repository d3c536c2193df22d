//! Once-per-day decisions for the slot jackpot.
//!
//! The clock is fed the local day number and seconds since local midnight on every poll
//! and answers which actions are due. It never reads the wall clock itself.

use std::time::Duration;

pub const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

const fn hm(hour: u32, minute: u32) -> u32 {
    hour * 3_600 + minute * 60
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailySchedule {
    /// Seconds after local midnight.
    pub reminder_at: u32,
    pub finalize_at: u32,
    /// Poll interval inside the window around both times.
    pub near_interval: Duration,
    pub far_interval: Duration,
    /// How far before `reminder_at` and after `finalize_at` the near interval applies.
    pub margin: u32,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            reminder_at: hm(22, 55),
            finalize_at: hm(23, 5),
            near_interval: Duration::from_secs(10),
            far_interval: Duration::from_secs(60),
            margin: 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Due {
    pub reminder: bool,
    pub finalize: bool,
}

#[derive(Clone, Debug)]
pub struct DailyClock {
    schedule: DailySchedule,
    day: Option<u32>,
    reminded: bool,
    finalized: bool,
}

impl DailyClock {
    pub fn new(schedule: DailySchedule) -> Self {
        Self {
            schedule,
            day: None,
            reminded: false,
            finalized: false,
        }
    }

    pub fn schedule(&self) -> &DailySchedule {
        &self.schedule
    }

    /// Returns the actions due at this instant and marks them done for `day`.
    pub fn poll(&mut self, day: u32, seconds: u32) -> Due {
        if self.day != Some(day) {
            self.day = Some(day);
            self.reminded = false;
            self.finalized = false;
        }
        let mut due = Due::default();
        let s = &self.schedule;
        if !self.reminded && seconds >= s.reminder_at && seconds < s.finalize_at {
            self.reminded = true;
            due.reminder = true;
        }
        if !self.finalized && seconds >= s.finalize_at {
            // A missed reminder is not sent once finalization is due.
            self.reminded = true;
            self.finalized = true;
            due.finalize = true;
        }
        due
    }

    /// Delay until the next poll.
    pub fn next_interval(&self, seconds: u32) -> Duration {
        let s = &self.schedule;
        let start = s.reminder_at.saturating_sub(s.margin);
        let end = s.finalize_at.saturating_add(s.margin);
        if (start..=end).contains(&seconds) {
            s.near_interval
        } else {
            s.far_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_reminder_then_finalize_once() {
        let mut clock = DailyClock::new(DailySchedule::default());
        assert_eq!(clock.poll(1, hm(22, 0)), Due::default());
        assert_eq!(
            clock.poll(1, hm(22, 55) + 4),
            Due {
                reminder: true,
                finalize: false
            }
        );
        assert_eq!(clock.poll(1, hm(23, 0)), Due::default());
        assert_eq!(
            clock.poll(1, hm(23, 5) + 9),
            Due {
                reminder: false,
                finalize: true
            }
        );
        assert_eq!(clock.poll(1, hm(23, 30)), Due::default());
    }

    #[test]
    fn resets_on_new_day() {
        let mut clock = DailyClock::new(DailySchedule::default());
        assert!(clock.poll(1, hm(23, 10)).finalize);
        assert!(!clock.poll(1, hm(23, 50)).finalize);
        assert!(clock.poll(2, hm(22, 56)).reminder);
        assert!(clock.poll(2, hm(23, 6)).finalize);
    }

    #[test]
    fn late_start_skips_reminder() {
        let mut clock = DailyClock::new(DailySchedule::default());
        let due = clock.poll(7, hm(23, 20));
        assert!(due.finalize);
        assert!(!due.reminder);
        assert_eq!(clock.poll(7, hm(23, 21)), Due::default());
    }

    #[test]
    fn polls_faster_near_the_window() {
        let clock = DailyClock::new(DailySchedule::default());
        assert_eq!(clock.next_interval(hm(12, 0)), Duration::from_secs(60));
        assert_eq!(clock.next_interval(hm(22, 54)), Duration::from_secs(10));
        assert_eq!(clock.next_interval(hm(23, 6)), Duration::from_secs(10));
        assert_eq!(clock.next_interval(hm(23, 7)), Duration::from_secs(60));
    }
}
