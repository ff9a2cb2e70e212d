//! Claim-window scheduling.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::time::Duration;

/// When and how aggressively to claim.
#[derive(Debug, Clone)]
pub struct ClaimSchedule {
    /// Daily target wall-clock time.
    pub target_hour: u32,
    pub target_minute: u32,
    pub target_second: u32,
    /// Fire this many milliseconds before the target to pre-empt
    /// network and processing latency. The request should land as close
    /// to the target as possible without pre-dating it.
    pub advance_ms: i64,
    /// Claim attempts per account.
    pub retry_count: u32,
    /// Pause between claim attempts.
    pub retry_interval: Duration,
    /// Pause between airdrop-list queries while discovering.
    pub query_interval: Duration,
    /// Total discovery window after the target instant; discovery is
    /// abandoned for the run once it closes.
    pub query_duration: Duration,
}

impl Default for ClaimSchedule {
    fn default() -> Self {
        Self {
            target_hour: 8,
            target_minute: 0,
            target_second: 0,
            advance_ms: 120,
            retry_count: 3,
            retry_interval: Duration::from_millis(500),
            query_interval: Duration::from_millis(200),
            query_duration: Duration::from_secs(10),
        }
    }
}

impl ClaimSchedule {
    /// Next occurrence of the daily target, in local wall-clock time.
    pub fn next_target(&self) -> DateTime<Local> {
        next_target_instant(
            Local::now(),
            self.target_hour,
            self.target_minute,
            self.target_second,
        )
    }
}

/// Next occurrence of `hour:minute:second` strictly after `now`.
pub fn next_target_instant(
    now: DateTime<Local>,
    hour: u32,
    minute: u32,
    second: u32,
) -> DateTime<Local> {
    let naive = now
        .date_naive()
        .and_hms_opt(hour, minute, second)
        .expect("valid wall-clock time");
    let today = Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_next_target_later_today() {
        let now = Local.with_ymd_and_hms(2025, 7, 1, 6, 0, 0).unwrap();
        let target = next_target_instant(now, 8, 0, 0);
        assert_eq!(target.hour(), 8);
        assert_eq!(target.date_naive(), now.date_naive());
    }

    #[test]
    fn test_next_target_rolls_to_tomorrow() {
        let now = Local.with_ymd_and_hms(2025, 7, 1, 9, 30, 0).unwrap();
        let target = next_target_instant(now, 8, 0, 0);
        assert_eq!(
            target.date_naive(),
            now.date_naive().succ_opt().unwrap()
        );
    }

    #[test]
    fn test_exact_now_rolls_forward() {
        let now = Local.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap();
        let target = next_target_instant(now, 8, 0, 0);
        assert!(target > now);
    }
}
