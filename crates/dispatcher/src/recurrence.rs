//! 下一次执行时间计算
//!
//! 每条规则各自算出一个严格晚于 `now` 的候选时间，取最小值。
//! 所有时间按 UTC 计算，除“一分钟后”规则外候选时间的秒数都为零。

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};
use tracing::warn;

use automation_core::models::{RecurrenceRule, TimePeriod};

/// 根据一组时间规则计算下一次执行时间；没有有效规则时返回 `None`
pub fn compute_next_start_time(now: DateTime<Utc>, rules: &[TimePeriod]) -> Option<DateTime<Utc>> {
    rules
        .iter()
        .filter_map(|period| match period.rule() {
            Ok(rule) => next_occurrence(now, &rule),
            Err(e) => {
                warn!("忽略无效的时间规则 {:?}: {}", period, e);
                None
            }
        })
        .min()
}

/// 单条规则的下一次触发时间
pub fn next_occurrence(now: DateTime<Utc>, rule: &RecurrenceRule) -> Option<DateTime<Utc>> {
    match *rule {
        RecurrenceRule::DayOfMonth { day, hour, minute } => {
            let candidate = at(now.year(), now.month(), day, hour, minute)?;
            if candidate > now {
                Some(candidate)
            } else {
                candidate.checked_add_months(Months::new(1))
            }
        }
        RecurrenceRule::DayOfWeek {
            weekday,
            hour,
            minute,
        } => {
            let mut delta = i64::from(weekday) - i64::from(now.weekday().number_from_monday());
            if delta < 0 {
                delta += 7;
            }
            let date = now.date_naive() + Duration::days(delta);
            let candidate = at(date.year(), date.month(), date.day(), hour, minute)?;
            if delta == 0 && candidate <= now {
                Some(candidate + Duration::days(7))
            } else {
                Some(candidate)
            }
        }
        RecurrenceRule::Daily { hour, minute } => {
            let candidate = at(now.year(), now.month(), now.day(), hour, minute)?;
            if candidate > now {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(1))
            }
        }
        RecurrenceRule::Hourly { minute } => {
            let candidate = at(now.year(), now.month(), now.day(), now.hour(), minute)?;
            if candidate > now {
                Some(candidate)
            } else {
                Some(candidate + Duration::hours(1))
            }
        }
        RecurrenceRule::Immediate => Some(now + Duration::minutes(1)),
    }
}

fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_no_rules_yields_none() {
        assert_eq!(compute_next_start_time(Utc::now(), &[]), None);
    }

    #[test]
    fn test_invalid_rules_are_skipped() {
        let now = utc(2024, 3, 10, 8, 0, 0);
        let invalid = TimePeriod {
            hour: Some(5),
            ..TimePeriod::default()
        };
        assert_eq!(compute_next_start_time(now, &[invalid]), None);
        assert_eq!(
            compute_next_start_time(now, &[invalid, TimePeriod::daily(9, 0)]),
            Some(utc(2024, 3, 10, 9, 0, 0))
        );
    }

    #[test]
    fn test_immediate_is_one_minute_later() {
        let now = utc(2024, 3, 10, 8, 0, 42);
        assert_eq!(
            compute_next_start_time(now, &[TimePeriod::immediate()]),
            Some(utc(2024, 3, 10, 8, 1, 42))
        );
    }
}
