use serde::{Deserialize, Serialize};

use crate::{AutomationError, AutomationResult};

/// 时间规则（一条重复规则）
///
/// `date_in_month` 与 `day_of_week` 互斥；设置了任一选择器就必须给出 `hour`，
/// 设置了 `hour` 就必须给出 `minute`。四个字段都为空表示“一分钟之后”，
/// 用于临时的立即重排。
///
/// ```rust
/// use automation_core::models::TimePeriod;
///
/// // 每周一 09:30
/// let rule = TimePeriod::weekly(1, 9, 30);
/// assert!(rule.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_in_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
}

/// 经过校验的规则形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceRule {
    /// 每月第 N 天的 hour:minute
    DayOfMonth { day: u32, hour: u32, minute: u32 },
    /// 每周 ISO 星期 N 的 hour:minute
    DayOfWeek { weekday: u32, hour: u32, minute: u32 },
    /// 每天 hour:minute
    Daily { hour: u32, minute: u32 },
    /// 每小时的第 minute 分钟
    Hourly { minute: u32 },
    /// 一分钟之后
    Immediate,
}

impl TimePeriod {
    pub fn monthly(date_in_month: u32, hour: u32, minute: u32) -> Self {
        Self {
            date_in_month: Some(date_in_month),
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn weekly(day_of_week: u32, hour: u32, minute: u32) -> Self {
        Self {
            day_of_week: Some(day_of_week),
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn hourly(minute: u32) -> Self {
        Self {
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> AutomationResult<()> {
        self.rule().map(|_| ())
    }

    /// 校验并归类规则
    pub fn rule(&self) -> AutomationResult<RecurrenceRule> {
        if self.date_in_month.is_some() && self.day_of_week.is_some() {
            return Err(AutomationError::InvalidTimePeriod(
                "date_in_month 与 day_of_week 不能同时设置".to_string(),
            ));
        }
        if (self.date_in_month.is_some() || self.day_of_week.is_some()) && self.hour.is_none() {
            return Err(AutomationError::InvalidTimePeriod(
                "设置了日期或星期时必须指定 hour".to_string(),
            ));
        }
        if self.hour.is_some() && self.minute.is_none() {
            return Err(AutomationError::InvalidTimePeriod(
                "设置了 hour 时必须指定 minute".to_string(),
            ));
        }

        if let Some(day) = self.date_in_month {
            if !(1..=28).contains(&day) {
                return Err(AutomationError::InvalidTimePeriod(format!(
                    "date_in_month 必须在 1-28 之间: {day}"
                )));
            }
        }
        if let Some(weekday) = self.day_of_week {
            if !(1..=7).contains(&weekday) {
                return Err(AutomationError::InvalidTimePeriod(format!(
                    "day_of_week 必须在 1-7 之间: {weekday}"
                )));
            }
        }
        if let Some(hour) = self.hour {
            if hour > 23 {
                return Err(AutomationError::InvalidTimePeriod(format!(
                    "hour 必须在 0-23 之间: {hour}"
                )));
            }
        }
        if let Some(minute) = self.minute {
            if minute > 59 {
                return Err(AutomationError::InvalidTimePeriod(format!(
                    "minute 必须在 0-59 之间: {minute}"
                )));
            }
        }

        let rule = match (self.date_in_month, self.day_of_week, self.hour, self.minute) {
            (Some(day), None, Some(hour), Some(minute)) => {
                RecurrenceRule::DayOfMonth { day, hour, minute }
            }
            (None, Some(weekday), Some(hour), Some(minute)) => RecurrenceRule::DayOfWeek {
                weekday,
                hour,
                minute,
            },
            (None, None, Some(hour), Some(minute)) => RecurrenceRule::Daily { hour, minute },
            (None, None, None, Some(minute)) => RecurrenceRule::Hourly { minute },
            _ => RecurrenceRule::Immediate,
        };
        Ok(rule)
    }
}
