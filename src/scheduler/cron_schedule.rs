use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{ImportError, Result};

/// Expression for a single deferred run at the schedule's `start_at`
pub const ONCE: &str = "@once";

/// Parsed schedule expression: a cron schedule or a one-shot run
#[derive(Debug, Clone)]
pub enum ScheduleExpression {
    Cron(Box<Schedule>),
    Once,
}

impl ScheduleExpression {
    /// Accepts `@once` and cron expressions with 5 (minute resolution),
    /// 6 or 7 fields
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed == ONCE {
            return Ok(Self::Once);
        }

        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            fields => {
                return Err(ImportError::Schedule(format!(
                    "invalid schedule expression '{expression}': expected 5-7 fields, got {fields}"
                )))
            }
        };

        Schedule::from_str(&normalized)
            .map(|schedule| Self::Cron(Box::new(schedule)))
            .map_err(|e| {
                ImportError::Schedule(format!("invalid schedule expression '{expression}': {e}"))
            })
    }

    /// First occurrence strictly after `from`; one-shot expressions never repeat
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&from).next(),
            Self::Once => None,
        }
    }

    pub fn is_once(&self) -> bool {
        matches!(self, Self::Once)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_five_field_expression_gets_seconds() {
        let expression = ScheduleExpression::parse("*/15 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 10, 7, 30).unwrap();
        let next = expression.next_after(from).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (10, 15, 0));
    }

    #[test]
    fn test_six_field_expression() {
        let expression = ScheduleExpression::parse("0 0 2 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let next = expression.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_once_and_invalid() {
        let once = ScheduleExpression::parse("@once").unwrap();
        assert!(once.is_once());
        assert!(once.next_after(Utc::now()).is_none());

        assert!(matches!(
            ScheduleExpression::parse("every day"),
            Err(ImportError::Schedule(_))
        ));
        assert!(ScheduleExpression::parse("99 * * * *").is_err());
    }
}
