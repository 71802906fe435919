//! Recurrence maths for scheduled triggers.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Delay before the first run of a fixed-delay schedule.
pub const INITIAL_SCHEDULE_DELAY: Duration = Duration::from_secs(5);

/// How a scheduled playbook recurs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleDef {
    /// Run every `seconds_delay`, `repeat` times (forever if unset).
    FixedDelayRepeat {
        /// Number of runs; `None` repeats forever.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repeat: Option<u64>,
        /// Seconds between runs.
        seconds_delay: u64,
    },
    /// Run once after each listed delay, in order.
    DynamicDelayRepeat {
        /// Seconds to wait before each run.
        delay_periods: Vec<u64>,
    },
    /// Run on a cron expression (5 or 6 fields, UTC).
    CronScheduleRepeat {
        /// The expression.
        cron_expression: String,
    },
}

/// A validated schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed delay.
    Fixed {
        /// Number of runs; `None` repeats forever.
        repeat: Option<u64>,
        /// Delay between runs.
        delay: Duration,
    },
    /// Explicit delay list.
    Dynamic {
        /// Delay before each run.
        delays: Vec<Duration>,
    },
    /// Cron expression.
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Validates a schedule definition.
    pub fn compile(def: &ScheduleDef) -> Result<Self> {
        match def {
            ScheduleDef::FixedDelayRepeat {
                repeat,
                seconds_delay,
            } => {
                if *seconds_delay == 0 {
                    return Err(EngineError::config("seconds_delay must be positive"));
                }
                Ok(Self::Fixed {
                    repeat: *repeat,
                    delay: Duration::from_secs(*seconds_delay),
                })
            }
            ScheduleDef::DynamicDelayRepeat { delay_periods } => {
                if delay_periods.is_empty() {
                    return Err(EngineError::config("delay_periods must not be empty"));
                }
                Ok(Self::Dynamic {
                    delays: delay_periods.iter().map(|s| Duration::from_secs(*s)).collect(),
                })
            }
            ScheduleDef::CronScheduleRepeat { cron_expression } => {
                let fields = cron_expression.split_whitespace().count();
                let expression = if fields == 5 {
                    format!("0 {cron_expression}")
                } else {
                    cron_expression.clone()
                };
                let schedule = cron::Schedule::from_str(&expression).map_err(|e| {
                    EngineError::config(format!("invalid cron expression '{cron_expression}': {e}"))
                })?;
                Ok(Self::Cron(Box::new(schedule)))
            }
        }
    }

    /// Returns the delay before run number `recurrence` (0-based), or
    /// `None` once the schedule is exhausted.
    #[must_use]
    pub fn next_delay(&self, recurrence: u64, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Fixed { repeat, delay } => {
                if repeat.is_some_and(|r| recurrence >= r) {
                    None
                } else if recurrence == 0 {
                    Some(INITIAL_SCHEDULE_DELAY)
                } else {
                    Some(*delay)
                }
            }
            Self::Dynamic { delays } => usize::try_from(recurrence)
                .ok()
                .and_then(|i| delays.get(i))
                .copied(),
            Self::Cron(schedule) => schedule
                .after(&now)
                .next()
                .and_then(|at| (at - now).to_std().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test]
    fn fixed_delay_counts_runs() {
        let schedule = Schedule::compile(&ScheduleDef::FixedDelayRepeat {
            repeat: Some(2),
            seconds_delay: 60,
        })
        .unwrap();
        let now = Utc::now();
        assert_eq!(schedule.next_delay(0, now), Some(INITIAL_SCHEDULE_DELAY));
        assert_eq!(schedule.next_delay(1, now), Some(Duration::from_secs(60)));
        assert_eq!(schedule.next_delay(2, now), None);
    }

    #[test]
    fn fixed_delay_without_repeat_runs_forever() {
        let schedule = Schedule::compile(&ScheduleDef::FixedDelayRepeat {
            repeat: None,
            seconds_delay: 10,
        })
        .unwrap();
        assert_eq!(schedule.next_delay(10_000, Utc::now()), Some(Duration::from_secs(10)));
    }

    #[test]
    fn dynamic_delay_walks_the_list() {
        let schedule = Schedule::compile(&ScheduleDef::DynamicDelayRepeat {
            delay_periods: vec![1, 30, 300],
        })
        .unwrap();
        let now = Utc::now();
        assert_eq!(schedule.next_delay(0, now), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_delay(2, now), Some(Duration::from_secs(300)));
        assert_eq!(schedule.next_delay(3, now), None);
    }

    #[test]
    fn five_field_cron_is_accepted() {
        let schedule = Schedule::compile(&ScheduleDef::CronScheduleRepeat {
            cron_expression: "*/5 * * * *".to_string(),
        })
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap();
        assert_eq!(schedule.next_delay(0, now), Some(Duration::from_secs(240)));
    }

    #[test_case(ScheduleDef::FixedDelayRepeat { repeat: None, seconds_delay: 0 } ; "zero delay")]
    #[test_case(ScheduleDef::DynamicDelayRepeat { delay_periods: vec![] } ; "empty periods")]
    #[test_case(ScheduleDef::CronScheduleRepeat { cron_expression: "not cron".into() } ; "bad cron")]
    fn invalid_schedules(def: ScheduleDef) {
        assert!(Schedule::compile(&def).unwrap_err().is_config_error());
    }

    #[test]
    fn definitions_deserialize_from_toml_shape() {
        let def: ScheduleDef = serde_json::from_value(serde_json::json!({
            "fixed_delay_repeat": {"repeat": 3, "seconds_delay": 60}
        }))
        .unwrap();
        assert_eq!(
            def,
            ScheduleDef::FixedDelayRepeat {
                repeat: Some(3),
                seconds_delay: 60
            }
        );
    }
}
