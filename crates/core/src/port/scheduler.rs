// Durable Scheduler Port (named alarms that survive restart)

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// When an alarm fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleSpec {
    /// Once, after the given milliseconds
    Delay(i64),
    /// Every given milliseconds, first fire one period from now
    Period(i64),
}

/// A stored alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub name: String,
    pub next_fire_at: i64,
    pub period_ms: Option<i64>,
}

impl Alarm {
    pub fn from_spec(name: &str, spec: ScheduleSpec, now_millis: i64) -> Self {
        match spec {
            ScheduleSpec::Delay(ms) => Self {
                name: name.to_string(),
                next_fire_at: now_millis + ms.max(0),
                period_ms: None,
            },
            ScheduleSpec::Period(ms) => Self {
                name: name.to_string(),
                next_fire_at: now_millis + ms.max(0),
                period_ms: Some(ms.max(1)),
            },
        }
    }
}

#[async_trait]
pub trait DurableScheduler: Send + Sync {
    /// Create or replace the alarm called `name`
    async fn schedule(&self, name: &str, spec: ScheduleSpec, now_millis: i64) -> Result<()>;

    /// Returns false if no such alarm existed
    async fn cancel(&self, name: &str) -> Result<bool>;

    async fn cancel_all(&self) -> Result<u64>;

    /// Names of alarms due at `now_millis`. One-shot alarms are removed,
    /// periodic ones move to `now + period` (missed periods collapse into one fire).
    async fn take_due(&self, now_millis: i64) -> Result<Vec<String>>;

    async fn list(&self) -> Result<Vec<Alarm>>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryScheduler {
        alarms: Mutex<Vec<Alarm>>,
    }

    impl InMemoryScheduler {
        pub fn new() -> Self {
            Self::default()
        }

        fn alarms(&self) -> Result<std::sync::MutexGuard<'_, Vec<Alarm>>> {
            self.alarms
                .lock()
                .map_err(|_| crate::AppError::Internal("scheduler mutex poisoned".to_string()))
        }
    }

    #[async_trait]
    impl DurableScheduler for InMemoryScheduler {
        async fn schedule(&self, name: &str, spec: ScheduleSpec, now_millis: i64) -> Result<()> {
            let mut alarms = self.alarms()?;
            alarms.retain(|a| a.name != name);
            alarms.push(Alarm::from_spec(name, spec, now_millis));
            Ok(())
        }

        async fn cancel(&self, name: &str) -> Result<bool> {
            let mut alarms = self.alarms()?;
            let before = alarms.len();
            alarms.retain(|a| a.name != name);
            Ok(alarms.len() != before)
        }

        async fn cancel_all(&self) -> Result<u64> {
            let mut alarms = self.alarms()?;
            let n = alarms.len() as u64;
            alarms.clear();
            Ok(n)
        }

        async fn take_due(&self, now_millis: i64) -> Result<Vec<String>> {
            let mut alarms = self.alarms()?;
            let mut due: Vec<&mut Alarm> = alarms
                .iter_mut()
                .filter(|a| a.next_fire_at <= now_millis)
                .collect();
            due.sort_by_key(|a| a.next_fire_at);

            let names: Vec<String> = due.iter().map(|a| a.name.clone()).collect();
            for alarm in due {
                if let Some(period) = alarm.period_ms {
                    alarm.next_fire_at = now_millis + period;
                }
            }
            alarms.retain(|a| a.period_ms.is_some() || a.next_fire_at > now_millis);
            Ok(names)
        }

        async fn list(&self) -> Result<Vec<Alarm>> {
            Ok(self.alarms()?.clone())
        }
    }
}
