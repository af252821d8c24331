//! Time-of-day schedules.
//!
//! An actor may follow a named day schedule. While one of the schedule's hour
//! blocks is active, its flag is injected into the evaluation context so that
//! `flag_present` requirements can gate tasks by time of day.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};
use tav_types::ActorId;

use crate::config::DayScheduleConfig;

/// Source of time-of-day flags.
pub trait Schedule: Send + Sync {
    /// The flag of the block active at `at`, if any.
    ///
    /// `schedule_id` is the actor's schedule; actors without one get `None`.
    fn current_block_flag(
        &self,
        actor_id: ActorId,
        schedule_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    start_hour: u32,
    end_hour: u32,
    flag: String,
}

impl Block {
    fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Schedules built from the `schedules` config section.
///
/// When blocks overlap, the first listed block wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleBook {
    schedules: BTreeMap<String, Vec<Block>>,
}

impl ScheduleBook {
    /// Build from configured day schedules.
    pub fn from_config(schedules: &BTreeMap<String, DayScheduleConfig>) -> Self {
        let schedules = schedules
            .iter()
            .map(|(id, day)| {
                let blocks = day
                    .blocks
                    .iter()
                    .map(|block| Block {
                        start_hour: block.start_hour,
                        end_hour: block.end_hour,
                        flag: block.flag.clone(),
                    })
                    .collect();
                (id.clone(), blocks)
            })
            .collect();
        Self { schedules }
    }

    /// Whether no schedule is configured.
    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }
}

impl Schedule for ScheduleBook {
    fn current_block_flag(
        &self,
        _actor_id: ActorId,
        schedule_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<String> {
        let blocks = self.schedules.get(schedule_id?)?;
        let hour = at.hour();
        blocks
            .iter()
            .find(|block| block.contains(hour))
            .map(|block| block.flag.clone())
    }
}
