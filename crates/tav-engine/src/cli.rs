//! Command-line interface for `tav-engine`.
//!
//! ```text
//! tav-engine create [ACTOR]
//! tav-engine tick <ACTOR> [NOW_MS]
//! tav-engine add <ACTOR> <SKILL> [TARGET|-] [PRIORITY]
//! tav-engine move <ACTOR> <FROM> <TO>
//! tav-engine compact <ACTOR>
//! ```
//!
//! Timestamps are Unix milliseconds; an omitted `NOW_MS` means the current
//! time. A target of `-` means no target.

use std::convert::Infallible;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tav_types::{ActorId, SkillId, TargetId};
use uuid::Uuid;

/// Target argument meaning "no target".
pub const NO_TARGET: &str = "-";

/// Operator commands for the Tav task engine.
#[derive(Debug, Parser)]
#[command(name = "tav-engine", version, about = "Tav task engine operator commands")]
pub struct Cli {
    /// The command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create an actor with no abilities, flags, or items
    Create {
        /// Actor id (UUID); a new one is minted when omitted
        #[arg(value_name = "ACTOR", value_parser = parse_actor)]
        actor_id: Option<ActorId>,
    },
    /// Advance an actor's tasks up to a point in time
    Tick {
        /// Actor id (UUID)
        #[arg(value_name = "ACTOR", value_parser = parse_actor)]
        actor_id: ActorId,
        /// End of the tick in Unix milliseconds; defaults to now
        #[arg(value_name = "NOW_MS", value_parser = parse_millis)]
        now: Option<DateTime<Utc>>,
    },
    /// Queue a task
    Add {
        /// Actor id (UUID)
        #[arg(value_name = "ACTOR", value_parser = parse_actor)]
        actor_id: ActorId,
        /// Skill to exercise
        #[arg(value_name = "SKILL", value_parser = parse_skill)]
        skill_id: SkillId,
        /// Target to act on, or `-` for none
        #[arg(value_name = "TARGET", value_parser = parse_target)]
        target: Option<TargetArg>,
        /// Per-task priority override
        #[arg(
            value_name = "PRIORITY",
            allow_negative_numbers = true,
            value_parser = clap::value_parser!(i32)
        )]
        priority: Option<i32>,
    },
    /// Move one stack onto another slot
    Move {
        /// Actor id (UUID)
        #[arg(value_name = "ACTOR", value_parser = parse_actor)]
        actor_id: ActorId,
        /// Source slot
        #[arg(
            value_name = "FROM",
            allow_negative_numbers = true,
            value_parser = clap::value_parser!(i64)
        )]
        from: i64,
        /// Destination slot
        #[arg(
            value_name = "TO",
            allow_negative_numbers = true,
            value_parser = clap::value_parser!(i64)
        )]
        to: i64,
    },
    /// Merge and renumber an actor's stacks
    Compact {
        /// Actor id (UUID)
        #[arg(value_name = "ACTOR", value_parser = parse_actor)]
        actor_id: ActorId,
    },
}

/// The `TARGET` argument of `add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetArg {
    /// `-`: the task takes no target.
    NoTarget,
    /// A target id.
    Target(TargetId),
}

impl TargetArg {
    /// Collapse an optional argument into the task's target.
    pub fn resolve(arg: Option<Self>) -> Option<TargetId> {
        match arg {
            Some(Self::Target(target)) => Some(target),
            Some(Self::NoTarget) | None => None,
        }
    }
}

fn parse_actor(raw: &str) -> Result<ActorId, String> {
    Uuid::parse_str(raw)
        .map(ActorId)
        .map_err(|e| format!("invalid actor id {raw}: {e}"))
}

fn parse_millis(raw: &str) -> Result<DateTime<Utc>, String> {
    raw.parse::<i64>()
        .map_err(|e| format!("invalid timestamp {raw}: {e}"))
        .and_then(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| format!("timestamp {raw} is out of range"))
        })
}

fn parse_skill(raw: &str) -> Result<SkillId, Infallible> {
    Ok(SkillId::from(raw))
}

fn parse_target(raw: &str) -> Result<TargetArg, Infallible> {
    Ok(if raw == NO_TARGET {
        TargetArg::NoTarget
    } else {
        TargetArg::Target(TargetId::from(raw))
    })
}
