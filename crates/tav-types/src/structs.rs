//! Core entity structs for the Tav task engine.
//!
//! Covers tasks, inventory stacks, completion effects, the actor snapshot the
//! tick engine loads, and the commit batch it writes back.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Ability, TaskStatus};
use crate::ids::{ActorId, ItemId, SkillId, TargetId};
use crate::quantity;

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Identity of a queued task: one per (actor, skill, target) triple.
///
/// `target_id == None` is the no-target sentinel used by skills that do not
/// act on anything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskKey {
    /// The actor that owns the task.
    pub actor_id: ActorId,
    /// The skill being exercised.
    pub skill_id: SkillId,
    /// The target acted upon, if any.
    pub target_id: Option<TargetId>,
}

impl core::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.target_id {
            Some(target) => write!(f, "{}/{}@{}", self.actor_id, self.skill_id, target),
            None => write!(f, "{}/{}", self.actor_id, self.skill_id),
        }
    }
}

/// A queued unit of repeatable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Task {
    /// Unique identity.
    pub key: TaskKey,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// When the task was queued. Earlier tasks win priority ties.
    pub created_at: DateTime<Utc>,
    /// When the task last started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// Per-task priority. When set it replaces the skill's priority outright.
    pub priority: Option<i32>,
}

/// Final state of one task after a tick, as written by the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskUpdate {
    /// The task being updated.
    pub key: TaskKey,
    /// Status after the tick.
    pub status: TaskStatus,
    /// Start time after the tick.
    pub started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A quantity of one item occupying one inventory slot.
///
/// Invariant: `0 < qty <= stack_limit(item_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct InventoryStack {
    /// Owner of the stack.
    pub actor_id: ActorId,
    /// Slot index, unique per actor.
    pub slot: u32,
    /// The stacked item.
    pub item_id: ItemId,
    /// Quantity in this slot.
    pub qty: u32,
}

// ---------------------------------------------------------------------------
// Completion effects
// ---------------------------------------------------------------------------

/// A reward fragment applied when a task finishes.
///
/// Fragments come from the skill, the skill's per-target override, and the
/// target, and are summed together before being applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CompletionEffect {
    /// Actor experience delta.
    #[serde(default, deserialize_with = "quantity::deserialize_option")]
    pub actor_xp: Option<i64>,
    /// Experience delta for the completing skill.
    #[serde(default, deserialize_with = "quantity::deserialize_option")]
    pub skill_xp: Option<i64>,
    /// Signed item quantity deltas.
    #[serde(default, deserialize_with = "quantity::deserialize_item_map")]
    pub items: BTreeMap<ItemId, i64>,
}

impl CompletionEffect {
    /// Whether this fragment changes nothing.
    pub fn is_empty(&self) -> bool {
        self.actor_xp.unwrap_or(0) == 0
            && self.skill_xp.unwrap_or(0) == 0
            && self.items.values().all(|qty| *qty == 0)
    }
}

// ---------------------------------------------------------------------------
// Actor snapshot and commit
// ---------------------------------------------------------------------------

/// Data needed to create an actor in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActorRecord {
    /// The actor's identity.
    pub actor_id: ActorId,
    /// Ability scores. Missing abilities count as 0.
    pub abilities: BTreeMap<Ability, i64>,
    /// String flags held by the actor.
    pub flags: BTreeSet<String>,
    /// Accumulated actor experience.
    pub actor_xp: i64,
    /// Named day schedule, if the actor follows one.
    pub schedule_id: Option<String>,
}

/// One consistent read of everything a tick needs for one actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActorSnapshot {
    /// The actor's identity.
    pub actor_id: ActorId,
    /// Ability scores.
    pub abilities: BTreeMap<Ability, i64>,
    /// String flags held by the actor.
    pub flags: BTreeSet<String>,
    /// Accumulated actor experience.
    pub actor_xp: i64,
    /// Accumulated experience per skill the actor has queued at least once.
    pub skill_xp: BTreeMap<SkillId, i64>,
    /// Every occupied inventory slot.
    pub stacks: Vec<InventoryStack>,
    /// Every task the actor owns, in any status.
    pub tasks: Vec<Task>,
    /// End of the last committed tick.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Named day schedule, if the actor follows one.
    pub schedule_id: Option<String>,
    /// Store revision this snapshot was read at.
    pub revision: i64,
}

/// Everything one tick writes back, applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CommitBatch {
    /// The actor being committed.
    pub actor_id: ActorId,
    /// The revision the tick's snapshot was read at. A mismatch is a conflict.
    pub expected_revision: i64,
    /// Accumulated actor experience delta.
    pub actor_xp_delta: i64,
    /// Accumulated experience deltas per skill.
    pub skill_xp_deltas: BTreeMap<SkillId, i64>,
    /// Accumulated item deltas, applied strictly.
    pub inventory_deltas: BTreeMap<ItemId, i64>,
    /// Stack limits for every item in `inventory_deltas`.
    pub stack_limits: BTreeMap<ItemId, u32>,
    /// Final status of every task the tick touched.
    pub task_updates: Vec<TaskUpdate>,
    /// New last-tick marker.
    pub new_last_tick_at: DateTime<Utc>,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TickReport {
    /// Tasks moved to `executing`, in order.
    pub started: Vec<TaskKey>,
    /// Tasks that finished and returned to `pending`, in order.
    pub completed: Vec<TaskKey>,
    /// Tasks forced to `failed`.
    pub failed: Vec<TaskKey>,
}

impl TickReport {
    /// Whether the tick changed no task.
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.completed.is_empty() && self.failed.is_empty()
    }
}
