//! The per-actor tick loop.
//!
//! One tick replays an actor's task queue from a time cursor up to `now`:
//!
//! 1. If a task is executing and its deadline has passed, complete it: pay
//!    its completion effect into the accumulators and the live evaluation
//!    context, move the cursor to the deadline, and return the task to
//!    `pending`.
//! 2. Otherwise start the best eligible pending task at the cursor.
//! 3. Stop when the executing task is still running, nothing is eligible, an
//!    executing task's skill has vanished or its deadline cannot be
//!    represented, or the iteration cap is reached.
//!
//! Runs last at least [`MIN_DURATION_MS`](crate::registry::MIN_DURATION_MS), so a task never starts and
//! completes at the same instant.
//!
//! The loop here is synchronous and pure: it reads a snapshot and produces a
//! [`TickOutcome`]. Loading and committing are the engine's job.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tav_actor::{CustomCheck, CustomResolver, EvalContext, Inventory};
use tav_types::{
    ActorSnapshot, CommitBatch, CompletionEffect, ItemId, SkillId, Task, TaskKey, TaskStatus,
    TaskUpdate, TickReport,
};
use tracing::{debug, warn};

use crate::config::{LevelsConfig, TickConfig};
use crate::registry::{DefinitionRegistry, SkillDef};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything one run of the loop reads.
#[derive(Debug)]
pub struct TickInput<'a> {
    /// The actor's state at load time.
    pub snapshot: &'a ActorSnapshot,
    /// Skill, target, and item definitions.
    pub registry: &'a DefinitionRegistry,
    /// Iteration cap and priority range.
    pub tick: &'a TickConfig,
    /// XP thresholds.
    pub levels: &'a LevelsConfig,
    /// The evaluation context, with any caller overrides already merged.
    pub context: EvalContext,
    /// Where replay starts.
    pub cursor: DateTime<Utc>,
    /// Where replay ends.
    pub now: DateTime<Utc>,
}

/// Build the base evaluation context for a snapshot.
///
/// Levels are derived from XP; skills the actor has never queued are absent
/// and read as level 0. The schedule flag, when given, joins the actor's
/// flags.
pub fn build_context(
    snapshot: &ActorSnapshot,
    levels: &LevelsConfig,
    custom: &BTreeMap<String, CustomCheck>,
    fallback: Option<&Arc<dyn CustomResolver>>,
    schedule_flag: Option<String>,
) -> EvalContext {
    let mut flags = snapshot.flags.clone();
    flags.extend(schedule_flag);

    EvalContext {
        abilities: snapshot.abilities.clone(),
        actor_level: Some(levels.actor.level(snapshot.actor_xp)),
        skill_levels: snapshot
            .skill_xp
            .iter()
            .map(|(skill, xp)| (skill.clone(), levels.skill.level(*xp)))
            .collect(),
        items: Inventory::from_stacks(&snapshot.stacks).totals(),
        flags,
        custom: custom.clone(),
        fallback: fallback.cloned(),
    }
}

/// Pick the replay start: the caller's time, else the last tick, else `now`.
///
/// A start later than `now` is clamped to `now`.
pub fn resolve_cursor(
    now: DateTime<Utc>,
    last_known: Option<DateTime<Utc>>,
    last_tick_at: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    last_known.or(last_tick_at).unwrap_or(now).min(now)
}

/// A task's priority: its own override if set, else the skill's, clamped.
pub fn effective_priority(task: &Task, skill: &SkillDef, tick: &TickConfig) -> i32 {
    let raw = task
        .priority
        .or(skill.priority)
        .unwrap_or(tick.default_priority);
    tick.clamp_priority(raw)
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What one run of the loop produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Task transitions, in order.
    pub report: TickReport,
    /// Actor XP gained.
    pub actor_xp_delta: i64,
    /// XP gained per skill.
    pub skill_xp_deltas: BTreeMap<SkillId, i64>,
    /// Net item changes.
    pub inventory_deltas: BTreeMap<ItemId, i64>,
    /// Final state of every task the loop touched.
    pub task_updates: Vec<TaskUpdate>,
    /// Loop iterations used.
    pub iterations: u32,
    /// Whether the loop stopped at the iteration cap.
    pub hit_iteration_cap: bool,
}

impl TickOutcome {
    /// Whether any task changed state.
    pub fn has_changes(&self) -> bool {
        !self.report.is_empty()
    }

    /// Turn the outcome into a commit batch for the snapshot's actor.
    ///
    /// Zero deltas are dropped and stack limits for every changed item are
    /// looked up so the store can apply the deltas without the registry.
    pub fn into_commit(
        self,
        snapshot: &ActorSnapshot,
        registry: &DefinitionRegistry,
        now: DateTime<Utc>,
    ) -> CommitBatch {
        let mut inventory_deltas = self.inventory_deltas;
        inventory_deltas.retain(|_, qty| *qty != 0);
        let mut skill_xp_deltas = self.skill_xp_deltas;
        skill_xp_deltas.retain(|_, xp| *xp != 0);

        CommitBatch {
            actor_id: snapshot.actor_id,
            expected_revision: snapshot.revision,
            actor_xp_delta: self.actor_xp_delta,
            stack_limits: registry.stack_limits_for(inventory_deltas.keys()),
            skill_xp_deltas,
            inventory_deltas,
            task_updates: self.task_updates,
            new_last_tick_at: now,
        }
    }
}

/// Running totals, kept in step with the live context.
struct Progress<'a> {
    levels: &'a LevelsConfig,
    actor_xp: i64,
    skill_xp: BTreeMap<SkillId, i64>,
}

impl Progress<'_> {
    fn pay(
        &mut self,
        skill_id: &SkillId,
        effect: &CompletionEffect,
        outcome: &mut TickOutcome,
        ctx: &mut EvalContext,
    ) {
        if let Some(xp) = effect.actor_xp {
            outcome.actor_xp_delta = outcome.actor_xp_delta.saturating_add(xp);
            self.actor_xp = self.actor_xp.saturating_add(xp);
            ctx.actor_level = Some(self.levels.actor.level(self.actor_xp));
        }

        if let Some(xp) = effect.skill_xp {
            let delta = outcome.skill_xp_deltas.entry(skill_id.clone()).or_insert(0);
            *delta = delta.saturating_add(xp);
            let total = self.skill_xp.entry(skill_id.clone()).or_insert(0);
            *total = total.saturating_add(xp);
            let level = self.levels.skill.level(*total);
            ctx.skill_levels.insert(skill_id.clone(), level);
        }

        for (item, qty) in &effect.items {
            let delta = outcome.inventory_deltas.entry(item.clone()).or_insert(0);
            *delta = delta.saturating_add(*qty);
            ctx.add_item_delta(item, *qty);
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run the bounded tick loop.
pub fn run_tick(input: TickInput<'_>) -> TickOutcome {
    let TickInput {
        snapshot,
        registry,
        tick,
        levels,
        context: mut ctx,
        cursor,
        now,
    } = input;

    let mut cursor = cursor.min(now);
    let mut tasks = snapshot.tasks.clone();
    let mut progress = Progress {
        levels,
        actor_xp: snapshot.actor_xp,
        skill_xp: snapshot.skill_xp.clone(),
    };
    let mut outcome = TickOutcome::default();
    let mut touched: BTreeSet<TaskKey> = BTreeSet::new();
    let mut skipped: BTreeSet<TaskKey> = BTreeSet::new();

    loop {
        if outcome.iterations >= tick.max_iterations {
            outcome.hit_iteration_cap = true;
            warn!(
                actor_id = %snapshot.actor_id,
                max_iterations = tick.max_iterations,
                "Tick stopped at the iteration cap"
            );
            break;
        }
        outcome.iterations = outcome.iterations.saturating_add(1);

        // Phase 1: finish the running task, if it is due.
        if let Some(task) = tasks
            .iter_mut()
            .find(|task| task.status == TaskStatus::Executing)
        {
            let Some(skill) = registry.skill(&task.key.skill_id) else {
                warn!(task = %task.key, "Executing task has no skill definition; marking failed");
                task.status = TaskStatus::Failed;
                touched.insert(task.key.clone());
                outcome.report.failed.push(task.key.clone());
                break;
            };

            let started_at = task.started_at.unwrap_or(cursor);
            let Some(deadline) = TimeDelta::try_milliseconds(skill.effective_duration_ms())
                .and_then(|duration| started_at.checked_add_signed(duration))
            else {
                warn!(
                    task = %task.key,
                    duration_ms = skill.duration_ms,
                    "Executing task deadline is out of range; marking failed"
                );
                task.status = TaskStatus::Failed;
                touched.insert(task.key.clone());
                outcome.report.failed.push(task.key.clone());
                break;
            };
            if now < deadline {
                debug!(task = %task.key, %deadline, "Running task not yet due");
                break;
            }

            if let Some(effect) =
                registry.completion_effect(&task.key.skill_id, task.key.target_id.as_ref())
            {
                progress.pay(&task.key.skill_id, &effect, &mut outcome, &mut ctx);
            }
            cursor = deadline;
            task.status = TaskStatus::Pending;
            touched.insert(task.key.clone());
            outcome.report.completed.push(task.key.clone());
            debug!(task = %task.key, %cursor, "Task completed");
            continue;
        }

        // Phase 2: start the best eligible pending task.
        let winner = select_next(&tasks, registry, tick, &ctx, &mut skipped);
        let Some(task) = winner.and_then(|index| tasks.get_mut(index)) else {
            debug!(actor_id = %snapshot.actor_id, "No eligible pending task");
            break;
        };
        task.status = TaskStatus::Executing;
        task.started_at = Some(cursor);
        touched.insert(task.key.clone());
        outcome.report.started.push(task.key.clone());
        debug!(task = %task.key, %cursor, "Task started");
    }

    outcome.task_updates = tasks
        .iter()
        .filter(|task| touched.contains(&task.key))
        .map(|task| TaskUpdate {
            key: task.key.clone(),
            status: task.status,
            started_at: task.started_at,
        })
        .collect();
    outcome
}

/// Index of the pending task to start next, if any is eligible.
///
/// Highest effective priority wins; ties go to the earliest `created_at`,
/// then to the smallest key. Tasks whose definitions are missing or whose
/// pairing is disallowed are skipped and logged once per tick.
fn select_next(
    tasks: &[Task],
    registry: &DefinitionRegistry,
    tick: &TickConfig,
    ctx: &EvalContext,
    skipped: &mut BTreeSet<TaskKey>,
) -> Option<usize> {
    let mut candidates: Vec<(i32, &Task, usize)> = Vec::new();

    for (index, task) in tasks.iter().enumerate() {
        if task.status != TaskStatus::Pending {
            continue;
        }
        let resolved = match registry.resolve(&task.key.skill_id, task.key.target_id.as_ref()) {
            Ok(resolved) => resolved,
            Err(err) => {
                if skipped.insert(task.key.clone()) {
                    warn!(task = %task.key, %err, "Skipping pending task");
                }
                continue;
            }
        };
        if !resolved.can_execute(ctx) {
            continue;
        }
        candidates.push((effective_priority(task, resolved.skill, tick), task, index));
    }

    candidates
        .into_iter()
        .max_by(|a, b| compare_candidates((a.0, a.1), (b.0, b.1)))
        .map(|(_, _, index)| index)
}

fn compare_candidates(a: (i32, &Task), b: (i32, &Task)) -> Ordering {
    a.0.cmp(&b.0)
        .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        .then_with(|| b.1.key.cmp(&a.1.key))
}
