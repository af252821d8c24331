//! The task engine: the async shell around the tick loop.
//!
//! [`TaskEngine`] owns the shared definitions, configuration, custom checks,
//! and per-actor locks, and drives a [`TaskStore`]. Each public operation
//! takes the actor's lock, loads a snapshot, does its work in memory, and
//! writes the result back in one call.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tav_actor::{ContextOverride, CustomCheck, CustomResolver, EvalContext, Inventory};
use tav_types::{
    ActorId, ActorSnapshot, InventoryStack, SkillId, TargetId, Task, TaskKey, TaskStatus,
    TickReport,
};
use tracing::{debug, info};

use crate::config::{EngineConfig, LevelsConfig, TickConfig};
use crate::locks::ActorLocks;
use crate::registry::{DefinitionRegistry, PairingError};
use crate::schedule::{Schedule, ScheduleBook};
use crate::store::{StoreError, TaskStore};
use crate::tick::{TickInput, build_context, resolve_cursor, run_tick};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from queuing a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The skill is not defined.
    #[error("unknown skill: {skill}")]
    UnknownSkill {
        /// The missing skill.
        skill: SkillId,
    },

    /// The target is not defined.
    #[error("unknown target: {target}")]
    UnknownTarget {
        /// The missing target.
        target: TargetId,
    },

    /// The skill may not act on the target.
    #[error("skill {skill} may not act on the requested target")]
    DisallowedTarget {
        /// The skill.
        skill: SkillId,
        /// The requested target, if any.
        target: Option<TargetId>,
    },

    /// The actor does not meet the add requirements.
    #[error("requirements not met for task {key}")]
    RequirementsNotMet {
        /// The rejected task.
        key: TaskKey,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PairingError> for TaskError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::UnknownSkill { skill } => Self::UnknownSkill { skill },
            PairingError::UnknownTarget { target } => Self::UnknownTarget { target },
            PairingError::Disallowed { skill, target } => Self::DisallowedTarget { skill, target },
        }
    }
}

/// Errors from running a tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// Loading or committing failed. [`StoreError::Conflict`] means another
    /// writer got there first; retry the tick.
    #[error("tick failed: {0}")]
    Store(#[from] StoreError),
}

impl TickError {
    /// Whether the tick lost a revision race and can simply be retried.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs ticks and task commands for actors in one store.
pub struct TaskEngine<S> {
    store: S,
    registry: Arc<DefinitionRegistry>,
    tick: TickConfig,
    levels: LevelsConfig,
    schedule: Option<Arc<dyn Schedule>>,
    custom: BTreeMap<String, CustomCheck>,
    fallback: Option<Arc<dyn CustomResolver>>,
    locks: ActorLocks,
}

impl<S> core::fmt::Debug for TaskEngine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("tick", &self.tick)
            .field("levels", &self.levels)
            .field("has_schedule", &self.schedule.is_some())
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: TaskStore> TaskEngine<S> {
    /// Create an engine with no schedule and no custom checks.
    pub fn new(
        store: S,
        registry: Arc<DefinitionRegistry>,
        tick: TickConfig,
        levels: LevelsConfig,
    ) -> Self {
        Self {
            store,
            registry,
            tick,
            levels,
            schedule: None,
            custom: BTreeMap::new(),
            fallback: None,
            locks: ActorLocks::new(),
        }
    }

    /// Create an engine from a full configuration.
    ///
    /// Configured day schedules become the engine's [`ScheduleBook`].
    pub fn from_config(store: S, registry: Arc<DefinitionRegistry>, config: &EngineConfig) -> Self {
        let engine = Self::new(store, registry, config.engine.clone(), config.levels.clone());
        let book = ScheduleBook::from_config(&config.schedules);
        if book.is_empty() {
            engine
        } else {
            engine.with_schedule(Arc::new(book))
        }
    }

    /// Use a schedule to inject time-of-day flags.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Register a named custom check, replacing any with the same name.
    pub fn register_custom(&mut self, name: impl Into<String>, check: CustomCheck) {
        self.custom.insert(name.into(), check);
    }

    /// Set the resolver for custom checks with no registered name.
    pub fn set_fallback(&mut self, resolver: Arc<dyn CustomResolver>) {
        self.fallback = Some(resolver);
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The shared definitions.
    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    /// Advance one actor's tasks up to `now` and commit the result.
    ///
    /// Replay starts at `last_known` if given, else the last committed tick,
    /// else `now`. `overrides` are merged into the evaluation context for
    /// this call only. A repeated call with the same `now` and no new tasks
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::Store`] if the load or commit fails. On a
    /// conflict nothing was written.
    pub async fn tick(
        &self,
        actor_id: ActorId,
        now: DateTime<Utc>,
        last_known: Option<DateTime<Utc>>,
        overrides: Option<&ContextOverride>,
    ) -> Result<TickReport, TickError> {
        let _guard = self.locks.lock(actor_id).await;
        let snapshot = self.store.load_snapshot(actor_id).await?;

        let mut context = self.context_for(&snapshot, now);
        if let Some(overrides) = overrides {
            context.merge_override(overrides);
        }
        let cursor = resolve_cursor(now, last_known, snapshot.last_tick_at);

        let outcome = run_tick(TickInput {
            snapshot: &snapshot,
            registry: &self.registry,
            tick: &self.tick,
            levels: &self.levels,
            context,
            cursor,
            now,
        });

        if !outcome.has_changes() && snapshot.last_tick_at == Some(now) {
            debug!(%actor_id, "Tick changed nothing");
            return Ok(outcome.report);
        }

        let report = outcome.report.clone();
        let iterations = outcome.iterations;
        let batch = outcome.into_commit(&snapshot, &self.registry, now);
        self.store.commit(batch).await?;

        info!(
            %actor_id,
            started = report.started.len(),
            completed = report.completed.len(),
            failed = report.failed.len(),
            iterations,
            "Tick committed"
        );
        Ok(report)
    }

    /// Queue a task after checking the pairing and add requirements.
    ///
    /// Re-adding a queued task returns it unchanged; re-adding a failed task
    /// revives it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnknownSkill`], [`TaskError::UnknownTarget`], or
    /// [`TaskError::DisallowedTarget`] for bad pairings,
    /// [`TaskError::RequirementsNotMet`] if the add requirements fail, or
    /// [`TaskError::Store`] if the store fails. Nothing is written on error.
    pub async fn add_task(
        &self,
        actor_id: ActorId,
        skill_id: SkillId,
        target_id: Option<TargetId>,
        priority: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<Task, TaskError> {
        let _guard = self.locks.lock(actor_id).await;
        let resolved = self.registry.resolve(&skill_id, target_id.as_ref())?;
        let snapshot = self.store.load_snapshot(actor_id).await?;

        let key = TaskKey {
            actor_id,
            skill_id,
            target_id,
        };
        let context = self.context_for(&snapshot, now);
        if !resolved.can_add(&context) {
            return Err(TaskError::RequirementsNotMet { key });
        }

        let task = self
            .store
            .insert_task(Task {
                key,
                status: TaskStatus::Pending,
                created_at: now,
                started_at: None,
                priority,
            })
            .await?;
        info!(task = %task.key, status = task.status.as_str(), "Task queued");
        Ok(task)
    }

    /// Move the stack at `from` onto `to` and persist the inventory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inventory`] for bad slots, or any store error.
    pub async fn move_stack(
        &self,
        actor_id: ActorId,
        from: i64,
        to: i64,
    ) -> Result<Vec<InventoryStack>, StoreError> {
        self.rewrite_inventory(actor_id, |inventory, registry| {
            inventory.move_stack(from, to, registry)
        })
        .await
    }

    /// Merge and renumber the actor's stacks and persist the inventory.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn compact(&self, actor_id: ActorId) -> Result<Vec<InventoryStack>, StoreError> {
        self.rewrite_inventory(actor_id, |inventory, registry| inventory.compact(registry))
            .await
    }

    async fn rewrite_inventory<F>(
        &self,
        actor_id: ActorId,
        edit: F,
    ) -> Result<Vec<InventoryStack>, StoreError>
    where
        F: FnOnce(&mut Inventory, &DefinitionRegistry) -> Result<(), tav_actor::ActorError> + Send,
    {
        let _guard = self.locks.lock(actor_id).await;
        let snapshot = self.store.load_snapshot(actor_id).await?;

        let mut inventory = Inventory::from_stacks(&snapshot.stacks);
        edit(&mut inventory, &self.registry)?;
        let stacks = inventory.to_stacks(actor_id);

        self.store
            .replace_inventory(actor_id, snapshot.revision, stacks.clone())
            .await?;
        debug!(%actor_id, slots = stacks.len(), "Inventory rewritten");
        Ok(stacks)
    }

    fn context_for(&self, snapshot: &ActorSnapshot, now: DateTime<Utc>) -> EvalContext {
        let flag = self.schedule.as_ref().and_then(|schedule| {
            schedule.current_block_flag(snapshot.actor_id, snapshot.schedule_id.as_deref(), now)
        });
        build_context(snapshot, &self.levels, &self.custom, self.fallback.as_ref(), flag)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;
    use tav_types::{ActorRecord, ItemId};

    use super::*;
    use crate::store::MemoryStore;

    const DEFINITIONS: &str = r"
items:
  - {id: log, stack_limit: 5}
  - {id: axe, stack_limit: 1}
skills:
  - id: logging
    priority: 5
    duration_ms: 5000
    allowed_target_ids: [small_tree]
    completion_effect: {actor_xp: 1, skill_xp: 10}
    target_effects:
      small_tree: {items: {log: 1}}
  - id: foraging
    priority: 3
    duration_ms: 1000
    add_requirements:
      - flag_present: outdoors
    execute_requirements:
      - custom: daylight
  - id: napping
    duration_ms: 1000
    execute_requirements:
      - flag_present: sleeping
targets:
  - id: small_tree
    allowed_skill_ids: [logging]
    add_requirements:
      - item_required: {item: axe, qty: 1}
    completion_effect: {actor_xp: 2}
";

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    async fn engine_with(flags: &[&str], config: &EngineConfig) -> (TaskEngine<MemoryStore>, ActorId) {
        let registry = Arc::new(DefinitionRegistry::from_yaml(DEFINITIONS).unwrap());
        let store = MemoryStore::new();
        let actor_id = ActorId::new();
        store
            .create_actor(ActorRecord {
                actor_id,
                flags: flags.iter().map(|flag| (*flag).to_owned()).collect::<BTreeSet<_>>(),
                schedule_id: Some("farmer".to_owned()),
                ..ActorRecord::default()
            })
            .await
            .unwrap();
        store
            .seed_stacks(
                actor_id,
                vec![InventoryStack {
                    actor_id,
                    slot: 0,
                    item_id: ItemId::from("axe"),
                    qty: 1,
                }],
            )
            .await
            .unwrap();
        (TaskEngine::from_config(store, registry, config), actor_id)
    }

    async fn engine() -> (TaskEngine<MemoryStore>, ActorId) {
        engine_with(&[], &EngineConfig::default()).await
    }

    #[tokio::test]
    async fn logging_scenario_commits_rewards() {
        let (engine, actor_id) = engine().await;
        engine
            .add_task(actor_id, SkillId::from("logging"), Some(TargetId::from("small_tree")), None, at(0))
            .await
            .unwrap();

        let first = engine.tick(actor_id, at(0), None, None).await.unwrap();
        assert_eq!(first.started.len(), 1);

        let second = engine.tick(actor_id, at(5_000), None, None).await.unwrap();
        assert_eq!(second.completed.len(), 1);
        assert_eq!(second.started.len(), 1);

        let snapshot = engine.store().load_snapshot(actor_id).await.unwrap();
        assert_eq!(snapshot.actor_xp, 3);
        assert_eq!(snapshot.skill_xp.get(&SkillId::from("logging")), Some(&10));
        let totals = Inventory::from_stacks(&snapshot.stacks).totals();
        assert_eq!(totals.get(&ItemId::from("log")), Some(&1));
        assert_eq!(snapshot.tasks[0].started_at, Some(at(5_000)));
        assert_eq!(snapshot.last_tick_at, Some(at(5_000)));
    }

    #[tokio::test]
    async fn repeated_tick_at_same_now_writes_nothing() {
        let (engine, actor_id) = engine().await;
        engine
            .add_task(actor_id, SkillId::from("logging"), Some(TargetId::from("small_tree")), None, at(0))
            .await
            .unwrap();
        engine.tick(actor_id, at(1_000), None, None).await.unwrap();
        let before = engine.store().load_snapshot(actor_id).await.unwrap();

        let report = engine.tick(actor_id, at(1_000), None, None).await.unwrap();
        assert!(report.is_empty());
        let after = engine.store().load_snapshot(actor_id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn add_rejects_bad_pairings_and_unmet_requirements() {
        let (engine, actor_id) = engine().await;

        let err = engine
            .add_task(actor_id, SkillId::from("mining"), None, None, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownSkill { .. }));

        let err = engine
            .add_task(actor_id, SkillId::from("logging"), Some(TargetId::from("boulder")), None, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownTarget { .. }));

        let err = engine
            .add_task(actor_id, SkillId::from("logging"), None, None, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::DisallowedTarget { .. }));

        let err = engine
            .add_task(actor_id, SkillId::from("foraging"), None, None, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::RequirementsNotMet { .. }));

        let snapshot = engine.store().load_snapshot(actor_id).await.unwrap();
        assert!(snapshot.tasks.is_empty());
    }

    #[tokio::test]
    async fn custom_checks_gate_execution() {
        let (mut engine, actor_id) = engine_with(&["outdoors"], &EngineConfig::default()).await;
        engine
            .add_task(actor_id, SkillId::from("foraging"), None, None, at(0))
            .await
            .unwrap();

        let report = engine.tick(actor_id, at(0), None, None).await.unwrap();
        assert!(report.started.is_empty());

        engine.register_custom("daylight", CustomCheck::Literal(true));
        let report = engine.tick(actor_id, at(10), None, None).await.unwrap();
        assert_eq!(report.started.len(), 1);
    }

    #[tokio::test]
    async fn fallback_resolver_answers_unregistered_checks() {
        let (mut engine, actor_id) = engine_with(&["outdoors"], &EngineConfig::default()).await;
        engine.set_fallback(Arc::new(|name: &str, _ctx: &EvalContext| {
            (name == "daylight").then_some(true)
        }));
        engine
            .add_task(actor_id, SkillId::from("foraging"), None, None, at(0))
            .await
            .unwrap();

        let report = engine.tick(actor_id, at(0), None, None).await.unwrap();
        assert_eq!(report.started.len(), 1);
    }

    #[tokio::test]
    async fn overrides_apply_to_one_tick_only() {
        let (engine, actor_id) = engine_with(&["outdoors"], &EngineConfig::default()).await;
        engine
            .add_task(actor_id, SkillId::from("foraging"), None, None, at(0))
            .await
            .unwrap();

        let mut overrides = ContextOverride::default();
        overrides.custom.insert("daylight".to_owned(), CustomCheck::Literal(true));
        let report = engine
            .tick(actor_id, at(0), None, Some(&overrides))
            .await
            .unwrap();
        assert_eq!(report.started.len(), 1);
    }

    #[tokio::test]
    async fn schedule_flag_is_injected_at_now() {
        let config = EngineConfig::parse(
            "schedules:\n  farmer:\n    blocks:\n      - {start_hour: 22, end_hour: 6, flag: sleeping}\n",
        )
        .unwrap();
        let (engine, actor_id) = engine_with(&[], &config).await;
        engine
            .add_task(actor_id, SkillId::from("napping"), None, None, at(0))
            .await
            .unwrap();

        // The epoch is midnight UTC, inside the sleeping block.
        let report = engine.tick(actor_id, at(0), None, None).await.unwrap();
        assert_eq!(report.started.len(), 1);
    }

    #[tokio::test]
    async fn stale_snapshot_commit_is_a_conflict() {
        let (engine, actor_id) = engine().await;
        let stale = engine.store().load_snapshot(actor_id).await.unwrap();
        engine.tick(actor_id, at(0), None, None).await.unwrap();

        let result = engine
            .store()
            .replace_inventory(actor_id, stale.revision, Vec::new())
            .await;
        let err = TickError::from(result.unwrap_err());
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn move_and_compact_persist_inventory() {
        let (engine, actor_id) = engine().await;
        let stacks = engine.move_stack(actor_id, 0, 4).await.unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].slot, 4);

        let stacks = engine.compact(actor_id).await.unwrap();
        assert_eq!(stacks[0].slot, 0);

        let err = engine.move_stack(actor_id, 3, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Inventory(_)));
    }
}
