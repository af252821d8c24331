//! Storage contract and the in-memory store.
//!
//! The tick engine talks to persistence only through [`TaskStore`]: one
//! consistent snapshot read per tick, one atomic commit. Commits are guarded
//! by the actor's revision; a commit against a stale revision fails with
//! [`StoreError::Conflict`] and the caller retries the whole tick.
//!
//! [`MemoryStore`] implements the contract in process and backs the engine's
//! tests. The `PostgreSQL` implementation lives in `tav-db`.

use std::collections::BTreeMap;
use std::future::Future;

use tav_actor::{ActorError, Inventory};
use tav_types::{
    ActorId, ActorRecord, ActorSnapshot, CommitBatch, InventoryStack, Task, TaskStatus,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Errors surfaced by a [`TaskStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The actor does not exist.
    #[error("actor not found: {actor_id}")]
    NotFound {
        /// The missing actor.
        actor_id: ActorId,
    },

    /// The actor changed since the snapshot was read.
    #[error("revision conflict for actor {actor_id}: expected {expected}, found {actual}")]
    Conflict {
        /// The actor being written.
        actor_id: ActorId,
        /// Revision the writer read.
        expected: i64,
        /// Revision currently stored.
        actual: i64,
    },

    /// An inventory delta could not be applied.
    #[error("inventory update rejected: {0}")]
    Inventory(#[from] ActorError),

    /// The storage backend failed.
    #[error("storage backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Persistence operations the engine needs.
///
/// Every method is atomic per actor.
pub trait TaskStore: Send + Sync {
    /// Create an actor with no skills, stacks, or tasks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write fails.
    fn create_actor(&self, record: ActorRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read one consistent snapshot of an actor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown actors.
    fn load_snapshot(
        &self,
        actor_id: ActorId,
    ) -> impl Future<Output = Result<ActorSnapshot, StoreError>> + Send;

    /// Apply a tick's results in one transaction and bump the revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the stored revision is not
    /// `batch.expected_revision`, or [`StoreError::Inventory`] if the
    /// inventory deltas underflow. Nothing is written on error.
    fn commit(&self, batch: CommitBatch) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Queue a task, creating the skill's progress row if missing.
    ///
    /// A task that already exists as `pending` or `executing` is returned
    /// unchanged. A `failed` task is revived to `pending` with the new
    /// `created_at` and priority.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown actors.
    fn insert_task(&self, task: Task) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Overwrite an actor's stacks and bump the revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a stale `expected_revision`.
    fn replace_inventory(
        &self,
        actor_id: ActorId,
        expected_revision: i64,
        stacks: Vec<InventoryStack>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Shared commit logic
// ---------------------------------------------------------------------------

/// Apply a commit batch to a snapshot in place.
///
/// Checks the revision, applies inventory deltas strictly through
/// [`Inventory::apply_delta`], adds XP, rewrites touched tasks, advances the
/// tick marker, and bumps the revision. On error the snapshot is untouched.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] or [`StoreError::Inventory`].
pub fn apply_commit(snapshot: &mut ActorSnapshot, batch: &CommitBatch) -> Result<(), StoreError> {
    check_revision(snapshot, batch.expected_revision)?;

    let mut inventory = Inventory::from_stacks(&snapshot.stacks);
    inventory.apply_delta(&batch.inventory_deltas, true, &batch.stack_limits)?;

    snapshot.stacks = inventory.to_stacks(snapshot.actor_id);
    snapshot.actor_xp = snapshot.actor_xp.saturating_add(batch.actor_xp_delta);
    for (skill_id, delta) in &batch.skill_xp_deltas {
        let xp = snapshot.skill_xp.entry(skill_id.clone()).or_insert(0);
        *xp = xp.saturating_add(*delta);
    }

    for update in &batch.task_updates {
        match snapshot.tasks.iter_mut().find(|task| task.key == update.key) {
            Some(task) => {
                task.status = update.status;
                task.started_at = update.started_at;
            }
            None => warn!(task = %update.key, "Commit references a task that no longer exists"),
        }
    }

    snapshot.last_tick_at = Some(batch.new_last_tick_at);
    snapshot.revision = snapshot.revision.saturating_add(1);
    Ok(())
}

/// Merge a queued task into a snapshot's task list.
///
/// Returns the stored task. See [`TaskStore::insert_task`] for the rules.
pub fn upsert_task(snapshot: &mut ActorSnapshot, task: Task) -> Task {
    snapshot
        .skill_xp
        .entry(task.key.skill_id.clone())
        .or_insert(0);

    if let Some(existing) = snapshot.tasks.iter_mut().find(|existing| existing.key == task.key) {
        if existing.status == TaskStatus::Failed {
            existing.status = TaskStatus::Pending;
            existing.started_at = None;
            existing.created_at = task.created_at;
            existing.priority = task.priority;
        }
        return existing.clone();
    }

    snapshot.tasks.push(task.clone());
    task
}

fn check_revision(snapshot: &ActorSnapshot, expected: i64) -> Result<(), StoreError> {
    if snapshot.revision == expected {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            actor_id: snapshot.actor_id,
            expected,
            actual: snapshot.revision,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A [`TaskStore`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    actors: Mutex<BTreeMap<ActorId, ActorSnapshot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed stacks directly, bypassing revision checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown actors.
    pub async fn seed_stacks(
        &self,
        actor_id: ActorId,
        stacks: Vec<InventoryStack>,
    ) -> Result<(), StoreError> {
        let mut actors = self.actors.lock().await;
        let snapshot = actors
            .get_mut(&actor_id)
            .ok_or(StoreError::NotFound { actor_id })?;
        snapshot.stacks = stacks;
        Ok(())
    }
}

impl TaskStore for MemoryStore {
    async fn create_actor(&self, record: ActorRecord) -> Result<(), StoreError> {
        let snapshot = ActorSnapshot {
            actor_id: record.actor_id,
            abilities: record.abilities,
            flags: record.flags,
            actor_xp: record.actor_xp,
            schedule_id: record.schedule_id,
            ..ActorSnapshot::default()
        };
        self.actors.lock().await.insert(record.actor_id, snapshot);
        debug!(actor_id = %record.actor_id, "Created actor");
        Ok(())
    }

    async fn load_snapshot(&self, actor_id: ActorId) -> Result<ActorSnapshot, StoreError> {
        self.actors
            .lock()
            .await
            .get(&actor_id)
            .cloned()
            .ok_or(StoreError::NotFound { actor_id })
    }

    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        let mut actors = self.actors.lock().await;
        let current = actors.get(&batch.actor_id).ok_or(StoreError::NotFound {
            actor_id: batch.actor_id,
        })?;

        let mut next = current.clone();
        apply_commit(&mut next, &batch)?;
        actors.insert(batch.actor_id, next);
        Ok(())
    }

    async fn insert_task(&self, task: Task) -> Result<Task, StoreError> {
        let actor_id = task.key.actor_id;
        let mut actors = self.actors.lock().await;
        let snapshot = actors
            .get_mut(&actor_id)
            .ok_or(StoreError::NotFound { actor_id })?;
        Ok(upsert_task(snapshot, task))
    }

    async fn replace_inventory(
        &self,
        actor_id: ActorId,
        expected_revision: i64,
        stacks: Vec<InventoryStack>,
    ) -> Result<(), StoreError> {
        let mut actors = self.actors.lock().await;
        let snapshot = actors
            .get_mut(&actor_id)
            .ok_or(StoreError::NotFound { actor_id })?;
        check_revision(snapshot, expected_revision)?;
        snapshot.stacks = stacks;
        snapshot.revision = snapshot.revision.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tav_types::{ItemId, SkillId, TaskKey, TaskUpdate};

    use super::*;

    fn task(actor_id: ActorId, skill: &str) -> Task {
        Task {
            key: TaskKey {
                actor_id,
                skill_id: SkillId::from(skill),
                target_id: None,
            },
            status: TaskStatus::Pending,
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
            started_at: None,
            priority: None,
        }
    }

    fn batch(actor_id: ActorId, expected_revision: i64) -> CommitBatch {
        CommitBatch {
            actor_id,
            expected_revision,
            actor_xp_delta: 3,
            skill_xp_deltas: BTreeMap::from([(SkillId::from("logging"), 10)]),
            inventory_deltas: BTreeMap::from([(ItemId::from("log"), 7)]),
            stack_limits: BTreeMap::from([(ItemId::from("log"), 5)]),
            task_updates: Vec::new(),
            new_last_tick_at: Utc.timestamp_millis_opt(5_000).unwrap(),
        }
    }

    async fn store_with_actor() -> (MemoryStore, ActorId) {
        let store = MemoryStore::new();
        let actor_id = ActorId::new();
        store
            .create_actor(ActorRecord {
                actor_id,
                ..ActorRecord::default()
            })
            .await
            .unwrap();
        (store, actor_id)
    }

    #[tokio::test]
    async fn commit_applies_everything_and_bumps_revision() {
        let (store, actor_id) = store_with_actor().await;
        let queued = store.insert_task(task(actor_id, "logging")).await.unwrap();

        let mut commit = batch(actor_id, 0);
        commit.task_updates.push(TaskUpdate {
            key: queued.key.clone(),
            status: TaskStatus::Executing,
            started_at: Some(commit.new_last_tick_at),
        });
        store.commit(commit).await.unwrap();

        let snapshot = store.load_snapshot(actor_id).await.unwrap();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.actor_xp, 3);
        assert_eq!(snapshot.skill_xp.get(&SkillId::from("logging")), Some(&10));
        let quantities: Vec<u32> = snapshot.stacks.iter().map(|stack| stack.qty).collect();
        assert_eq!(quantities, vec![5, 2]);
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Executing);
        assert_eq!(snapshot.last_tick_at, Some(Utc.timestamp_millis_opt(5_000).unwrap()));
    }

    #[tokio::test]
    async fn stale_revision_conflicts_without_writing() {
        let (store, actor_id) = store_with_actor().await;
        store.commit(batch(actor_id, 0)).await.unwrap();

        let result = store.commit(batch(actor_id, 0)).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict { expected: 0, actual: 1, .. })
        ));
        assert_eq!(store.load_snapshot(actor_id).await.unwrap().actor_xp, 3);
    }

    #[tokio::test]
    async fn inventory_underflow_rejects_commit() {
        let (store, actor_id) = store_with_actor().await;
        let mut commit = batch(actor_id, 0);
        commit.inventory_deltas = BTreeMap::from([(ItemId::from("log"), -1)]);

        let result = store.commit(commit).await;
        assert!(matches!(result, Err(StoreError::Inventory(_))));
        let snapshot = store.load_snapshot(actor_id).await.unwrap();
        assert_eq!(snapshot.revision, 0);
        assert_eq!(snapshot.actor_xp, 0);
    }

    #[tokio::test]
    async fn insert_task_is_idempotent_and_revives_failed() {
        let (store, actor_id) = store_with_actor().await;
        let first = store.insert_task(task(actor_id, "logging")).await.unwrap();
        let mut again = task(actor_id, "logging");
        again.priority = Some(9);
        assert_eq!(store.insert_task(again.clone()).await.unwrap(), first);

        let snapshot = store.load_snapshot(actor_id).await.unwrap();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.skill_xp.get(&SkillId::from("logging")), Some(&0));

        let mut failed = snapshot;
        failed.tasks[0].status = TaskStatus::Failed;
        let revived = upsert_task(&mut failed, again);
        assert_eq!(revived.status, TaskStatus::Pending);
        assert_eq!(revived.priority, Some(9));
    }

    #[tokio::test]
    async fn unknown_actor_is_not_found() {
        let store = MemoryStore::new();
        let result = store.load_snapshot(ActorId::new()).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn replace_inventory_checks_revision() {
        let (store, actor_id) = store_with_actor().await;
        store.replace_inventory(actor_id, 0, Vec::new()).await.unwrap();
        let result = store.replace_inventory(actor_id, 0, Vec::new()).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }
}
