//! `PostgreSQL` implementation of the task storage contract.
//!
//! Snapshots are read inside a `REPEATABLE READ` read-only transaction so the
//! actor row, skill progress, stacks, and tasks all come from one point in
//! time. Writes lock the actor row (`FOR UPDATE`), check its revision, and
//! bump it in the same transaction.
//!
//! Tasks without a target are stored with `target_id = ''`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tav_actor::Inventory;
use tav_core::{StoreError, TaskStore};
use tav_types::{
    Ability, ActorId, ActorRecord, ActorSnapshot, CommitBatch, InventoryStack, ItemId, SkillId,
    TargetId, Task, TaskKey, TaskStatus,
};
use uuid::Uuid;

use crate::error::DbError;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A row from the `actors` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActorRow {
    /// Actor identity.
    pub actor_id: Uuid,
    /// Ability scores as JSON.
    pub abilities: Json<BTreeMap<Ability, i64>>,
    /// Flags held.
    pub flags: Vec<String>,
    /// Accumulated actor experience.
    pub actor_xp: i64,
    /// Named day schedule.
    pub schedule_id: Option<String>,
    /// End of the last committed tick.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency revision.
    pub revision: i64,
}

/// A row from the `tasks` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    /// The skill exercised.
    pub skill_id: String,
    /// The target, or `''` for none.
    pub target_id: String,
    /// Lifecycle state as text.
    pub status: String,
    /// When the task was queued.
    pub created_at: DateTime<Utc>,
    /// When the task last started.
    pub started_at: Option<DateTime<Utc>>,
    /// Per-task priority override.
    pub priority: Option<i32>,
}

impl TaskRow {
    fn into_task(self, actor_id: ActorId) -> Result<Task, DbError> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| DbError::Corrupt(format!("unknown task status {}", self.status)))?;
        Ok(Task {
            key: TaskKey {
                actor_id,
                skill_id: SkillId::new(self.skill_id),
                target_id: target_from_db(self.target_id),
            },
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            priority: self.priority,
        })
    }
}

/// A row from the `inventory_stacks` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StackRow {
    /// Slot index.
    pub slot: i64,
    /// Stacked item.
    pub item_id: String,
    /// Quantity held.
    pub qty: i64,
}

impl StackRow {
    fn into_stack(self, actor_id: ActorId) -> Result<InventoryStack, DbError> {
        let slot = u32::try_from(self.slot)
            .map_err(|e| DbError::Corrupt(format!("slot {}: {e}", self.slot)))?;
        let qty = u32::try_from(self.qty)
            .map_err(|e| DbError::Corrupt(format!("quantity {}: {e}", self.qty)))?;
        Ok(InventoryStack {
            actor_id,
            slot,
            item_id: ItemId::new(self.item_id),
            qty,
        })
    }
}

fn target_to_db(target: Option<&TargetId>) -> &str {
    target.map_or("", TargetId::as_str)
}

fn target_from_db(raw: String) -> Option<TargetId> {
    if raw.is_empty() {
        None
    } else {
        Some(TargetId::new(raw))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`TaskStore`] backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_actor(&self, record: &ActorRecord) -> Result<(), DbError> {
        let flags: Vec<String> = record.flags.iter().cloned().collect();
        sqlx::query(
            r"INSERT INTO actors (actor_id, abilities, flags, actor_xp, schedule_id)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (actor_id) DO NOTHING",
        )
        .bind(record.actor_id.into_inner())
        .bind(Json(&record.abilities))
        .bind(&flags)
        .bind(record.actor_xp)
        .bind(record.schedule_id.as_deref())
        .execute(&self.pool)
        .await?;

        tracing::debug!(actor_id = %record.actor_id, "Inserted actor");
        Ok(())
    }

    async fn read_snapshot(&self, actor_id: ActorId) -> Result<ActorSnapshot, DbError> {
        let id = actor_id.into_inner();
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let actor = sqlx::query_as::<_, ActorRow>(
            r"SELECT actor_id, abilities, flags, actor_xp, schedule_id, last_tick_at, revision
              FROM actors
              WHERE actor_id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound { actor_id })?;

        let skill_xp: Vec<(String, i64)> =
            sqlx::query_as("SELECT skill_id, xp FROM skill_progress WHERE actor_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let stacks = load_stacks(&mut tx, actor_id).await?;

        let task_rows = sqlx::query_as::<_, TaskRow>(
            r"SELECT skill_id, target_id, status::TEXT AS status, created_at, started_at, priority
              FROM tasks
              WHERE actor_id = $1
              ORDER BY created_at, skill_id, target_id",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let tasks = task_rows
            .into_iter()
            .map(|row| row.into_task(actor_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ActorSnapshot {
            actor_id,
            abilities: actor.abilities.0,
            flags: actor.flags.into_iter().collect::<BTreeSet<_>>(),
            actor_xp: actor.actor_xp,
            skill_xp: skill_xp
                .into_iter()
                .map(|(skill, xp)| (SkillId::new(skill), xp))
                .collect(),
            stacks,
            tasks,
            last_tick_at: actor.last_tick_at,
            schedule_id: actor.schedule_id,
            revision: actor.revision,
        })
    }

    async fn write_commit(&self, batch: &CommitBatch) -> Result<(), DbError> {
        let actor_id = batch.actor_id;
        let id = actor_id.into_inner();
        let mut tx = self.pool.begin().await?;
        lock_revision(&mut tx, actor_id, batch.expected_revision).await?;

        if !batch.inventory_deltas.is_empty() {
            let stacks = load_stacks(&mut tx, actor_id).await?;
            let mut inventory = Inventory::from_stacks(&stacks);
            inventory
                .apply_delta(&batch.inventory_deltas, true, &batch.stack_limits)
                .map_err(StoreError::from)?;
            write_stacks(&mut tx, actor_id, &inventory.to_stacks(actor_id)).await?;
        }

        sqlx::query(
            r"UPDATE actors
              SET actor_xp = actor_xp + $2, last_tick_at = $3, revision = revision + 1
              WHERE actor_id = $1",
        )
        .bind(id)
        .bind(batch.actor_xp_delta)
        .bind(batch.new_last_tick_at)
        .execute(&mut *tx)
        .await?;

        if !batch.skill_xp_deltas.is_empty() {
            let skills: Vec<String> = batch.skill_xp_deltas.keys().map(ToString::to_string).collect();
            let deltas: Vec<i64> = batch.skill_xp_deltas.values().copied().collect();
            sqlx::query(
                r"INSERT INTO skill_progress (actor_id, skill_id, xp)
                  SELECT $1, skill_id, xp FROM UNNEST($2::TEXT[], $3::BIGINT[]) AS d(skill_id, xp)
                  ON CONFLICT (actor_id, skill_id) DO UPDATE SET xp = skill_progress.xp + EXCLUDED.xp",
            )
            .bind(id)
            .bind(&skills)
            .bind(&deltas)
            .execute(&mut *tx)
            .await?;
        }

        // Leave `executing` before entering it, so the one-executing index
        // never sees two rows at once.
        let mut updates: Vec<_> = batch.task_updates.iter().collect();
        updates.sort_by_key(|update| update.status == TaskStatus::Executing);
        for update in updates {
            sqlx::query(
                r"UPDATE tasks
                  SET status = $4::task_status, started_at = $5
                  WHERE actor_id = $1 AND skill_id = $2 AND target_id = $3",
            )
            .bind(id)
            .bind(update.key.skill_id.as_str())
            .bind(target_to_db(update.key.target_id.as_ref()))
            .bind(update.status.as_str())
            .bind(update.started_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            %actor_id,
            revision = batch.expected_revision.saturating_add(1),
            tasks = batch.task_updates.len(),
            "Committed tick"
        );
        Ok(())
    }

    async fn upsert_task(&self, task: &Task) -> Result<Task, DbError> {
        let actor_id = task.key.actor_id;
        let id = actor_id.into_inner();
        let skill = task.key.skill_id.as_str();
        let target = target_to_db(task.key.target_id.as_ref());
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT revision FROM actors WHERE actor_id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound { actor_id }.into());
        }

        sqlx::query(
            r"INSERT INTO skill_progress (actor_id, skill_id) VALUES ($1, $2)
              ON CONFLICT (actor_id, skill_id) DO NOTHING",
        )
        .bind(id)
        .bind(skill)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"INSERT INTO tasks (actor_id, skill_id, target_id, status, created_at, priority)
              VALUES ($1, $2, $3, 'pending', $4, $5)
              ON CONFLICT (actor_id, skill_id, target_id) DO UPDATE
                SET status = 'pending', started_at = NULL,
                    created_at = EXCLUDED.created_at, priority = EXCLUDED.priority
                WHERE tasks.status = 'failed'",
        )
        .bind(id)
        .bind(skill)
        .bind(target)
        .bind(task.created_at)
        .bind(task.priority)
        .execute(&mut *tx)
        .await?;

        let stored = sqlx::query_as::<_, TaskRow>(
            r"SELECT skill_id, target_id, status::TEXT AS status, created_at, started_at, priority
              FROM tasks
              WHERE actor_id = $1 AND skill_id = $2 AND target_id = $3",
        )
        .bind(id)
        .bind(skill)
        .bind(target)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        stored.into_task(actor_id)
    }

    async fn overwrite_stacks(
        &self,
        actor_id: ActorId,
        expected_revision: i64,
        stacks: &[InventoryStack],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        lock_revision(&mut tx, actor_id, expected_revision).await?;
        write_stacks(&mut tx, actor_id, stacks).await?;
        sqlx::query("UPDATE actors SET revision = revision + 1 WHERE actor_id = $1")
            .bind(actor_id.into_inner())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Lock the actor row and check its revision.
async fn lock_revision(
    conn: &mut PgConnection,
    actor_id: ActorId,
    expected: i64,
) -> Result<(), DbError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT revision FROM actors WHERE actor_id = $1 FOR UPDATE")
            .bind(actor_id.into_inner())
            .fetch_optional(&mut *conn)
            .await?;
    let (actual,) = row.ok_or(StoreError::NotFound { actor_id })?;
    if actual != expected {
        return Err(StoreError::Conflict {
            actor_id,
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

async fn load_stacks(
    conn: &mut PgConnection,
    actor_id: ActorId,
) -> Result<Vec<InventoryStack>, DbError> {
    let rows = sqlx::query_as::<_, StackRow>(
        "SELECT slot, item_id, qty FROM inventory_stacks WHERE actor_id = $1 ORDER BY slot",
    )
    .bind(actor_id.into_inner())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(|row| row.into_stack(actor_id)).collect()
}

async fn write_stacks(
    conn: &mut PgConnection,
    actor_id: ActorId,
    stacks: &[InventoryStack],
) -> Result<(), DbError> {
    let id = actor_id.into_inner();
    sqlx::query("DELETE FROM inventory_stacks WHERE actor_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if stacks.is_empty() {
        return Ok(());
    }

    let slots: Vec<i64> = stacks.iter().map(|stack| i64::from(stack.slot)).collect();
    let items: Vec<String> = stacks.iter().map(|stack| stack.item_id.to_string()).collect();
    let quantities: Vec<i64> = stacks.iter().map(|stack| i64::from(stack.qty)).collect();
    sqlx::query(
        r"INSERT INTO inventory_stacks (actor_id, slot, item_id, qty)
          SELECT $1, slot, item_id, qty FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::BIGINT[]) AS s(slot, item_id, qty)",
    )
    .bind(id)
    .bind(&slots)
    .bind(&items)
    .bind(&quantities)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl TaskStore for PgTaskStore {
    async fn create_actor(&self, record: ActorRecord) -> Result<(), StoreError> {
        Ok(self.insert_actor(&record).await?)
    }

    async fn load_snapshot(&self, actor_id: ActorId) -> Result<ActorSnapshot, StoreError> {
        Ok(self.read_snapshot(actor_id).await?)
    }

    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        Ok(self.write_commit(&batch).await?)
    }

    async fn insert_task(&self, task: Task) -> Result<Task, StoreError> {
        Ok(self.upsert_task(&task).await?)
    }

    async fn replace_inventory(
        &self,
        actor_id: ActorId,
        expected_revision: i64,
        stacks: Vec<InventoryStack>,
    ) -> Result<(), StoreError> {
        Ok(self.overwrite_stacks(actor_id, expected_revision, &stacks).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_target_is_the_no_target_sentinel() {
        assert_eq!(target_to_db(None), "");
        assert_eq!(target_from_db(String::new()), None);
        let tree = TargetId::from("small_tree");
        assert_eq!(target_from_db(target_to_db(Some(&tree)).to_owned()), Some(tree));
    }

    #[test]
    fn task_row_maps_status_and_target() {
        let actor_id = ActorId::new();
        let row = TaskRow {
            skill_id: "logging".to_owned(),
            target_id: String::new(),
            status: "executing".to_owned(),
            created_at: Utc::now(),
            started_at: None,
            priority: Some(2),
        };
        let task = row.into_task(actor_id);
        assert!(matches!(
            task,
            Ok(Task { status: TaskStatus::Executing, priority: Some(2), .. })
        ));
    }

    #[test]
    fn corrupt_rows_are_rejected() {
        let actor_id = ActorId::new();
        let row = TaskRow {
            skill_id: "logging".to_owned(),
            target_id: String::new(),
            status: "done".to_owned(),
            created_at: Utc::now(),
            started_at: None,
            priority: None,
        };
        assert!(matches!(row.into_task(actor_id), Err(DbError::Corrupt(_))));

        let stack = StackRow {
            slot: -1,
            item_id: "log".to_owned(),
            qty: 1,
        };
        assert!(matches!(stack.into_stack(actor_id), Err(DbError::Corrupt(_))));
    }
}
