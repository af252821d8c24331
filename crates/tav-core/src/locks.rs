//! Per-actor serialization within one process.
//!
//! Two ticks for the same actor must not interleave their load and commit.
//! Across processes the store's revision check catches that; within a process
//! [`ActorLocks`] makes the second caller wait instead of conflicting.

use std::collections::BTreeMap;
use std::sync::Arc;

use tav_types::ActorId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of async mutexes keyed by actor.
///
/// Entries nobody holds are pruned whenever a new lock is taken, so the table
/// stays proportional to the number of actors in flight.
#[derive(Debug, Default)]
pub struct ActorLocks {
    table: Mutex<BTreeMap<ActorId, Arc<Mutex<()>>>>,
}

impl ActorLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one actor.
    ///
    /// The returned guard releases the actor when dropped.
    pub async fn lock(&self, actor_id: ActorId) -> OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.table.lock().await;
            table.retain(|id, lock| *id == actor_id || Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(actor_id).or_default())
        };
        entry.lock_owned().await
    }

    /// Number of actors currently tracked.
    pub async fn tracked(&self) -> usize {
        self.table.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_actor_waits_for_release() {
        let locks = Arc::new(ActorLocks::new());
        let actor_id = ActorId::new();

        let guard = locks.lock(actor_id).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(actor_id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert!(contender.await.is_ok());
    }

    #[tokio::test]
    async fn different_actors_do_not_block() {
        let locks = ActorLocks::new();
        let _first = locks.lock(ActorId::new()).await;
        let _second = locks.lock(ActorId::new()).await;
        assert_eq!(locks.tracked().await, 2);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = ActorLocks::new();
        drop(locks.lock(ActorId::new()).await);
        drop(locks.lock(ActorId::new()).await);
        assert_eq!(locks.tracked().await, 1);
    }
}
