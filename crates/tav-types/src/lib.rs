//! Shared type definitions for the Tav task engine.
//!
//! This crate is the single source of truth for the data model shared by the
//! actor logic, the tick engine, and the stores. Types flow downstream to
//! `TypeScript` via `ts-rs` for client tooling.
//!
//! # Modules
//!
//! - [`ids`] -- Actor UUIDs and definition keys (skills, targets, items)
//! - [`enums`] -- Abilities, task status, and context merge modes
//! - [`structs`] -- Tasks, stacks, completion effects, snapshots, commits
//! - [`quantity`] -- Integer quantity normalization for definition input

pub mod enums;
pub mod ids;
pub mod quantity;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Ability, InventoryMergeMode, TaskStatus};
pub use ids::{ActorId, ItemId, SkillId, TargetId};
pub use structs::{
    ActorRecord, ActorSnapshot, CommitBatch, CompletionEffect, InventoryStack, Task, TaskKey,
    TaskUpdate, TickReport,
};

#[cfg(test)]
mod tests {
    //! Binding generation for client tooling.

    #[test]
    fn export_bindings() {
        // ts-rs writes the bindings to `bindings/` relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::ActorId::export_all();
        let _ = crate::ids::SkillId::export_all();
        let _ = crate::ids::TargetId::export_all();
        let _ = crate::ids::ItemId::export_all();

        // Enums
        let _ = crate::enums::Ability::export_all();
        let _ = crate::enums::TaskStatus::export_all();
        let _ = crate::enums::InventoryMergeMode::export_all();

        // Structs
        let _ = crate::structs::TaskKey::export_all();
        let _ = crate::structs::Task::export_all();
        let _ = crate::structs::TaskUpdate::export_all();
        let _ = crate::structs::InventoryStack::export_all();
        let _ = crate::structs::CompletionEffect::export_all();
        let _ = crate::structs::ActorRecord::export_all();
        let _ = crate::structs::ActorSnapshot::export_all();
        let _ = crate::structs::CommitBatch::export_all();
        let _ = crate::structs::TickReport::export_all();
    }
}
