//! Actor-side logic for the Tav task engine.
//!
//! Everything here operates on actor state without touching I/O. It sits
//! between `tav-types` (the data model) and `tav-core` (the tick engine and
//! storage contract).
//!
//! # Modules
//!
//! - [`requirements`] -- Requirement trees and the evaluation context
//! - [`inventory`] -- Slot-based stacks with per-item limits ([`Inventory`])
//! - [`effects`] -- Summing completion effect fragments
//! - [`levels`] -- Level derivation from XP thresholds
//! - [`error`] -- Error types for inventory operations ([`ActorError`])

pub mod effects;
pub mod error;
pub mod inventory;
pub mod levels;
pub mod requirements;

// Re-export primary types at crate root for convenience.
pub use effects::merge_effects;
pub use error::ActorError;
pub use inventory::{
    DEFAULT_STACK_LIMIT, Inventory, Stack, StackLimits, effective_limit, parse_slot, slot_index,
};
pub use levels::{LevelTable, MIN_LEVEL, level_from_xp};
pub use requirements::{
    ContextOverride, CustomCheck, CustomPredicate, CustomResolver, EvalContext, Requirement,
    evaluate,
};
