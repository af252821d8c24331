//! Definitions, storage contract, and the tick engine for Tav.
//!
//! This crate ties the actor logic in `tav-actor` to time and persistence.
//! It loads configuration and definitions, defines the [`TaskStore`]
//! contract, and runs the bounded per-actor tick loop.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `tav-config.yaml`
//! - [`registry`] -- Skill, target, and item definitions ([`DefinitionRegistry`])
//! - [`schedule`] -- Time-of-day flags ([`Schedule`], [`ScheduleBook`])
//! - [`store`] -- The [`TaskStore`] contract and [`MemoryStore`]
//! - [`locks`] -- Per-actor serialization ([`ActorLocks`])
//! - [`tick`] -- The synchronous tick loop
//! - [`engine`] -- [`TaskEngine`]: ticks, task adds, inventory commands

pub mod config;
pub mod engine;
pub mod locks;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod tick;

pub use config::{ConfigError, EngineConfig, LogFormat};
pub use engine::{TaskEngine, TaskError, TickError};
pub use locks::ActorLocks;
pub use registry::{DefinitionRegistry, PairingError, RegistryError};
pub use schedule::{Schedule, ScheduleBook};
pub use store::{MemoryStore, StoreError, TaskStore};
pub use tick::{TickOutcome, run_tick};
