//! `PostgreSQL` persistence for the Tav task engine.
//!
//! Each actor row carries a revision. Every write locks that row, checks the
//! revision the engine read, and bumps it, so two engines ticking the same
//! actor cannot both commit.
//!
//! # Tables
//!
//! ```text
//! actors            one row per actor (abilities, flags, xp, last tick, revision)
//! skill_progress    per-actor skill experience
//! tasks             queued, executing, and failed tasks
//! inventory_stacks  slot-indexed item stacks
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, and migrations
//! - [`store`] -- [`PgTaskStore`], the `PostgreSQL` [`tav_core::TaskStore`]
//! - [`error`] -- Shared error types

pub mod error;
pub mod postgres;
pub mod store;

pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::PgTaskStore;
