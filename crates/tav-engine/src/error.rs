//! Error types for the operator binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode during startup and command execution.

/// Top-level error for the operator binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tav_core::ConfigError,
    },

    /// The definitions file could not be loaded.
    #[error("definitions error: {source}")]
    Definitions {
        /// The underlying registry error.
        #[from]
        source: tav_core::RegistryError,
    },

    /// Connecting to or migrating the database failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying data layer error.
        #[from]
        source: tav_db::DbError,
    },

    /// A task could not be queued.
    #[error("task error: {source}")]
    Task {
        /// The underlying task error.
        #[from]
        source: tav_core::TaskError,
    },

    /// A tick failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: tav_core::TickError,
    },

    /// A store operation failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: tav_core::StoreError,
    },

    /// A result could not be rendered as JSON.
    #[error("output error: {source}")]
    Output {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
