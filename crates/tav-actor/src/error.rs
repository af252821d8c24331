//! Error types for the tav-actor crate.
//!
//! All operations that can fail return typed errors rather than panicking.
//! Requirement evaluation and effect merging are total and never fail; the
//! errors here come from inventory operations.

use tav_types::ItemId;

/// Errors that can occur during actor state operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// A strict delta batch would drive an item's total below zero.
    #[error("insufficient quantity: wanted {requested} of {item} but only have {available}")]
    InsufficientQuantity {
        /// The item being removed.
        item: ItemId,
        /// The quantity the batch attempted to remove.
        requested: i64,
        /// The quantity the actor actually holds.
        available: i64,
    },

    /// A slot index was negative or not an integer.
    #[error("invalid slot index: {raw}")]
    InvalidSlot {
        /// The rejected input, as given.
        raw: String,
    },

    /// The source slot of a move holds nothing.
    #[error("no item in slot {slot}")]
    NoItemInSlot {
        /// The empty slot.
        slot: u32,
    },

    /// An arithmetic overflow occurred during an inventory computation.
    #[error("arithmetic overflow in inventory computation: {context}")]
    ArithmeticOverflow {
        /// Description of what was being computed.
        context: String,
    },
}
