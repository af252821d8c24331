//! Slot-based inventory with per-item stack limits.
//!
//! An actor's inventory is a sparse map from slot index to a stack of one
//! item. Slot numbers are meaningful to clients (they are the display order),
//! so operations never re-index slots they do not touch. Only [`compact`]
//! renumbers, and only when called explicitly.
//!
//! # Invariants
//!
//! - Every stored stack has `0 < qty <= stack_limit(item)`.
//! - Stacks of the same item may coexist in different slots.
//!
//! # Delta Rules
//!
//! - Additions top up existing stacks of the item in ascending slot order,
//!   then open new stacks at the smallest unused slot.
//! - Removals drain the item's highest slot first and delete emptied stacks.
//! - In strict mode a batch that would drive any item below zero is rejected
//!   before anything is mutated.
//!
//! All arithmetic is checked -- no silent overflows, no panics.
//!
//! [`compact`]: Inventory::compact

use std::collections::BTreeMap;

use tav_types::{ActorId, InventoryStack, ItemId, quantity};
use tracing::debug;

use crate::error::ActorError;

/// Stack limit used for items without a registered (or with a zero) limit.
pub const DEFAULT_STACK_LIMIT: u32 = 1;

// ---------------------------------------------------------------------------
// Stack limits
// ---------------------------------------------------------------------------

/// Item capacity lookup.
pub trait StackLimits {
    /// Maximum quantity of `item` a single slot may hold, if registered.
    fn stack_limit(&self, item: &ItemId) -> Option<u32>;
}

impl StackLimits for BTreeMap<ItemId, u32> {
    fn stack_limit(&self, item: &ItemId) -> Option<u32> {
        self.get(item).copied()
    }
}

/// Effective stack limit: the registered limit, or [`DEFAULT_STACK_LIMIT`].
pub fn effective_limit<L: StackLimits + ?Sized>(limits: &L, item: &ItemId) -> u32 {
    limits
        .stack_limit(item)
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_STACK_LIMIT)
}

// ---------------------------------------------------------------------------
// Slot parsing
// ---------------------------------------------------------------------------

/// Validate a signed slot index.
pub fn slot_index(raw: i64) -> Result<u32, ActorError> {
    u32::try_from(raw).map_err(|_| ActorError::InvalidSlot {
        raw: raw.to_string(),
    })
}

/// Parse a slot index from operator input.
///
/// Accepts non-negative integers, including integer-valued decimals such as
/// `"3.0"`. Negative, fractional, and non-numeric input is rejected.
pub fn parse_slot(raw: &str) -> Result<u32, ActorError> {
    let trimmed = raw.trim();
    let invalid = || ActorError::InvalidSlot {
        raw: raw.to_owned(),
    };

    if let Ok(value) = trimmed.parse::<i64>() {
        return slot_index(value).map_err(|_| invalid());
    }

    let value: f64 = trimmed.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value.fract().abs() > f64::EPSILON {
        return Err(invalid());
    }
    slot_index(quantity::truncate(value)).map_err(|_| invalid())
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A quantity of one item in one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    /// The stacked item.
    pub item: ItemId,
    /// Quantity held, always positive.
    pub qty: u32,
}

/// One actor's inventory, keyed by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    slots: BTreeMap<u32, Stack>,
}

impl Inventory {
    /// Create an empty inventory.
    pub const fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Hydrate from stored stacks. Empty stacks are dropped.
    pub fn from_stacks<'a, I>(stacks: I) -> Self
    where
        I: IntoIterator<Item = &'a InventoryStack>,
    {
        let slots = stacks
            .into_iter()
            .filter(|stack| stack.qty > 0)
            .map(|stack| {
                (
                    stack.slot,
                    Stack {
                        item: stack.item_id.clone(),
                        qty: stack.qty,
                    },
                )
            })
            .collect();
        Self { slots }
    }

    /// Export as storable stacks in ascending slot order.
    pub fn to_stacks(&self, actor_id: ActorId) -> Vec<InventoryStack> {
        self.slots
            .iter()
            .map(|(slot, stack)| InventoryStack {
                actor_id,
                slot: *slot,
                item_id: stack.item.clone(),
                qty: stack.qty,
            })
            .collect()
    }

    /// The stack in a slot, if any.
    pub fn get(&self, slot: u32) -> Option<&Stack> {
        self.slots.get(&slot)
    }

    /// Occupied slots in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = (u32, &Stack)> {
        self.slots.iter().map(|(slot, stack)| (*slot, stack))
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sum of quantities per item across all slots.
    pub fn totals(&self) -> BTreeMap<ItemId, i64> {
        let mut totals: BTreeMap<ItemId, i64> = BTreeMap::new();
        for stack in self.slots.values() {
            let total = totals.entry(stack.item.clone()).or_insert(0);
            *total = total.saturating_add(i64::from(stack.qty));
        }
        totals
    }

    /// Total quantity of one item.
    pub fn total_of(&self, item: &ItemId) -> i64 {
        self.slots
            .values()
            .filter(|stack| stack.item == *item)
            .fold(0_i64, |acc, stack| acc.saturating_add(i64::from(stack.qty)))
    }

    /// Apply signed per-item deltas.
    ///
    /// In strict mode the whole batch is rejected with
    /// [`ActorError::InsufficientQuantity`] if any item would go below zero,
    /// and nothing is mutated. Otherwise over-large removals drain the item
    /// to zero. The batch is applied atomically either way: on error the
    /// inventory is unchanged.
    pub fn apply_delta<L: StackLimits + ?Sized>(
        &mut self,
        deltas: &BTreeMap<ItemId, i64>,
        strict: bool,
        limits: &L,
    ) -> Result<(), ActorError> {
        if deltas.values().all(|delta| *delta == 0) {
            return Ok(());
        }

        if strict {
            for (item, delta) in deltas {
                let available = self.total_of(item);
                if available.saturating_add(*delta) < 0 {
                    return Err(ActorError::InsufficientQuantity {
                        item: item.clone(),
                        requested: delta.saturating_neg(),
                        available,
                    });
                }
            }
        }

        let mut next = self.clone();
        for (item, delta) in deltas {
            match delta.signum() {
                1 => next.add_item(item, delta.unsigned_abs(), effective_limit(limits, item))?,
                -1 => next.remove_item(item, delta.unsigned_abs()),
                _ => {}
            }
        }
        *self = next;

        debug!(items = deltas.len(), strict, slots = self.slots.len(), "Applied inventory delta");
        Ok(())
    }

    /// Replace the whole inventory with the given totals.
    ///
    /// Each positive total is split into consecutive stacks of at most the
    /// item's limit; slots are assigned 0..N-1 in input order. Non-positive
    /// totals are dropped.
    pub fn set_all<L, I>(&mut self, totals: I, limits: &L) -> Result<(), ActorError>
    where
        L: StackLimits + ?Sized,
        I: IntoIterator<Item = (ItemId, i64)>,
    {
        let mut slots = BTreeMap::new();
        let mut next_slot: u32 = 0;

        for (item, total) in totals {
            let Ok(mut remaining) = u64::try_from(total) else {
                continue;
            };
            let limit = u64::from(effective_limit(limits, &item));
            while remaining > 0 {
                let put = remaining.min(limit);
                slots.insert(
                    next_slot,
                    Stack {
                        item: item.clone(),
                        qty: to_qty(put)?,
                    },
                );
                remaining = remaining.saturating_sub(put);
                next_slot = next_slot.checked_add(1).ok_or_else(|| slot_overflow("set_all"))?;
            }
        }

        self.slots = slots;
        Ok(())
    }

    /// Move the stack at `from` onto `to`.
    ///
    /// - Empty destination: the stack is relocated.
    /// - Same item: quantity merges up to the stack limit; any excess stays at
    ///   `from`, which is emptied only on a full merge.
    /// - Different item: the two slots swap contents.
    ///
    /// Only the two slots are touched.
    pub fn move_stack<L: StackLimits + ?Sized>(
        &mut self,
        from: i64,
        to: i64,
        limits: &L,
    ) -> Result<(), ActorError> {
        let from = slot_index(from)?;
        let to = slot_index(to)?;

        let Some(source) = self.slots.get(&from).cloned() else {
            return Err(ActorError::NoItemInSlot { slot: from });
        };
        if from == to {
            return Ok(());
        }

        match self.slots.remove(&to) {
            None => {
                self.slots.remove(&from);
                self.slots.insert(to, source);
            }
            Some(mut dest) if dest.item == source.item => {
                let limit = effective_limit(limits, &source.item);
                let room = limit.saturating_sub(dest.qty);
                let moved = room.min(source.qty);
                dest.qty = dest.qty.saturating_add(moved);
                let left = source.qty.saturating_sub(moved);
                self.slots.insert(to, dest);
                if left == 0 {
                    self.slots.remove(&from);
                } else {
                    self.slots.insert(
                        from,
                        Stack {
                            item: source.item,
                            qty: left,
                        },
                    );
                }
            }
            Some(dest) => {
                self.slots.insert(from, dest);
                self.slots.insert(to, source);
            }
        }
        Ok(())
    }

    /// Merge every item into the fewest stacks and renumber slots from 0.
    ///
    /// Items keep the relative order of their lowest occupied slot.
    pub fn compact<L: StackLimits + ?Sized>(&mut self, limits: &L) -> Result<(), ActorError> {
        let mut order: Vec<ItemId> = Vec::new();
        let mut totals: BTreeMap<ItemId, i64> = BTreeMap::new();
        for stack in self.slots.values() {
            let total = totals.entry(stack.item.clone()).or_insert_with(|| {
                order.push(stack.item.clone());
                0
            });
            *total = total.saturating_add(i64::from(stack.qty));
        }

        let before = self.slots.len();
        let ordered = order.into_iter().map(|item| {
            let total = totals.get(&item).copied().unwrap_or(0);
            (item, total)
        });
        self.set_all(ordered, limits)?;
        debug!(before, after = self.slots.len(), "Compacted inventory");
        Ok(())
    }

    fn add_item(&mut self, item: &ItemId, amount: u64, limit: u32) -> Result<(), ActorError> {
        let mut remaining = amount;

        for stack in self.slots.values_mut().filter(|stack| stack.item == *item) {
            if remaining == 0 {
                break;
            }
            let room = u64::from(limit.saturating_sub(stack.qty));
            let put = room.min(remaining);
            stack.qty = stack.qty.saturating_add(to_qty(put)?);
            remaining = remaining.saturating_sub(put);
        }

        let limit = u64::from(limit);
        while remaining > 0 {
            let slot = self.first_free_slot().ok_or_else(|| slot_overflow("apply_delta"))?;
            let put = remaining.min(limit);
            self.slots.insert(
                slot,
                Stack {
                    item: item.clone(),
                    qty: to_qty(put)?,
                },
            );
            remaining = remaining.saturating_sub(put);
        }
        Ok(())
    }

    fn remove_item(&mut self, item: &ItemId, amount: u64) {
        let owned: Vec<u32> = self
            .slots
            .iter()
            .rev()
            .filter(|(_, stack)| stack.item == *item)
            .map(|(slot, _)| *slot)
            .collect();

        let mut remaining = amount;
        for slot in owned {
            if remaining == 0 {
                break;
            }
            let Some(stack) = self.slots.get_mut(&slot) else {
                continue;
            };
            let take = u64::from(stack.qty).min(remaining);
            // take <= stack.qty, so it fits in u32.
            stack.qty = stack.qty.saturating_sub(u32::try_from(take).unwrap_or(u32::MAX));
            remaining = remaining.saturating_sub(take);
            if stack.qty == 0 {
                self.slots.remove(&slot);
            }
        }
    }

    /// Smallest slot index not currently occupied.
    fn first_free_slot(&self) -> Option<u32> {
        let mut candidate: u32 = 0;
        for slot in self.slots.keys() {
            if *slot != candidate {
                break;
            }
            candidate = candidate.checked_add(1)?;
        }
        Some(candidate)
    }
}

fn to_qty(value: u64) -> Result<u32, ActorError> {
    u32::try_from(value).map_err(|_| ActorError::ArithmeticOverflow {
        context: format!("stack quantity {value} exceeds u32"),
    })
}

fn slot_overflow(operation: &str) -> ActorError {
    ActorError::ArithmeticOverflow {
        context: format!("slot index overflow in {operation}"),
    }
}
