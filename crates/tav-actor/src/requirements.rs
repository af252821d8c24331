//! Requirement DSL: a boolean predicate tree gating task add and execution.
//!
//! Skills and targets carry two requirement lists each: one checked when a
//! task is queued, one checked every time the tick engine considers starting
//! it. A list is satisfied when every node in it is satisfied.
//!
//! # Node Semantics
//!
//! All numeric comparisons are "at least":
//!
//! | Node | True when | Missing value |
//! |------|-----------|---------------|
//! | `ability_min` | ability score >= value | 0 |
//! | `tav_level_min` | actor level >= level | 1 |
//! | `skill_level_min` | skill level >= level | 0 |
//! | `item_required` | item total >= qty | 0 |
//! | `flag_present` | flag is held | -- |
//! | `custom` | named override, else fallback resolver | `false` |
//! | `and` / bare list | every child | empty is `true` |
//! | `or` | any child | empty is `false` |
//! | `not` | child is false | -- |
//!
//! Evaluation is a total, side-effect-free function of the tree and the
//! context.
//!
//! # Definition Syntax
//!
//! ```yaml
//! execute_requirements:
//!   - ability_min: { ability: strength, value: 12 }
//!   - or:
//!       - flag_present: has_axe
//!       - item_required: { item: axe, qty: 1 }
//!   - not:
//!       custom: exhausted
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tav_types::{Ability, InventoryMergeMode, ItemId, SkillId, quantity};

// ---------------------------------------------------------------------------
// Requirement tree
// ---------------------------------------------------------------------------

/// One node of the requirement tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// The actor's score in `ability` is at least `value`.
    AbilityMin {
        /// The ability checked.
        ability: Ability,
        /// Minimum score.
        #[serde(deserialize_with = "quantity::deserialize")]
        value: i64,
    },
    /// The actor's level is at least this value.
    TavLevelMin(u32),
    /// The actor's level in `skill` is at least `level`.
    SkillLevelMin {
        /// The skill checked.
        skill: SkillId,
        /// Minimum level.
        level: u32,
    },
    /// The actor holds at least `qty` of `item` across all stacks.
    ItemRequired {
        /// The item checked.
        item: ItemId,
        /// Minimum total quantity.
        #[serde(deserialize_with = "quantity::deserialize")]
        qty: i64,
    },
    /// The actor holds this flag.
    FlagPresent(String),
    /// A named check resolved by the host application.
    Custom(String),
    /// Every child holds.
    And(Vec<Requirement>),
    /// At least one child holds.
    Or(Vec<Requirement>),
    /// The child does not hold.
    Not(Box<Requirement>),
    /// A bare list, equivalent to `and`.
    #[serde(untagged)]
    All(Vec<Requirement>),
}

impl Requirement {
    /// Evaluate this node against a context.
    pub fn is_met(&self, ctx: &EvalContext) -> bool {
        match self {
            Self::AbilityMin { ability, value } => ctx.ability(*ability) >= *value,
            Self::TavLevelMin(level) => ctx.level() >= *level,
            Self::SkillLevelMin { skill, level } => ctx.skill_level(skill) >= *level,
            Self::ItemRequired { item, qty } => ctx.item_total(item) >= *qty,
            Self::FlagPresent(flag) => ctx.has_flag(flag),
            Self::Custom(name) => ctx.resolve_custom(name),
            Self::And(children) | Self::All(children) => evaluate(children, ctx),
            Self::Or(children) => children.iter().any(|child| child.is_met(ctx)),
            Self::Not(child) => !child.is_met(ctx),
        }
    }
}

/// Evaluate an ordered requirement list: satisfied when every node holds.
///
/// An empty list is vacuously satisfied.
pub fn evaluate(requirements: &[Requirement], ctx: &EvalContext) -> bool {
    requirements.iter().all(|requirement| requirement.is_met(ctx))
}

// ---------------------------------------------------------------------------
// Custom checks
// ---------------------------------------------------------------------------

/// Predicate signature for named custom checks.
pub type CustomPredicate = dyn Fn(&EvalContext) -> bool + Send + Sync;

/// A named override for a `custom` requirement.
#[derive(Clone)]
pub enum CustomCheck {
    /// A fixed answer.
    Literal(bool),
    /// Computed from the context at evaluation time.
    Predicate(Arc<CustomPredicate>),
}

impl CustomCheck {
    /// Wrap a closure as a predicate check.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&EvalContext) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    fn check(&self, ctx: &EvalContext) -> bool {
        match self {
            Self::Literal(value) => *value,
            Self::Predicate(predicate) => predicate(ctx),
        }
    }
}

impl core::fmt::Debug for CustomCheck {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Resolves `custom` checks that have no named override.
///
/// Returning `None` means the name is unknown, which fails the check.
pub trait CustomResolver: Send + Sync {
    /// Resolve a named check against the context.
    fn resolve(&self, name: &str, ctx: &EvalContext) -> Option<bool>;
}

impl<F> CustomResolver for F
where
    F: Fn(&str, &EvalContext) -> Option<bool> + Send + Sync,
{
    fn resolve(&self, name: &str, ctx: &EvalContext) -> Option<bool> {
        self(name, ctx)
    }
}

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Read-only view of an actor that requirements are evaluated against.
#[derive(Clone, Default)]
pub struct EvalContext {
    /// Ability scores.
    pub abilities: BTreeMap<Ability, i64>,
    /// Derived actor level. `None` reads as level 1.
    pub actor_level: Option<u32>,
    /// Derived level per skill.
    pub skill_levels: BTreeMap<SkillId, u32>,
    /// Inventory totals per item.
    pub items: BTreeMap<ItemId, i64>,
    /// Flags held, including synthetic ones such as the schedule block.
    pub flags: BTreeSet<String>,
    /// Named overrides for `custom` checks.
    pub custom: BTreeMap<String, CustomCheck>,
    /// Resolver for `custom` checks without a named override.
    pub fallback: Option<Arc<dyn CustomResolver>>,
}

impl EvalContext {
    /// Ability score, 0 when unknown.
    pub fn ability(&self, ability: Ability) -> i64 {
        self.abilities.get(&ability).copied().unwrap_or(0)
    }

    /// Actor level, 1 when unknown.
    pub fn level(&self) -> u32 {
        self.actor_level.unwrap_or(1)
    }

    /// Skill level, 0 when the actor has never queued the skill.
    pub fn skill_level(&self, skill: &SkillId) -> u32 {
        self.skill_levels.get(skill).copied().unwrap_or(0)
    }

    /// Total quantity of an item, 0 when absent.
    pub fn item_total(&self, item: &ItemId) -> i64 {
        self.items.get(item).copied().unwrap_or(0)
    }

    /// Whether a flag is held.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Resolve a custom check: named override first, then the fallback.
    /// Unresolved names fail closed.
    pub fn resolve_custom(&self, name: &str) -> bool {
        if let Some(check) = self.custom.get(name) {
            return check.check(self);
        }
        self.fallback
            .as_ref()
            .and_then(|resolver| resolver.resolve(name, self))
            .unwrap_or(false)
    }

    /// Add a signed delta to an item total.
    pub fn add_item_delta(&mut self, item: &ItemId, delta: i64) {
        let total = self.items.entry(item.clone()).or_insert(0);
        *total = total.saturating_add(delta);
    }

    /// Merge caller-supplied overrides into this context.
    ///
    /// Scalar maps take the override's values where present, flags are
    /// unioned, and items merge according to `inventory_mode`.
    pub fn merge_override(&mut self, overrides: &ContextOverride) {
        for (ability, score) in &overrides.abilities {
            self.abilities.insert(*ability, *score);
        }
        for (skill, level) in &overrides.skill_levels {
            self.skill_levels.insert(skill.clone(), *level);
        }
        for (name, check) in &overrides.custom {
            self.custom.insert(name.clone(), check.clone());
        }
        self.flags.extend(overrides.flags.iter().cloned());
        for (item, qty) in &overrides.items {
            let delta = match overrides.inventory_mode {
                InventoryMergeMode::Add => *qty,
                InventoryMergeMode::Subtract => qty.saturating_neg(),
            };
            self.add_item_delta(item, delta);
        }
    }
}

impl core::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EvalContext")
            .field("abilities", &self.abilities)
            .field("actor_level", &self.actor_level)
            .field("skill_levels", &self.skill_levels)
            .field("items", &self.items)
            .field("flags", &self.flags)
            .field("custom", &self.custom)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Caller-supplied adjustments layered over the snapshot context for one tick.
#[derive(Debug, Clone, Default)]
pub struct ContextOverride {
    /// Ability scores that replace the snapshot's.
    pub abilities: BTreeMap<Ability, i64>,
    /// Skill levels that replace the derived ones.
    pub skill_levels: BTreeMap<SkillId, u32>,
    /// Named custom checks that replace registered ones.
    pub custom: BTreeMap<String, CustomCheck>,
    /// Extra flags.
    pub flags: BTreeSet<String>,
    /// Item quantities combined with the snapshot totals.
    pub items: BTreeMap<ItemId, i64>,
    /// How `items` combine with the snapshot totals.
    pub inventory_mode: InventoryMergeMode,
}
