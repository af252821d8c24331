//! Immutable skill, target, and item definitions.
//!
//! Definitions are loaded once from YAML, cross-checked, and then shared
//! read-only (`Arc<DefinitionRegistry>`) by every tick. The registry also
//! answers the two questions every task asks of it:
//!
//! - Is this (skill, target) pairing allowed? A target must appear in the
//!   skill's `allowed_target_ids` and the skill in the target's
//!   `allowed_skill_ids`. A task without a target is allowed only for skills
//!   that list no targets.
//! - What does completing it pay? The skill's effect, the skill's override
//!   for that target, and the target's effect, summed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tav_actor::{EvalContext, Requirement, StackLimits, evaluate, merge_effects};
use tav_types::{CompletionEffect, ItemId, SkillId, TargetId, quantity};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading definitions.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to read the definitions file.
    #[error("failed to read definitions file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse definitions YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// Two definitions of the same kind share an id.
    #[error("duplicate {kind} id: {id}")]
    Duplicate {
        /// Definition kind (`skill`, `target`, `item`).
        kind: &'static str,
        /// The repeated id.
        id: String,
    },

    /// A definition names a skill that does not exist.
    #[error("{owner} references unknown skill {skill}")]
    UnknownSkill {
        /// The definition holding the reference.
        owner: String,
        /// The missing skill.
        skill: SkillId,
    },

    /// A definition names a target that does not exist.
    #[error("{owner} references unknown target {target}")]
    UnknownTarget {
        /// The definition holding the reference.
        owner: String,
        /// The missing target.
        target: TargetId,
    },

    /// A definition names an item that does not exist.
    #[error("{owner} references unknown item {item}")]
    UnknownItem {
        /// The definition holding the reference.
        owner: String,
        /// The missing item.
        item: ItemId,
    },

    /// An item declares a stack limit of zero.
    #[error("item {item} has a stack limit of 0")]
    ZeroStackLimit {
        /// The offending item.
        item: ItemId,
    },

    /// A skill declares a negative duration.
    #[error("skill {skill} has negative duration {duration_ms}ms")]
    NegativeDuration {
        /// The offending skill.
        skill: SkillId,
        /// The declared duration.
        duration_ms: i64,
    },
}

impl From<serde_yml::Error> for RegistryError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Why a (skill, target) pair cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    /// The skill is not defined.
    #[error("unknown skill {skill}")]
    UnknownSkill {
        /// The missing skill.
        skill: SkillId,
    },

    /// The target is not defined.
    #[error("unknown target {target}")]
    UnknownTarget {
        /// The missing target.
        target: TargetId,
    },

    /// Both exist but may not be combined.
    #[error("skill {skill} may not act on {}", .target.as_ref().map_or("no target", TargetId::as_str))]
    Disallowed {
        /// The skill.
        skill: SkillId,
        /// The target, or `None` for a target-less task.
        target: Option<TargetId>,
    },
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A repeatable activity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SkillDef {
    /// Unique id.
    pub id: SkillId,
    /// Selection priority. Falls back to the configured default when absent.
    #[serde(default)]
    pub priority: Option<i32>,
    /// How long one run takes, in milliseconds.
    #[serde(default, deserialize_with = "quantity::deserialize")]
    pub duration_ms: i64,
    /// Targets this skill may act on. Empty means the skill takes no target.
    #[serde(default)]
    pub allowed_target_ids: BTreeSet<TargetId>,
    /// Checked when a task is queued.
    #[serde(default)]
    pub add_requirements: Vec<Requirement>,
    /// Checked when a task is picked to start.
    #[serde(default)]
    pub execute_requirements: Vec<Requirement>,
    /// Paid on every completion.
    #[serde(default)]
    pub completion_effect: Option<CompletionEffect>,
    /// Extra payout when completing against a specific target.
    #[serde(default)]
    pub target_effects: BTreeMap<TargetId, CompletionEffect>,
}

/// Shortest run the tick loop will schedule, in milliseconds.
///
/// A task started at the cursor therefore never completes at that same
/// instant, so a repeated tick with the same `now` pays nothing.
pub const MIN_DURATION_MS: i64 = 1;

impl SkillDef {
    /// The run length the tick loop uses: `duration_ms`, at least
    /// [`MIN_DURATION_MS`].
    pub fn effective_duration_ms(&self) -> i64 {
        self.duration_ms.max(MIN_DURATION_MS)
    }
}

/// Something a skill acts on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetDef {
    /// Unique id.
    pub id: TargetId,
    /// Skills that may act on this target.
    #[serde(default)]
    pub allowed_skill_ids: BTreeSet<SkillId>,
    /// Checked when a task is queued.
    #[serde(default)]
    pub add_requirements: Vec<Requirement>,
    /// Checked when a task is picked to start.
    #[serde(default)]
    pub execute_requirements: Vec<Requirement>,
    /// Paid on every completion against this target.
    #[serde(default)]
    pub completion_effect: Option<CompletionEffect>,
}

/// A stackable item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemDef {
    /// Unique id.
    pub id: ItemId,
    /// Maximum quantity per inventory slot.
    pub stack_limit: u32,
}

/// On-disk layout of the definitions file.
#[derive(Debug, Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    skills: Vec<SkillDef>,
    #[serde(default)]
    targets: Vec<TargetDef>,
    #[serde(default)]
    items: Vec<ItemDef>,
}

// ---------------------------------------------------------------------------
// Resolved pairing
// ---------------------------------------------------------------------------

/// A skill together with the target it acts on, known to be a valid pairing.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTask<'a> {
    /// The skill definition.
    pub skill: &'a SkillDef,
    /// The target definition, when the task has one.
    pub target: Option<&'a TargetDef>,
}

impl ResolvedTask<'_> {
    /// Whether both the skill's and the target's add requirements hold.
    pub fn can_add(&self, ctx: &EvalContext) -> bool {
        evaluate(&self.skill.add_requirements, ctx)
            && self
                .target
                .is_none_or(|target| evaluate(&target.add_requirements, ctx))
    }

    /// Whether both the skill's and the target's execute requirements hold.
    pub fn can_execute(&self, ctx: &EvalContext) -> bool {
        evaluate(&self.skill.execute_requirements, ctx)
            && self
                .target
                .is_none_or(|target| evaluate(&target.execute_requirements, ctx))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Every skill, target, and item definition, validated.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    skills: BTreeMap<SkillId, SkillDef>,
    targets: BTreeMap<TargetId, TargetDef>,
    items: BTreeMap<ItemId, ItemDef>,
}

impl DefinitionRegistry {
    /// Build and validate a registry.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] for duplicate ids, dangling references to
    /// skills, targets, or items, zero stack limits, or negative durations.
    pub fn new(
        skills: Vec<SkillDef>,
        targets: Vec<TargetDef>,
        items: Vec<ItemDef>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::default();

        for item in items {
            if item.stack_limit == 0 {
                return Err(RegistryError::ZeroStackLimit { item: item.id });
            }
            if registry.items.contains_key(&item.id) {
                return Err(duplicate("item", item.id.as_str()));
            }
            registry.items.insert(item.id.clone(), item);
        }
        for skill in skills {
            if skill.duration_ms < 0 {
                return Err(RegistryError::NegativeDuration {
                    skill: skill.id,
                    duration_ms: skill.duration_ms,
                });
            }
            if registry.skills.contains_key(&skill.id) {
                return Err(duplicate("skill", skill.id.as_str()));
            }
            registry.skills.insert(skill.id.clone(), skill);
        }
        for target in targets {
            if registry.targets.contains_key(&target.id) {
                return Err(duplicate("target", target.id.as_str()));
            }
            registry.targets.insert(target.id.clone(), target);
        }

        registry.validate_references()?;
        Ok(registry)
    }

    /// Parse and validate definitions from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Yaml`] for malformed YAML, or any validation
    /// error from [`DefinitionRegistry::new`].
    pub fn from_yaml(yaml: &str) -> Result<Self, RegistryError> {
        let file: DefinitionsFile = serde_yml::from_str(yaml)?;
        Self::new(file.skills, file.targets, file.items)
    }

    /// Load and validate definitions from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] if the file cannot be read, otherwise as
    /// [`DefinitionRegistry::from_yaml`].
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Look up a skill.
    pub fn skill(&self, id: &SkillId) -> Option<&SkillDef> {
        self.skills.get(id)
    }

    /// Look up a target.
    pub fn target(&self, id: &TargetId) -> Option<&TargetDef> {
        self.targets.get(id)
    }

    /// Look up an item.
    pub fn item(&self, id: &ItemId) -> Option<&ItemDef> {
        self.items.get(id)
    }

    /// Number of skills, targets, and items.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.skills.len(), self.targets.len(), self.items.len())
    }

    /// Resolve a (skill, target) pairing.
    ///
    /// # Errors
    ///
    /// Returns [`PairingError`] if either side is undefined or the two may not
    /// be combined.
    pub fn resolve(
        &self,
        skill_id: &SkillId,
        target_id: Option<&TargetId>,
    ) -> Result<ResolvedTask<'_>, PairingError> {
        let skill = self.skill(skill_id).ok_or_else(|| PairingError::UnknownSkill {
            skill: skill_id.clone(),
        })?;

        let disallowed = || PairingError::Disallowed {
            skill: skill_id.clone(),
            target: target_id.cloned(),
        };

        let Some(target_id) = target_id else {
            return if skill.allowed_target_ids.is_empty() {
                Ok(ResolvedTask {
                    skill,
                    target: None,
                })
            } else {
                Err(disallowed())
            };
        };

        let target = self
            .target(target_id)
            .ok_or_else(|| PairingError::UnknownTarget {
                target: target_id.clone(),
            })?;
        if !skill.allowed_target_ids.contains(target_id)
            || !target.allowed_skill_ids.contains(skill_id)
        {
            return Err(disallowed());
        }

        Ok(ResolvedTask {
            skill,
            target: Some(target),
        })
    }

    /// Summed completion effect for a skill acting on an optional target.
    ///
    /// Unknown targets contribute nothing. Returns `None` when the skill is
    /// unknown or every fragment cancels out.
    pub fn completion_effect(
        &self,
        skill_id: &SkillId,
        target_id: Option<&TargetId>,
    ) -> Option<CompletionEffect> {
        let skill = self.skill(skill_id)?;
        let per_target = target_id.and_then(|id| skill.target_effects.get(id));
        let target = target_id
            .and_then(|id| self.target(id))
            .and_then(|target| target.completion_effect.as_ref());
        merge_effects([skill.completion_effect.as_ref(), per_target, target])
    }

    /// Stack limits for a set of items, in the shape commit batches carry.
    pub fn stack_limits_for<'a, I>(&self, items: I) -> BTreeMap<ItemId, u32>
    where
        I: IntoIterator<Item = &'a ItemId>,
    {
        items
            .into_iter()
            .map(|item| (item.clone(), tav_actor::effective_limit(self, item)))
            .collect()
    }

    fn validate_references(&self) -> Result<(), RegistryError> {
        for skill in self.skills.values() {
            let owner = format!("skill {}", skill.id);
            for target in &skill.allowed_target_ids {
                self.require_target(&owner, target)?;
            }
            for (target, effect) in &skill.target_effects {
                self.require_target(&owner, target)?;
                self.check_effect(&owner, Some(effect))?;
            }
            self.check_effect(&owner, skill.completion_effect.as_ref())?;
            self.check_requirements(&owner, &skill.add_requirements)?;
            self.check_requirements(&owner, &skill.execute_requirements)?;
        }

        for target in self.targets.values() {
            let owner = format!("target {}", target.id);
            for skill in &target.allowed_skill_ids {
                if !self.skills.contains_key(skill) {
                    return Err(RegistryError::UnknownSkill {
                        owner,
                        skill: skill.clone(),
                    });
                }
            }
            self.check_effect(&owner, target.completion_effect.as_ref())?;
            self.check_requirements(&owner, &target.add_requirements)?;
            self.check_requirements(&owner, &target.execute_requirements)?;
        }
        Ok(())
    }

    fn require_target(&self, owner: &str, target: &TargetId) -> Result<(), RegistryError> {
        if self.targets.contains_key(target) {
            Ok(())
        } else {
            Err(RegistryError::UnknownTarget {
                owner: owner.to_owned(),
                target: target.clone(),
            })
        }
    }

    fn require_item(&self, owner: &str, item: &ItemId) -> Result<(), RegistryError> {
        if self.items.contains_key(item) {
            Ok(())
        } else {
            Err(RegistryError::UnknownItem {
                owner: owner.to_owned(),
                item: item.clone(),
            })
        }
    }

    fn check_effect(
        &self,
        owner: &str,
        effect: Option<&CompletionEffect>,
    ) -> Result<(), RegistryError> {
        let Some(effect) = effect else {
            return Ok(());
        };
        for item in effect.items.keys() {
            self.require_item(owner, item)?;
        }
        Ok(())
    }

    /// Walk a requirement tree iteratively, checking item and skill references.
    fn check_requirements(
        &self,
        owner: &str,
        requirements: &[Requirement],
    ) -> Result<(), RegistryError> {
        let mut pending: Vec<&Requirement> = requirements.iter().collect();
        while let Some(node) = pending.pop() {
            match node {
                Requirement::ItemRequired { item, .. } => self.require_item(owner, item)?,
                Requirement::SkillLevelMin { skill, .. } => {
                    if !self.skills.contains_key(skill) {
                        return Err(RegistryError::UnknownSkill {
                            owner: owner.to_owned(),
                            skill: skill.clone(),
                        });
                    }
                }
                Requirement::And(children) | Requirement::Or(children) | Requirement::All(children) => {
                    pending.extend(children.iter());
                }
                Requirement::Not(child) => pending.push(child.as_ref()),
                Requirement::AbilityMin { .. }
                | Requirement::TavLevelMin(_)
                | Requirement::FlagPresent(_)
                | Requirement::Custom(_) => {}
            }
        }
        Ok(())
    }
}

impl StackLimits for DefinitionRegistry {
    fn stack_limit(&self, item: &ItemId) -> Option<u32> {
        self.items.get(item).map(|def| def.stack_limit)
    }
}

fn duplicate(kind: &'static str, id: &str) -> RegistryError {
    RegistryError::Duplicate {
        kind,
        id: id.to_owned(),
    }
}
