//! Completion effect merging.
//!
//! A finished task pays out up to three reward fragments: the skill's own
//! effect, the skill's override for the specific target, and the target's
//! effect. They are summed field by field. Merging is commutative and
//! associative, so fragment order never changes the result.

use std::collections::BTreeMap;

use tav_types::{CompletionEffect, ItemId};

/// Sum any number of optional effect fragments.
///
/// XP fields add (a missing field counts as 0), item maps add per item, and
/// zero entries are dropped. Returns `None` when nothing survives.
pub fn merge_effects<'a, I>(fragments: I) -> Option<CompletionEffect>
where
    I: IntoIterator<Item = Option<&'a CompletionEffect>>,
{
    let mut actor_xp: Option<i64> = None;
    let mut skill_xp: Option<i64> = None;
    let mut items: BTreeMap<ItemId, i64> = BTreeMap::new();

    for fragment in fragments.into_iter().flatten() {
        actor_xp = add_optional(actor_xp, fragment.actor_xp);
        skill_xp = add_optional(skill_xp, fragment.skill_xp);
        for (item, qty) in &fragment.items {
            let total = items.entry(item.clone()).or_insert(0);
            *total = total.saturating_add(*qty);
        }
    }

    items.retain(|_, qty| *qty != 0);
    let merged = CompletionEffect {
        actor_xp: actor_xp.filter(|xp| *xp != 0),
        skill_xp: skill_xp.filter(|xp| *xp != 0),
        items,
    };

    if merged.is_empty() { None } else { Some(merged) }
}

fn add_optional(acc: Option<i64>, value: Option<i64>) -> Option<i64> {
    match (acc, value) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(actor_xp: Option<i64>, skill_xp: Option<i64>, items: &[(&str, i64)]) -> CompletionEffect {
        CompletionEffect {
            actor_xp,
            skill_xp,
            items: items
                .iter()
                .map(|(item, qty)| (ItemId::from(*item), *qty))
                .collect(),
        }
    }

    #[test]
    fn sums_skill_override_and_target() {
        let skill = effect(Some(2), Some(10), &[]);
        let per_target = effect(None, Some(5), &[("log", 1)]);
        let target = effect(Some(1), None, &[("log", 1), ("bark", 1)]);

        let merged = merge_effects([Some(&skill), Some(&per_target), Some(&target)]);
        assert_eq!(
            merged,
            Some(effect(Some(3), Some(15), &[("bark", 1), ("log", 2)]))
        );
    }

    #[test]
    fn absent_fragments_yield_none() {
        assert_eq!(merge_effects([None, None, None]), None);
        assert_eq!(merge_effects(Vec::new()), None);
    }

    #[test]
    fn cancelling_fragments_drop_zero_entries() {
        let gain = effect(Some(4), None, &[("log", 3)]);
        let loss = effect(Some(-4), None, &[("log", -3)]);
        assert_eq!(merge_effects([Some(&gain), Some(&loss)]), None);

        let partial = effect(Some(-4), Some(1), &[("log", -3)]);
        assert_eq!(
            merge_effects([Some(&gain), Some(&partial)]),
            Some(effect(None, Some(1), &[]))
        );
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        let a = effect(Some(1), None, &[("log", 2)]);
        let b = effect(None, Some(7), &[("log", -1), ("stone", 4)]);
        let c = effect(Some(-3), Some(2), &[("bark", 1)]);

        let abc = merge_effects([Some(&a), Some(&b), Some(&c)]);
        let cba = merge_effects([Some(&c), Some(&b), Some(&a)]);
        let bac = merge_effects([Some(&b), Some(&a), Some(&c)]);
        assert_eq!(abc, cba);
        assert_eq!(abc, bac);

        let ab = merge_effects([Some(&a), Some(&b)]);
        let grouped = merge_effects([ab.as_ref(), Some(&c)]);
        assert_eq!(grouped, abc);
    }

    #[test]
    fn merge_saturates_instead_of_overflowing() {
        let big = effect(Some(i64::MAX), None, &[]);
        let merged = merge_effects([Some(&big), Some(&big)]);
        assert_eq!(merged.and_then(|e| e.actor_xp), Some(i64::MAX));
    }
}
