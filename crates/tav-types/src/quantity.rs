//! Integer quantity normalization.
//!
//! Every quantity in the engine is an integer. Definition files and operator
//! input may still carry fractional or non-finite numbers; those are
//! truncated toward zero, and NaN becomes zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::ids::ItemId;

/// Truncate a raw number toward zero. NaN maps to 0, infinities saturate.
#[allow(clippy::cast_possible_truncation)]
pub fn truncate(raw: f64) -> i64 {
    // `as` truncates toward zero, maps NaN to 0 and saturates at the bounds.
    raw as i64
}

/// A number as it appears in a definition file.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(i64),
    Float(f64),
}

impl RawNumber {
    fn into_i64(self) -> i64 {
        match self {
            Self::Int(value) => value,
            Self::Float(value) => truncate(value),
        }
    }
}

/// Deserialize an integer quantity, truncating fractional input.
pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawNumber::deserialize(deserializer).map(RawNumber::into_i64)
}

/// Deserialize an optional integer quantity, truncating fractional input.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawNumber>::deserialize(deserializer).map(|raw| raw.map(RawNumber::into_i64))
}

/// Deserialize an item -> quantity map, truncating fractional input.
pub fn deserialize_item_map<'de, D>(deserializer: D) -> Result<BTreeMap<ItemId, i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<ItemId, RawNumber>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(item, qty)| (item, qty.into_i64()))
        .collect())
}
