//! Level derivation from accumulated experience.
//!
//! Levels are never stored. They are derived on demand from XP and a table of
//! ascending thresholds: the level is the number of thresholds the XP has
//! reached, never below 1. Actor levels and skill levels use separate tables.

use serde::{Deserialize, Serialize};

/// Lowest level any actor or known skill can have.
pub const MIN_LEVEL: u32 = 1;

/// Derive a level from XP: the count of thresholds `<= xp`, minimum 1.
///
/// `thresholds` need not be sorted.
pub fn level_from_xp(xp: i64, thresholds: &[i64]) -> u32 {
    let reached = thresholds.iter().filter(|threshold| **threshold <= xp).count();
    u32::try_from(reached).unwrap_or(u32::MAX).max(MIN_LEVEL)
}

/// An ascending XP threshold table.
///
/// Deserializes from a plain YAML/JSON list; the list is sorted on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<i64>", into = "Vec<i64>")]
pub struct LevelTable {
    thresholds: Vec<i64>,
}

impl LevelTable {
    /// Build a table from thresholds in any order.
    pub fn new(mut thresholds: Vec<i64>) -> Self {
        thresholds.sort_unstable();
        Self { thresholds }
    }

    /// Level reached at `xp`.
    pub fn level(&self, xp: i64) -> u32 {
        level_from_xp(xp, &self.thresholds)
    }

    /// The sorted thresholds.
    pub fn thresholds(&self) -> &[i64] {
        &self.thresholds
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::new(vec![0, 100, 250, 500, 1_000, 2_000, 4_000, 8_000, 16_000, 32_000])
    }
}

impl From<Vec<i64>> for LevelTable {
    fn from(thresholds: Vec<i64>) -> Self {
        Self::new(thresholds)
    }
}

impl From<LevelTable> for Vec<i64> {
    fn from(table: LevelTable) -> Self {
        table.thresholds
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn level_counts_reached_thresholds() {
        let thresholds = [0, 100, 300];
        assert_eq!(level_from_xp(0, &thresholds), 1);
        assert_eq!(level_from_xp(99, &thresholds), 1);
        assert_eq!(level_from_xp(100, &thresholds), 2);
        assert_eq!(level_from_xp(5_000, &thresholds), 3);
    }

    #[test]
    fn level_never_drops_below_one() {
        assert_eq!(level_from_xp(0, &[]), 1);
        assert_eq!(level_from_xp(-50, &[0, 10]), 1);
        assert_eq!(level_from_xp(5, &[10, 20]), 1);
    }

    #[test]
    fn table_sorts_on_load() {
        let table: LevelTable = serde_yml::from_str("[300, 0, 100]").unwrap();
        assert_eq!(table.thresholds(), &[0, 100, 300]);
        assert_eq!(table.level(150), 2);
    }

    #[test]
    fn default_table_starts_at_level_one() {
        let table = LevelTable::default();
        assert_eq!(table.level(0), 1);
        assert_eq!(table.level(100), 2);
    }
}
