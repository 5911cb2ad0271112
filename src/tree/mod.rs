//! Incremental tree navigation over the classification hierarchy.
//!
//! The level axis is the provenance scope (author, year, edition; levels
//! 1..3) followed by the eleven classification levels (4..14). A node's code
//! is a compound key: its ancestors' local codes joined by [`KEY_DELIMITER`],
//! so one code resolves the whole ancestry without re-querying parents.

use anyhow::Result;
use rusqlite::params_from_iter;
use tracing::debug;

use crate::model::types::{CLASSIFICATION_LEVELS, TreeNode};
use crate::storage::SqliteStorage;
use crate::storage::sqlite::{CODE_COLUMNS, DESCR_COLUMNS};

/// Scope levels prepended above the classification hierarchy.
pub const SCOPE_LEVELS: usize = 3;
/// Deepest navigable level (scope plus classification).
pub const MAX_LEVEL: usize = SCOPE_LEVELS + CLASSIFICATION_LEVELS;
/// Level assigned to terminal catalog entries returned by the leaf fallback.
pub const LEAF_LEVEL: usize = MAX_LEVEL + 1;
/// Compound-key separator; never valid inside a code.
pub const KEY_DELIMITER: char = '|';

pub struct NavigationEngine<'a> {
    storage: &'a SqliteStorage,
}

impl<'a> NavigationEngine<'a> {
    pub fn new(storage: &'a SqliteStorage) -> Self {
        Self { storage }
    }

    /// Distinct top-level nodes (level 1 of the scope axis).
    pub fn roots(&self) -> Result<Vec<TreeNode>> {
        self.children_of(0, "")
    }

    /// Distinct child nodes one level below `parent_key`, where `level` is
    /// the parent's level and the key carries one segment per ancestor.
    ///
    /// A branch with no deeper classification falls back to its catalog
    /// entries as terminal leaves. Malformed input (out-of-range level,
    /// segment count mismatch) yields an empty sequence, never an error.
    pub fn children_of(&self, level: i64, parent_key: &str) -> Result<Vec<TreeNode>> {
        if level < 0 || level as usize > MAX_LEVEL {
            debug!(level, "navigation level out of range");
            return Ok(Vec::new());
        }
        let level = level as usize;
        let segments = split_key(parent_key);
        if segments.len() != level {
            debug!(
                level,
                segments = segments.len(),
                "parent key does not match level"
            );
            return Ok(Vec::new());
        }

        if level == MAX_LEVEL {
            // Nothing deeper exists; the branch's entries are its children.
            let filter = ancestor_where(&segments);
            return self.leaf_entries(&segments, &filter);
        }

        let child = level + 1;
        let (code_col, descr_col) = level_columns(child);
        let ancestor_filter = ancestor_where(&segments);

        let sql = format!(
            "SELECT DISTINCT {code_col}, {descr_col} FROM entries \
             WHERE {ancestor_filter} {code_col} IS NOT NULL \
             ORDER BY 1, 2",
        );
        let mut stmt = self.storage.raw().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(&segments), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (local, description) = row?;
            nodes.push(TreeNode {
                code: compose_key(parent_key, &local),
                description: description.unwrap_or_default(),
                level: child,
                has_children: true,
            });
        }
        if !nodes.is_empty() {
            return Ok(nodes);
        }

        self.leaf_entries(&segments, &ancestor_filter)
    }

    /// Terminal entries under a branch with no further classification.
    fn leaf_entries(&self, segments: &[&str], ancestor_filter: &str) -> Result<Vec<TreeNode>> {
        let sql = format!(
            "SELECT entry_code, description FROM entries \
             WHERE {ancestor_filter} 1=1 ORDER BY entry_code",
        );
        let mut stmt = self.storage.raw().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(segments), |row| {
            Ok(TreeNode {
                code: row.get(0)?,
                description: row.get(1)?,
                level: LEAF_LEVEL,
                has_children: false,
            })
        })?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }
}

/// Column pair for a 1-based navigation level. Scope levels have no separate
/// description column; the value doubles as its own label.
fn level_columns(level: usize) -> (&'static str, &'static str) {
    match level {
        1 => ("author", "author"),
        2 => ("year", "year"),
        3 => ("edition", "edition"),
        _ => {
            let k = level - SCOPE_LEVELS - 1;
            (CODE_COLUMNS[k], DESCR_COLUMNS[k])
        }
    }
}

/// `col_1 = ? AND col_2 = ? AND ... AND ` (empty for the root).
fn ancestor_where(segments: &[&str]) -> String {
    let mut out = String::new();
    for i in 0..segments.len() {
        let (code_col, _) = level_columns(i + 1);
        out.push_str(code_col);
        out.push_str(" = ? AND ");
    }
    out
}

fn split_key(parent_key: &str) -> Vec<&str> {
    if parent_key.is_empty() {
        Vec::new()
    } else {
        parent_key.split(KEY_DELIMITER).collect()
    }
}

fn compose_key(parent_key: &str, local: &str) -> String {
    if parent_key.is_empty() {
        local.to_string()
    } else {
        format!("{parent_key}{KEY_DELIMITER}{local}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{CatalogEntry, ClassificationPath};

    fn entry(code: &str, scope: (&str, &str, &str), levels: &[&str]) -> CatalogEntry {
        let mut pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] =
            Default::default();
        for (i, c) in levels.iter().enumerate() {
            pairs[i] = (Some((*c).to_string()), Some(format!("descr {c}")));
        }
        CatalogEntry {
            entry_code: code.to_string(),
            author: Some(scope.0.to_string()),
            year: Some(scope.1.to_string()),
            edition: Some(scope.2.to_string()),
            description: format!("entry {code}"),
            path: ClassificationPath::from_pairs(pairs).unwrap(),
            ..Default::default()
        }
    }

    fn seeded() -> SqliteStorage {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        let scope = ("RL", "25", "1");
        s.insert_entries(&[
            entry("E.1", scope, &["1C", "01", "010"]),
            entry("E.2", scope, &["1C", "01", "020"]),
            entry("E.3", scope, &["1C", "02"]),
            entry("E.4", scope, &["2C"]),
            entry("E.5", ("RL", "24", "1"), &["1C"]),
        ])
        .unwrap();
        s
    }

    #[test]
    fn roots_are_distinct_scope_values() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        let roots = nav.roots().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].code, "RL");
        assert_eq!(roots[0].level, 1);
        assert!(roots[0].has_children);
    }

    #[test]
    fn scope_children_are_compound_keyed_and_ordered() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        let years = nav.children_of(1, "RL").unwrap();
        let codes: Vec<_> = years.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["RL|24", "RL|25"]);
        assert!(years.iter().all(|n| n.level == 2));
    }

    #[test]
    fn classification_children_group_distinct_codes() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        // Level 4 = classification level 1.
        let branches = nav.children_of(3, "RL|25|1").unwrap();
        let codes: Vec<_> = branches.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["RL|25|1|1C", "RL|25|1|2C"]);
        assert_eq!(branches[0].description, "descr 1C");

        let sub = nav.children_of(4, "RL|25|1|1C").unwrap();
        let codes: Vec<_> = sub.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["RL|25|1|1C|01", "RL|25|1|1C|02"]);
    }

    #[test]
    fn children_match_only_their_ancestor_segments() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        // The 24 edition only carries one level-1C entry and nothing deeper.
        let under_24 = nav.children_of(3, "RL|24|1").unwrap();
        assert_eq!(under_24.len(), 1);
        assert_eq!(under_24[0].code, "RL|24|1|1C");
    }

    #[test]
    fn leaf_fallback_returns_entries_when_branch_terminates() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        // E.3's branch stops at classification level 2.
        let leaves = nav.children_of(5, "RL|25|1|1C|02").unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].code, "E.3");
        assert_eq!(leaves[0].description, "entry E.3");
        assert_eq!(leaves[0].level, LEAF_LEVEL);
        assert!(!leaves[0].has_children);
    }

    #[test]
    fn leaf_fallback_returns_all_matching_entries() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        let scope = ("RL", "25", "1");
        s.insert_entries(&[
            entry("L.1", scope, &["A", "B"]),
            entry("L.2", scope, &["A", "B"]),
            entry("L.3", scope, &["A", "B"]),
            entry("L.4", scope, &["A", "B"]),
        ])
        .unwrap();
        let nav = NavigationEngine::new(&s);
        let leaves = nav.children_of(5, "RL|25|1|A|B").unwrap();
        let codes: Vec<_> = leaves.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["L.1", "L.2", "L.3", "L.4"]);
        assert!(leaves.iter().all(|n| !n.has_children));
    }

    #[test]
    fn out_of_range_level_is_empty_not_error() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        assert!(nav.children_of(-1, "").unwrap().is_empty());
        assert!(nav.children_of(LEAF_LEVEL as i64, "whatever").unwrap().is_empty());
        assert!(nav.children_of(99, "x").unwrap().is_empty());
    }

    #[test]
    fn deepest_level_expands_straight_to_entries() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        let levels: Vec<String> = (1..=CLASSIFICATION_LEVELS).map(|k| format!("L{k}")).collect();
        let refs: Vec<&str> = levels.iter().map(String::as_str).collect();
        s.insert_entries(&[entry("DEEP.1", ("RL", "25", "1"), &refs)])
            .unwrap();
        let nav = NavigationEngine::new(&s);

        let key = format!("RL|25|1|{}", levels.join("|"));
        let leaves = nav.children_of(MAX_LEVEL as i64, &key).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].code, "DEEP.1");
        assert!(!leaves[0].has_children);
    }

    #[test]
    fn segment_count_mismatch_is_empty() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        assert!(nav.children_of(2, "RL").unwrap().is_empty());
        assert!(nav.children_of(1, "RL|25").unwrap().is_empty());
    }

    #[test]
    fn unknown_parent_yields_empty() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        assert!(nav.children_of(1, "NOPE").unwrap().is_empty());
    }

    #[test]
    fn expansion_is_deterministic() {
        let s = seeded();
        let nav = NavigationEngine::new(&s);
        let a = nav.children_of(3, "RL|25|1").unwrap();
        let b = nav.children_of(3, "RL|25|1").unwrap();
        assert_eq!(a, b);
    }
}
