//! Domain entity structs.

use serde::Serialize;
use thiserror::Error;

/// Maximum number of classification levels a catalog entry can carry.
pub const CLASSIFICATION_LEVELS: usize = 11;

/// One level of an entry's classification path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathLevel {
    pub code: String,
    pub description: String,
}

/// Error raised when a classification path violates the prefix-contiguity
/// rule (a populated level below an unpopulated one).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("classification level {level} is populated but level {gap} is empty")]
    Gap { level: usize, gap: usize },
}

/// Ordered, prefix-contiguous classification path of up to
/// [`CLASSIFICATION_LEVELS`] levels.
///
/// The source format declares one pair of fields per level; entries populate
/// a prefix of them. This type holds only the populated prefix, so
/// "level k is populated" is exactly `k <= depth()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClassificationPath(Vec<PathLevel>);

impl ClassificationPath {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a path from per-level (code, description) pairs as they appear
    /// in the source document. A level without a code is unpopulated; any
    /// populated level after an unpopulated one is a contiguity violation.
    /// A description without a code is dropped.
    pub fn from_pairs(
        pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS],
    ) -> Result<Self, PathError> {
        let mut levels = Vec::new();
        let mut first_gap: Option<usize> = None;
        for (i, (code, description)) in pairs.into_iter().enumerate() {
            match code.filter(|c| !c.trim().is_empty()) {
                Some(code) => {
                    if let Some(gap) = first_gap {
                        return Err(PathError::Gap { level: i + 1, gap });
                    }
                    levels.push(PathLevel {
                        code,
                        description: description.unwrap_or_default(),
                    });
                }
                None => {
                    first_gap.get_or_insert(i + 1);
                }
            }
        }
        Ok(Self(levels))
    }

    /// Rebuild a path from stored columns, truncating at the first
    /// unpopulated level. Stored rows were validated at ingestion time, so
    /// truncation is the identity for them.
    pub fn from_columns(
        pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS],
    ) -> Self {
        let mut levels = Vec::new();
        for (code, description) in pairs {
            match code.filter(|c| !c.trim().is_empty()) {
                Some(code) => levels.push(PathLevel {
                    code,
                    description: description.unwrap_or_default(),
                }),
                None => break,
            }
        }
        Self(levels)
    }

    /// Number of populated levels.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn levels(&self) -> &[PathLevel] {
        &self.0
    }

    /// 1-based level lookup.
    pub fn level(&self, k: usize) -> Option<&PathLevel> {
        if k == 0 {
            return None;
        }
        self.0.get(k - 1)
    }
}

/// One priced catalog line item (source vocabulary: `voce`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogEntry {
    /// Unique textual code (`codice_voce`).
    pub entry_code: String,
    /// Provenance scope (`riferimenti_voce`): publisher, year, edition.
    pub author: Option<String>,
    pub year: Option<String>,
    pub edition: Option<String>,
    pub unit_price: f64,
    pub unit_of_measure: String,
    /// Price excluding surcharge (`importo_senza_sgui_voce`).
    pub price_without_surcharge: f64,
    /// Resource/labor ratio (`rapporto_RU_voce`).
    pub labor_ratio: f64,
    pub resource_type: String,
    /// Short description (`declaratoria_voce`).
    pub description: String,
    /// Detailed description (`declaratoria_voce_dettaglio`).
    pub detail_description: String,
    pub path: ClassificationPath,
    pub resources: Vec<ResourceLine>,
}

/// One resource consumed by a catalog entry (source vocabulary: `risorsa`).
///
/// `amount` is taken verbatim from the source, never recomputed from
/// quantity and price.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceLine {
    pub code: String,
    pub unit_of_measure: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub resource_type: String,
    pub description: String,
}

/// Query-time projection of one navigable point in the hierarchy.
///
/// `code` below the root is a compound key: ancestor segments joined by the
/// tree delimiter, so a node's code alone resolves its full ancestry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub code: String,
    pub description: String,
    pub level: usize,
    pub has_children: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(
        codes: &[(usize, &str)],
    ) -> [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] {
        let mut out: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] =
            Default::default();
        for &(level, code) in codes {
            out[level - 1] = (Some(code.to_string()), Some(format!("descr {code}")));
        }
        out
    }

    #[test]
    fn contiguous_prefix_is_accepted() {
        let path =
            ClassificationPath::from_pairs(pairs(&[(1, "1C"), (2, "01"), (3, "010")])).unwrap();
        assert_eq!(path.depth(), 3);
        assert_eq!(path.level(1).unwrap().code, "1C");
        assert_eq!(path.level(3).unwrap().description, "descr 010");
        assert!(path.level(4).is_none());
    }

    #[test]
    fn gap_is_rejected() {
        let err = ClassificationPath::from_pairs(pairs(&[(1, "1C"), (3, "010")])).unwrap_err();
        assert_eq!(err, PathError::Gap { level: 3, gap: 2 });
    }

    #[test]
    fn blank_code_counts_as_unpopulated() {
        let mut p = pairs(&[(1, "1C")]);
        p[1] = (Some("  ".into()), None);
        p[2] = (Some("010".into()), None);
        assert!(ClassificationPath::from_pairs(p).is_err());
    }

    #[test]
    fn description_without_code_is_dropped() {
        let mut p = pairs(&[(1, "1C")]);
        p[1] = (None, Some("orphan".into()));
        let path = ClassificationPath::from_pairs(p).unwrap();
        assert_eq!(path.depth(), 1);
    }

    #[test]
    fn from_columns_truncates_at_first_hole() {
        let path = ClassificationPath::from_columns(pairs(&[(1, "1C"), (3, "010")]));
        assert_eq!(path.depth(), 1);
    }

    #[test]
    fn empty_path_has_depth_zero() {
        assert_eq!(ClassificationPath::empty().depth(), 0);
        assert!(ClassificationPath::empty().is_empty());
    }
}
