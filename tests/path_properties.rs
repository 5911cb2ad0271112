//! Property-based tests for classification path invariants.

use cost_catalog_search::model::types::{
    CLASSIFICATION_LEVELS, ClassificationPath, PathError,
};
use proptest::prelude::*;

fn arb_code() -> impl Strategy<Value = String> {
    "[A-Z0-9]{1,4}".prop_map(|s| s)
}

/// A contiguous prefix of populated levels.
fn arb_contiguous_pairs()
-> impl Strategy<Value = [(Option<String>, Option<String>); CLASSIFICATION_LEVELS]> {
    (
        0..=CLASSIFICATION_LEVELS,
        prop::collection::vec(arb_code(), CLASSIFICATION_LEVELS),
    )
        .prop_map(|(depth, codes)| {
            let mut pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] =
                Default::default();
            for (k, code) in codes.into_iter().enumerate().take(depth) {
                pairs[k] = (Some(code.clone()), Some(format!("descr {code}")));
            }
            pairs
        })
}

proptest! {
    #[test]
    fn contiguous_prefixes_are_always_accepted(pairs in arb_contiguous_pairs()) {
        let expected = pairs.iter().filter(|(c, _)| c.is_some()).count();
        let path = ClassificationPath::from_pairs(pairs).unwrap();
        prop_assert_eq!(path.depth(), expected);
        for (i, level) in path.levels().iter().enumerate() {
            prop_assert!(!level.code.is_empty());
            prop_assert_eq!(path.level(i + 1), Some(level));
        }
    }

    #[test]
    fn any_single_gap_is_rejected(
        pairs in arb_contiguous_pairs(),
        hole in 0..CLASSIFICATION_LEVELS - 1,
    ) {
        let depth = pairs.iter().filter(|(c, _)| c.is_some()).count();
        prop_assume!(hole + 1 < depth);
        let mut holed = pairs;
        holed[hole] = (None, None);

        let err = ClassificationPath::from_pairs(holed).unwrap_err();
        prop_assert_eq!(err, PathError::Gap { level: hole + 2, gap: hole + 1 });
    }

    #[test]
    fn from_columns_truncates_at_the_first_hole(
        pairs in arb_contiguous_pairs(),
        hole in 0..CLASSIFICATION_LEVELS - 1,
    ) {
        let depth = pairs.iter().filter(|(c, _)| c.is_some()).count();
        let mut holed = pairs;
        holed[hole] = (None, None);

        let path = ClassificationPath::from_columns(holed);
        prop_assert_eq!(path.depth(), depth.min(hole));
    }

    #[test]
    fn blank_codes_count_as_unpopulated(code in arb_code()) {
        let mut pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] =
            Default::default();
        pairs[0] = (Some(code), None);
        pairs[1] = (Some("  ".to_string()), Some("stray".to_string()));

        let path = ClassificationPath::from_pairs(pairs).unwrap();
        prop_assert_eq!(path.depth(), 1);
    }
}
