//! Merge policy for concurrent writes to the same cell/row key.

use std::collections::BTreeSet;

use shared_types::LabelId;

/// Combines the label ids already stored under a key with an incoming write.
///
/// Implementations must be commutative and idempotent: replaying the same
/// write twice, or applying two writes in either order, yields the same set.
pub trait LabelMergePolicy: Send + Sync {
    fn merge(&self, existing: &BTreeSet<LabelId>, incoming: &BTreeSet<LabelId>)
        -> BTreeSet<LabelId>;
}

/// Set union. Never loses a label, cannot express concurrent removal.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnionMergePolicy;

impl LabelMergePolicy for UnionMergePolicy {
    fn merge(
        &self,
        existing: &BTreeSet<LabelId>,
        incoming: &BTreeSet<LabelId>,
    ) -> BTreeSet<LabelId> {
        merge_label_ids(existing, incoming)
    }
}

pub fn merge_label_ids(
    existing: &BTreeSet<LabelId>,
    incoming: &BTreeSet<LabelId>,
) -> BTreeSet<LabelId> {
    existing.union(incoming).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<LabelId> {
        ids.iter().map(|id| LabelId::from(*id)).collect()
    }

    #[test]
    fn test_union_is_commutative() {
        let a = set(&["urgent", "todo"]);
        let b = set(&["positive"]);
        assert_eq!(merge_label_ids(&a, &b), merge_label_ids(&b, &a));
    }

    #[test]
    fn test_union_is_idempotent() {
        let a = set(&["urgent"]);
        let once = merge_label_ids(&a, &a);
        assert_eq!(once, a);
        assert_eq!(merge_label_ids(&once, &a), a);
    }

    #[test]
    fn test_union_has_no_duplicates() {
        let merged = UnionMergePolicy.merge(&set(&["a", "b"]), &set(&["b", "c"]));
        assert_eq!(merged, set(&["a", "b", "c"]));
        assert_eq!(merged.len(), 3);
    }
}
