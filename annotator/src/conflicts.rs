//! Conflict detection and resolution over cell and row label records.
//!
//! Detection is a pure function of current state: it reads each record's
//! per-user contributions and reports every key where two or more users hold
//! differing label sets. Once the sets converge the conflict is gone, whether
//! or not anyone resolved it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use shared_types::{
    CellLabel, ConflictRecord, ConflictTarget, LabelId, RowLabel, UserContribution,
};

use crate::annotations::{AnnotationStore, NewCellLabel};

/// Latest contributed set per user, keyed by conflict target.
type Contributions = BTreeMap<ConflictTarget, BTreeMap<String, (DateTime<Utc>, BTreeSet<LabelId>)>>;

fn collect(
    groups: &mut Contributions,
    target: ConflictTarget,
    timestamp: DateTime<Utc>,
    writer: &str,
    label_ids: &BTreeSet<LabelId>,
    contributions: &BTreeMap<String, BTreeSet<LabelId>>,
) {
    let group = groups.entry(target).or_default();
    let mut offer = |user_id: &str, set: &BTreeSet<LabelId>| {
        let superseded = group
            .get(user_id)
            .is_some_and(|(seen, _)| *seen > timestamp);
        if !superseded {
            group.insert(user_id.to_string(), (timestamp, set.clone()));
        }
    };

    // Records written before per-user attribution carry only the writer.
    if contributions.is_empty() {
        offer(writer, label_ids);
    } else {
        for (user_id, set) in contributions {
            offer(user_id, set);
        }
    }
}

pub fn detect_conflicts<'a>(
    cells: impl IntoIterator<Item = &'a CellLabel>,
    rows: impl IntoIterator<Item = &'a RowLabel>,
) -> Vec<ConflictRecord> {
    let mut groups = Contributions::new();

    for cell in cells {
        collect(
            &mut groups,
            ConflictTarget::Cell {
                cell_id: cell.cell_id.clone(),
            },
            cell.timestamp,
            &cell.user_id,
            &cell.label_ids,
            &cell.contributions,
        );
    }
    for row in rows {
        collect(
            &mut groups,
            ConflictTarget::Row {
                row_index: row.row_index,
            },
            row.timestamp,
            &row.user_id,
            &row.label_ids,
            &row.contributions,
        );
    }

    groups
        .into_iter()
        .filter_map(|(target, users)| {
            if users.len() < 2 {
                return None;
            }
            let distinct: BTreeSet<&BTreeSet<LabelId>> = users.values().map(|(_, set)| set).collect();
            if distinct.len() < 2 {
                return None;
            }
            Some(ConflictRecord {
                target,
                contributions: users
                    .into_iter()
                    .map(|(user_id, (_, label_ids))| UserContribution { user_id, label_ids })
                    .collect(),
                resolved_label_ids: None,
                resolved_by: None,
                resolved_at: None,
            })
        })
        .collect()
}

/// Write `winning` back as the record's label set and attribute it to the
/// store's current user.
///
/// Winners are added before losers are removed, so the record only
/// disappears when `winning` is empty.
pub fn resolve_conflict(
    store: &mut AnnotationStore,
    record: &ConflictRecord,
    winning: impl IntoIterator<Item = LabelId>,
) -> ConflictRecord {
    let winning: BTreeSet<LabelId> = winning.into_iter().collect();

    match &record.target {
        ConflictTarget::Cell { cell_id } => {
            let current = store
                .cell_label(cell_id)
                .map(|cell| (cell.row_index, cell.col_index, cell.label_ids.clone()));
            let coordinates = current
                .as_ref()
                .map(|(row, col, _)| (*row, *col))
                .or_else(|| cell_id.coordinates());
            let existing = current.map(|(_, _, ids)| ids).unwrap_or_default();

            match coordinates {
                Some((row_index, col_index)) if !winning.is_empty() => {
                    store.add_cell_label(NewCellLabel {
                        cell_id: cell_id.clone(),
                        row_index,
                        col_index,
                        label_ids: winning.iter().cloned().collect(),
                    });
                }
                None if !winning.is_empty() => {
                    tracing::warn!(cell_id = %cell_id, "Cannot place resolved labels on unaddressable cell");
                }
                _ => {}
            }
            for loser in existing.difference(&winning) {
                store.remove_cell_label(cell_id, loser);
            }
        }
        ConflictTarget::Row { row_index } => {
            let existing = store
                .row_label(*row_index)
                .map(|row| row.label_ids.clone())
                .unwrap_or_default();
            store.add_row_label(*row_index, winning.iter().cloned());
            for loser in existing.difference(&winning) {
                store.remove_row_label(*row_index, loser);
            }
        }
    }
    store.collapse_contributions(&record.target);

    tracing::info!(
        conflict = %record.target,
        resolved_by = %store.user_id(),
        labels = winning.len(),
        "Resolved annotation conflict"
    );

    ConflictRecord {
        resolved_label_ids: Some(winning),
        resolved_by: Some(store.user_id().to_string()),
        resolved_at: Some(Utc::now()),
        ..record.clone()
    }
}
