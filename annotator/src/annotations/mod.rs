//! AnnotationStore - in-memory authority for labels, cell labels and row labels
//! of one project.
//!
//! All mutation goes through `&mut self` methods that update state
//! synchronously and then stage the full project snapshot on the
//! [`WriteBehind`] buffer. Persistence and remote propagation happen later,
//! when the buffer flushes.
//!
//! # Invariants
//!
//! - At most one [`CellLabel`] per cell id and one [`RowLabel`] per row index.
//! - Writes to an existing key merge through the [`LabelMergePolicy`] (union
//!   by default); they never overwrite.
//! - A record whose label set becomes empty is removed immediately.
//! - Each record's `contributions` holds the latest set per contributing
//!   user; removing a label id from a record removes it from every
//!   contribution.

mod merge_policy;
mod write_behind;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use shared_types::{
    CellId, CellLabel, ConflictRecord, ConflictTarget, Label, LabelId, ProjectAnnotations,
    RowLabel,
};

pub use merge_policy::{merge_label_ids, LabelMergePolicy, UnionMergePolicy};
pub use write_behind::{OperationSink, WriteBehind, DEFAULT_FLUSH_INTERVAL};

use crate::conflicts;

/// Cell write request
#[derive(Debug, Clone, PartialEq)]
pub struct NewCellLabel {
    pub cell_id: CellId,
    pub row_index: u32,
    pub col_index: u32,
    pub label_ids: Vec<LabelId>,
}

impl NewCellLabel {
    pub fn at(row_index: u32, col_index: u32, label_ids: impl IntoIterator<Item = LabelId>) -> Self {
        Self {
            cell_id: CellId::new(row_index, col_index),
            row_index,
            col_index,
            label_ids: label_ids.into_iter().collect(),
        }
    }
}

/// Partial label edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub description: Option<Option<String>>,
    pub parent_id: Option<Option<LabelId>>,
    pub tags: Option<Vec<String>>,
}

/// Shared shape of cell and row records.
trait LabelledRecord {
    fn label_ids_mut(&mut self) -> &mut BTreeSet<LabelId>;
    fn contributions_mut(&mut self) -> &mut BTreeMap<String, BTreeSet<LabelId>>;

    /// Remove `ids` everywhere in the record. Returns whether anything changed.
    fn strip(&mut self, ids: &BTreeSet<LabelId>) -> bool {
        let before = self.label_ids_mut().len();
        self.label_ids_mut().retain(|id| !ids.contains(id));
        let mut changed = before != self.label_ids_mut().len();
        for set in self.contributions_mut().values_mut() {
            let before = set.len();
            set.retain(|id| !ids.contains(id));
            changed |= before != set.len();
        }
        self.contributions_mut().retain(|_, set| !set.is_empty());
        changed
    }

    /// Replace any of `sources` with `target`. Returns whether anything changed.
    fn replace(&mut self, sources: &BTreeSet<LabelId>, target: &LabelId) -> bool {
        let mut changed = replace_in(self.label_ids_mut(), sources, target);
        for set in self.contributions_mut().values_mut() {
            changed |= replace_in(set, sources, target);
        }
        changed
    }
}

fn replace_in(set: &mut BTreeSet<LabelId>, sources: &BTreeSet<LabelId>, target: &LabelId) -> bool {
    let before = set.len();
    set.retain(|id| !sources.contains(id));
    if set.len() == before {
        return false;
    }
    set.insert(target.clone());
    true
}

impl LabelledRecord for CellLabel {
    fn label_ids_mut(&mut self) -> &mut BTreeSet<LabelId> {
        &mut self.label_ids
    }

    fn contributions_mut(&mut self) -> &mut BTreeMap<String, BTreeSet<LabelId>> {
        &mut self.contributions
    }
}

impl LabelledRecord for RowLabel {
    fn label_ids_mut(&mut self) -> &mut BTreeSet<LabelId> {
        &mut self.label_ids
    }

    fn contributions_mut(&mut self) -> &mut BTreeMap<String, BTreeSet<LabelId>> {
        &mut self.contributions
    }
}

pub struct AnnotationStore {
    project_id: String,
    user_id: String,
    labels: BTreeMap<LabelId, Label>,
    cell_labels: BTreeMap<CellId, CellLabel>,
    row_labels: BTreeMap<u32, RowLabel>,
    merge_policy: Box<dyn LabelMergePolicy>,
    write_behind: Option<WriteBehind>,
}

impl std::fmt::Debug for AnnotationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationStore")
            .field("project_id", &self.project_id)
            .field("user_id", &self.user_id)
            .field("labels", &self.labels.len())
            .field("cell_labels", &self.cell_labels.len())
            .field("row_labels", &self.row_labels.len())
            .finish_non_exhaustive()
    }
}

impl AnnotationStore {
    pub fn new(project_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
            labels: BTreeMap::new(),
            cell_labels: BTreeMap::new(),
            row_labels: BTreeMap::new(),
            merge_policy: Box::new(UnionMergePolicy),
            write_behind: None,
        }
    }

    /// Seed from a stored snapshot. Empty records in the snapshot are dropped.
    pub fn from_snapshot(snapshot: ProjectAnnotations, user_id: impl Into<String>) -> Self {
        let mut store = Self::new(snapshot.project_id, user_id);
        store.labels = snapshot
            .labels
            .into_iter()
            .map(|label| (label.id.clone(), label))
            .collect();
        store.cell_labels = snapshot
            .cell_labels
            .into_iter()
            .filter(|cell| !cell.label_ids.is_empty())
            .map(|cell| (cell.cell_id.clone(), cell))
            .collect();
        store.row_labels = snapshot
            .row_labels
            .into_iter()
            .filter(|row| !row.label_ids.is_empty())
            .map(|row| (row.row_index, row))
            .collect();
        store
    }

    pub fn with_write_behind(mut self, write_behind: WriteBehind) -> Self {
        self.write_behind = Some(write_behind);
        self
    }

    pub fn with_merge_policy(mut self, policy: Box<dyn LabelMergePolicy>) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Attribute subsequent writes to `user_id`.
    pub fn set_user(&mut self, user_id: impl Into<String>) {
        self.user_id = user_id.into();
    }

    pub fn write_behind(&self) -> Option<&WriteBehind> {
        self.write_behind.as_ref()
    }

    fn schedule_save(&self) {
        if let Some(write_behind) = &self.write_behind {
            write_behind.stage(self.snapshot());
        }
    }

    // ------------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------------

    /// Insert a new label. Returns false if the id is already taken.
    pub fn add_label(&mut self, label: Label) -> bool {
        if self.labels.contains_key(&label.id) {
            tracing::debug!(label_id = %label.id, "Label already exists; not adding");
            return false;
        }
        self.labels.insert(label.id.clone(), label);
        self.schedule_save();
        true
    }

    pub fn update_label(&mut self, id: &LabelId, update: LabelUpdate) -> bool {
        let Some(label) = self.labels.get_mut(id) else {
            return false;
        };
        if let Some(name) = update.name {
            label.name = name;
        }
        if let Some(color) = update.color {
            label.color = color;
        }
        if let Some(description) = update.description {
            label.description = description;
        }
        if let Some(parent_id) = update.parent_id {
            label.parent_id = parent_id;
        }
        if let Some(tags) = update.tags {
            label.tags = tags;
        }
        label.updated_at = Utc::now();
        self.schedule_save();
        true
    }

    /// Delete a label and strip it from every cell and row record.
    pub fn delete_label(&mut self, id: &LabelId) -> bool {
        let existed = self.labels.remove(id).is_some();
        let ids = BTreeSet::from([id.clone()]);
        let stripped = self.strip_everywhere(&ids);
        if existed || stripped {
            self.schedule_save();
        }
        existed
    }

    /// Fold `source_ids` into `target_id`.
    ///
    /// No-op when the target is unknown or is itself one of the sources.
    pub fn merge_labels(&mut self, source_ids: &[LabelId], target_id: &LabelId) -> bool {
        if !self.labels.contains_key(target_id) || source_ids.contains(target_id) {
            tracing::debug!(target_id = %target_id, "Ignoring invalid label merge");
            return false;
        }
        let sources: BTreeSet<LabelId> = source_ids.iter().cloned().collect();

        let mut changed = false;
        for cell in self.cell_labels.values_mut() {
            changed |= cell.replace(&sources, target_id);
        }
        for row in self.row_labels.values_mut() {
            changed |= row.replace(&sources, target_id);
        }
        for source in &sources {
            changed |= self.labels.remove(source).is_some();
        }

        if changed {
            self.schedule_save();
        }
        changed
    }

    fn strip_everywhere(&mut self, ids: &BTreeSet<LabelId>) -> bool {
        let mut changed = false;
        for cell in self.cell_labels.values_mut() {
            changed |= cell.strip(ids);
        }
        for row in self.row_labels.values_mut() {
            changed |= row.strip(ids);
        }
        self.cell_labels.retain(|_, cell| !cell.label_ids.is_empty());
        self.row_labels.retain(|_, row| !row.label_ids.is_empty());
        changed
    }

    // ------------------------------------------------------------------------
    // Cell labels
    // ------------------------------------------------------------------------

    /// Union `label_ids` into the cell, stamping the current user and time.
    pub fn add_cell_label(&mut self, input: NewCellLabel) {
        let incoming: BTreeSet<LabelId> = input.label_ids.into_iter().collect();
        if incoming.is_empty() {
            return;
        }
        let now = Utc::now();
        let user_id = self.user_id.clone();

        match self.cell_labels.get_mut(&input.cell_id) {
            Some(cell) => {
                cell.label_ids = self.merge_policy.merge(&cell.label_ids, &incoming);
                let previous = cell.contributions.remove(&user_id).unwrap_or_default();
                cell.contributions
                    .insert(user_id.clone(), self.merge_policy.merge(&previous, &incoming));
                cell.user_id = user_id;
                cell.timestamp = now;
            }
            None => {
                self.cell_labels.insert(
                    input.cell_id.clone(),
                    CellLabel {
                        cell_id: input.cell_id,
                        row_index: input.row_index,
                        col_index: input.col_index,
                        label_ids: incoming.clone(),
                        user_id: user_id.clone(),
                        timestamp: now,
                        contributions: BTreeMap::from([(user_id, incoming)]),
                    },
                );
            }
        }
        self.schedule_save();
    }

    /// Remove one label from a cell; the record disappears once empty.
    pub fn remove_cell_label(&mut self, cell_id: &CellId, label_id: &LabelId) -> bool {
        let Some(cell) = self.cell_labels.get_mut(cell_id) else {
            return false;
        };
        if !cell.strip(&BTreeSet::from([label_id.clone()])) {
            return false;
        }
        cell.user_id = self.user_id.clone();
        cell.timestamp = Utc::now();
        if cell.label_ids.is_empty() {
            self.cell_labels.remove(cell_id);
        }
        self.schedule_save();
        true
    }

    // ------------------------------------------------------------------------
    // Row labels
    // ------------------------------------------------------------------------

    pub fn add_row_label(&mut self, row_index: u32, label_ids: impl IntoIterator<Item = LabelId>) {
        let incoming: BTreeSet<LabelId> = label_ids.into_iter().collect();
        if incoming.is_empty() {
            return;
        }
        let now = Utc::now();
        let user_id = self.user_id.clone();

        match self.row_labels.get_mut(&row_index) {
            Some(row) => {
                row.label_ids = self.merge_policy.merge(&row.label_ids, &incoming);
                let previous = row.contributions.remove(&user_id).unwrap_or_default();
                row.contributions
                    .insert(user_id.clone(), self.merge_policy.merge(&previous, &incoming));
                row.user_id = user_id;
                row.timestamp = now;
            }
            None => {
                self.row_labels.insert(
                    row_index,
                    RowLabel {
                        row_index,
                        label_ids: incoming.clone(),
                        user_id: user_id.clone(),
                        timestamp: now,
                        contributions: BTreeMap::from([(user_id, incoming)]),
                    },
                );
            }
        }
        self.schedule_save();
    }

    pub fn remove_row_label(&mut self, row_index: u32, label_id: &LabelId) -> bool {
        let Some(row) = self.row_labels.get_mut(&row_index) else {
            return false;
        };
        if !row.strip(&BTreeSet::from([label_id.clone()])) {
            return false;
        }
        row.user_id = self.user_id.clone();
        row.timestamp = Utc::now();
        if row.label_ids.is_empty() {
            self.row_labels.remove(&row_index);
        }
        self.schedule_save();
        true
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn label(&self, id: &LabelId) -> Option<&Label> {
        self.labels.get(id)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn cell_label(&self, cell_id: &CellId) -> Option<&CellLabel> {
        self.cell_labels.get(cell_id)
    }

    pub fn cell_labels(&self) -> impl Iterator<Item = &CellLabel> {
        self.cell_labels.values()
    }

    pub fn row_label(&self, row_index: u32) -> Option<&RowLabel> {
        self.row_labels.get(&row_index)
    }

    pub fn row_labels(&self) -> impl Iterator<Item = &RowLabel> {
        self.row_labels.values()
    }

    /// Usage count per label id, cells and rows counted independently.
    /// Known labels that are unused report zero.
    pub fn label_stats(&self) -> BTreeMap<LabelId, usize> {
        let mut stats: BTreeMap<LabelId, usize> =
            self.labels.keys().map(|id| (id.clone(), 0)).collect();
        let used = self
            .cell_labels
            .values()
            .flat_map(|cell| cell.label_ids.iter())
            .chain(self.row_labels.values().flat_map(|row| row.label_ids.iter()));
        for id in used {
            *stats.entry(id.clone()).or_insert(0) += 1;
        }
        stats
    }

    pub fn snapshot(&self) -> ProjectAnnotations {
        ProjectAnnotations {
            project_id: self.project_id.clone(),
            labels: self.labels.values().cloned().collect(),
            cell_labels: self.cell_labels.values().cloned().collect(),
            row_labels: self.row_labels.values().cloned().collect(),
            saved_at: Utc::now(),
        }
    }

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        conflicts::detect_conflicts(self.cell_labels.values(), self.row_labels.values())
    }

    // ------------------------------------------------------------------------
    // Replica merge
    // ------------------------------------------------------------------------

    /// Fold another replica's snapshot into local state with the merge policy.
    pub fn merge_remote(&mut self, remote: &ProjectAnnotations) {
        let mut changed = false;

        for label in &remote.labels {
            match self.labels.get(&label.id) {
                Some(local) if local.updated_at >= label.updated_at => {}
                _ => {
                    self.labels.insert(label.id.clone(), label.clone());
                    changed = true;
                }
            }
        }

        for remote_cell in remote.cell_labels.iter().filter(|c| !c.label_ids.is_empty()) {
            match self.cell_labels.get_mut(&remote_cell.cell_id) {
                Some(cell) => {
                    let before = (cell.label_ids.clone(), cell.contributions.clone());
                    cell.label_ids = self.merge_policy.merge(&cell.label_ids, &remote_cell.label_ids);
                    merge_contributions(
                        self.merge_policy.as_ref(),
                        &mut cell.contributions,
                        &remote_cell.contributions,
                    );
                    if remote_cell.timestamp > cell.timestamp {
                        cell.timestamp = remote_cell.timestamp;
                        cell.user_id = remote_cell.user_id.clone();
                    }
                    changed |= before != (cell.label_ids.clone(), cell.contributions.clone());
                }
                None => {
                    self.cell_labels
                        .insert(remote_cell.cell_id.clone(), remote_cell.clone());
                    changed = true;
                }
            }
        }

        for remote_row in remote.row_labels.iter().filter(|r| !r.label_ids.is_empty()) {
            match self.row_labels.get_mut(&remote_row.row_index) {
                Some(row) => {
                    let before = (row.label_ids.clone(), row.contributions.clone());
                    row.label_ids = self.merge_policy.merge(&row.label_ids, &remote_row.label_ids);
                    merge_contributions(
                        self.merge_policy.as_ref(),
                        &mut row.contributions,
                        &remote_row.contributions,
                    );
                    if remote_row.timestamp > row.timestamp {
                        row.timestamp = remote_row.timestamp;
                        row.user_id = remote_row.user_id.clone();
                    }
                    changed |= before != (row.label_ids.clone(), row.contributions.clone());
                }
                None => {
                    self.row_labels.insert(remote_row.row_index, remote_row.clone());
                    changed = true;
                }
            }
        }

        if changed {
            tracing::debug!(project_id = %self.project_id, "Merged remote annotations");
            self.schedule_save();
        }
    }

    /// Replace every contribution on the conflict's record with a single
    /// entry for the current user holding the record's label set.
    pub(crate) fn collapse_contributions(&mut self, target: &ConflictTarget) {
        let user_id = self.user_id.clone();
        match target {
            ConflictTarget::Cell { cell_id } => {
                if let Some(cell) = self.cell_labels.get_mut(cell_id) {
                    cell.contributions = BTreeMap::from([(user_id, cell.label_ids.clone())]);
                }
            }
            ConflictTarget::Row { row_index } => {
                if let Some(row) = self.row_labels.get_mut(row_index) {
                    row.contributions = BTreeMap::from([(user_id, row.label_ids.clone())]);
                }
            }
        }
        self.schedule_save();
    }
}

fn merge_contributions(
    policy: &dyn LabelMergePolicy,
    local: &mut BTreeMap<String, BTreeSet<LabelId>>,
    remote: &BTreeMap<String, BTreeSet<LabelId>>,
) {
    for (user_id, remote_set) in remote {
        let merged = match local.get(user_id) {
            Some(local_set) => policy.merge(local_set, remote_set),
            None => remote_set.clone(),
        };
        local.insert(user_id.clone(), merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<LabelId> {
        values.iter().map(|v| LabelId::from(*v)).collect()
    }

    fn set(values: &[&str]) -> BTreeSet<LabelId> {
        values.iter().map(|v| LabelId::from(*v)).collect()
    }

    fn store_with_labels(names: &[&str]) -> AnnotationStore {
        let mut store = AnnotationStore::new("project-1", "alice");
        for name in names {
            store.add_label(Label::new(*name, "#888").with_id(*name));
        }
        store
    }

    #[test]
    fn test_add_cell_label_unions_into_existing_record() {
        let mut store = store_with_labels(&["a", "b", "c"]);
        store.add_cell_label(NewCellLabel::at(2, 1, ids(&["a", "b"])));
        store.add_cell_label(NewCellLabel::at(2, 1, ids(&["b", "c"])));
        store.add_cell_label(NewCellLabel::at(2, 1, ids(&["a"])));

        let cell = store.cell_label(&CellId::new(2, 1)).unwrap();
        assert_eq!(cell.label_ids, set(&["a", "b", "c"]));
        assert_eq!(store.cell_labels().count(), 1);
    }

    #[test]
    fn test_add_cell_label_with_no_ids_creates_nothing() {
        let mut store = store_with_labels(&["a"]);
        store.add_cell_label(NewCellLabel::at(0, 0, Vec::new()));
        assert!(store.cell_label(&CellId::new(0, 0)).is_none());
    }

    #[test]
    fn test_add_cell_label_advances_timestamp_and_writer() {
        let mut store = store_with_labels(&["a", "b"]);
        store.add_cell_label(NewCellLabel::at(1, 1, ids(&["a"])));
        let first = store.cell_label(&CellId::new(1, 1)).unwrap().timestamp;

        store.set_user("bob");
        store.add_cell_label(NewCellLabel::at(1, 1, ids(&["b"])));
        let cell = store.cell_label(&CellId::new(1, 1)).unwrap();
        assert!(cell.timestamp >= first);
        assert_eq!(cell.user_id, "bob");
        assert_eq!(cell.contributions["alice"], set(&["a"]));
        assert_eq!(cell.contributions["bob"], set(&["b"]));
    }

    #[test]
    fn test_removing_last_cell_label_prunes_record() {
        let mut store = store_with_labels(&["a", "b"]);
        let cell_id = CellId::new(3, 4);
        store.add_cell_label(NewCellLabel::at(3, 4, ids(&["a", "b"])));

        assert!(store.remove_cell_label(&cell_id, &LabelId::from("a")));
        assert!(store.cell_label(&cell_id).is_some());
        assert!(store.remove_cell_label(&cell_id, &LabelId::from("b")));
        assert!(store.cell_label(&cell_id).is_none());
        assert!(!store.remove_cell_label(&cell_id, &LabelId::from("b")));
    }

    #[test]
    fn test_removing_last_row_label_prunes_record() {
        let mut store = store_with_labels(&["a"]);
        store.add_row_label(7, ids(&["a"]));
        assert!(store.remove_row_label(7, &LabelId::from("a")));
        assert!(store.row_label(7).is_none());
    }

    #[test]
    fn test_delete_label_cascades_to_cells_and_rows() {
        let mut store = store_with_labels(&["a", "b"]);
        store.add_cell_label(NewCellLabel::at(0, 0, ids(&["a"])));
        store.add_cell_label(NewCellLabel::at(0, 1, ids(&["a", "b"])));
        store.add_row_label(5, ids(&["a"]));

        assert!(store.delete_label(&LabelId::from("a")));

        let a = LabelId::from("a");
        assert!(store.label(&a).is_none());
        assert!(store.cell_labels().all(|c| !c.label_ids.contains(&a)));
        assert!(store.row_labels().all(|r| !r.label_ids.contains(&a)));
        assert!(store
            .cell_labels()
            .all(|c| c.contributions.values().all(|s| !s.contains(&a))));
        assert!(store.cell_label(&CellId::new(0, 0)).is_none());
        assert!(store.row_label(5).is_none());
        assert_eq!(
            store.cell_label(&CellId::new(0, 1)).unwrap().label_ids,
            set(&["b"])
        );
    }

    #[test]
    fn test_merge_labels_replaces_and_dedups() {
        let mut store = store_with_labels(&["a", "b", "c"]);
        store.add_cell_label(NewCellLabel::at(0, 0, ids(&["a", "c"])));
        store.add_row_label(1, ids(&["b"]));

        assert!(store.merge_labels(&ids(&["a", "b"]), &LabelId::from("c")));

        assert_eq!(
            store.cell_label(&CellId::new(0, 0)).unwrap().label_ids,
            set(&["c"])
        );
        assert_eq!(store.row_label(1).unwrap().label_ids, set(&["c"]));
        assert!(store.label(&LabelId::from("a")).is_none());
        assert!(store.label(&LabelId::from("b")).is_none());
    }

    #[test]
    fn test_merge_labels_twice_is_noop_the_second_time() {
        let mut store = store_with_labels(&["a", "b"]);
        store.add_cell_label(NewCellLabel::at(0, 0, ids(&["a"])));

        assert!(store.merge_labels(&ids(&["a"]), &LabelId::from("b")));
        let after_first = store.snapshot();
        assert!(!store.merge_labels(&ids(&["a"]), &LabelId::from("b")));
        let after_second = store.snapshot();

        assert_eq!(after_first.labels, after_second.labels);
        assert_eq!(after_first.cell_labels, after_second.cell_labels);
    }

    #[test]
    fn test_merge_labels_rejects_bad_target() {
        let mut store = store_with_labels(&["a", "b"]);
        store.add_cell_label(NewCellLabel::at(0, 0, ids(&["a"])));
        let before = store.snapshot();

        assert!(!store.merge_labels(&ids(&["a"]), &LabelId::from("missing")));
        assert!(!store.merge_labels(&ids(&["a", "b"]), &LabelId::from("b")));

        let after = store.snapshot();
        assert_eq!(before.labels, after.labels);
        assert_eq!(before.cell_labels, after.cell_labels);
    }

    #[test]
    fn test_label_stats_counts_cells_and_rows_independently() {
        let mut store = store_with_labels(&["a", "b", "unused"]);
        store.add_cell_label(NewCellLabel::at(0, 0, ids(&["a"])));
        store.add_cell_label(NewCellLabel::at(0, 1, ids(&["a", "b"])));
        store.add_row_label(0, ids(&["a"]));

        let stats = store.label_stats();
        assert_eq!(stats[&LabelId::from("a")], 3);
        assert_eq!(stats[&LabelId::from("b")], 1);
        assert_eq!(stats[&LabelId::from("unused")], 0);
    }

    #[test]
    fn test_update_label_edits_in_place() {
        let mut store = store_with_labels(&["a"]);
        let id = LabelId::from("a");
        let created = store.label(&id).unwrap().created_at;

        assert!(store.update_label(
            &id,
            LabelUpdate {
                name: Some("Alpha".to_string()),
                tags: Some(vec!["triage".to_string()]),
                ..LabelUpdate::default()
            },
        ));
        let label = store.label(&id).unwrap();
        assert_eq!(label.name, "Alpha");
        assert_eq!(label.color, "#888");
        assert_eq!(label.tags, vec!["triage".to_string()]);
        assert_eq!(label.created_at, created);
        assert!(!store.update_label(&LabelId::from("zzz"), LabelUpdate::default()));
    }

    #[test]
    fn test_add_label_rejects_duplicate_id() {
        let mut store = store_with_labels(&["a"]);
        assert!(!store.add_label(Label::new("again", "#000").with_id("a")));
        assert_eq!(store.label(&LabelId::from("a")).unwrap().name, "a");
    }

    #[test]
    fn test_merge_remote_unions_cells_and_contributions() {
        let mut local = store_with_labels(&["urgent", "positive"]);
        local.add_cell_label(NewCellLabel::at(2, 1, ids(&["urgent"])));

        let mut remote = AnnotationStore::new("project-1", "bob");
        remote.add_label(Label::new("positive", "#0f0").with_id("positive"));
        remote.add_cell_label(NewCellLabel::at(2, 1, ids(&["positive"])));
        remote.add_row_label(9, ids(&["positive"]));

        local.merge_remote(&remote.snapshot());

        let cell = local.cell_label(&CellId::new(2, 1)).unwrap();
        assert_eq!(cell.label_ids, set(&["urgent", "positive"]));
        assert_eq!(cell.contributions["alice"], set(&["urgent"]));
        assert_eq!(cell.contributions["bob"], set(&["positive"]));
        assert_eq!(local.row_label(9).unwrap().label_ids, set(&["positive"]));
    }

    #[test]
    fn test_merge_remote_keeps_the_newer_label_edit() {
        let mut local = store_with_labels(&["older", "newer"]);
        let local_older = local.label(&LabelId::from("older")).unwrap().clone();
        let local_newer = local.label(&LabelId::from("newer")).unwrap().clone();

        let mut stale = local_older.clone();
        stale.name = "stale remote".to_string();
        stale.updated_at = local_older.updated_at - chrono::Duration::minutes(5);

        let mut fresh = local_newer.clone();
        fresh.name = "fresh remote".to_string();
        fresh.color = "#123456".to_string();
        fresh.updated_at = local_newer.updated_at + chrono::Duration::minutes(5);

        let mut remote = ProjectAnnotations::empty("project-1");
        remote.labels = vec![stale, fresh.clone()];
        local.merge_remote(&remote);

        assert_eq!(local.label(&LabelId::from("older")).unwrap(), &local_older);
        assert_eq!(local.label(&LabelId::from("newer")).unwrap(), &fresh);
    }

    #[test]
    fn test_from_snapshot_restores_state() {
        let mut store = store_with_labels(&["a"]);
        store.add_cell_label(NewCellLabel::at(0, 0, ids(&["a"])));
        store.add_row_label(2, ids(&["a"]));

        let restored = AnnotationStore::from_snapshot(store.snapshot(), "bob");
        assert_eq!(restored.project_id(), "project-1");
        assert_eq!(restored.user_id(), "bob");
        assert_eq!(restored.labels().count(), 1);
        assert!(restored.cell_label(&CellId::new(0, 0)).is_some());
        assert!(restored.row_label(2).is_some());
    }
}
