//! Shared annotation types between the sync core and the UI
//!
//! These types are used by both:
//! - the annotator sync core (native Rust)
//! - the labelling UI (generated TypeScript bindings)
//!
//! Serializable with serde for JSON persistence and the REST payloads

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Labels
// ============================================================================

/// Opaque label identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LabelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LabelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LabelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// User-defined categorical tag applicable to cells or rows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<LabelId>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Label {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: LabelId::new(),
            name: name.into(),
            color: color.into(),
            description: None,
            parent_id: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<LabelId>) -> Self {
        self.id = id.into();
        self
    }
}

// ============================================================================
// Cell / Row annotations
// ============================================================================

/// Composite cell address, rendered as `"{row}-{col}"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct CellId(pub String);

impl CellId {
    pub fn new(row_index: u32, col_index: u32) -> Self {
        Self(format!("{row_index}-{col_index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse back into `(row_index, col_index)`; `None` for foreign ids.
    pub fn coordinates(&self) -> Option<(u32, u32)> {
        let (row, col) = self.0.split_once('-')?;
        Some((row.parse().ok()?, col.parse().ok()?))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Label set attached to a single cell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct CellLabel {
    pub cell_id: CellId,
    pub row_index: u32,
    pub col_index: u32,
    /// Merged label ids of every contributor
    pub label_ids: BTreeSet<LabelId>,
    /// Last writer
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// Latest label set contributed by each user under this cell
    #[serde(default)]
    pub contributions: BTreeMap<String, BTreeSet<LabelId>>,
}

/// Label set attached to a whole row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct RowLabel {
    pub row_index: u32,
    pub label_ids: BTreeSet<LabelId>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub contributions: BTreeMap<String, BTreeSet<LabelId>>,
}

/// Full annotation state of one project, as persisted locally and sent to
/// the remote API in `update` operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ProjectAnnotations {
    pub project_id: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub cell_labels: Vec<CellLabel>,
    #[serde(default)]
    pub row_labels: Vec<RowLabel>,
    pub saved_at: DateTime<Utc>,
}

impl ProjectAnnotations {
    pub fn empty(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            labels: Vec::new(),
            cell_labels: Vec::new(),
            row_labels: Vec::new(),
            saved_at: Utc::now(),
        }
    }
}

// ============================================================================
// Pending operations
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a backend mutation not yet confirmed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct PendingOperation {
    /// Time-ordered unique id (ULID)
    pub id: String,
    pub kind: OperationKind,
    pub target_id: String,
    #[ts(type = "unknown")]
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl PendingOperation {
    pub fn new(
        kind: OperationKind,
        target_id: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            kind,
            target_id: target_id.into(),
            payload,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Persisted queue record
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct QueueState {
    #[serde(default)]
    pub operations: Vec<PendingOperation>,
    #[serde(default)]
    pub is_processing: bool,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed but still under the retry ceiling
    pub retained: usize,
    /// Failed and dropped at the retry ceiling
    pub dropped: usize,
    /// Another drain was already in flight; nothing was attempted
    pub skipped: bool,
}

// ============================================================================
// Connectivity
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

// ============================================================================
// Conflicts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ConflictTarget {
    Cell { cell_id: CellId },
    Row { row_index: u32 },
}

impl fmt::Display for ConflictTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell { cell_id } => write!(f, "cell:{cell_id}"),
            Self::Row { row_index } => write!(f, "row:{row_index}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct UserContribution {
    pub user_id: String,
    pub label_ids: BTreeSet<LabelId>,
}

/// Disagreement between users on one cell or row. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ConflictRecord {
    pub target: ConflictTarget,
    pub contributions: Vec<UserContribution>,
    #[serde(default)]
    pub resolved_label_ids: Option<BTreeSet<LabelId>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn user_ids(&self) -> Vec<&str> {
        self.contributions
            .iter()
            .map(|c| c.user_id.as_str())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
