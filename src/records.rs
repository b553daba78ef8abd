//! Record types for the three tables the store manages.
//!
//! Every stored row carries a **dual identity**: a `local_id` assigned by the
//! embedded store at creation time, and an optional `remote_id` assigned by
//! the server once the row has been pushed. The read views expose a single
//! [`RecordId`] per record — remote when synced, local otherwise — so callers
//! never see the same record twice in different sync states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a record in one of the two id namespaces.
///
/// `Local` ids are assigned by [`LocalDb`](crate::db::LocalDb), are
/// monotonically increasing and are never reused. `Remote` ids come from the
/// server and only exist once a row has synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum RecordId {
    Local(u64),
    Remote(i64),
}

impl RecordId {
    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }

    /// The server-side id, if this record has one.
    pub fn as_remote(&self) -> Option<i64> {
        match self {
            RecordId::Remote(id) => Some(*id),
            RecordId::Local(_) => None,
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Local(id) => write!(f, "local:{id}"),
            RecordId::Remote(id) => write!(f, "remote:{id}"),
        }
    }
}

/// Student registration fields, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub name: String,
    pub age: u8,
    pub contact: String,
    pub grade: i32,
    pub center_id: i64,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub guardian_contact: Option<String>,
    #[serde(default)]
    pub family_problems: Option<String>,
    #[serde(default)]
    pub caste: Option<String>,
}

/// Academic record fields for one subject in one term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAcademicRecord {
    pub subject_name: String,
    pub marks: f64,
    pub max_marks: f64,
    #[serde(default)]
    pub grade: Option<String>,
    pub term: String,
    pub academic_year: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Holistic assessment fields: leadership, health and the four skill scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssessment {
    #[serde(default)]
    pub leadership_score: Option<f64>,
    #[serde(default)]
    pub leadership_notes: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub bmi: Option<f64>,
    #[serde(default)]
    pub health_notes: Option<String>,
    #[serde(default)]
    pub english_score: Option<f64>,
    #[serde(default)]
    pub communication_score: Option<f64>,
    #[serde(default)]
    pub teamwork_score: Option<f64>,
    #[serde(default)]
    pub creativity_score: Option<f64>,
    pub assessment_type: String,
    #[serde(default)]
    pub overall_notes: Option<String>,
}

/// A student row as stored in the embedded database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StudentRow {
    pub local_id: u64,
    pub remote_id: Option<i64>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: NewStudent,
}

/// An academic-record row as stored, keyed to its parent student.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AcademicRow {
    pub local_id: u64,
    pub remote_id: Option<i64>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    pub student: RecordId,
    #[serde(flatten)]
    pub fields: NewAcademicRecord,
}

/// An assessment row as stored, keyed to its parent student.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssessmentRow {
    pub local_id: u64,
    pub remote_id: Option<i64>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    pub student: RecordId,
    #[serde(flatten)]
    pub fields: NewAssessment,
}

/// Read view of a student: one id, one sync annotation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: RecordId,
    pub is_offline: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: NewStudent,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Student {
            id: match row.remote_id {
                Some(id) => RecordId::Remote(id),
                None => RecordId::Local(row.local_id),
            },
            is_offline: !row.synced,
            created_at: row.created_at,
            fields: row.fields,
        }
    }
}

/// Read view of an academic record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicRecord {
    pub id: RecordId,
    pub student: RecordId,
    pub is_offline: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: NewAcademicRecord,
}

impl From<AcademicRow> for AcademicRecord {
    fn from(row: AcademicRow) -> Self {
        AcademicRecord {
            id: match row.remote_id {
                Some(id) => RecordId::Remote(id),
                None => RecordId::Local(row.local_id),
            },
            student: row.student,
            is_offline: !row.synced,
            created_at: row.created_at,
            fields: row.fields,
        }
    }
}

/// Read view of an assessment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: RecordId,
    pub student: RecordId,
    pub is_offline: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: NewAssessment,
}

impl From<AssessmentRow> for Assessment {
    fn from(row: AssessmentRow) -> Self {
        Assessment {
            id: match row.remote_id {
                Some(id) => RecordId::Remote(id),
                None => RecordId::Local(row.local_id),
            },
            student: row.student,
            is_offline: !row.synced,
            created_at: row.created_at,
            fields: row.fields,
        }
    }
}

/// Result of a write: the stored record plus whether the online path was
/// taken. `online == false` means "saved locally, will sync later", not an
/// error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Saved<T> {
    pub record: T,
    pub online: bool,
}

/// Per-table unsynced row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub students: u64,
    pub records: u64,
    pub assessments: u64,
}

impl SyncCounts {
    pub fn total(&self) -> u64 {
        self.students + self.records + self.assessments
    }
}

/// Snapshot of the store's sync state at call time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub unsynced_items: u64,
    pub details: SyncCounts,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows pushed and acknowledged, per table.
    pub pushed: SyncCounts,
    /// Child rows skipped because their parent student has no remote id yet.
    pub deferred: u64,
    /// Rows whose push failed; they stay unsynced for the next pass.
    pub failed: u64,
}
