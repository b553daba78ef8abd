//! Embedded database layer.
//!
//! One redb database holds the three record tables plus bookkeeping tables:
//! per-table id counters and the student local↔remote id maps. Rows
//! are stored as JSON documents keyed by their local id, so insertion order
//! by primary key is creation order. Every mutation is one committed
//! transaction; a reopened database reconstructs exact state.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::records::{AcademicRow, AssessmentRow, RecordId, StudentRow, SyncCounts};

const STUDENTS: TableDefinition<u64, &str> = TableDefinition::new("students");
const ACADEMIC_RECORDS: TableDefinition<u64, &str> = TableDefinition::new("academic_records");
const ASSESSMENTS: TableDefinition<u64, &str> = TableDefinition::new("assessments");
/// Next-local-id counter per record table. Counters only ever grow, so local
/// ids are never reused, not even after `clear_all`.
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
/// Student local id → server-assigned id, written when a student syncs.
const STUDENT_ID_MAP: TableDefinition<u64, i64> = TableDefinition::new("student_id_map");
/// The reverse direction, so lookups by server id are point reads. Both maps
/// are always written in the same transaction as the student row.
const REMOTE_ID_MAP: TableDefinition<i64, u64> = TableDefinition::new("remote_id_map");

/// A row with the shared identity/sync fields.
pub(crate) trait TrackedRow: Serialize + DeserializeOwned {
    fn local_id(&self) -> u64;
    fn synced(&self) -> bool;
    fn attach_remote(&mut self, remote_id: i64);
}

/// A row that references a parent student.
pub(crate) trait ChildRow: TrackedRow {
    fn student_ref(&self) -> RecordId;
    fn set_student_ref(&mut self, student: RecordId);
}

macro_rules! impl_tracked_row {
    ($row:ty) => {
        impl TrackedRow for $row {
            fn local_id(&self) -> u64 {
                self.local_id
            }
            fn synced(&self) -> bool {
                self.synced
            }
            fn attach_remote(&mut self, remote_id: i64) {
                self.remote_id = Some(remote_id);
                self.synced = true;
            }
        }
    };
}

impl_tracked_row!(StudentRow);
impl_tracked_row!(AcademicRow);
impl_tracked_row!(AssessmentRow);

macro_rules! impl_child_row {
    ($row:ty) => {
        impl ChildRow for $row {
            fn student_ref(&self) -> RecordId {
                self.student
            }
            fn set_student_ref(&mut self, student: RecordId) {
                self.student = student;
            }
        }
    };
}

impl_child_row!(AcademicRow);
impl_child_row!(AssessmentRow);

type RecordTable = TableDefinition<'static, u64, &'static str>;

pub(crate) struct LocalDb {
    db: Database,
}

impl LocalDb {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(STUDENTS)?;
            txn.open_table(ACADEMIC_RECORDS)?;
            txn.open_table(ASSESSMENTS)?;
            txn.open_table(COUNTERS)?;
            txn.open_table(STUDENT_ID_MAP)?;
            txn.open_table(REMOTE_ID_MAP)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn insert_student(
        &self,
        build: impl FnOnce(u64) -> StudentRow,
    ) -> Result<StudentRow, StoreError> {
        let txn = self.db.begin_write()?;
        let row = Self::write_new_row(&txn, STUDENTS, "students", build)?;
        if let Some(remote_id) = row.remote_id {
            // Online inserts already know their server id; record the mapping
            // in the same transaction so children created against the local
            // id always resolve.
            Self::map_student(&txn, row.local_id, remote_id)?;
        }
        txn.commit()?;
        Ok(row)
    }

    pub fn insert_academic_record(
        &self,
        build: impl FnOnce(u64) -> AcademicRow,
    ) -> Result<AcademicRow, StoreError> {
        self.insert_row(ACADEMIC_RECORDS, "academic_records", build)
    }

    pub fn insert_assessment(
        &self,
        build: impl FnOnce(u64) -> AssessmentRow,
    ) -> Result<AssessmentRow, StoreError> {
        self.insert_row(ASSESSMENTS, "assessments", build)
    }

    /// All students, newest first.
    pub fn students(&self) -> Result<Vec<StudentRow>, StoreError> {
        let mut rows: Vec<StudentRow> = self.rows(STUDENTS)?;
        rows.reverse();
        Ok(rows)
    }

    /// Unsynced rows in insertion order; the stable snapshot a sync pass
    /// walks.
    pub fn unsynced_students(&self) -> Result<Vec<StudentRow>, StoreError> {
        Ok(self
            .rows::<StudentRow>(STUDENTS)?
            .into_iter()
            .filter(|row| !row.synced())
            .collect())
    }

    pub fn unsynced_academic_records(&self) -> Result<Vec<AcademicRow>, StoreError> {
        Ok(self
            .rows::<AcademicRow>(ACADEMIC_RECORDS)?
            .into_iter()
            .filter(|row| !row.synced())
            .collect())
    }

    pub fn unsynced_assessments(&self) -> Result<Vec<AssessmentRow>, StoreError> {
        Ok(self
            .rows::<AssessmentRow>(ASSESSMENTS)?
            .into_iter()
            .filter(|row| !row.synced())
            .collect())
    }

    /// Academic records belonging to `student`, matched through either id
    /// namespace.
    pub fn academic_records_for(&self, student: RecordId) -> Result<Vec<AcademicRow>, StoreError> {
        self.rows_for_student(ACADEMIC_RECORDS, student)
    }

    /// Assessments belonging to `student`, matched through either id
    /// namespace.
    pub fn assessments_for(&self, student: RecordId) -> Result<Vec<AssessmentRow>, StoreError> {
        self.rows_for_student(ASSESSMENTS, student)
    }

    /// Marks a student as acknowledged by the server and records the id
    /// mapping for child resolution, atomically. Idempotent.
    pub fn mark_student_synced(&self, local_id: u64, remote_id: i64) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        Self::mark_synced_in::<StudentRow>(&txn, STUDENTS, local_id, remote_id, None)?;
        Self::map_student(&txn, local_id, remote_id)?;
        txn.commit()?;
        Ok(())
    }

    /// Marks a child row synced and rewrites its parent reference to the
    /// remote id it was created under.
    pub fn mark_academic_record_synced(
        &self,
        local_id: u64,
        remote_id: i64,
        parent: i64,
    ) -> Result<(), StoreError> {
        self.mark_synced::<AcademicRow>(ACADEMIC_RECORDS, local_id, remote_id, Some(parent))
    }

    pub fn mark_assessment_synced(
        &self,
        local_id: u64,
        remote_id: i64,
        parent: i64,
    ) -> Result<(), StoreError> {
        self.mark_synced::<AssessmentRow>(ASSESSMENTS, local_id, remote_id, Some(parent))
    }

    /// The server id a locally-created student ended up with, if it has
    /// synced.
    pub fn student_remote_id(&self, local_id: u64) -> Result<Option<i64>, StoreError> {
        let txn = self.db.begin_read()?;
        let map = txn.open_table(STUDENT_ID_MAP)?;
        Ok(map.get(local_id)?.map(|guard| guard.value()))
    }

    pub fn unsynced_counts(&self) -> Result<SyncCounts, StoreError> {
        let txn = self.db.begin_read()?;
        Ok(SyncCounts {
            students: Self::count_unsynced::<StudentRow>(&txn, STUDENTS)?,
            records: Self::count_unsynced::<AcademicRow>(&txn, ACADEMIC_RECORDS)?,
            assessments: Self::count_unsynced::<AssessmentRow>(&txn, ASSESSMENTS)?,
        })
    }

    /// Truncates every record table and the id map. Counters are kept.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            txn.open_table(STUDENTS)?.retain(|_, _| false)?;
            txn.open_table(ACADEMIC_RECORDS)?.retain(|_, _| false)?;
            txn.open_table(ASSESSMENTS)?.retain(|_, _| false)?;
            txn.open_table(STUDENT_ID_MAP)?.retain(|_, _| false)?;
            txn.open_table(REMOTE_ID_MAP)?.retain(|_, _| false)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn insert_row<T: TrackedRow>(
        &self,
        table: RecordTable,
        counter_key: &str,
        build: impl FnOnce(u64) -> T,
    ) -> Result<T, StoreError> {
        let txn = self.db.begin_write()?;
        let row = Self::write_new_row(&txn, table, counter_key, build)?;
        txn.commit()?;
        Ok(row)
    }

    fn write_new_row<T: TrackedRow>(
        txn: &WriteTransaction,
        table: RecordTable,
        counter_key: &str,
        build: impl FnOnce(u64) -> T,
    ) -> Result<T, StoreError> {
        let local_id = Self::next_id(txn, counter_key)?;
        let row = build(local_id);
        let json = serde_json::to_string(&row)?;
        txn.open_table(table)?.insert(local_id, json.as_str())?;
        Ok(row)
    }

    fn next_id(txn: &WriteTransaction, counter_key: &str) -> Result<u64, StoreError> {
        let mut counters = txn.open_table(COUNTERS)?;
        let next = counters.get(counter_key)?.map(|v| v.value()).unwrap_or(0) + 1;
        counters.insert(counter_key, next)?;
        Ok(next)
    }

    fn rows<T: TrackedRow>(&self, table: RecordTable) -> Result<Vec<T>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let mut rows = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            rows.push(serde_json::from_str(value.value())?);
        }
        Ok(rows)
    }

    fn rows_for_student<T: ChildRow>(
        &self,
        table: RecordTable,
        student: RecordId,
    ) -> Result<Vec<T>, StoreError> {
        // Resolve the requested id into both namespaces, then match rows
        // whose stored reference is either one.
        let (local, remote) = match student {
            RecordId::Local(local_id) => (Some(local_id), self.student_remote_id(local_id)?),
            RecordId::Remote(remote_id) => (self.local_id_for_remote(remote_id)?, Some(remote_id)),
        };
        Ok(self
            .rows::<T>(table)?
            .into_iter()
            .filter(|row| match row.student_ref() {
                RecordId::Local(id) => local == Some(id),
                RecordId::Remote(id) => remote == Some(id),
            })
            .collect())
    }

    fn local_id_for_remote(&self, remote_id: i64) -> Result<Option<u64>, StoreError> {
        let txn = self.db.begin_read()?;
        let map = txn.open_table(REMOTE_ID_MAP)?;
        Ok(map.get(remote_id)?.map(|guard| guard.value()))
    }

    fn mark_synced<T: TrackedRow + ChildOrPlain>(
        &self,
        table: RecordTable,
        local_id: u64,
        remote_id: i64,
        parent: Option<i64>,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        Self::mark_synced_in::<T>(&txn, table, local_id, remote_id, parent)?;
        txn.commit()?;
        Ok(())
    }

    fn mark_synced_in<T: TrackedRow + ChildOrPlain>(
        txn: &WriteTransaction,
        table: RecordTable,
        local_id: u64,
        remote_id: i64,
        parent: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut table = txn.open_table(table)?;
        let json = match table.get(local_id)? {
            Some(guard) => guard.value().to_string(),
            None => {
                return Err(StoreError::NotFound(format!(
                    "No row with local id {local_id}"
                )))
            }
        };
        let mut row: T = serde_json::from_str(&json)?;
        row.attach_remote(remote_id);
        if let Some(parent_remote) = parent {
            row.rewrite_parent(parent_remote);
        }
        table.insert(local_id, serde_json::to_string(&row)?.as_str())?;
        Ok(())
    }

    fn map_student(txn: &WriteTransaction, local_id: u64, remote_id: i64) -> Result<(), StoreError> {
        txn.open_table(STUDENT_ID_MAP)?.insert(local_id, remote_id)?;
        txn.open_table(REMOTE_ID_MAP)?.insert(remote_id, local_id)?;
        Ok(())
    }

    fn count_unsynced<T: TrackedRow>(
        txn: &ReadTransaction,
        table: RecordTable,
    ) -> Result<u64, StoreError> {
        let table = txn.open_table(table)?;
        let mut count = 0;
        for item in table.iter()? {
            let (_, value) = item?;
            let row: T = serde_json::from_str(value.value())?;
            if !row.synced() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Lets `mark_synced` rewrite the parent reference on child rows while
/// staying a no-op for students.
pub(crate) trait ChildOrPlain {
    fn rewrite_parent(&mut self, _parent_remote: i64) {}
}

impl ChildOrPlain for StudentRow {}

impl ChildOrPlain for AcademicRow {
    fn rewrite_parent(&mut self, parent_remote: i64) {
        self.set_student_ref(RecordId::Remote(parent_remote));
    }
}

impl ChildOrPlain for AssessmentRow {
    fn rewrite_parent(&mut self, parent_remote: i64) {
        self.set_student_ref(RecordId::Remote(parent_remote));
    }
}
