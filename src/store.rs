//! The offline-first store.
//!
//! [`OfflineStore`] fronts the embedded database with a small CRUD surface
//! that behaves the same online and offline. Writes try the remote first and
//! fall back to a local unsynced row on any remote failure; a reconciliation
//! pass pushes buffered rows once connectivity returns and upgrades them in
//! place. Collaborators (remote API, reachability signal) are injected at
//! construction so the component carries no global state.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use log::{debug, warn};

use crate::db::LocalDb;
use crate::error::StoreError;
use crate::network::{NetworkEvent, Reachability};
use crate::records::{
    AcademicRecord, AcademicRow, Assessment, AssessmentRow, NewAcademicRecord, NewAssessment,
    NewStudent, RecordId, Saved, Student, StudentRow, SyncReport, SyncStatus,
};
use crate::remote::RemoteApi;

type Listener = Arc<dyn Fn(NetworkEvent) + Send + Sync>;

/// Handle for removing a registered network listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Inner {
    db: LocalDb,
    remote: Arc<dyn RemoteApi>,
    reachability: Arc<dyn Reachability>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    /// Serializes reconciliation passes so overlapping triggers (reconnect
    /// event, opportunistic read) cannot push the same row twice.
    sync_guard: tokio::sync::Mutex<()>,
}

/// Offline-first store over students, academic records and assessments.
///
/// Cheap to clone; clones share one database handle.
#[derive(Clone)]
pub struct OfflineStore {
    inner: Arc<Inner>,
}

impl OfflineStore {
    /// Opens (or creates) the database at `path`, applies the schema, and
    /// starts watching the reachability signal.
    ///
    /// Must be called from within a tokio runtime: reconnect handling runs on
    /// a spawned task. The method only returns once the schema exists, so no
    /// caller can race table creation.
    pub fn open(
        path: impl AsRef<Path>,
        remote: Arc<dyn RemoteApi>,
        reachability: Arc<dyn Reachability>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            inner: Arc::new(Inner {
                db: LocalDb::open(path)?,
                remote,
                reachability,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                sync_guard: tokio::sync::Mutex::new(()),
            }),
        };
        store.spawn_reachability_watcher();
        Ok(store)
    }

    /// Current reachability, read live from the injected signal.
    pub fn is_online(&self) -> bool {
        self.inner.reachability.is_online()
    }

    /// Saves a student, online when possible.
    ///
    /// Any remote failure — unreachable, timeout, or rejection — falls back
    /// to an offline insert rather than losing the input. `Err` is reserved
    /// for storage faults.
    pub async fn add_student(&self, student: NewStudent) -> Result<Saved<Student>, StoreError> {
        if self.is_online() {
            match self.inner.remote.create_student(&student).await {
                Ok(remote_id) => {
                    let row = self.inner.db.insert_student(|local_id| StudentRow {
                        local_id,
                        remote_id: Some(remote_id),
                        synced: true,
                        created_at: Utc::now(),
                        fields: student,
                    })?;
                    return Ok(Saved {
                        record: row.into(),
                        online: true,
                    });
                }
                Err(err) => {
                    warn!("Student create failed, keeping record locally: {err}");
                }
            }
        }
        let row = self.inner.db.insert_student(|local_id| StudentRow {
            local_id,
            remote_id: None,
            synced: false,
            created_at: Utc::now(),
            fields: student,
        })?;
        Ok(Saved {
            record: row.into(),
            online: false,
        })
    }

    /// All known students, newest first, annotated with their sync state.
    ///
    /// When online this opportunistically kicks off a background
    /// reconciliation; its outcome never affects the returned read.
    pub async fn students(&self) -> Result<Vec<Student>, StoreError> {
        if self.is_online() {
            let store = self.clone();
            tokio::spawn(async move {
                if let Err(err) = store.sync_when_online().await {
                    warn!("Opportunistic sync failed: {err}");
                }
            });
        }
        Ok(self
            .inner
            .db
            .students()?
            .into_iter()
            .map(Student::from)
            .collect())
    }

    /// Saves an academic record for `student`, online when the parent's
    /// remote id is known, otherwise locally.
    pub async fn add_academic_record(
        &self,
        student: RecordId,
        record: NewAcademicRecord,
    ) -> Result<Saved<AcademicRecord>, StoreError> {
        let parent_remote = self.resolve_remote_student(student)?;
        if self.is_online() {
            if let Some(parent) = parent_remote {
                match self
                    .inner
                    .remote
                    .create_academic_record(parent, &record)
                    .await
                {
                    Ok(remote_id) => {
                        let row = self.inner.db.insert_academic_record(|local_id| AcademicRow {
                            local_id,
                            remote_id: Some(remote_id),
                            synced: true,
                            created_at: Utc::now(),
                            student: RecordId::Remote(parent),
                            fields: record,
                        })?;
                        return Ok(Saved {
                            record: row.into(),
                            online: true,
                        });
                    }
                    Err(err) => {
                        warn!("Academic record create failed, keeping record locally: {err}");
                    }
                }
            } else {
                debug!("Parent student {student} has no remote id yet; saving record locally");
            }
        }
        let stored_ref = match parent_remote {
            Some(parent) => RecordId::Remote(parent),
            None => student,
        };
        let row = self.inner.db.insert_academic_record(|local_id| AcademicRow {
            local_id,
            remote_id: None,
            synced: false,
            created_at: Utc::now(),
            student: stored_ref,
            fields: record,
        })?;
        Ok(Saved {
            record: row.into(),
            online: false,
        })
    }

    /// Saves an assessment for `student`; same online/offline shape as
    /// [`add_academic_record`](Self::add_academic_record).
    pub async fn add_assessment(
        &self,
        student: RecordId,
        assessment: NewAssessment,
    ) -> Result<Saved<Assessment>, StoreError> {
        let parent_remote = self.resolve_remote_student(student)?;
        if self.is_online() {
            if let Some(parent) = parent_remote {
                match self.inner.remote.create_assessment(parent, &assessment).await {
                    Ok(remote_id) => {
                        let row = self.inner.db.insert_assessment(|local_id| AssessmentRow {
                            local_id,
                            remote_id: Some(remote_id),
                            synced: true,
                            created_at: Utc::now(),
                            student: RecordId::Remote(parent),
                            fields: assessment,
                        })?;
                        return Ok(Saved {
                            record: row.into(),
                            online: true,
                        });
                    }
                    Err(err) => {
                        warn!("Assessment create failed, keeping record locally: {err}");
                    }
                }
            } else {
                debug!("Parent student {student} has no remote id yet; saving assessment locally");
            }
        }
        let stored_ref = match parent_remote {
            Some(parent) => RecordId::Remote(parent),
            None => student,
        };
        let row = self.inner.db.insert_assessment(|local_id| AssessmentRow {
            local_id,
            remote_id: None,
            synced: false,
            created_at: Utc::now(),
            student: stored_ref,
            fields: assessment,
        })?;
        Ok(Saved {
            record: row.into(),
            online: false,
        })
    }

    /// Academic records for `student`, resolvable through either id
    /// namespace.
    pub async fn academic_records(
        &self,
        student: RecordId,
    ) -> Result<Vec<AcademicRecord>, StoreError> {
        Ok(self
            .inner
            .db
            .academic_records_for(student)?
            .into_iter()
            .map(AcademicRecord::from)
            .collect())
    }

    /// Assessments for `student`, resolvable through either id namespace.
    pub async fn assessments(&self, student: RecordId) -> Result<Vec<Assessment>, StoreError> {
        Ok(self
            .inner
            .db
            .assessments_for(student)?
            .into_iter()
            .map(Assessment::from)
            .collect())
    }

    /// Live unsynced counts and connectivity, computed at call time.
    pub fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        let details = self.inner.db.unsynced_counts()?;
        Ok(SyncStatus {
            is_online: self.is_online(),
            unsynced_items: details.total(),
            details,
        })
    }

    /// Pushes buffered rows to the remote: students first, then academic
    /// records and assessments, resolving each child's parent through the id
    /// map. No-op while offline.
    ///
    /// Rows are processed from a stable snapshot taken at the start of the
    /// pass. A failed row is logged and skipped; a child whose parent still
    /// has no remote id is deferred to a later pass. Passes are serialized,
    /// so concurrent triggers cannot double-push a row.
    pub async fn sync_when_online(&self) -> Result<SyncReport, StoreError> {
        if !self.is_online() {
            return Ok(SyncReport::default());
        }
        let _guard = self.inner.sync_guard.lock().await;
        let mut report = SyncReport::default();

        for row in self.inner.db.unsynced_students()? {
            match self.inner.remote.create_student(&row.fields).await {
                Ok(remote_id) => {
                    self.inner.db.mark_student_synced(row.local_id, remote_id)?;
                    report.pushed.students += 1;
                }
                Err(err) => {
                    warn!("Sync of student local:{} failed: {err}", row.local_id);
                    report.failed += 1;
                }
            }
        }

        for row in self.inner.db.unsynced_academic_records()? {
            let Some(parent) = self.resolve_remote_student(row.student)? else {
                debug!(
                    "Deferring academic record local:{}; parent {} not synced yet",
                    row.local_id, row.student
                );
                report.deferred += 1;
                continue;
            };
            match self
                .inner
                .remote
                .create_academic_record(parent, &row.fields)
                .await
            {
                Ok(remote_id) => {
                    self.inner
                        .db
                        .mark_academic_record_synced(row.local_id, remote_id, parent)?;
                    report.pushed.records += 1;
                }
                Err(err) => {
                    warn!("Sync of academic record local:{} failed: {err}", row.local_id);
                    report.failed += 1;
                }
            }
        }

        for row in self.inner.db.unsynced_assessments()? {
            let Some(parent) = self.resolve_remote_student(row.student)? else {
                debug!(
                    "Deferring assessment local:{}; parent {} not synced yet",
                    row.local_id, row.student
                );
                report.deferred += 1;
                continue;
            };
            match self.inner.remote.create_assessment(parent, &row.fields).await {
                Ok(remote_id) => {
                    self.inner
                        .db
                        .mark_assessment_synced(row.local_id, remote_id, parent)?;
                    report.pushed.assessments += 1;
                }
                Err(err) => {
                    warn!("Sync of assessment local:{} failed: {err}", row.local_id);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Truncates all three tables and the id map. Local-id counters are kept
    /// so ids are never reused.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.inner.db.clear_all()
    }

    /// Registers a callback fired on every connectivity transition.
    pub fn add_listener(
        &self,
        listener: impl Fn(NetworkEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .push((id, Arc::new(listener)));
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .retain(|(listener_id, _)| *listener_id != id.0);
    }

    fn resolve_remote_student(&self, student: RecordId) -> Result<Option<i64>, StoreError> {
        match student {
            RecordId::Remote(id) => Ok(Some(id)),
            RecordId::Local(local_id) => self.inner.db.student_remote_id(local_id),
        }
    }

    fn notify(&self, event: NetworkEvent) {
        // Snapshot under the lock, invoke outside it: a callback may register
        // or remove listeners on this same store.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Watches the reachability signal: every edge notifies listeners, and a
    /// transition to online triggers reconciliation. The task holds only a
    /// weak handle and exits when the store is dropped.
    fn spawn_reachability_watcher(&self) {
        let mut rx = self.inner.reachability.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = OfflineStore { inner };
                if online {
                    debug!("Network is back online; starting sync");
                    store.notify(NetworkEvent::Online);
                    if let Err(err) = store.sync_when_online().await {
                        warn!("Sync after reconnect failed: {err}");
                    }
                } else {
                    debug!("Network went offline; buffering writes locally");
                    store.notify(NetworkEvent::Offline);
                }
            }
        });
    }
}
