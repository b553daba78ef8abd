//! Test suite for the offline store.
//!
//! Every test runs against its own database inside a temp directory, a mock
//! remote with programmable failures, and a [`ReachabilityHandle`] driven by
//! the test body. Covers durability across restarts, local-id monotonicity,
//! offline fallback, sync idempotence, child deferral/remapping, status
//! counts and listener delivery.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::network::{NetworkEvent, Reachability, ReachabilityHandle};
    use crate::records::{NewAcademicRecord, NewAssessment, NewStudent, RecordId};
    use crate::remote::{RemoteApi, TransportError};
    use crate::store::{ListenerId, OfflineStore};

    /// Remote double: assigns sequential ids, can fail globally or for one
    /// student name, and records what it was asked to create.
    struct MockRemote {
        fail_all: AtomicBool,
        fail_student_named: Mutex<Option<String>>,
        next_id: AtomicI64,
        student_creates: AtomicUsize,
        child_parents: Mutex<Vec<i64>>,
    }

    impl MockRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail_all: AtomicBool::new(false),
                fail_student_named: Mutex::new(None),
                next_id: AtomicI64::new(501),
                student_creates: AtomicUsize::new(0),
                child_parents: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            let remote = Self::new();
            remote.set_fail_all(true);
            remote
        }

        fn set_fail_all(&self, fail: bool) {
            self.fail_all.store(fail, Ordering::SeqCst);
        }

        fn fail_student(&self, name: &str) {
            *self.fail_student_named.lock().unwrap() = Some(name.to_string());
        }

        fn clear_failures(&self) {
            self.set_fail_all(false);
            *self.fail_student_named.lock().unwrap() = None;
        }

        fn student_creates(&self) -> usize {
            self.student_creates.load(Ordering::SeqCst)
        }

        fn child_parents(&self) -> Vec<i64> {
            self.child_parents.lock().unwrap().clone()
        }

        fn check_up(&self) -> Result<(), TransportError> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(TransportError::transport("connection refused"));
            }
            Ok(())
        }

        fn assign_id(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteApi for MockRemote {
        async fn create_student(&self, student: &NewStudent) -> Result<i64, TransportError> {
            self.student_creates.fetch_add(1, Ordering::SeqCst);
            self.check_up()?;
            if self.fail_student_named.lock().unwrap().as_deref() == Some(student.name.as_str()) {
                return Err(TransportError::rejected(500, "server error"));
            }
            Ok(self.assign_id())
        }

        async fn create_academic_record(
            &self,
            student_id: i64,
            _record: &NewAcademicRecord,
        ) -> Result<i64, TransportError> {
            self.check_up()?;
            self.child_parents.lock().unwrap().push(student_id);
            Ok(self.assign_id())
        }

        async fn create_assessment(
            &self,
            student_id: i64,
            _assessment: &NewAssessment,
        ) -> Result<i64, TransportError> {
            self.check_up()?;
            self.child_parents.lock().unwrap().push(student_id);
            Ok(self.assign_id())
        }
    }

    fn student(name: &str) -> NewStudent {
        NewStudent {
            name: name.to_string(),
            age: 10,
            contact: "9999999999".to_string(),
            grade: 5,
            center_id: 1,
            school: None,
            address: None,
            guardian_name: None,
            guardian_contact: None,
            family_problems: None,
            caste: None,
        }
    }

    fn maths_record() -> NewAcademicRecord {
        NewAcademicRecord {
            subject_name: "Mathematics".to_string(),
            marks: 72.0,
            max_marks: 100.0,
            grade: Some("B".to_string()),
            term: "Term 1".to_string(),
            academic_year: "2024-25".to_string(),
            remarks: None,
        }
    }

    fn quarterly_assessment() -> NewAssessment {
        NewAssessment {
            leadership_score: Some(7.5),
            leadership_notes: None,
            weight: Some(32.0),
            height: Some(138.0),
            bmi: Some(16.8),
            health_notes: None,
            english_score: Some(6.0),
            communication_score: Some(7.0),
            teamwork_score: Some(8.0),
            creativity_score: Some(6.5),
            assessment_type: "quarterly".to_string(),
            overall_notes: None,
        }
    }

    fn open_store(
        dir: &TempDir,
        remote: Arc<MockRemote>,
        online: bool,
    ) -> (OfflineStore, ReachabilityHandle) {
        let reachability = ReachabilityHandle::new(online);
        let store = OfflineStore::open(
            dir.path().join("store.redb"),
            remote,
            Arc::new(reachability.clone()),
        )
        .expect("store should open");
        (store, reachability)
    }

    /// Polls `cond` until it holds or a generous deadline passes. Used where
    /// the store reacts on a background task (reconnect sync, opportunistic
    /// sync).
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..250 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn offline_write_is_saved_locally() {
        let dir = TempDir::new().unwrap();
        let (store, _reachability) = open_store(&dir, MockRemote::new(), false);

        let saved = store.add_student(student("Asha")).await.unwrap();
        assert!(!saved.online);
        assert!(saved.record.is_offline);
        assert!(saved.record.id.is_local());

        let students = store.students().await.unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].fields.name, "Asha");
        assert!(students[0].is_offline);

        let status = store.sync_status().unwrap();
        assert!(!status.is_online);
        assert_eq!(status.details.students, 1);
        assert_eq!(status.unsynced_items, 1);
    }

    #[tokio::test]
    async fn online_write_attaches_remote_id() {
        let dir = TempDir::new().unwrap();
        let (store, _reachability) = open_store(&dir, MockRemote::new(), true);

        let saved = store.add_student(student("Asha")).await.unwrap();
        assert!(saved.online);
        assert_eq!(saved.record.id, RecordId::Remote(501));
        assert!(!saved.record.is_offline);

        assert_eq!(store.sync_status().unwrap().unsynced_items, 0);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_offline() {
        let dir = TempDir::new().unwrap();
        let (store, _reachability) = open_store(&dir, MockRemote::failing(), true);

        let saved = store.add_student(student("Asha")).await.unwrap();
        assert!(!saved.online, "failed remote write must not fail the call");

        let students = store.students().await.unwrap();
        assert_eq!(students.len(), 1);
        assert!(students[0].is_offline);
    }

    #[tokio::test]
    async fn restart_preserves_rows_and_local_ids() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();

        let (store, _reachability) = open_store(&dir, remote.clone(), false);
        let first = store.add_student(student("Asha")).await.unwrap();
        let second = store.add_student(student("Ravi")).await.unwrap();
        assert_eq!(first.record.id, RecordId::Local(1));
        assert_eq!(second.record.id, RecordId::Local(2));
        drop(store);

        let (store, _reachability) = open_store(&dir, remote, false);
        let students = store.students().await.unwrap();
        assert_eq!(students.len(), 2, "rows must survive a restart");

        // The id counter continues after reopen; ids are never reused.
        let third = store.add_student(student("Meena")).await.unwrap();
        assert_eq!(third.record.id, RecordId::Local(3));
    }

    #[tokio::test]
    async fn reconnect_syncs_buffered_rows() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let (store, reachability) = open_store(&dir, remote, false);

        store.add_student(student("Asha")).await.unwrap();
        assert_eq!(store.sync_status().unwrap().details.students, 1);

        reachability.set_online(true);
        let probe = store.clone();
        wait_until(move || probe.sync_status().unwrap().unsynced_items == 0).await;

        let students = store.students().await.unwrap();
        assert_eq!(students[0].id, RecordId::Remote(501));
        assert!(!students[0].is_offline);
    }

    #[tokio::test]
    async fn sync_is_idempotent_across_repeated_passes() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let (store, reachability) = open_store(&dir, remote.clone(), false);

        store.add_student(student("Asha")).await.unwrap();
        store.add_student(student("Ravi")).await.unwrap();

        reachability.set_online(true);
        store.sync_when_online().await.unwrap();
        store.sync_when_online().await.unwrap();
        let probe = store.clone();
        wait_until(move || probe.sync_status().unwrap().unsynced_items == 0).await;

        // One remote create per local row, regardless of how many passes ran.
        assert_eq!(remote.student_creates(), 2);
        let students = store.students().await.unwrap();
        let mut remote_ids: Vec<i64> = students
            .iter()
            .filter_map(|s| s.id.as_remote())
            .collect();
        remote_ids.sort_unstable();
        remote_ids.dedup();
        assert_eq!(remote_ids.len(), 2, "each row gets exactly one remote id");
    }

    #[tokio::test]
    async fn failed_row_does_not_block_later_rows() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::failing();
        // Stay online the whole test so no reconnect-driven background sync
        // competes with the explicit passes below.
        let (store, _reachability) = open_store(&dir, remote.clone(), true);

        store.add_student(student("Bad")).await.unwrap();
        store.add_student(student("Good")).await.unwrap();
        remote.clear_failures();
        remote.fail_student("Bad");

        let report = store.sync_when_online().await.unwrap();
        assert_eq!(report.pushed.students, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.sync_status().unwrap().details.students, 1);

        // The failed row stays queued for the next pass.
        remote.clear_failures();
        let report = store.sync_when_online().await.unwrap();
        assert_eq!(report.pushed.students, 1);
        assert_eq!(store.sync_status().unwrap().unsynced_items, 0);
    }

    #[tokio::test]
    async fn children_defer_until_parent_syncs_then_remap() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::failing();
        let (store, _reachability) = open_store(&dir, remote.clone(), true);

        let parent = store.add_student(student("Asha")).await.unwrap().record.id;
        assert!(parent.is_local());
        store
            .add_academic_record(parent, maths_record())
            .await
            .unwrap();
        store
            .add_assessment(parent, quarterly_assessment())
            .await
            .unwrap();

        // Parent keeps failing: children must be deferred, not pushed with a
        // local id the server has never seen.
        remote.clear_failures();
        remote.fail_student("Asha");
        let report = store.sync_when_online().await.unwrap();
        assert_eq!(report.pushed.students, 0);
        assert_eq!(report.deferred, 2);
        assert!(remote.child_parents().is_empty());

        remote.clear_failures();
        let report = store.sync_when_online().await.unwrap();
        assert_eq!(report.pushed.students, 1);
        assert_eq!(report.pushed.records, 1);
        assert_eq!(report.pushed.assessments, 1);
        assert_eq!(report.deferred, 0);

        // Children were created under the parent's server id, and their
        // stored reference now reads as that id.
        let parent_remote = store.students().await.unwrap()[0].id;
        assert_eq!(parent_remote, RecordId::Remote(501));
        assert_eq!(remote.child_parents(), vec![501, 501]);
        let records = store.academic_records(parent_remote).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].student, parent_remote);
        assert!(!records[0].is_offline);
    }

    #[tokio::test]
    async fn children_sync_in_same_pass_as_parent() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::failing();
        let (store, _reachability) = open_store(&dir, remote.clone(), true);

        let parent = store.add_student(student("Asha")).await.unwrap().record.id;
        store
            .add_academic_record(parent, maths_record())
            .await
            .unwrap();

        remote.clear_failures();
        let report = store.sync_when_online().await.unwrap();
        // Students sync first, so the child resolves within the same pass.
        assert_eq!(report.pushed.students, 1);
        assert_eq!(report.pushed.records, 1);
        assert_eq!(report.deferred, 0);
    }

    #[tokio::test]
    async fn sync_status_counts_all_tables() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let (store, reachability) = open_store(&dir, remote, true);

        let synced = store.add_student(student("Asha")).await.unwrap().record.id;

        reachability.set_online(false);
        store.add_student(student("Ravi")).await.unwrap();
        store.add_student(student("Meena")).await.unwrap();
        store
            .add_academic_record(synced, maths_record())
            .await
            .unwrap();
        store
            .add_assessment(synced, quarterly_assessment())
            .await
            .unwrap();

        let status = store.sync_status().unwrap();
        assert_eq!(status.details.students, 2);
        assert_eq!(status.details.records, 1);
        assert_eq!(status.details.assessments, 1);
        assert_eq!(status.unsynced_items, 4);
    }

    #[tokio::test]
    async fn clear_empties_tables_but_keeps_id_counter() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let (store, reachability) = open_store(&dir, remote, false);

        store.add_student(student("Asha")).await.unwrap();
        store.add_student(student("Ravi")).await.unwrap();
        reachability.set_online(true);
        let probe = store.clone();
        wait_until(move || probe.sync_status().unwrap().unsynced_items == 0).await;

        store.clear().unwrap();
        assert!(store.students().await.unwrap().is_empty());
        assert_eq!(store.sync_status().unwrap().unsynced_items, 0);

        reachability.set_online(false);
        let next = store.add_student(student("Meena")).await.unwrap();
        assert_eq!(next.record.id, RecordId::Local(3));
    }

    #[tokio::test]
    async fn opportunistic_sync_on_read() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();

        // Buffer a row in one session, reopen already online: no transition
        // event will fire, so only the read-path trigger can drain the queue.
        let (store, _reachability) = open_store(&dir, remote.clone(), false);
        store.add_student(student("Asha")).await.unwrap();
        drop(store);

        let (store, _reachability) = open_store(&dir, remote, true);
        let students = store.students().await.unwrap();
        assert_eq!(students.len(), 1);

        let probe = store.clone();
        wait_until(move || probe.sync_status().unwrap().unsynced_items == 0).await;
        assert!(!store.students().await.unwrap()[0].is_offline);
    }

    #[tokio::test]
    async fn sync_is_a_noop_while_offline() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let (store, _reachability) = open_store(&dir, remote.clone(), false);

        store.add_student(student("Asha")).await.unwrap();
        let report = store.sync_when_online().await.unwrap();
        assert_eq!(report.pushed.students, 0);
        assert_eq!(remote.student_creates(), 0);
        assert_eq!(store.sync_status().unwrap().unsynced_items, 1);
    }

    #[tokio::test]
    async fn listeners_observe_transitions_until_removed() {
        let dir = TempDir::new().unwrap();
        let (store, reachability) = open_store(&dir, MockRemote::new(), true);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let id = store.add_listener(move |event| sink.lock().unwrap().push(event));

        reachability.set_online(false);
        let probe = events.clone();
        wait_until(move || probe.lock().unwrap().len() == 1).await;
        reachability.set_online(true);
        let probe = events.clone();
        wait_until(move || probe.lock().unwrap().len() == 2).await;
        assert_eq!(
            *events.lock().unwrap(),
            vec![NetworkEvent::Offline, NetworkEvent::Online]
        );

        store.remove_listener(id);
        reachability.set_online(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listener_can_remove_itself_during_dispatch() {
        let dir = TempDir::new().unwrap();
        let (store, reachability) = open_store(&dir, MockRemote::new(), true);

        let fired = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let registry = store.clone();
        let count = fired.clone();
        let own_id = slot.clone();
        let id = store.add_listener(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            // Deregistering from inside the callback must not deadlock
            // dispatch.
            if let Some(id) = own_id.lock().unwrap().take() {
                registry.remove_listener(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        reachability.set_online(false);
        let probe = fired.clone();
        wait_until(move || probe.load(Ordering::SeqCst) == 1).await;

        reachability.set_online(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            fired.load(Ordering::SeqCst),
            1,
            "listener removed from its own callback must stay removed"
        );
    }

    #[tokio::test]
    async fn students_are_listed_newest_first() {
        let dir = TempDir::new().unwrap();
        let (store, _reachability) = open_store(&dir, MockRemote::new(), false);

        store.add_student(student("Asha")).await.unwrap();
        store.add_student(student("Ravi")).await.unwrap();

        let students = store.students().await.unwrap();
        assert_eq!(students[0].fields.name, "Ravi");
        assert_eq!(students[1].fields.name, "Asha");
    }

    #[tokio::test]
    async fn records_resolve_through_either_id_namespace() {
        let dir = TempDir::new().unwrap();
        let (store, _reachability) = open_store(&dir, MockRemote::new(), true);

        let parent = store.add_student(student("Asha")).await.unwrap().record.id;
        assert_eq!(parent, RecordId::Remote(501));
        store
            .add_academic_record(parent, maths_record())
            .await
            .unwrap();

        // The student was created in this session, so local id 1 maps to the
        // same row; both handles must find the record.
        let by_remote = store.academic_records(parent).await.unwrap();
        let by_local = store.academic_records(RecordId::Local(1)).await.unwrap();
        assert_eq!(by_remote.len(), 1);
        assert_eq!(by_local.len(), 1);
    }

    #[tokio::test]
    async fn id_map_persists_with_the_row_across_restart() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();

        // Buffer a student, then sync it through the reconciliation path.
        let (store, reachability) = open_store(&dir, remote.clone(), false);
        store.add_student(student("Asha")).await.unwrap();
        reachability.set_online(true);
        let probe = store.clone();
        wait_until(move || probe.sync_status().unwrap().unsynced_items == 0).await;
        drop(store);

        // The local↔remote mapping is committed with the row, so a reopened
        // store still resolves the parent in both directions: children
        // created against the local id go straight to the server, and reads
        // by server id find them.
        let (store, _reachability) = open_store(&dir, remote.clone(), true);
        let saved = store
            .add_academic_record(RecordId::Local(1), maths_record())
            .await
            .unwrap();
        assert!(saved.online);
        assert_eq!(remote.child_parents(), vec![501]);

        let by_remote = store.academic_records(RecordId::Remote(501)).await.unwrap();
        assert_eq!(by_remote.len(), 1);
        assert_eq!(by_remote[0].student, RecordId::Remote(501));
    }

    #[tokio::test]
    async fn remote_id_lookup_targets_the_right_student() {
        let dir = TempDir::new().unwrap();
        let (store, _reachability) = open_store(&dir, MockRemote::new(), true);

        let first = store.add_student(student("Asha")).await.unwrap().record.id;
        let second = store.add_student(student("Ravi")).await.unwrap().record.id;
        let third = store.add_student(student("Meena")).await.unwrap().record.id;
        assert_eq!(second, RecordId::Remote(502));

        store
            .add_academic_record(second, maths_record())
            .await
            .unwrap();

        assert_eq!(store.academic_records(second).await.unwrap().len(), 1);
        assert!(store.academic_records(first).await.unwrap().is_empty());
        assert!(store.academic_records(third).await.unwrap().is_empty());
    }

    #[test]
    fn reachability_handle_reports_edges_only() {
        let handle = ReachabilityHandle::new(true);
        let mut rx = handle.subscribe();
        assert!(handle.is_online());

        handle.set_online(true);
        assert!(!rx.has_changed().unwrap(), "same-state report is not an edge");

        handle.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
    }
}
