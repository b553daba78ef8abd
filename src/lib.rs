//! # Offline Sync Store
//!
//! Offline-first local persistence and synchronization for student record
//! management. An embedded [redb](https://docs.rs/redb) database buffers
//! writes made while disconnected, tracks a per-row synced/unsynced flag, and
//! reconciles buffered rows against the remote server once connectivity
//! returns.
//!
//! ## Design
//!
//! - **Dual identity**: every row carries a locally-assigned id from birth
//!   and gains a server-assigned id when it syncs. Readers see a single
//!   [`RecordId`] per record.
//! - **Never lose a write**: a remote failure during a write demotes it to an
//!   offline insert; only storage-engine faults surface as errors.
//! - **Injected collaborators**: the remote API and the reachability signal
//!   are traits supplied at construction, so tests run against doubles and
//!   the application wires real implementations once at startup.
//! - **Incremental durability**: every mutation is one committed redb
//!   transaction; reopening the database reconstructs exact state.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_sync_store::{
//!     HttpRemoteApi, NewStudent, OfflineStore, ReachabilityHandle, RemoteConfig,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = HttpRemoteApi::new(RemoteConfig::new("https://api.example.org"))?;
//! let reachability = ReachabilityHandle::new(true);
//! let store = OfflineStore::open(
//!     "students.redb",
//!     Arc::new(remote),
//!     Arc::new(reachability.clone()),
//! )?;
//!
//! let saved = store
//!     .add_student(NewStudent {
//!         name: "Asha".into(),
//!         age: 10,
//!         contact: "9999999999".into(),
//!         grade: 5,
//!         center_id: 1,
//!         school: None,
//!         address: None,
//!         guardian_name: None,
//!         guardian_contact: None,
//!         family_problems: None,
//!         caste: None,
//!     })
//!     .await?;
//! assert!(saved.online);
//!
//! // The shell reports platform connectivity through the handle.
//! reachability.set_online(false);
//! # Ok(())
//! # }
//! ```

mod db;
pub mod error;
pub mod network;
pub mod records;
pub mod remote;
pub mod store;

mod test;

pub use error::StoreError;
pub use network::{NetworkEvent, Reachability, ReachabilityHandle};
pub use records::{
    AcademicRecord, Assessment, NewAcademicRecord, NewAssessment, NewStudent, RecordId, Saved,
    Student, SyncCounts, SyncReport, SyncStatus,
};
pub use remote::{HttpRemoteApi, RemoteApi, RemoteConfig, TransportError};
pub use store::{ListenerId, OfflineStore};
