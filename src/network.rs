//! Network reachability signal.
//!
//! The store never probes the network itself; the application shell feeds it
//! the platform's online/offline status through a [`Reachability`]
//! implementation. [`ReachabilityHandle`] is the stock implementation: the
//! shell (or a test) holds the handle and flips it on each platform event.

use tokio::sync::watch;

/// A connectivity transition, delivered to registered store listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

/// Current reachability plus subscription to its edge transitions.
pub trait Reachability: Send + Sync {
    fn is_online(&self) -> bool;

    /// A receiver that observes every online/offline transition.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-channel backed reachability, driven by whoever holds the handle.
#[derive(Debug, Clone)]
pub struct ReachabilityHandle {
    tx: watch::Sender<bool>,
}

impl ReachabilityHandle {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    /// Updates the status. Subscribers are only woken on an actual edge, not
    /// on repeated reports of the same state.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }
}

impl Reachability for ReachabilityHandle {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
