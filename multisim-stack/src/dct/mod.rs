//! Data-Connection Tracking
//!
//! One tracker per subscription owns that subscription's packet-data
//! sessions. The GSM family tracks a set of APN contexts, the CDMA family a
//! single bearer; both share the pending-disconnect bookkeeping that backs
//! the "all data disconnected" event and the completion tokens of
//! `CleanupAll` and `SetInternalDataEnabled`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use multisim_common::types::{RadioFamily, SubId, Subscription};

use crate::carrier::CarrierTable;
use crate::coordinator::DdsSelector;
use crate::icc::IccRecordSource;
use crate::notify::NotificationSink;
use crate::radio::{CdmaSubscriptionSource, DeviceIdentity, RadioCommands};
use crate::tasks::{DctHandle, DisconnectListener, ListenerId, SetupTrigger};

pub mod cdma;
pub mod gsm;
pub mod task;

pub use cdma::CdmaDataConnectionTracker;
pub use gsm::GsmDataConnectionTracker;
pub use task::DctTask;

/// Initial bearer retry delay.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Retry delay ceiling.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

// ============================================================================
// Pending-Disconnect Bookkeeping
// ============================================================================

/// Tracks in-flight bearer teardowns plus everyone waiting for the tracker
/// to reach "all data disconnected".
///
/// Two waiting populations with different lifetimes: one-shot completion
/// tokens are consumed in FIFO order when the count drains, persistent
/// registrants are notified on every drain until unregistered.
#[derive(Default)]
pub struct PendingDisconnects {
    pending: u32,
    waiters: Vec<oneshot::Sender<()>>,
    registrants: Vec<DisconnectListener>,
}

impl PendingDisconnects {
    /// Creates empty bookkeeping.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight teardown count.
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Accounts for one teardown request just issued.
    pub fn note_teardown(&mut self) {
        self.pending += 1;
    }

    /// Queues a completion token to fire on the next drain.
    pub fn queue_waiter(&mut self, done: oneshot::Sender<()>) {
        self.waiters.push(done);
    }

    /// Accounts for one teardown completion; returns true when the count
    /// has drained to zero.
    pub fn on_disconnect_done(&mut self) -> bool {
        self.pending = self.pending.saturating_sub(1);
        self.pending == 0
    }

    /// Completes every queued token in FIFO order and notifies every
    /// registrant. Registrants stay registered.
    pub fn drain(&mut self, sub_id: SubId) {
        for done in self.waiters.drain(..) {
            let _ = done.send(());
        }
        self.notify_registrants(sub_id);
    }

    /// Notifies every registrant without touching queued tokens.
    pub fn notify_registrants(&self, sub_id: SubId) {
        for registrant in &self.registrants {
            registrant.notify(sub_id);
        }
    }

    /// Registers a persistent listener. When the tracker is already
    /// disconnected the event fires immediately.
    pub fn register(&mut self, listener: DisconnectListener, disconnected: bool, sub_id: SubId) {
        if !self.registrants.iter().any(|r| r.id() == listener.id()) {
            self.registrants.push(listener);
        }
        if disconnected {
            debug!(sub_id, "already disconnected, notifying registrants");
            self.notify_registrants(sub_id);
        }
    }

    /// Removes a registrant; unknown ids are ignored.
    pub fn unregister(&mut self, id: ListenerId) {
        self.registrants.retain(|r| r.id() != id);
    }
}

// ============================================================================
// Retry Back-off
// ============================================================================

/// Exponential back-off for bearer establishment retries.
pub struct RetryBackoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            attempt: 0,
            base: RETRY_BASE_DELAY,
            max: RETRY_MAX_DELAY,
        }
    }
}

impl RetryBackoff {
    /// Creates a back-off starting at the default base delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt, doubling up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(1u32 << self.attempt.min(16))
            .min(self.max);
        self.attempt += 1;
        delay
    }

    /// Resets the attempt counter (data re-enabled, fresh attach).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ============================================================================
// Shared Dependencies
// ============================================================================

/// External collaborators shared by every tracker.
#[derive(Clone)]
pub struct DctDeps {
    /// Radio command transport
    pub radio: Arc<dyn RadioCommands>,
    /// Decoded card records
    pub icc: Arc<dyn IccRecordSource>,
    /// Current-carrier persistence
    pub carrier: Arc<dyn CarrierTable>,
    /// Broadcast sink
    pub sink: Arc<dyn NotificationSink>,
    /// Active-data-subscription selector
    pub dds: Arc<DdsSelector>,
}

// ============================================================================
// Controller Trait
// ============================================================================

/// Radio-family specific data-connection behavior behind the common actor.
///
/// Implementations never block across a message: radio requests are spawned
/// and their completions come back as later mailbox messages through the
/// tracker's own handle.
#[async_trait]
pub trait SubscriptionAwareDataController: Send {
    /// Radio family the controller implements.
    fn family(&self) -> RadioFamily;

    /// True when no session is `Connecting`, `Connected` or `Disconnecting`.
    fn is_disconnected(&self) -> bool;

    /// Attempts to bring up data sessions if permitted.
    async fn try_setup(&mut self, trigger: SetupTrigger);

    /// Handles a bearer establishment completion.
    async fn on_setup_complete(&mut self, cid: u32, result: Result<(), String>);

    /// Tears down every live bearer; `done` completes when the tracker
    /// reaches "all data disconnected" (immediately if already idle).
    async fn cleanup_all(&mut self, reason: &str, done: Option<oneshot::Sender<()>>);

    /// Handles a bearer teardown completion.
    async fn on_disconnect_done(&mut self, cid: u32);

    /// Sets the internal data-enabled flag. Disabling drives every session
    /// to idle before `done` completes; enabling resets retry state and
    /// attempts setup.
    async fn set_internal_data_enabled(&mut self, enabled: bool, done: Option<oneshot::Sender<()>>);

    /// Registers a persistent "all data disconnected" listener.
    fn register_for_all_disconnected(&mut self, listener: DisconnectListener);

    /// Removes a persistent listener.
    fn unregister_for_all_disconnected(&mut self, id: ListenerId);

    /// Reacts to an active-data-subscription change.
    async fn on_dds_changed(&mut self);

    /// Reacts to this subscription being activated.
    async fn on_subscription_activated(&mut self, subscription: Subscription);

    /// Reacts to this subscription being deactivated.
    async fn on_subscription_deactivated(&mut self);

    /// Reacts to the card's records finishing loading.
    async fn on_records_loaded(&mut self);

    /// Handles a device identity read completion.
    fn on_device_identity(&mut self, identity: DeviceIdentity);

    /// Handles a CDMA subscription source read completion.
    fn on_cdma_subscription_source(&mut self, source: CdmaSubscriptionSource);

    /// Handles a packet-service attach state change.
    async fn on_data_network_state(&mut self, attached: bool);
}

/// Wires a controller to its own mailbox so spawned radio requests can post
/// completions back.
pub trait SelfAddressed {
    /// Installs the tracker's own handle.
    fn set_self_handle(&mut self, handle: DctHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::tasks::{SstMessage, TaskHandle, TaskMessage};

    fn listener() -> (DisconnectListener, mpsc::Receiver<TaskMessage<SstMessage>>) {
        let (tx, rx) = mpsc::channel(4);
        (DisconnectListener::new(ListenerId::next(), TaskHandle::new(tx)), rx)
    }

    #[test]
    fn test_pending_count_drains_to_zero() {
        let mut pending = PendingDisconnects::new();
        pending.note_teardown();
        pending.note_teardown();

        assert!(!pending.on_disconnect_done());
        assert!(pending.on_disconnect_done());
        // Extra completions never underflow.
        assert!(pending.on_disconnect_done());
    }

    #[tokio::test]
    async fn test_drain_completes_waiters_in_order() {
        let mut pending = PendingDisconnects::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.queue_waiter(tx1);
        pending.queue_waiter(tx2);

        pending.drain(0);

        rx1.await.unwrap();
        rx2.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_fires_immediately_when_disconnected() {
        let mut pending = PendingDisconnects::new();
        let (l, mut rx) = listener();

        pending.register(l, true, 3);

        match rx.recv().await {
            Some(TaskMessage::Message(SstMessage::SiblingAllDataDisconnected { from_sub })) => {
                assert_eq!(from_sub, 3);
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registrants_survive_drains_until_unregistered() {
        let mut pending = PendingDisconnects::new();
        let (l, mut rx) = listener();
        let id = l.id();
        pending.register(l, false, 0);

        pending.drain(0);
        pending.drain(0);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());

        pending.unregister(id);
        pending.drain(0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_register_is_idempotent_per_id() {
        let mut pending = PendingDisconnects::new();
        let (l, mut rx) = listener();
        pending.register(l.clone(), false, 0);
        pending.register(l, false, 0);

        pending.drain(0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = RetryBackoff::new();
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert_eq!(second, first * 2);

        for _ in 0..20 {
            assert!(backoff.next_delay() <= RETRY_MAX_DELAY);
        }

        backoff.reset();
        assert_eq!(backoff.next_delay(), first);
    }
}
