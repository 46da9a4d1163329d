//! Actor Task Framework
//!
//! Each per-subscription component (data-connection tracker, service-state
//! tracker) runs as an independent async task with an ordered mailbox of
//! typed messages. All state mutation happens while processing one message
//! to completion; "waiting" is always expressed as registering a listener or
//! completion token and resuming when a later message arrives.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use multisim_common::types::{BearerId, SubId, Subscription};

use crate::radio::{CdmaSubscriptionSource, DeviceIdentity};

// ============================================================================
// Task Message Envelope
// ============================================================================

/// Task message envelope wrapping typed messages with control signals.
#[derive(Debug)]
pub enum TaskMessage<T> {
    /// Regular message payload
    Message(T),
    /// Shutdown signal - task should terminate gracefully
    Shutdown,
}

impl<T> TaskMessage<T> {
    /// Creates a new message envelope containing the given payload.
    pub fn message(msg: T) -> Self {
        TaskMessage::Message(msg)
    }

    /// Creates a shutdown signal.
    pub fn shutdown() -> Self {
        TaskMessage::Shutdown
    }

    /// Returns true if this is a shutdown signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskMessage::Shutdown)
    }

    /// Returns the message payload if present, or None for shutdown.
    pub fn into_message(self) -> Option<T> {
        match self {
            TaskMessage::Message(msg) => Some(msg),
            TaskMessage::Shutdown => None,
        }
    }
}

// ============================================================================
// Task Handle
// ============================================================================

/// Handle for sending messages to a task.
///
/// This is a wrapper around `mpsc::Sender` that provides convenient methods
/// for sending messages and shutdown signals.
#[derive(Debug)]
pub struct TaskHandle<T> {
    tx: mpsc::Sender<TaskMessage<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TaskHandle<T> {
    /// Creates a new task handle from a sender.
    pub fn new(tx: mpsc::Sender<TaskMessage<T>>) -> Self {
        Self { tx }
    }

    /// Sends a message to the task.
    ///
    /// Returns an error if the task has been dropped.
    pub async fn send(&self, msg: T) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Message(msg)).await
    }

    /// Sends a message to the task without waiting.
    ///
    /// Returns an error if the channel is full or the task has been dropped.
    pub fn try_send(&self, msg: T) -> Result<(), mpsc::error::TrySendError<TaskMessage<T>>> {
        self.tx.try_send(TaskMessage::Message(msg))
    }

    /// Sends a shutdown signal to the task.
    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Shutdown).await
    }

    /// Returns true if the task channel is closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to a data-connection tracker actor.
pub type DctHandle = TaskHandle<DctMessage>;

/// Handle to a service-state tracker actor.
pub type SstHandle = TaskHandle<SstMessage>;

// ============================================================================
// Task Trait
// ============================================================================

/// Base trait for all subscription actor tasks.
///
/// Tasks are async actors that process messages from their receive channel.
/// Each task implementation defines its own message type and processing logic.
#[async_trait::async_trait]
pub trait Task: Send + 'static {
    /// The message type this task processes.
    type Message: Send;

    /// Runs the task's main loop, processing messages until shutdown.
    async fn run(&mut self, rx: mpsc::Receiver<TaskMessage<Self::Message>>);
}

// ============================================================================
// Listener Identity
// ============================================================================

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an "all data disconnected" listener.
///
/// Used to unregister a listener without holding a reference to it; the same
/// id survives the listener being cloned into a registrant list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a fresh listener id.
    pub fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Notification target for "all data disconnected" events.
///
/// Delivery is fire-and-forget: the event is pushed into the listening
/// actor's mailbox with `try_send` and never blocks the notifying tracker.
#[derive(Debug, Clone)]
pub struct DisconnectListener {
    id: ListenerId,
    target: SstHandle,
}

impl DisconnectListener {
    /// Creates a listener delivering to the given service-state tracker.
    pub fn new(id: ListenerId, target: SstHandle) -> Self {
        Self { id, target }
    }

    /// The listener's identity.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Delivers one "all data disconnected" notification.
    pub fn notify(&self, from_sub: SubId) {
        let _ = self
            .target
            .try_send(SstMessage::SiblingAllDataDisconnected { from_sub });
    }
}

// ============================================================================
// Data-Connection Tracker Messages
// ============================================================================

/// What prompted a data setup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupTrigger {
    /// Packet service attached to the network
    NetworkAttached,
    /// Internal data was (re-)enabled
    DataEnabled,
    /// A back-off retry timer fired
    RetryTimer,
    /// ICC records finished loading
    RecordsLoaded,
}

/// Messages for a per-subscription data-connection tracker actor.
#[derive(Debug)]
pub enum DctMessage {
    /// Attempt to bring up data sessions (guarded by DDS and the internal
    /// data-enabled flag)
    TrySetup {
        /// What prompted the attempt
        trigger: SetupTrigger,
    },
    /// Bearer establishment finished (from the radio-command layer)
    SetupComplete {
        /// Bearer the completion refers to
        cid: BearerId,
        /// Establishment outcome
        result: Result<(), String>,
    },
    /// Tear down every live bearer; `done` is queued and completed when the
    /// pending-disconnect count drains to zero (immediately if already idle)
    CleanupAll {
        /// Diagnostic cause attached to the teardown
        reason: String,
        /// Optional completion token
        done: Option<oneshot::Sender<()>>,
    },
    /// One bearer's teardown finished (from the radio-command layer)
    DisconnectDone {
        /// Bearer the completion refers to
        cid: BearerId,
    },
    /// Set the internal data-enabled flag; disabling drives to idle before
    /// `done` completes
    SetInternalDataEnabled {
        /// New flag value
        enabled: bool,
        /// Optional completion token
        done: Option<oneshot::Sender<()>>,
    },
    /// Ask whether every session is idle
    QueryDisconnected {
        /// Reply channel
        reply: oneshot::Sender<bool>,
    },
    /// Register for the "all data disconnected" event; fires immediately
    /// when already disconnected
    RegisterAllDisconnected {
        /// Notification target
        listener: DisconnectListener,
    },
    /// Remove a previously registered listener (no-op if unknown)
    UnregisterAllDisconnected {
        /// Listener to remove
        id: ListenerId,
    },
    /// The active-data-subscription changed; re-evaluate dormancy
    DdsChanged {
        /// Optional ack making the switch synchronous across trackers
        ack: Option<oneshot::Sender<()>>,
    },
    /// This subscription was activated in the registry
    SubscriptionActivated {
        /// Freshly activated identity
        subscription: Subscription,
    },
    /// This subscription was deactivated in the registry
    SubscriptionDeactivated,
    /// ICC records finished loading for this subscription's card
    RecordsLoaded,
    /// Device identity read finished (issued on activation)
    DeviceIdentityDone {
        /// IMEI/MEID read from the modem
        identity: DeviceIdentity,
    },
    /// CDMA subscription source read finished (CDMA family only)
    CdmaSubscriptionSourceDone {
        /// Where the CDMA subscription comes from
        source: CdmaSubscriptionSource,
    },
    /// Packet-service attach state changed (from the radio-command layer)
    DataNetworkStateChanged {
        /// True when packet service is attached
        attached: bool,
    },
}

// ============================================================================
// Service-State Tracker Messages
// ============================================================================

/// Messages for a per-subscription service-state tracker actor.
#[derive(Debug)]
pub enum SstMessage {
    /// Clean up voice and data, then power the radio off once safe
    PowerOffRadioSafely,
    /// The watched subscription's data sessions are all disconnected
    SiblingAllDataDisconnected {
        /// Which subscription drained
        from_sub: SubId,
    },
    /// Fallback power-off timeout fired; acts only when `tag` matches the
    /// latest arm
    PowerOffTimeout {
        /// Arm generation the timer was scheduled under
        tag: u32,
    },
    /// ICC records finished loading; refresh operator display values
    RecordsLoaded,
    /// Refresh the current-carrier table entry (DDS only)
    UpdateCurrentCarrier,
    /// Ask whether a safe power-off is currently armed
    QueryPowerOffPending {
        /// Reply channel
        reply: oneshot::Sender<bool>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_message_variants() {
        let msg: TaskMessage<i32> = TaskMessage::message(42);
        assert!(!msg.is_shutdown());
        assert_eq!(msg.into_message(), Some(42));

        let shutdown: TaskMessage<i32> = TaskMessage::shutdown();
        assert!(shutdown.is_shutdown());
        assert!(shutdown.into_message().is_none());
    }

    #[tokio::test]
    async fn test_task_handle_send_and_shutdown() {
        let (tx, mut rx) = mpsc::channel::<TaskMessage<i32>>(10);
        let handle = TaskHandle::new(tx);

        handle.send(7).await.unwrap();
        handle.shutdown().await.unwrap();

        match rx.recv().await {
            Some(TaskMessage::Message(val)) => assert_eq!(val, 7),
            _ => panic!("expected message"),
        }
        match rx.recv().await {
            Some(TaskMessage::Shutdown) => {}
            _ => panic!("expected shutdown"),
        }
    }

    #[tokio::test]
    async fn test_task_handle_detects_closed_channel() {
        let (tx, rx) = mpsc::channel::<TaskMessage<i32>>(1);
        let handle = TaskHandle::new(tx);
        assert!(!handle.is_closed());
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.try_send(1).is_err());
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_disconnect_listener_delivery() {
        let (tx, mut rx) = mpsc::channel::<TaskMessage<SstMessage>>(4);
        let listener = DisconnectListener::new(ListenerId::next(), TaskHandle::new(tx));

        listener.notify(1);

        match rx.recv().await {
            Some(TaskMessage::Message(SstMessage::SiblingAllDataDisconnected { from_sub })) => {
                assert_eq!(from_sub, 1);
            }
            _ => panic!("expected SiblingAllDataDisconnected"),
        }
    }
}
