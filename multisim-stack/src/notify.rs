//! Broadcast/notification sink interface
//!
//! Fire-and-forget delivery of subscription-tagged state changes. Every
//! event carries the originating `sub_id` so multi-subscription-aware
//! listeners can filter; presentation (status bar, settings screens) is
//! owned by excluded subsystems.

use multisim_common::types::{ApnType, RadioFamily, SessionState, SubId};

/// Subscription-tagged telephony notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    /// A data session changed state
    DataConnectionStateChanged {
        /// Originating subscription
        sub_id: SubId,
        /// APN context the session serves
        apn_type: ApnType,
        /// New session state
        state: SessionState,
        /// Diagnostic cause
        reason: String,
    },
    /// A subscription was activated or deactivated
    SimStateChanged {
        /// Originating subscription
        sub_id: SubId,
        /// True on activation
        activated: bool,
    },
    /// Operator display values changed (SPN/PLMN refresh)
    SpnDisplayChanged {
        /// Originating subscription
        sub_id: SubId,
        /// Home operator MCC+MNC
        operator_numeric: String,
        /// Service provider name, if provisioned
        spn: Option<String>,
    },
    /// The facade was rewired to a different radio family
    RadioTechnologyChanged {
        /// Originating subscription
        sub_id: SubId,
        /// New radio family
        family: RadioFamily,
    },
    /// Radio/service attach state changed
    ServiceStateChanged {
        /// Originating subscription
        sub_id: SubId,
        /// True while the radio is powered on
        radio_on: bool,
    },
}

impl TelephonyEvent {
    /// The subscription the event originates from.
    pub fn sub_id(&self) -> SubId {
        match self {
            TelephonyEvent::DataConnectionStateChanged { sub_id, .. }
            | TelephonyEvent::SimStateChanged { sub_id, .. }
            | TelephonyEvent::SpnDisplayChanged { sub_id, .. }
            | TelephonyEvent::RadioTechnologyChanged { sub_id, .. }
            | TelephonyEvent::ServiceStateChanged { sub_id, .. } => *sub_id,
        }
    }
}

/// Fire-and-forget notification sink.
///
/// Implementations must not block; the core never waits on delivery.
pub trait NotificationSink: Send + Sync {
    /// Delivers one event.
    fn notify(&self, event: TelephonyEvent);
}
