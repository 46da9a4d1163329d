//! Core data model for the multi-subscription stack
//!
//! A *subscription* is one logical SIM-backed radio identity bound to a
//! physical card slot. Several subscriptions share one device; exactly one of
//! them (the active-data-subscription, "DDS") is permitted to carry packet
//! data at any time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical subscription index (0..N-1).
pub type SubId = usize;

/// Physical card slot index.
pub type SlotId = usize;

/// Application record index on a card (family specific).
pub type AppIndex = usize;

/// Identifier of a packet-data bearer ("connection id").
pub type BearerId = u32;

/// Card application family.
///
/// Determines which radio-family phone implementation serves the
/// subscription: 3GPP applications (SIM/USIM) map to the GSM-like stack,
/// 3GPP2 applications (RUIM/CSIM) to the CDMA-like stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppFamily {
    /// SIM / USIM application
    ThreeGpp,
    /// RUIM / CSIM application
    ThreeGpp2,
}

impl fmt::Display for AppFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppFamily::ThreeGpp => write!(f, "3GPP"),
            AppFamily::ThreeGpp2 => write!(f, "3GPP2"),
        }
    }
}

/// Radio family of a phone object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioFamily {
    /// GSM/UMTS-like stack (multiple APN contexts)
    Gsm,
    /// CDMA-like stack (single bearer)
    Cdma,
}

impl RadioFamily {
    /// Radio family that serves the given card application family.
    pub fn for_app_family(family: AppFamily) -> Self {
        match family {
            AppFamily::ThreeGpp => RadioFamily::Gsm,
            AppFamily::ThreeGpp2 => RadioFamily::Cdma,
        }
    }
}

impl fmt::Display for RadioFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioFamily::Gsm => write!(f, "GSM"),
            RadioFamily::Cdma => write!(f, "CDMA"),
        }
    }
}

/// Activation status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionStatus {
    /// No subscription is provisioned for this index
    #[default]
    Deactivated,
    /// Activation command in flight
    Activating,
    /// Subscription is live; identity fields are meaningful
    Activated,
    /// Deactivation command in flight
    Deactivating,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Deactivated => write!(f, "DEACTIVATED"),
            SubscriptionStatus::Activating => write!(f, "ACTIVATING"),
            SubscriptionStatus::Activated => write!(f, "ACTIVATED"),
            SubscriptionStatus::Deactivating => write!(f, "DEACTIVATING"),
        }
    }
}

/// One logical radio identity bound to a physical slot.
///
/// `slot_id` and `app_index` are meaningful only while
/// `status == Activated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// Logical subscription index
    pub sub_id: SubId,
    /// Physical slot the subscription is bound to
    pub slot_id: SlotId,
    /// Application record index on that card
    pub app_index: AppIndex,
    /// Card application family (decides the radio family)
    pub app_family: AppFamily,
    /// Current activation status
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// Empty placeholder for a deactivated subscription index.
    pub fn empty(sub_id: SubId) -> Self {
        Self {
            sub_id,
            slot_id: 0,
            app_index: 0,
            app_family: AppFamily::ThreeGpp,
            status: SubscriptionStatus::Deactivated,
        }
    }

    /// Returns true if the subscription is currently activated.
    pub fn is_activated(&self) -> bool {
        self.status == SubscriptionStatus::Activated
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub={} slot={} app={} family={} status={}",
            self.sub_id, self.slot_id, self.app_index, self.app_family, self.status
        )
    }
}

/// State of one packet-data session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No bearer; the session may be (re)established
    #[default]
    Idle,
    /// Bearer establishment requested, waiting for completion
    Connecting,
    /// Bearer established and usable
    Connected,
    /// Teardown requested, waiting for completion
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Disconnecting => write!(f, "DISCONNECTING"),
        }
    }
}

/// Kind of APN context a GSM-family session serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApnType {
    /// General purpose internet access
    Default,
    /// Multimedia messaging
    Mms,
    /// Secure user-plane location
    Supl,
    /// Dial-up networking / tethering
    Dun,
}

impl fmt::Display for ApnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApnType::Default => write!(f, "default"),
            ApnType::Mms => write!(f, "mms"),
            ApnType::Supl => write!(f, "supl"),
            ApnType::Dun => write!(f, "dun"),
        }
    }
}

/// Diagnostic cause strings attached to session transitions and broadcasts.
pub mod reason {
    /// Radio is being powered off
    pub const RADIO_TURNED_OFF: &str = "radioTurnedOff";
    /// Data was enabled for this subscription
    pub const DATA_ENABLED: &str = "dataEnabled";
    /// Data was disabled for this subscription
    pub const DATA_DISABLED: &str = "dataDisabled";
    /// Network packet service attached
    pub const DATA_ATTACHED: &str = "dataAttached";
    /// Network packet service detached
    pub const DATA_DETACHED: &str = "dataDetached";
}
