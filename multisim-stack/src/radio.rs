//! Radio command transport interface
//!
//! The low-level modem transport is an external collaborator; this core only
//! issues asynchronous requests and resumes when the completion arrives.
//! Implementations must never assume the caller blocks: trackers spawn the
//! request and post the completion back into their own mailbox.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use multisim_common::types::{BearerId, SubId};

/// Device identity read from the modem on subscription activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// GSM-family equipment identity
    pub imei: Option<String>,
    /// CDMA-family equipment identity
    pub meid: Option<String>,
}

/// Where a CDMA subscription is provisioned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdmaSubscriptionSource {
    /// Provisioned on the removable RUIM/CSIM card
    RuimSim,
    /// Provisioned in non-volatile modem storage
    Nv,
}

impl fmt::Display for CdmaSubscriptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CdmaSubscriptionSource::RuimSim => write!(f, "RUIM_SIM"),
            CdmaSubscriptionSource::Nv => write!(f, "NV"),
        }
    }
}

/// Radio command transport failure.
#[derive(Debug, Clone, Error)]
pub enum RadioError {
    /// The modem rejected the command
    #[error("command rejected: {0}")]
    CommandRejected(String),
    /// No completion arrived in time
    #[error("command timed out")]
    Timeout,
}

/// Asynchronous request/completion interface to the modem, one logical
/// channel per subscription.
#[async_trait]
pub trait RadioCommands: Send + Sync {
    /// Reads the device identity (IMEI/MEID).
    async fn get_device_identity(&self, sub_id: SubId) -> Result<DeviceIdentity, RadioError>;

    /// Powers the radio on or off.
    async fn set_radio_power(&self, sub_id: SubId, on: bool) -> Result<(), RadioError>;

    /// Hangs up all active voice calls (issued before powering off to reduce
    /// call drops).
    async fn hangup_all_calls(&self, sub_id: SubId) -> Result<(), RadioError>;

    /// Establishes a packet-data bearer; resolves when the bearer is up.
    async fn setup_bearer(&self, sub_id: SubId, cid: BearerId, apn: &str)
        -> Result<(), RadioError>;

    /// Tears down a packet-data bearer; resolves when the teardown completes.
    async fn teardown_bearer(&self, sub_id: SubId, cid: BearerId) -> Result<(), RadioError>;

    /// Reads where the CDMA subscription is provisioned from.
    async fn cdma_subscription_source(&self, sub_id: SubId)
        -> Result<CdmaSubscriptionSource, RadioError>;

    /// Registers or unregisters the subscription for unsolicited data/voice
    /// radio events. Dormant trackers stay unregistered.
    fn set_data_event_registration(&self, sub_id: SubId, enabled: bool);
}
