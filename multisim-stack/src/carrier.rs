//! Current-carrier table persistence interface
//!
//! The backing store is an external collaborator; only this single call
//! contract is visible to the core. Write failures are logged and treated as
//! non-fatal: the in-memory subscription state stays authoritative.

use thiserror::Error;

use multisim_common::types::SubId;

/// Carrier table write failure.
#[derive(Debug, Clone, Error)]
#[error("carrier table write failed: {0}")]
pub struct CarrierError(pub String);

/// Persists the current carrier of the active-data-subscription.
pub trait CarrierTable: Send + Sync {
    /// Records `operator_numeric` as the current carrier for `sub_id`.
    ///
    /// Invoked only when `sub_id` equals the active-data-subscription.
    fn set_current_carrier(&self, sub_id: SubId, operator_numeric: &str)
        -> Result<(), CarrierError>;
}
