//! Card/ICC record source interface
//!
//! Card file parsing is owned by an excluded subsystem; the core only reads
//! the already-decoded operator values when a "records loaded" event arrives.

use multisim_common::types::{AppFamily, SlotId};

/// Operator values decoded from a card application's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IccRecords {
    /// MCC+MNC of the home operator
    pub operator_numeric: String,
    /// Service provider name for display, if provisioned
    pub spn: Option<String>,
}

/// Source of decoded ICC records, keyed by slot and application family.
pub trait IccRecordSource: Send + Sync {
    /// Returns the records for the given slot/family, or `None` while they
    /// have not finished loading.
    fn records_for(&self, slot: SlotId, family: AppFamily) -> Option<IccRecords>;
}
