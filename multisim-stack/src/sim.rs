//! In-process simulation doubles for the external collaborators
//!
//! These stand in for the modem transport, card reader, carrier store and
//! broadcast sink when the stack runs without real hardware (the `multisim`
//! binary) and in the test suites. `SimRadio` records every command it sees
//! and can hold bearer operations open so tests can control exactly when a
//! completion message is fed back to a tracker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use multisim_common::types::{AppFamily, BearerId, SlotId, SubId};

use crate::carrier::{CarrierError, CarrierTable};
use crate::icc::{IccRecordSource, IccRecords};
use crate::notify::{NotificationSink, TelephonyEvent};
use crate::radio::{CdmaSubscriptionSource, DeviceIdentity, RadioCommands, RadioError};

// ============================================================================
// SimRadio
// ============================================================================

/// One recorded radio command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioOp {
    /// `get_device_identity`
    GetDeviceIdentity(SubId),
    /// `set_radio_power`
    SetRadioPower(SubId, bool),
    /// `hangup_all_calls`
    HangupAllCalls(SubId),
    /// `setup_bearer`
    SetupBearer(SubId, BearerId),
    /// `teardown_bearer`
    TeardownBearer(SubId, BearerId),
    /// `cdma_subscription_source`
    CdmaSubscriptionSource(SubId),
    /// `set_data_event_registration`
    SetDataEventRegistration(SubId, bool),
}

/// Simulated radio command transport.
///
/// Commands succeed immediately unless held; held setup/teardown requests
/// park until [`SimRadio::release_holds`] is called, which is how tests feed
/// completion messages at a chosen moment.
#[derive(Default)]
pub struct SimRadio {
    ops: Mutex<Vec<RadioOp>>,
    hold_setup: AtomicBool,
    hold_teardown: AtomicBool,
    fail_setup: AtomicBool,
    release: Notify,
}

impl SimRadio {
    /// Creates a simulated radio with immediate completions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park subsequent `setup_bearer` calls until released.
    pub fn hold_setups(&self, hold: bool) {
        self.hold_setup.store(hold, Ordering::Release);
        if !hold {
            self.release.notify_waiters();
        }
    }

    /// Park subsequent `teardown_bearer` calls until released.
    pub fn hold_teardowns(&self, hold: bool) {
        self.hold_teardown.store(hold, Ordering::Release);
        if !hold {
            self.release.notify_waiters();
        }
    }

    /// Releases every held bearer operation.
    pub fn release_holds(&self) {
        self.hold_setup.store(false, Ordering::Release);
        self.hold_teardown.store(false, Ordering::Release);
        self.release.notify_waiters();
    }

    /// Make subsequent `setup_bearer` calls fail with a transient rejection.
    pub fn fail_setups(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::Release);
    }

    /// Snapshot of every command seen so far.
    pub fn ops(&self) -> Vec<RadioOp> {
        self.ops.lock().unwrap().clone()
    }

    /// How many times the radio was powered off for `sub_id`.
    pub fn power_off_count(&self, sub_id: SubId) -> usize {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, RadioOp::SetRadioPower(s, false) if *s == sub_id))
            .count()
    }

    /// How many bearer teardowns were issued for `sub_id`.
    pub fn teardown_count(&self, sub_id: SubId) -> usize {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, RadioOp::TeardownBearer(s, _) if *s == sub_id))
            .count()
    }

    fn record(&self, op: RadioOp) {
        debug!("sim radio: {:?}", op);
        self.ops.lock().unwrap().push(op);
    }

    async fn park(&self, flag: &AtomicBool) {
        while flag.load(Ordering::Acquire) {
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl RadioCommands for SimRadio {
    async fn get_device_identity(&self, sub_id: SubId) -> Result<DeviceIdentity, RadioError> {
        self.record(RadioOp::GetDeviceIdentity(sub_id));
        Ok(DeviceIdentity {
            imei: Some(format!("86000000000000{sub_id}")),
            meid: Some(format!("A000000000000{sub_id}")),
        })
    }

    async fn set_radio_power(&self, sub_id: SubId, on: bool) -> Result<(), RadioError> {
        self.record(RadioOp::SetRadioPower(sub_id, on));
        Ok(())
    }

    async fn hangup_all_calls(&self, sub_id: SubId) -> Result<(), RadioError> {
        self.record(RadioOp::HangupAllCalls(sub_id));
        Ok(())
    }

    async fn setup_bearer(
        &self,
        sub_id: SubId,
        cid: BearerId,
        _apn: &str,
    ) -> Result<(), RadioError> {
        self.record(RadioOp::SetupBearer(sub_id, cid));
        self.park(&self.hold_setup).await;
        if self.fail_setup.load(Ordering::Acquire) {
            return Err(RadioError::CommandRejected("setup failed".into()));
        }
        Ok(())
    }

    async fn teardown_bearer(&self, sub_id: SubId, cid: BearerId) -> Result<(), RadioError> {
        self.record(RadioOp::TeardownBearer(sub_id, cid));
        self.park(&self.hold_teardown).await;
        Ok(())
    }

    async fn cdma_subscription_source(
        &self,
        sub_id: SubId,
    ) -> Result<CdmaSubscriptionSource, RadioError> {
        self.record(RadioOp::CdmaSubscriptionSource(sub_id));
        Ok(CdmaSubscriptionSource::RuimSim)
    }

    fn set_data_event_registration(&self, sub_id: SubId, enabled: bool) {
        self.record(RadioOp::SetDataEventRegistration(sub_id, enabled));
    }
}

// ============================================================================
// SimIccSource
// ============================================================================

/// In-memory ICC record source keyed by slot and application family.
#[derive(Default)]
pub struct SimIccSource {
    records: Mutex<HashMap<(SlotId, AppFamily), IccRecords>>,
}

impl SimIccSource {
    /// Creates an empty record source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) the records for a slot/family.
    pub fn insert(&self, slot: SlotId, family: AppFamily, records: IccRecords) {
        self.records.lock().unwrap().insert((slot, family), records);
    }
}

impl IccRecordSource for SimIccSource {
    fn records_for(&self, slot: SlotId, family: AppFamily) -> Option<IccRecords> {
        self.records.lock().unwrap().get(&(slot, family)).cloned()
    }
}

// ============================================================================
// MemoryCarrierTable
// ============================================================================

/// In-memory current-carrier table.
#[derive(Default)]
pub struct MemoryCarrierTable {
    carriers: Mutex<HashMap<SubId, String>>,
    fail_writes: AtomicBool,
}

impl MemoryCarrierTable {
    /// Creates an empty carrier table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (error-path testing).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Returns the recorded carrier for `sub_id`, if any.
    pub fn current(&self, sub_id: SubId) -> Option<String> {
        self.carriers.lock().unwrap().get(&sub_id).cloned()
    }
}

impl CarrierTable for MemoryCarrierTable {
    fn set_current_carrier(
        &self,
        sub_id: SubId,
        operator_numeric: &str,
    ) -> Result<(), CarrierError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(CarrierError("store unavailable".into()));
        }
        self.carriers
            .lock()
            .unwrap()
            .insert(sub_id, operator_numeric.to_string());
        Ok(())
    }
}

// ============================================================================
// EventLog
// ============================================================================

/// Notification sink that records every event for later inspection.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<TelephonyEvent>>,
}

impl EventLog {
    /// Creates an empty event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event delivered so far.
    pub fn events(&self) -> Vec<TelephonyEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events originating from one subscription.
    pub fn events_for(&self, sub_id: SubId) -> Vec<TelephonyEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.sub_id() == sub_id)
            .cloned()
            .collect()
    }
}

impl NotificationSink for EventLog {
    fn notify(&self, event: TelephonyEvent) {
        debug!("telephony event: {:?}", event);
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_radio_records_commands() {
        let radio = SimRadio::new();
        radio.set_radio_power(0, false).await.unwrap();
        radio.set_radio_power(0, false).await.unwrap();
        radio.set_radio_power(1, false).await.unwrap();

        assert_eq!(radio.power_off_count(0), 2);
        assert_eq!(radio.power_off_count(1), 1);
    }

    #[tokio::test]
    async fn test_sim_radio_holds_teardowns() {
        use std::sync::Arc;
        let radio = Arc::new(SimRadio::new());
        radio.hold_teardowns(true);

        let r = Arc::clone(&radio);
        let handle = tokio::spawn(async move { r.teardown_bearer(0, 1).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        radio.release_holds();
        handle.await.unwrap().unwrap();
        assert_eq!(radio.teardown_count(0), 1);
    }

    #[test]
    fn test_memory_carrier_table() {
        let table = MemoryCarrierTable::new();
        table.set_current_carrier(0, "00101").unwrap();
        assert_eq!(table.current(0).as_deref(), Some("00101"));

        table.fail_writes(true);
        assert!(table.set_current_carrier(0, "00102").is_err());
        assert_eq!(table.current(0).as_deref(), Some("00101"));
    }

    #[test]
    fn test_event_log_filters_by_sub() {
        let log = EventLog::new();
        log.notify(TelephonyEvent::SimStateChanged { sub_id: 0, activated: true });
        log.notify(TelephonyEvent::SimStateChanged { sub_id: 1, activated: true });

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events_for(1).len(), 1);
    }
}
