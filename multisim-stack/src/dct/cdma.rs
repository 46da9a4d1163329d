//! CDMA-family data-connection tracker
//!
//! A single packet-data bearer per subscription; no APN context fan-out.
//! On activation the tracker additionally reads where the CDMA subscription
//! is provisioned from (card vs modem NV).

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use multisim_common::types::{reason, ApnType, BearerId, RadioFamily, SessionState, SubId, Subscription};

use crate::notify::TelephonyEvent;
use crate::radio::{CdmaSubscriptionSource, DeviceIdentity};
use crate::tasks::{DctHandle, DctMessage, DisconnectListener, ListenerId, SetupTrigger};

use super::{DctDeps, PendingDisconnects, RetryBackoff, SelfAddressed, SubscriptionAwareDataController};

/// Per-subscription CDMA-family tracker.
pub struct CdmaDataConnectionTracker {
    sub_id: SubId,
    deps: DctDeps,
    self_handle: Option<DctHandle>,
    cid: BearerId,
    state: SessionState,
    pending: PendingDisconnects,
    backoff: RetryBackoff,
    internal_data_enabled: bool,
    attached: bool,
    records_loaded: bool,
    activated: bool,
    cleanup_reason: String,
    subscription_source: Option<CdmaSubscriptionSource>,
    device_identity: Option<DeviceIdentity>,
}

impl CdmaDataConnectionTracker {
    /// Creates a tracker for the given subscription.
    pub fn new(sub_id: SubId, deps: DctDeps) -> Self {
        let internal_data_enabled = deps.dds.current() == sub_id;
        Self {
            sub_id,
            deps,
            self_handle: None,
            cid: sub_id as u32 * 8,
            state: SessionState::Idle,
            pending: PendingDisconnects::new(),
            backoff: RetryBackoff::new(),
            internal_data_enabled,
            attached: false,
            records_loaded: false,
            activated: false,
            cleanup_reason: reason::RADIO_TURNED_OFF.to_string(),
            subscription_source: None,
            device_identity: None,
        }
    }

    fn is_dds(&self) -> bool {
        self.deps.dds.current() == self.sub_id
    }

    fn setup_allowed(&self) -> bool {
        self.internal_data_enabled
            && self.is_dds()
            && self.activated
            && self.attached
            && self.records_loaded
    }

    fn notify_state(&self, state: SessionState, why: &str) {
        self.deps.sink.notify(TelephonyEvent::DataConnectionStateChanged {
            sub_id: self.sub_id,
            apn_type: ApnType::Default,
            state,
            reason: why.to_string(),
        });
    }

    fn spawn_setup(&self) {
        let Some(handle) = self.self_handle.clone() else {
            return;
        };
        let radio = self.deps.radio.clone();
        let (sub_id, cid) = (self.sub_id, self.cid);
        tokio::spawn(async move {
            let result = radio
                .setup_bearer(sub_id, cid, "cdma")
                .await
                .map_err(|e| e.to_string());
            let _ = handle.send(DctMessage::SetupComplete { cid, result }).await;
        });
    }

    fn spawn_teardown(&self) {
        let Some(handle) = self.self_handle.clone() else {
            return;
        };
        let radio = self.deps.radio.clone();
        let (sub_id, cid) = (self.sub_id, self.cid);
        tokio::spawn(async move {
            if let Err(e) = radio.teardown_bearer(sub_id, cid).await {
                warn!(sub_id, cid, "bearer teardown failed: {}", e);
            }
            let _ = handle.send(DctMessage::DisconnectDone { cid }).await;
        });
    }

    fn schedule_retry(&mut self) {
        let Some(handle) = self.self_handle.clone() else {
            return;
        };
        let delay = self.backoff.next_delay();
        debug!(sub_id = self.sub_id, ?delay, "scheduling data retry");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle
                .send(DctMessage::TrySetup {
                    trigger: SetupTrigger::RetryTimer,
                })
                .await;
        });
    }
}

#[async_trait::async_trait]
impl SubscriptionAwareDataController for CdmaDataConnectionTracker {
    fn family(&self) -> RadioFamily {
        RadioFamily::Cdma
    }

    fn is_disconnected(&self) -> bool {
        self.state == SessionState::Idle
    }

    async fn try_setup(&mut self, trigger: SetupTrigger) {
        if !self.setup_allowed() || self.state != SessionState::Idle {
            debug!(sub_id = self.sub_id, ?trigger, state = %self.state, "data setup not permitted");
            return;
        }
        self.state = SessionState::Connecting;
        info!(sub_id = self.sub_id, cid = self.cid, "bringing up data session");
        self.notify_state(SessionState::Connecting, reason::DATA_ATTACHED);
        self.spawn_setup();
    }

    async fn on_setup_complete(&mut self, cid: BearerId, result: Result<(), String>) {
        if cid != self.cid || self.state != SessionState::Connecting {
            debug!(sub_id = self.sub_id, cid, state = %self.state, "stale setup completion");
            return;
        }
        match result {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!(sub_id = self.sub_id, cid, "data session connected");
                self.backoff.reset();
                self.notify_state(SessionState::Connected, reason::DATA_ATTACHED);
                if !self.internal_data_enabled {
                    self.cleanup_all(reason::DATA_DISABLED, None).await;
                }
            }
            Err(e) => {
                self.state = SessionState::Idle;
                warn!(sub_id = self.sub_id, cid, "data session setup failed: {}", e);
                self.notify_state(SessionState::Idle, reason::DATA_ATTACHED);
                if self.setup_allowed() {
                    self.schedule_retry();
                }
            }
        }
    }

    async fn cleanup_all(&mut self, why: &str, done: Option<oneshot::Sender<()>>) {
        self.cleanup_reason = why.to_string();
        if let Some(done) = done {
            self.pending.queue_waiter(done);
        }
        match self.state {
            SessionState::Connected | SessionState::Connecting => {
                self.state = SessionState::Disconnecting;
                info!(sub_id = self.sub_id, cid = self.cid, why, "tearing down data session");
                self.pending.note_teardown();
                self.notify_state(SessionState::Disconnecting, why);
                self.spawn_teardown();
            }
            SessionState::Disconnecting => {}
            SessionState::Idle => {}
        }
        if self.pending.pending() == 0 {
            debug!(sub_id = self.sub_id, why, "no live session, draining immediately");
            self.pending.drain(self.sub_id);
        }
    }

    async fn on_disconnect_done(&mut self, cid: BearerId) {
        if cid == self.cid {
            self.state = SessionState::Idle;
            let why = self.cleanup_reason.clone();
            self.notify_state(SessionState::Idle, &why);
        }
        if self.pending.on_disconnect_done() {
            info!(sub_id = self.sub_id, "all data disconnected");
            self.pending.drain(self.sub_id);
        }
    }

    async fn set_internal_data_enabled(
        &mut self,
        enabled: bool,
        done: Option<oneshot::Sender<()>>,
    ) {
        info!(sub_id = self.sub_id, enabled, "internal data enabled flag");
        self.internal_data_enabled = enabled;
        if enabled {
            self.backoff.reset();
            if let Some(done) = done {
                let _ = done.send(());
            }
            self.try_setup(SetupTrigger::DataEnabled).await;
        } else {
            self.cleanup_all(reason::DATA_DISABLED, done).await;
        }
    }

    fn register_for_all_disconnected(&mut self, listener: DisconnectListener) {
        let disconnected = self.is_disconnected();
        self.pending.register(listener, disconnected, self.sub_id);
    }

    fn unregister_for_all_disconnected(&mut self, id: ListenerId) {
        self.pending.unregister(id);
    }

    async fn on_dds_changed(&mut self) {
        let is_dds = self.is_dds();
        info!(sub_id = self.sub_id, is_dds, "active data subscription changed");
        self.deps.radio.set_data_event_registration(self.sub_id, is_dds);
        if is_dds {
            self.internal_data_enabled = true;
            self.backoff.reset();
            self.try_setup(SetupTrigger::DataEnabled).await;
        } else {
            self.internal_data_enabled = false;
            self.cleanup_all(reason::DATA_DISABLED, None).await;
        }
    }

    async fn on_subscription_activated(&mut self, subscription: Subscription) {
        info!(sub_id = self.sub_id, "{}", subscription);
        self.activated = true;
        self.deps
            .radio
            .set_data_event_registration(self.sub_id, self.is_dds());
        if let Some(handle) = self.self_handle.clone() {
            let radio = self.deps.radio.clone();
            let sub_id = self.sub_id;
            tokio::spawn(async move {
                match radio.get_device_identity(sub_id).await {
                    Ok(identity) => {
                        let _ = handle.send(DctMessage::DeviceIdentityDone { identity }).await;
                    }
                    Err(e) => warn!(sub_id, "device identity read failed: {}", e),
                }
                match radio.cdma_subscription_source(sub_id).await {
                    Ok(source) => {
                        let _ = handle
                            .send(DctMessage::CdmaSubscriptionSourceDone { source })
                            .await;
                    }
                    Err(e) => warn!(sub_id, "CDMA subscription source read failed: {}", e),
                }
            });
        }
    }

    async fn on_subscription_deactivated(&mut self) {
        self.activated = false;
        self.records_loaded = false;
        self.attached = false;
        self.subscription_source = None;
        self.deps.radio.set_data_event_registration(self.sub_id, false);
        self.cleanup_all("subscriptionDeactivated", None).await;
    }

    async fn on_records_loaded(&mut self) {
        self.records_loaded = true;
        self.try_setup(SetupTrigger::RecordsLoaded).await;
    }

    fn on_device_identity(&mut self, identity: DeviceIdentity) {
        debug!(sub_id = self.sub_id, meid = ?identity.meid, "device identity loaded");
        self.device_identity = Some(identity);
    }

    fn on_cdma_subscription_source(&mut self, source: CdmaSubscriptionSource) {
        info!(sub_id = self.sub_id, %source, "CDMA subscription source");
        self.subscription_source = Some(source);
    }

    async fn on_data_network_state(&mut self, attached: bool) {
        if attached {
            if !self.attached {
                self.attached = true;
                self.backoff.reset();
                self.try_setup(SetupTrigger::NetworkAttached).await;
            }
            return;
        }
        self.attached = false;
        if self.state == SessionState::Idle {
            // Nothing to tear down; anyone waiting on "all data
            // disconnected" still gets told.
            self.pending.notify_registrants(self.sub_id);
        } else {
            self.cleanup_all(reason::DATA_DETACHED, None).await;
        }
    }
}

impl SelfAddressed for CdmaDataConnectionTracker {
    fn set_self_handle(&mut self, handle: DctHandle) {
        self.self_handle = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::coordinator::DdsSelector;
    use crate::sim::{EventLog, MemoryCarrierTable, SimIccSource, SimRadio};
    use crate::tasks::{SstMessage, TaskHandle, TaskMessage};
    use tokio::sync::mpsc;

    fn tracker(
        sub_id: SubId,
        dds: SubId,
    ) -> (CdmaDataConnectionTracker, mpsc::Receiver<TaskMessage<DctMessage>>, Arc<SimRadio>) {
        let radio = Arc::new(SimRadio::new());
        let deps = DctDeps {
            radio: radio.clone(),
            icc: Arc::new(SimIccSource::new()),
            carrier: Arc::new(MemoryCarrierTable::new()),
            sink: Arc::new(EventLog::new()),
            dds: Arc::new(DdsSelector::new(dds)),
        };
        let mut dct = CdmaDataConnectionTracker::new(sub_id, deps);
        let (tx, rx) = mpsc::channel(16);
        dct.set_self_handle(TaskHandle::new(tx));
        (dct, rx, radio)
    }

    #[tokio::test]
    async fn test_single_session_lifecycle() {
        let (mut dct, mut rx, _radio) = tracker(0, 0);
        dct.activated = true;
        dct.records_loaded = true;

        dct.on_data_network_state(true).await;
        assert_eq!(dct.state, SessionState::Connecting);

        if let DctMessage::SetupComplete { cid, result } =
            rx.recv().await.unwrap().into_message().unwrap()
        {
            dct.on_setup_complete(cid, result).await;
        }
        assert_eq!(dct.state, SessionState::Connected);

        dct.cleanup_all(reason::RADIO_TURNED_OFF, None).await;
        assert_eq!(dct.state, SessionState::Disconnecting);

        if let DctMessage::DisconnectDone { cid } =
            rx.recv().await.unwrap().into_message().unwrap()
        {
            dct.on_disconnect_done(cid).await;
        }
        assert!(dct.is_disconnected());
    }

    #[tokio::test]
    async fn test_detach_while_idle_notifies_registrants() {
        let (mut dct, _rx, _radio) = tracker(0, 0);
        let (tx, mut sst_rx) = mpsc::channel(4);
        dct.register_for_all_disconnected(DisconnectListener::new(
            ListenerId::next(),
            TaskHandle::new(tx),
        ));
        // Registration while idle fires immediately; drop that event.
        let _ = sst_rx.recv().await;

        dct.on_data_network_state(false).await;

        match sst_rx.recv().await {
            Some(TaskMessage::Message(SstMessage::SiblingAllDataDisconnected { from_sub })) => {
                assert_eq!(from_sub, 0);
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_activation_reads_subscription_source() {
        let (mut dct, mut rx, radio) = tracker(0, 0);
        let sub = Subscription {
            sub_id: 0,
            slot_id: 0,
            app_index: 0,
            app_family: multisim_common::types::AppFamily::ThreeGpp2,
            status: multisim_common::types::SubscriptionStatus::Activated,
        };

        dct.on_subscription_activated(sub).await;

        let mut saw_source = false;
        for _ in 0..2 {
            match rx.recv().await.unwrap().into_message().unwrap() {
                DctMessage::DeviceIdentityDone { identity } => dct.on_device_identity(identity),
                DctMessage::CdmaSubscriptionSourceDone { source } => {
                    dct.on_cdma_subscription_source(source);
                    saw_source = true;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert!(saw_source);
        assert_eq!(dct.subscription_source, Some(CdmaSubscriptionSource::RuimSim));
        assert!(dct.device_identity.is_some());
        assert!(radio
            .ops()
            .contains(&crate::sim::RadioOp::CdmaSubscriptionSource(0)));
    }
}
