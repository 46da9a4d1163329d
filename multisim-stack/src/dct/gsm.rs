//! GSM-family data-connection tracker
//!
//! Tracks one packet-data session per provisioned APN context. Bearer
//! requests are spawned against the radio-command layer and their
//! completions return through the tracker's own mailbox, so every state
//! transition happens inside message processing.

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use multisim_common::config::ApnConfig;
use multisim_common::types::{reason, ApnType, BearerId, RadioFamily, SessionState, SubId, Subscription};

use crate::notify::TelephonyEvent;
use crate::radio::{CdmaSubscriptionSource, DeviceIdentity};
use crate::tasks::{DctHandle, DctMessage, DisconnectListener, ListenerId, SetupTrigger};

use super::{DctDeps, PendingDisconnects, RetryBackoff, SelfAddressed, SubscriptionAwareDataController};

/// Bearer ids are partitioned per subscription.
const BEARERS_PER_SUB: u32 = 8;

/// One APN context and its session.
struct ApnContext {
    apn_type: ApnType,
    apn_name: String,
    cid: BearerId,
    state: SessionState,
}

/// Per-subscription GSM-family tracker.
pub struct GsmDataConnectionTracker {
    sub_id: SubId,
    deps: DctDeps,
    self_handle: Option<DctHandle>,
    contexts: Vec<ApnContext>,
    pending: PendingDisconnects,
    backoff: RetryBackoff,
    internal_data_enabled: bool,
    attached: bool,
    records_loaded: bool,
    activated: bool,
    cleanup_reason: String,
    device_identity: Option<DeviceIdentity>,
}

impl GsmDataConnectionTracker {
    /// Creates a tracker for the given subscription and APN provisioning.
    pub fn new(sub_id: SubId, apns: &[ApnConfig], deps: DctDeps) -> Self {
        let contexts = apns
            .iter()
            .enumerate()
            .map(|(idx, apn)| ApnContext {
                apn_type: apn.apn_type,
                apn_name: apn.name.clone(),
                cid: sub_id as u32 * BEARERS_PER_SUB + idx as u32,
                state: SessionState::Idle,
            })
            .collect();
        let internal_data_enabled = deps.dds.current() == sub_id;
        Self {
            sub_id,
            deps,
            self_handle: None,
            contexts,
            pending: PendingDisconnects::new(),
            backoff: RetryBackoff::new(),
            internal_data_enabled,
            attached: false,
            records_loaded: false,
            activated: false,
            cleanup_reason: reason::RADIO_TURNED_OFF.to_string(),
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

    fn notify_state(&self, apn_type: ApnType, state: SessionState, why: &str) {
        self.deps.sink.notify(TelephonyEvent::DataConnectionStateChanged {
            sub_id: self.sub_id,
            apn_type,
            state,
            reason: why.to_string(),
        });
    }

    fn spawn_setup(&self, cid: BearerId, apn_name: String) {
        let Some(handle) = self.self_handle.clone() else {
            return;
        };
        let radio = self.deps.radio.clone();
        let sub_id = self.sub_id;
        tokio::spawn(async move {
            let result = radio
                .setup_bearer(sub_id, cid, &apn_name)
                .await
                .map_err(|e| e.to_string());
            let _ = handle.send(DctMessage::SetupComplete { cid, result }).await;
        });
    }

    fn spawn_teardown(&self, cid: BearerId) {
        let Some(handle) = self.self_handle.clone() else {
            return;
        };
        let radio = self.deps.radio.clone();
        let sub_id = self.sub_id;
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
impl SubscriptionAwareDataController for GsmDataConnectionTracker {
    fn family(&self) -> RadioFamily {
        RadioFamily::Gsm
    }

    fn is_disconnected(&self) -> bool {
        self.contexts.iter().all(|c| c.state == SessionState::Idle)
    }

    async fn try_setup(&mut self, trigger: SetupTrigger) {
        if !self.setup_allowed() {
            debug!(
                sub_id = self.sub_id,
                ?trigger,
                enabled = self.internal_data_enabled,
                dds = self.is_dds(),
                attached = self.attached,
                "data setup not permitted"
            );
            return;
        }
        for idx in 0..self.contexts.len() {
            if self.contexts[idx].state != SessionState::Idle {
                continue;
            }
            self.contexts[idx].state = SessionState::Connecting;
            let (cid, name, apn_type) = {
                let c = &self.contexts[idx];
                (c.cid, c.apn_name.clone(), c.apn_type)
            };
            info!(sub_id = self.sub_id, cid, apn = %name, "bringing up data session");
            self.notify_state(apn_type, SessionState::Connecting, reason::DATA_ATTACHED);
            self.spawn_setup(cid, name);
        }
    }

    async fn on_setup_complete(&mut self, cid: BearerId, result: Result<(), String>) {
        let Some(ctx) = self.contexts.iter_mut().find(|c| c.cid == cid) else {
            warn!(sub_id = self.sub_id, cid, "setup completion for unknown bearer");
            return;
        };
        if ctx.state != SessionState::Connecting {
            // A cleanup overtook the establishment; the teardown path owns
            // the session now.
            debug!(sub_id = self.sub_id, cid, state = %ctx.state, "stale setup completion");
            return;
        }
        match result {
            Ok(()) => {
                ctx.state = SessionState::Connected;
                let apn_type = ctx.apn_type;
                info!(sub_id = self.sub_id, cid, "data session connected");
                self.backoff.reset();
                self.notify_state(apn_type, SessionState::Connected, reason::DATA_ATTACHED);
                if !self.internal_data_enabled {
                    // Data was disabled while the bearer came up.
                    self.cleanup_all(reason::DATA_DISABLED, None).await;
                }
            }
            Err(e) => {
                ctx.state = SessionState::Idle;
                let apn_type = ctx.apn_type;
                warn!(sub_id = self.sub_id, cid, "data session setup failed: {}", e);
                self.notify_state(apn_type, SessionState::Idle, reason::DATA_ATTACHED);
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
        for idx in 0..self.contexts.len() {
            match self.contexts[idx].state {
                SessionState::Connected | SessionState::Connecting => {
                    self.contexts[idx].state = SessionState::Disconnecting;
                    let (cid, apn_type) = (self.contexts[idx].cid, self.contexts[idx].apn_type);
                    info!(sub_id = self.sub_id, cid, why, "tearing down data session");
                    self.pending.note_teardown();
                    self.notify_state(apn_type, SessionState::Disconnecting, why);
                    self.spawn_teardown(cid);
                }
                // Teardown already in flight; the existing completion will
                // account for it.
                SessionState::Disconnecting => {}
                SessionState::Idle => {}
            }
        }
        if self.pending.pending() == 0 {
            debug!(sub_id = self.sub_id, why, "no live sessions, draining immediately");
            self.pending.drain(self.sub_id);
        }
    }

    async fn on_disconnect_done(&mut self, cid: BearerId) {
        if let Some(ctx) = self.contexts.iter_mut().find(|c| c.cid == cid) {
            ctx.state = SessionState::Idle;
            let apn_type = ctx.apn_type;
            let why = self.cleanup_reason.clone();
            self.notify_state(apn_type, SessionState::Idle, &why);
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
            });
        }
    }

    async fn on_subscription_deactivated(&mut self) {
        self.activated = false;
        self.records_loaded = false;
        self.attached = false;
        self.deps.radio.set_data_event_registration(self.sub_id, false);
        self.cleanup_all("subscriptionDeactivated", None).await;
    }

    async fn on_records_loaded(&mut self) {
        self.records_loaded = true;
        self.try_setup(SetupTrigger::RecordsLoaded).await;
    }

    fn on_device_identity(&mut self, identity: DeviceIdentity) {
        debug!(sub_id = self.sub_id, imei = ?identity.imei, "device identity loaded");
        self.device_identity = Some(identity);
    }

    fn on_cdma_subscription_source(&mut self, source: CdmaSubscriptionSource) {
        debug!(sub_id = self.sub_id, %source, "ignoring CDMA subscription source");
    }

    async fn on_data_network_state(&mut self, attached: bool) {
        if self.attached == attached {
            return;
        }
        self.attached = attached;
        if attached {
            self.backoff.reset();
            self.try_setup(SetupTrigger::NetworkAttached).await;
        } else {
            self.cleanup_all(reason::DATA_DETACHED, None).await;
        }
    }
}

impl SelfAddressed for GsmDataConnectionTracker {
    fn set_self_handle(&mut self, handle: DctHandle) {
        self.self_handle = Some(handle);
    }
}
