//! Service-State Tracking
//!
//! One tracker per subscription owns radio power and operator display state.
//! The central piece is the safe power-off sequence: before the radio is
//! switched off, data sessions on this subscription and on the
//! active-data-subscription are drained, with an armed/tag guard making the
//! request idempotent and a fallback timer bounding the wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use multisim_common::config::StackConfig;
use multisim_common::types::{reason, RadioFamily, SubId};

use crate::coordinator::{Coordinator, DdsSelector, Services};
use crate::notify::TelephonyEvent;
use crate::registry::SubscriptionRegistry;
use crate::tasks::{
    DctHandle, DctMessage, DisconnectListener, ListenerId, SstHandle, SstMessage, Task,
    TaskHandle, TaskMessage,
};

/// Service-state tracker tunables.
#[derive(Debug, Clone)]
pub struct SstConfig {
    /// Fallback timeout after which an armed power-off proceeds regardless
    /// of data state.
    pub power_off_timeout: Duration,
}

impl Default for SstConfig {
    fn default() -> Self {
        Self {
            power_off_timeout: Duration::from_secs(30),
        }
    }
}

impl SstConfig {
    /// Derives tracker tunables from the stack configuration.
    pub fn from_stack(config: &StackConfig) -> Self {
        Self {
            power_off_timeout: Duration::from_millis(config.power_off_timeout_ms),
        }
    }
}

/// Per-subscription service-state tracker actor.
pub struct ServiceStateTracker {
    sub_id: SubId,
    family: RadioFamily,
    services: Services,
    dds: Arc<DdsSelector>,
    registry: Arc<SubscriptionRegistry>,
    coordinator: Arc<Coordinator>,
    dct: DctHandle,
    self_handle: SstHandle,
    listener_id: ListenerId,
    config: SstConfig,
    /// Safe power-off armed and waiting for data to drain
    armed: bool,
    /// Generation counter distinguishing the latest arm from stale timers
    tag: u32,
    timeout_task: Option<JoinHandle<()>>,
    waiting_on: Option<SubId>,
}

impl ServiceStateTracker {
    /// Spawns a tracker actor and returns its handle.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        sub_id: SubId,
        family: RadioFamily,
        services: Services,
        dds: Arc<DdsSelector>,
        registry: Arc<SubscriptionRegistry>,
        coordinator: Arc<Coordinator>,
        dct: DctHandle,
        config: SstConfig,
        capacity: usize,
    ) -> SstHandle {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = TaskHandle::new(tx);
        let mut tracker = ServiceStateTracker {
            sub_id,
            family,
            services,
            dds,
            registry,
            coordinator,
            dct,
            self_handle: handle.clone(),
            listener_id: ListenerId::next(),
            config,
            armed: false,
            tag: 0,
            timeout_task: None,
            waiting_on: None,
        };
        tokio::spawn(async move {
            tracker.run(rx).await;
        });
        handle
    }

    /// Queries the local tracker's data state; a dead mailbox counts as
    /// disconnected so power-off can never deadlock on it.
    async fn local_data_disconnected(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.dct.send(DctMessage::QueryDisconnected { reply: tx }).await.is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    async fn handle_power_off_radio_safely(&mut self) {
        if self.armed {
            debug!(sub_id = self.sub_id, "safe power-off already armed");
            return;
        }

        let dds = self.dds.current();
        let local_disconnected = self.local_data_disconnected().await;
        let dds_disconnected = if dds == self.sub_id {
            local_disconnected
        } else {
            self.coordinator.is_data_disconnected(dds).await.unwrap_or(true)
        };

        if local_disconnected && (dds == self.sub_id || dds_disconnected) {
            // Nothing to drain; still issue the cleanup so any session that
            // races into existence is torn down under the same cause.
            let _ = self
                .dct
                .send(DctMessage::CleanupAll {
                    reason: reason::RADIO_TURNED_OFF.to_string(),
                    done: None,
                })
                .await;
            self.hangup_and_power_off().await;
            return;
        }

        let listener = DisconnectListener::new(self.listener_id, self.self_handle.clone());
        if dds != self.sub_id && !dds_disconnected {
            info!(sub_id = self.sub_id, dds, "waiting for data subscription to drain");
            self.coordinator.register_for_all_disconnected(dds, listener).await;
            self.waiting_on = Some(dds);
        } else {
            let _ = self
                .dct
                .send(DctMessage::RegisterAllDisconnected { listener })
                .await;
            self.waiting_on = Some(self.sub_id);
        }

        let _ = self
            .dct
            .send(DctMessage::CleanupAll {
                reason: reason::RADIO_TURNED_OFF.to_string(),
                done: None,
            })
            .await;

        self.arm_timeout().await;
    }

    /// Bumps the generation tag and schedules the fallback timer.
    async fn arm_timeout(&mut self) {
        self.tag = self.tag.wrapping_add(1);
        if let Some(old) = self.timeout_task.take() {
            old.abort();
        }
        if self.self_handle.is_closed() {
            // Cannot schedule the fallback; power off right away rather
            // than risk waiting forever.
            warn!(sub_id = self.sub_id, "cannot schedule power-off fallback");
            self.hangup_and_power_off().await;
            self.armed = false;
            return;
        }
        let handle = self.self_handle.clone();
        let tag = self.tag;
        let delay = self.config.power_off_timeout;
        self.timeout_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(SstMessage::PowerOffTimeout { tag }).await;
        }));
        self.armed = true;
        debug!(sub_id = self.sub_id, tag = self.tag, "safe power-off armed");
    }

    async fn handle_all_data_disconnected(&mut self, from_sub: SubId) {
        if !self.armed {
            debug!(sub_id = self.sub_id, from_sub, "stale all-data-disconnected event");
            return;
        }
        info!(sub_id = self.sub_id, from_sub, "data drained, powering radio off");
        self.unregister_waiter().await;
        self.disarm();
        self.hangup_and_power_off().await;
    }

    async fn handle_power_off_timeout(&mut self, tag: u32) {
        if !self.armed || tag != self.tag {
            debug!(sub_id = self.sub_id, tag, current = self.tag, "stale power-off timer");
            return;
        }
        warn!(
            sub_id = self.sub_id,
            "timed out waiting for data disconnect, powering radio off"
        );
        self.unregister_waiter().await;
        self.disarm();
        self.hangup_and_power_off().await;
    }

    async fn unregister_waiter(&mut self) {
        let Some(target) = self.waiting_on.take() else {
            return;
        };
        if target == self.sub_id {
            let _ = self
                .dct
                .send(DctMessage::UnregisterAllDisconnected { id: self.listener_id })
                .await;
        } else {
            self.coordinator
                .unregister_for_all_disconnected(target, self.listener_id)
                .await;
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
        if let Some(timer) = self.timeout_task.take() {
            timer.abort();
        }
    }

    /// Hangs up voice calls and powers the radio off. Command failures are
    /// logged; power state is reported regardless so listeners converge.
    async fn hangup_and_power_off(&mut self) {
        if let Err(e) = self.services.radio.hangup_all_calls(self.sub_id).await {
            warn!(sub_id = self.sub_id, "hangup before power-off failed: {}", e);
        }
        if let Err(e) = self.services.radio.set_radio_power(self.sub_id, false).await {
            warn!(sub_id = self.sub_id, "radio power-off failed: {}", e);
        }
        info!(sub_id = self.sub_id, "radio powered off");
        self.services.sink.notify(TelephonyEvent::ServiceStateChanged {
            sub_id: self.sub_id,
            radio_on: false,
        });
    }

    /// Publishes operator display values from the freshly loaded records and
    /// refreshes the carrier table when this is the data subscription.
    fn handle_records_loaded(&mut self) {
        let Some(subscription) = self.registry.current(self.sub_id).filter(|s| s.is_activated())
        else {
            debug!(sub_id = self.sub_id, "records loaded for inactive subscription");
            return;
        };
        let Some(records) = self
            .services
            .icc
            .records_for(subscription.slot_id, subscription.app_family)
        else {
            debug!(sub_id = self.sub_id, "records not yet readable");
            return;
        };
        self.services.sink.notify(TelephonyEvent::SpnDisplayChanged {
            sub_id: self.sub_id,
            operator_numeric: records.operator_numeric.clone(),
            spn: records.spn.clone(),
        });
        self.update_current_carrier();
    }

    fn update_current_carrier(&self) {
        if self.dds.current() != self.sub_id {
            return;
        }
        let Some(subscription) = self.registry.current(self.sub_id).filter(|s| s.is_activated())
        else {
            return;
        };
        let Some(records) = self
            .services
            .icc
            .records_for(subscription.slot_id, subscription.app_family)
        else {
            return;
        };
        if let Err(e) = self
            .services
            .carrier
            .set_current_carrier(self.sub_id, &records.operator_numeric)
        {
            warn!(sub_id = self.sub_id, "carrier table update failed: {}", e);
        } else {
            info!(
                sub_id = self.sub_id,
                operator = %records.operator_numeric,
                "current carrier updated"
            );
        }
    }

    async fn dispatch(&mut self, msg: SstMessage) {
        match msg {
            SstMessage::PowerOffRadioSafely => self.handle_power_off_radio_safely().await,
            SstMessage::SiblingAllDataDisconnected { from_sub } => {
                self.handle_all_data_disconnected(from_sub).await;
            }
            SstMessage::PowerOffTimeout { tag } => self.handle_power_off_timeout(tag).await,
            SstMessage::RecordsLoaded => self.handle_records_loaded(),
            SstMessage::UpdateCurrentCarrier => self.update_current_carrier(),
            SstMessage::QueryPowerOffPending { reply } => {
                let _ = reply.send(self.armed);
            }
        }
    }
}

#[async_trait::async_trait]
impl Task for ServiceStateTracker {
    type Message = SstMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<SstMessage>>) {
        info!(
            sub_id = self.sub_id,
            family = %self.family,
            "service-state tracker started"
        );
        while let Some(envelope) = rx.recv().await {
            match envelope {
                TaskMessage::Message(msg) => self.dispatch(msg).await,
                TaskMessage::Shutdown => break,
            }
        }
        self.disarm();
        info!(sub_id = self.sub_id, "service-state tracker stopped");
    }
}
