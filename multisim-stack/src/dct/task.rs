//! Data-connection tracker actor
//!
//! Drives a radio-family controller from an ordered mailbox. Unsolicited
//! attach/detach radio events are dropped at dispatch while the subscription
//! is not the active-data-subscription; completion-style messages (bearer
//! results, tokens, queries) are always delivered so nobody waits forever on
//! a dormant tracker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use multisim_common::types::SubId;

use crate::coordinator::DdsSelector;
use crate::tasks::{DctHandle, DctMessage, Task, TaskHandle, TaskMessage};

use super::{SelfAddressed, SubscriptionAwareDataController};

/// Per-subscription data-connection tracker actor.
pub struct DctTask {
    sub_id: SubId,
    dds: Arc<DdsSelector>,
    controller: Box<dyn SubscriptionAwareDataController>,
}

impl DctTask {
    /// Creates the actor around a radio-family controller.
    pub fn new(
        sub_id: SubId,
        dds: Arc<DdsSelector>,
        controller: Box<dyn SubscriptionAwareDataController>,
    ) -> Self {
        Self {
            sub_id,
            dds,
            controller,
        }
    }

    /// Spawns the actor with its own mailbox and returns the handle.
    pub fn spawn<C>(sub_id: SubId, dds: Arc<DdsSelector>, mut controller: C, capacity: usize) -> DctHandle
    where
        C: SubscriptionAwareDataController + SelfAddressed + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = TaskHandle::new(tx);
        controller.set_self_handle(handle.clone());
        let mut task = DctTask::new(sub_id, dds, Box::new(controller));
        tokio::spawn(async move {
            task.run(rx).await;
        });
        handle
    }

    async fn dispatch(&mut self, msg: DctMessage) {
        match msg {
            DctMessage::TrySetup { trigger } => self.controller.try_setup(trigger).await,
            DctMessage::SetupComplete { cid, result } => {
                self.controller.on_setup_complete(cid, result).await;
            }
            DctMessage::CleanupAll { reason, done } => {
                self.controller.cleanup_all(&reason, done).await;
            }
            DctMessage::DisconnectDone { cid } => self.controller.on_disconnect_done(cid).await,
            DctMessage::SetInternalDataEnabled { enabled, done } => {
                self.controller.set_internal_data_enabled(enabled, done).await;
            }
            DctMessage::QueryDisconnected { reply } => {
                let _ = reply.send(self.controller.is_disconnected());
            }
            DctMessage::RegisterAllDisconnected { listener } => {
                self.controller.register_for_all_disconnected(listener);
            }
            DctMessage::UnregisterAllDisconnected { id } => {
                self.controller.unregister_for_all_disconnected(id);
            }
            DctMessage::DdsChanged { ack } => {
                self.controller.on_dds_changed().await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            DctMessage::SubscriptionActivated { subscription } => {
                self.controller.on_subscription_activated(subscription).await;
            }
            DctMessage::SubscriptionDeactivated => {
                self.controller.on_subscription_deactivated().await;
            }
            DctMessage::RecordsLoaded => self.controller.on_records_loaded().await,
            DctMessage::DeviceIdentityDone { identity } => {
                self.controller.on_device_identity(identity);
            }
            DctMessage::CdmaSubscriptionSourceDone { source } => {
                self.controller.on_cdma_subscription_source(source);
            }
            DctMessage::DataNetworkStateChanged { attached } => {
                if self.dds.current() != self.sub_id {
                    debug!(
                        sub_id = self.sub_id,
                        attached, "dormant tracker, dropping radio data event"
                    );
                    return;
                }
                self.controller.on_data_network_state(attached).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Task for DctTask {
    type Message = DctMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<DctMessage>>) {
        info!(
            sub_id = self.sub_id,
            family = %self.controller.family(),
            "data-connection tracker started"
        );
        while let Some(envelope) = rx.recv().await {
            match envelope {
                TaskMessage::Message(msg) => self.dispatch(msg).await,
                TaskMessage::Shutdown => break,
            }
        }
        info!(sub_id = self.sub_id, "data-connection tracker stopped");
    }
}
