//! Cross-Subscription Coordination
//!
//! The coordinator is the one component that sees every subscription. It
//! owns the active-data-subscription selector, routes cross-subscription
//! requests ("is sub N's data idle?", "tell me when it drains") to the right
//! tracker mailbox, and keeps each phone facade on the radio family its card
//! application calls for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use multisim_common::config::StackConfig;
use multisim_common::error::{Error, Result};
use multisim_common::types::{RadioFamily, SubId, Subscription};

use crate::carrier::CarrierTable;
use crate::icc::IccRecordSource;
use crate::notify::NotificationSink;
use crate::phone::PhoneFacade;
use crate::radio::RadioCommands;
use crate::registry::SubscriptionRegistry;
use crate::sst::SstConfig;
use crate::tasks::{DctMessage, DisconnectListener, ListenerId, SstMessage};

// ============================================================================
// Active-Data-Subscription Selector
// ============================================================================

/// Which subscription currently carries packet data.
///
/// Read on every setup decision and dispatch guard; written only by the
/// coordinator's switch sequence.
pub struct DdsSelector(AtomicUsize);

impl DdsSelector {
    /// Creates a selector pointing at `initial`.
    pub fn new(initial: SubId) -> Self {
        Self(AtomicUsize::new(initial))
    }

    /// The current active-data-subscription.
    pub fn current(&self) -> SubId {
        self.0.load(Ordering::Acquire)
    }

    /// Repoints the selector.
    pub fn set(&self, sub_id: SubId) {
        self.0.store(sub_id, Ordering::Release);
    }
}

// ============================================================================
// Shared Services
// ============================================================================

/// External collaborators shared by every actor in the stack.
#[derive(Clone)]
pub struct Services {
    /// Radio command transport
    pub radio: Arc<dyn RadioCommands>,
    /// Decoded card records
    pub icc: Arc<dyn IccRecordSource>,
    /// Current-carrier persistence
    pub carrier: Arc<dyn CarrierTable>,
    /// Broadcast sink
    pub sink: Arc<dyn NotificationSink>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Cross-subscription coordination layer.
pub struct Coordinator {
    config: Arc<StackConfig>,
    services: Services,
    registry: Arc<SubscriptionRegistry>,
    dds: Arc<DdsSelector>,
    sst_config: SstConfig,
    phones: RwLock<Vec<Arc<PhoneFacade>>>,
}

impl Coordinator {
    /// Creates the coordinator without any phone facades; call
    /// [`Coordinator::bootstrap`] to spawn them.
    pub fn new(config: StackConfig, services: Services) -> Arc<Self> {
        let registry = Arc::new(SubscriptionRegistry::new(config.num_subscriptions()));
        let dds = Arc::new(DdsSelector::new(config.default_data_subscription));
        let sst_config = SstConfig::from_stack(&config);
        Arc::new(Self {
            config: Arc::new(config),
            services,
            registry,
            dds,
            sst_config,
            phones: RwLock::new(Vec::new()),
        })
    }

    /// Spawns one phone facade per configured subscription, each on the
    /// radio family its boot-time card application calls for.
    pub fn bootstrap(self: &Arc<Self>) {
        let facades: Vec<_> = self
            .config
            .subscriptions
            .iter()
            .enumerate()
            .map(|(sub_id, sub)| {
                let family = RadioFamily::for_app_family(sub.app_family);
                info!(sub_id, %family, "spawning phone");
                PhoneFacade::new(self, sub_id, family)
            })
            .collect();
        *self.phones.write().unwrap() = facades;
    }

    /// Stack configuration.
    pub fn config(&self) -> &Arc<StackConfig> {
        &self.config
    }

    /// Shared external collaborators.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Active-data-subscription selector.
    pub fn dds(&self) -> Arc<DdsSelector> {
        self.dds.clone()
    }

    /// Subscription registry.
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Service-state tracker tunables.
    pub fn sst_config(&self) -> &SstConfig {
        &self.sst_config
    }

    /// The facade serving `sub_id`.
    pub fn phone(&self, sub_id: SubId) -> Result<Arc<PhoneFacade>> {
        self.phones
            .read()
            .unwrap()
            .get(sub_id)
            .cloned()
            .ok_or(Error::SubscriptionNotAvailable(sub_id))
    }

    /// Asks `sub_id`'s data tracker whether every session is idle.
    pub async fn is_data_disconnected(&self, sub_id: SubId) -> Result<bool> {
        let phone = self.phone(sub_id)?;
        let (tx, rx) = oneshot::channel();
        phone
            .dct()
            .send(DctMessage::QueryDisconnected { reply: tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Registers a listener for `sub_id` reaching "all data disconnected".
    /// Fires immediately when already idle.
    pub async fn register_for_all_disconnected(&self, sub_id: SubId, listener: DisconnectListener) {
        match self.phone(sub_id) {
            Ok(phone) => {
                if let Err(e) = phone
                    .dct()
                    .send(DctMessage::RegisterAllDisconnected { listener })
                    .await
                {
                    // A dead tracker counts as drained; tell the listener so
                    // it never waits out its fallback timer for nothing.
                    warn!(sub_id, "tracker unreachable, treating data as disconnected");
                    if let Some(DctMessage::RegisterAllDisconnected { listener }) =
                        e.0.into_message()
                    {
                        listener.notify(sub_id);
                    }
                }
            }
            Err(_) => {
                warn!(sub_id, "no phone for subscription, treating data as disconnected");
                listener.notify(sub_id);
            }
        }
    }

    /// Removes a previously registered listener.
    pub async fn unregister_for_all_disconnected(&self, sub_id: SubId, id: ListenerId) {
        if let Ok(phone) = self.phone(sub_id) {
            let _ = phone
                .dct()
                .send(DctMessage::UnregisterAllDisconnected { id })
                .await;
        }
    }

    /// Enables internal data on `sub_id`; `done` completes once the flag is
    /// applied.
    pub async fn enable_data(&self, sub_id: SubId, done: Option<oneshot::Sender<()>>) -> Result<()> {
        self.set_internal_data_enabled(sub_id, true, done).await
    }

    /// Disables internal data on `sub_id`; `done` completes only after every
    /// session has drained to idle.
    pub async fn disable_data(&self, sub_id: SubId, done: Option<oneshot::Sender<()>>) -> Result<()> {
        self.set_internal_data_enabled(sub_id, false, done).await
    }

    async fn set_internal_data_enabled(
        &self,
        sub_id: SubId,
        enabled: bool,
        done: Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        let phone = self.phone(sub_id)?;
        phone
            .dct()
            .send(DctMessage::SetInternalDataEnabled { enabled, done })
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Tells `sub_id`'s data tracker to re-evaluate against the current
    /// active-data-subscription, waiting until it has done so.
    pub async fn update_data_connection_tracker(&self, sub_id: SubId) -> Result<()> {
        let phone = self.phone(sub_id)?;
        let (tx, rx) = oneshot::channel();
        phone
            .dct()
            .send(DctMessage::DdsChanged { ack: Some(tx) })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Switches the active-data-subscription.
    ///
    /// The outgoing subscription is told first so its sessions start
    /// draining before the incoming one brings data up.
    pub async fn set_active_data_subscription(&self, sub_id: SubId) -> Result<()> {
        if sub_id >= self.config.num_subscriptions() {
            return Err(Error::SubscriptionNotAvailable(sub_id));
        }
        let previous = self.dds.current();
        if previous == sub_id {
            debug!(sub_id, "already the active data subscription");
            return Ok(());
        }
        info!(previous, new = sub_id, "switching active data subscription");
        self.dds.set(sub_id);

        self.update_data_connection_tracker(previous).await?;
        self.update_data_connection_tracker(sub_id).await?;
        self.update_current_carrier(sub_id).await?;
        Ok(())
    }

    /// Asks `sub_id`'s service-state tracker to refresh the carrier table.
    pub async fn update_current_carrier(&self, sub_id: SubId) -> Result<()> {
        let phone = self.phone(sub_id)?;
        phone
            .sst()
            .send(SstMessage::UpdateCurrentCarrier)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Requests the safe radio power-off sequence on `sub_id`.
    pub async fn power_off_radio_safely(&self, sub_id: SubId) -> Result<()> {
        let phone = self.phone(sub_id)?;
        phone.power_off_radio_safely().await;
        Ok(())
    }

    /// Ensures the facade serving the subscription runs the radio family its
    /// card application calls for, rewiring it when the family changed.
    pub async fn reconcile_phone_object(self: &Arc<Self>, subscription: &Subscription) -> Result<()> {
        let phone = self.phone(subscription.sub_id)?;
        let desired = RadioFamily::for_app_family(subscription.app_family);
        if phone.family() == desired {
            return Ok(());
        }
        info!(
            sub_id = subscription.sub_id,
            from = %phone.family(),
            to = %desired,
            "card application family changed, rewiring phone"
        );
        phone.swap_family(self, desired).await;
        // The fresh tracker pair missed the activation broadcast; replay it.
        if subscription.is_activated() {
            let _ = phone
                .dct()
                .send(DctMessage::SubscriptionActivated {
                    subscription: *subscription,
                })
                .await;
        }
        Ok(())
    }

    /// Shuts every phone facade down.
    pub async fn shutdown(&self) {
        let phones: Vec<_> = self.phones.read().unwrap().clone();
        for phone in phones {
            phone.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dds_selector_read_write() {
        let dds = DdsSelector::new(0);
        assert_eq!(dds.current(), 0);
        dds.set(2);
        assert_eq!(dds.current(), 2);
    }
}
