//! Subscription Registry
//!
//! Authoritative table of which logical subscription is bound to which card
//! slot and application. Activation allocates the first free subscription
//! index; per-subscription actors learn about activation changes through a
//! registered mailbox handle, never by polling.

use std::sync::Mutex;

use tracing::{debug, info, warn};

use multisim_common::error::{Error, Result};
use multisim_common::types::{
    AppFamily, AppIndex, SlotId, SubId, Subscription, SubscriptionStatus,
};

use crate::tasks::{DctHandle, DctMessage};

/// Table of logical subscriptions and their activation listeners.
pub struct SubscriptionRegistry {
    slots: Mutex<Vec<Subscription>>,
    listeners: Mutex<Vec<Option<DctHandle>>>,
}

impl SubscriptionRegistry {
    /// Creates a registry with `capacity` deactivated subscription indexes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(Subscription::empty).collect()),
            listeners: Mutex::new((0..capacity).map(|_| None).collect()),
        }
    }

    /// Number of subscription indexes the registry manages.
    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Activates a card application, allocating the first free subscription
    /// index.
    ///
    /// Activating an identical identity that is already live is idempotent
    /// and returns the existing entry without republishing.
    pub fn activate(
        &self,
        slot_id: SlotId,
        app_index: AppIndex,
        app_family: AppFamily,
    ) -> Result<Subscription> {
        let subscription = {
            let mut slots = self.slots.lock().unwrap();

            if let Some(existing) = slots.iter().find(|s| {
                s.is_activated()
                    && s.slot_id == slot_id
                    && s.app_index == app_index
                    && s.app_family == app_family
            }) {
                debug!("{} already activated", existing);
                return Ok(*existing);
            }

            let free = slots
                .iter_mut()
                .find(|s| s.status == SubscriptionStatus::Deactivated)
                .ok_or(Error::NoFreeSubscription)?;

            free.slot_id = slot_id;
            free.app_index = app_index;
            free.app_family = app_family;
            free.status = SubscriptionStatus::Activated;
            *free
        };

        info!("activated {}", subscription);
        self.publish(subscription.sub_id, DctMessage::SubscriptionActivated { subscription });
        Ok(subscription)
    }

    /// Deactivates a subscription index, resetting it to the empty
    /// placeholder.
    pub fn deactivate(&self, sub_id: SubId) -> Result<()> {
        {
            let mut slots = self.slots.lock().unwrap();
            let entry = slots
                .get_mut(sub_id)
                .ok_or(Error::SubscriptionNotAvailable(sub_id))?;
            if !entry.is_activated() {
                return Err(Error::SubscriptionNotAvailable(sub_id));
            }
            *entry = Subscription::empty(sub_id);
        }

        info!(sub_id, "deactivated subscription");
        self.publish(sub_id, DctMessage::SubscriptionDeactivated);
        Ok(())
    }

    /// Current entry for a subscription index, if within capacity.
    pub fn current(&self, sub_id: SubId) -> Option<Subscription> {
        self.slots.lock().unwrap().get(sub_id).copied()
    }

    /// True if the subscription index is currently activated.
    pub fn is_activated(&self, sub_id: SubId) -> bool {
        self.current(sub_id).is_some_and(|s| s.is_activated())
    }

    /// Registers the mailbox that receives activation changes for `sub_id`,
    /// replacing any previous registration.
    pub fn register_activation_listener(&self, sub_id: SubId, handle: DctHandle) {
        if let Some(slot) = self.listeners.lock().unwrap().get_mut(sub_id) {
            *slot = Some(handle);
        }
    }

    fn publish(&self, sub_id: SubId, msg: DctMessage) {
        let handle = self
            .listeners
            .lock()
            .unwrap()
            .get(sub_id)
            .and_then(|h| h.clone());
        if let Some(handle) = handle {
            if let Err(e) = handle.try_send(msg) {
                warn!(sub_id, "failed to publish activation change: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::tasks::{TaskHandle, TaskMessage};

    #[test]
    fn test_activate_allocates_first_free_index() {
        let registry = SubscriptionRegistry::new(2);

        let a = registry.activate(0, 0, AppFamily::ThreeGpp).unwrap();
        let b = registry.activate(1, 0, AppFamily::ThreeGpp).unwrap();

        assert_eq!(a.sub_id, 0);
        assert_eq!(b.sub_id, 1);
        assert!(registry.activate(2, 0, AppFamily::ThreeGpp).is_err());
    }

    #[test]
    fn test_activate_is_idempotent_for_same_identity() {
        let registry = SubscriptionRegistry::new(2);

        let first = registry.activate(0, 0, AppFamily::ThreeGpp).unwrap();
        let again = registry.activate(0, 0, AppFamily::ThreeGpp).unwrap();

        assert_eq!(first, again);
        // The second index is still free.
        let other = registry.activate(1, 0, AppFamily::ThreeGpp2).unwrap();
        assert_eq!(other.sub_id, 1);
    }

    #[test]
    fn test_deactivate_frees_the_index() {
        let registry = SubscriptionRegistry::new(1);

        let sub = registry.activate(0, 0, AppFamily::ThreeGpp).unwrap();
        registry.deactivate(sub.sub_id).unwrap();

        assert!(!registry.is_activated(0));
        // Index can be reused with a different identity.
        let reused = registry.activate(1, 0, AppFamily::ThreeGpp2).unwrap();
        assert_eq!(reused.sub_id, 0);
    }

    #[test]
    fn test_deactivate_unknown_or_inactive_fails() {
        let registry = SubscriptionRegistry::new(1);
        assert!(registry.deactivate(0).is_err());
        assert!(registry.deactivate(5).is_err());
    }

    #[tokio::test]
    async fn test_activation_changes_reach_registered_listener() {
        let registry = SubscriptionRegistry::new(1);
        let (tx, mut rx) = mpsc::channel::<TaskMessage<DctMessage>>(4);
        registry.register_activation_listener(0, TaskHandle::new(tx));

        let sub = registry.activate(0, 0, AppFamily::ThreeGpp).unwrap();
        registry.deactivate(sub.sub_id).unwrap();

        match rx.recv().await {
            Some(TaskMessage::Message(DctMessage::SubscriptionActivated { subscription })) => {
                assert_eq!(subscription, sub);
            }
            other => panic!("expected SubscriptionActivated, got {:?}", other),
        }
        match rx.recv().await {
            Some(TaskMessage::Message(DctMessage::SubscriptionDeactivated)) => {}
            other => panic!("expected SubscriptionDeactivated, got {:?}", other),
        }
    }
}
