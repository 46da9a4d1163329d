//! Per-subscription phone facade
//!
//! Stable owner of one subscription's tracker pair. Callers hold the facade;
//! when the card application family changes (SIM/USIM vs RUIM/CSIM) the
//! facade is rewired to a fresh pair of the matching radio family while its
//! identity stays put, so no caller ever holds a dangling reference.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use multisim_common::types::{RadioFamily, SubId};

use crate::coordinator::Coordinator;
use crate::dct::{CdmaDataConnectionTracker, DctDeps, DctTask, GsmDataConnectionTracker};
use crate::notify::TelephonyEvent;
use crate::sst::ServiceStateTracker;
use crate::tasks::{DctHandle, DctMessage, SstHandle, SstMessage};

struct PhoneInner {
    family: RadioFamily,
    dct: DctHandle,
    sst: SstHandle,
}

/// Stable facade over one subscription's radio-family tracker pair.
pub struct PhoneFacade {
    sub_id: SubId,
    inner: RwLock<PhoneInner>,
}

impl PhoneFacade {
    /// Creates the facade and spawns the initial tracker pair.
    pub fn new(coordinator: &Arc<Coordinator>, sub_id: SubId, family: RadioFamily) -> Arc<Self> {
        let (dct, sst) = spawn_pair(coordinator, sub_id, family);
        Arc::new(Self {
            sub_id,
            inner: RwLock::new(PhoneInner { family, dct, sst }),
        })
    }

    /// The subscription this facade serves.
    pub fn sub_id(&self) -> SubId {
        self.sub_id
    }

    /// Current radio family.
    pub fn family(&self) -> RadioFamily {
        self.inner.read().unwrap().family
    }

    /// Handle to the current data-connection tracker.
    pub fn dct(&self) -> DctHandle {
        self.inner.read().unwrap().dct.clone()
    }

    /// Handle to the current service-state tracker.
    pub fn sst(&self) -> SstHandle {
        self.inner.read().unwrap().sst.clone()
    }

    /// Requests the safe radio power-off sequence.
    pub async fn power_off_radio_safely(&self) {
        if self.sst().send(SstMessage::PowerOffRadioSafely).await.is_err() {
            warn!(sub_id = self.sub_id, "service-state tracker unreachable");
        }
    }

    /// Announces that the card's records finished loading; both trackers
    /// react (data setup and operator display respectively).
    pub async fn records_loaded(&self) {
        let _ = self.dct().send(DctMessage::RecordsLoaded).await;
        let _ = self.sst().send(SstMessage::RecordsLoaded).await;
    }

    /// Forwards a packet-service attach state change.
    pub async fn data_network_state(&self, attached: bool) {
        let _ = self
            .dct()
            .send(DctMessage::DataNetworkStateChanged { attached })
            .await;
    }

    /// Rewires the facade to a fresh tracker pair of the given family.
    ///
    /// The old pair is shut down after the swap; its in-flight sessions are
    /// abandoned, matching a radio-technology switch where the network side
    /// of every bearer is gone anyway.
    pub async fn swap_family(&self, coordinator: &Arc<Coordinator>, family: RadioFamily) {
        let (new_dct, new_sst) = spawn_pair(coordinator, self.sub_id, family);

        let (old_dct, old_sst) = {
            let mut inner = self.inner.write().unwrap();
            let old = (inner.dct.clone(), inner.sst.clone());
            inner.family = family;
            inner.dct = new_dct;
            inner.sst = new_sst;
            old
        };

        let _ = old_dct.shutdown().await;
        let _ = old_sst.shutdown().await;

        info!(sub_id = self.sub_id, %family, "phone rewired to new radio family");
        coordinator
            .services()
            .sink
            .notify(TelephonyEvent::RadioTechnologyChanged {
                sub_id: self.sub_id,
                family,
            });
    }

    /// Shuts both trackers down.
    pub async fn shutdown(&self) {
        let (dct, sst) = {
            let inner = self.inner.read().unwrap();
            (inner.dct.clone(), inner.sst.clone())
        };
        let _ = dct.shutdown().await;
        let _ = sst.shutdown().await;
    }
}

/// Spawns a matched tracker pair for the subscription and registers the
/// data tracker for activation changes.
fn spawn_pair(
    coordinator: &Arc<Coordinator>,
    sub_id: SubId,
    family: RadioFamily,
) -> (DctHandle, SstHandle) {
    let services = coordinator.services().clone();
    let dds = coordinator.dds();
    let capacity = coordinator.config().channel_capacity;
    let deps = DctDeps {
        radio: services.radio.clone(),
        icc: services.icc.clone(),
        carrier: services.carrier.clone(),
        sink: services.sink.clone(),
        dds: dds.clone(),
    };

    let dct = match family {
        RadioFamily::Gsm => {
            let apns = coordinator
                .config()
                .subscriptions
                .get(sub_id)
                .map(|s| s.apns.clone())
                .unwrap_or_default();
            DctTask::spawn(
                sub_id,
                dds.clone(),
                GsmDataConnectionTracker::new(sub_id, &apns, deps),
                capacity,
            )
        }
        RadioFamily::Cdma => DctTask::spawn(
            sub_id,
            dds.clone(),
            CdmaDataConnectionTracker::new(sub_id, deps),
            capacity,
        ),
    };

    let sst = ServiceStateTracker::spawn(
        sub_id,
        family,
        services,
        dds,
        coordinator.registry(),
        coordinator.clone(),
        dct.clone(),
        coordinator.sst_config().clone(),
        capacity,
    );

    coordinator
        .registry()
        .register_activation_listener(sub_id, dct.clone());

    (dct, sst)
}
