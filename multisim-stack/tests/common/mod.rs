//! Shared harness for the integration tests: a coordinator wired to the
//! simulation collaborators, plus polling helpers.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use multisim_common::config::{ApnConfig, StackConfig, SubscriptionConfig};
use multisim_common::types::{ApnType, AppFamily, SessionState, SubId};
use multisim_stack::coordinator::{Coordinator, Services};
use multisim_stack::icc::IccRecords;
use multisim_stack::notify::TelephonyEvent;
use multisim_stack::sim::{EventLog, MemoryCarrierTable, SimIccSource, SimRadio};

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub radio: Arc<SimRadio>,
    pub log: Arc<EventLog>,
    pub carrier: Arc<MemoryCarrierTable>,
    pub icc: Arc<SimIccSource>,
}

/// Builds a stack configuration with one subscription per listed family.
pub fn config(families: &[AppFamily], dds: SubId, power_off_timeout_ms: u64) -> StackConfig {
    StackConfig {
        subscriptions: families
            .iter()
            .enumerate()
            .map(|(i, family)| SubscriptionConfig {
                slot: i,
                app_index: 0,
                app_family: *family,
                operator_numeric: format!("0010{i}"),
                apns: vec![ApnConfig {
                    name: "internet".into(),
                    apn_type: ApnType::Default,
                }],
            })
            .collect(),
        default_data_subscription: dds,
        channel_capacity: 64,
        power_off_timeout_ms,
    }
}

/// Spawns a coordinator over fresh simulation collaborators.
pub fn start(config: StackConfig) -> Harness {
    let radio = Arc::new(SimRadio::new());
    let log = Arc::new(EventLog::new());
    let carrier = Arc::new(MemoryCarrierTable::new());
    let icc = Arc::new(SimIccSource::new());
    for sub in &config.subscriptions {
        icc.insert(
            sub.slot,
            sub.app_family,
            IccRecords {
                operator_numeric: sub.operator_numeric.clone(),
                spn: Some(format!("carrier-{}", sub.slot)),
            },
        );
    }
    let coordinator = Coordinator::new(
        config,
        Services {
            radio: radio.clone(),
            icc: icc.clone(),
            carrier: carrier.clone(),
            sink: log.clone(),
        },
    );
    coordinator.bootstrap();
    Harness {
        coordinator,
        radio,
        log,
        carrier,
        icc,
    }
}

/// Activates every configured subscription and feeds it the records-loaded
/// and network-attached events.
pub async fn activate_all(h: &Harness) {
    let subs: Vec<_> = h.coordinator.config().subscriptions.clone();
    for sub_config in &subs {
        let sub = h
            .coordinator
            .registry()
            .activate(sub_config.slot, sub_config.app_index, sub_config.app_family)
            .expect("activation");
        h.coordinator
            .reconcile_phone_object(&sub)
            .await
            .expect("reconcile");
        let phone = h.coordinator.phone(sub.sub_id).expect("phone");
        phone.records_loaded().await;
        phone.data_network_state(true).await;
    }
}

/// Polls `predicate` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, predicate: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls an async `predicate` until it holds or `timeout` elapses.
pub async fn wait_until_async<F, Fut>(timeout: Duration, predicate: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// True once the log holds a `Connected` transition for `sub_id`.
pub fn data_connected(log: &EventLog, sub_id: SubId) -> bool {
    log.events_for(sub_id).iter().any(|e| {
        matches!(
            e,
            TelephonyEvent::DataConnectionStateChanged {
                state: SessionState::Connected,
                ..
            }
        )
    })
}

/// Brings data up on `sub_id` and waits for the session to connect.
pub async fn connect_data(h: &Harness, sub_id: SubId) {
    assert!(
        wait_until(Duration::from_secs(2), || data_connected(&h.log, sub_id)).await,
        "data session on sub {sub_id} never connected"
    );
}
