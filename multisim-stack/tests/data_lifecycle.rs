//! Data enable/disable tokens, active-data-subscription switches and
//! operator display/carrier refresh.

mod common;

use std::time::Duration;

use tokio::sync::oneshot;

use multisim_common::types::{AppFamily, SessionState};
use multisim_stack::notify::TelephonyEvent;
use multisim_stack::sim::RadioOp;

use common::{activate_all, config, connect_data, start, wait_until, wait_until_async};

const DUAL_GSM: &[AppFamily] = &[AppFamily::ThreeGpp, AppFamily::ThreeGpp];

fn connected_count(h: &common::Harness, sub_id: usize) -> usize {
    h.log
        .events_for(sub_id)
        .iter()
        .filter(|e| {
            matches!(
                e,
                TelephonyEvent::DataConnectionStateChanged {
                    state: SessionState::Connected,
                    ..
                }
            )
        })
        .count()
}

#[tokio::test]
async fn disable_data_drains_before_completing_the_token() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;
    connect_data(&h, 0).await;

    h.radio.hold_teardowns(true);
    let (tx, mut rx) = oneshot::channel();
    h.coordinator.disable_data(0, Some(tx)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "token must wait for the drain");

    h.radio.release_holds();
    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("token must complete after the drain")
        .unwrap();
    assert!(h.coordinator.is_data_disconnected(0).await.unwrap());
}

#[tokio::test]
async fn enable_data_completes_immediately_and_reconnects() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;
    connect_data(&h, 0).await;

    let (tx, rx) = oneshot::channel();
    h.coordinator.disable_data(0, Some(tx)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();

    let (tx, rx) = oneshot::channel();
    h.coordinator.enable_data(0, Some(tx)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("enable token completes without waiting on sessions")
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || connected_count(&h, 0) >= 2).await,
        "data must come back up after re-enable"
    );
}

#[tokio::test]
async fn dds_switch_drains_old_and_connects_new() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;
    connect_data(&h, 0).await;

    h.coordinator.set_active_data_subscription(1).await.unwrap();

    assert!(
        wait_until_async(Duration::from_secs(2), || async {
            h.coordinator.is_data_disconnected(0).await.unwrap()
        })
        .await,
        "old data subscription must drain"
    );

    // The tracker re-registers for radio data events on the switch; feed it
    // a fresh attach indication.
    h.coordinator.phone(1).unwrap().data_network_state(true).await;
    assert!(
        wait_until(Duration::from_secs(2), || connected_count(&h, 1) >= 1).await,
        "new data subscription must connect"
    );
    assert!(h
        .radio
        .ops()
        .contains(&RadioOp::SetDataEventRegistration(1, true)));
}

#[tokio::test]
async fn dds_switch_to_current_subscription_is_a_no_op() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;
    connect_data(&h, 0).await;

    h.coordinator.set_active_data_subscription(0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.coordinator.is_data_disconnected(0).await.unwrap());
}

#[tokio::test]
async fn dds_switch_rejects_unknown_subscription() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    assert!(h.coordinator.set_active_data_subscription(5).await.is_err());
}

#[tokio::test]
async fn records_loaded_publishes_spn_and_updates_carrier() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;

    assert!(
        wait_until(Duration::from_secs(1), || {
            h.log.events_for(0).iter().any(|e| {
                matches!(
                    e,
                    TelephonyEvent::SpnDisplayChanged { operator_numeric, .. }
                        if operator_numeric == "00100"
                )
            })
        })
        .await
    );

    // Only the active-data-subscription lands in the carrier table.
    assert!(
        wait_until(Duration::from_secs(1), || {
            h.carrier.current(0).as_deref() == Some("00100")
        })
        .await
    );
    assert_eq!(h.carrier.current(1), None);
}

#[tokio::test]
async fn carrier_refresh_after_dds_switch() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;

    h.coordinator.set_active_data_subscription(1).await.unwrap();
    h.coordinator.update_current_carrier(1).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(1), || {
            h.carrier.current(1).as_deref() == Some("00101")
        })
        .await
    );
}

#[tokio::test]
async fn activation_reads_device_identity() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;

    assert!(
        wait_until(Duration::from_secs(1), || {
            h.radio.ops().contains(&RadioOp::GetDeviceIdentity(0))
                && h.radio.ops().contains(&RadioOp::GetDeviceIdentity(1))
        })
        .await
    );
}

#[tokio::test]
async fn dormant_subscription_never_sets_up_data() {
    let h = start(config(DUAL_GSM, 0, 30_000));
    activate_all(&h).await;
    connect_data(&h, 0).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.radio
            .ops()
            .iter()
            .filter(|op| matches!(op, RadioOp::SetupBearer(1, _)))
            .count(),
        0,
        "only the active data subscription may carry data"
    );
}
