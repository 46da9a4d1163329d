//! Radio-family reconciliation when a card application of the other family
//! is activated on a subscription.

mod common;

use std::time::Duration;

use multisim_common::types::{AppFamily, RadioFamily};
use multisim_stack::icc::IccRecords;
use multisim_stack::notify::TelephonyEvent;

use common::{config, connect_data, start, wait_until};

#[tokio::test]
async fn activation_with_other_family_rewires_the_phone() {
    let h = start(config(&[AppFamily::ThreeGpp, AppFamily::ThreeGpp], 0, 30_000));
    assert_eq!(h.coordinator.phone(0).unwrap().family(), RadioFamily::Gsm);

    // A RUIM/CSIM application comes up on slot 0 instead of the expected
    // SIM/USIM.
    let sub = h
        .coordinator
        .registry()
        .activate(0, 0, AppFamily::ThreeGpp2)
        .unwrap();
    h.coordinator.reconcile_phone_object(&sub).await.unwrap();

    let phone = h.coordinator.phone(0).unwrap();
    assert_eq!(phone.family(), RadioFamily::Cdma);
    assert!(h.log.events_for(0).iter().any(|e| {
        matches!(
            e,
            TelephonyEvent::RadioTechnologyChanged {
                family: RadioFamily::Cdma,
                ..
            }
        )
    }));
}

#[tokio::test]
async fn matching_family_leaves_the_phone_alone() {
    let h = start(config(&[AppFamily::ThreeGpp, AppFamily::ThreeGpp], 0, 30_000));

    let sub = h
        .coordinator
        .registry()
        .activate(0, 0, AppFamily::ThreeGpp)
        .unwrap();
    h.coordinator.reconcile_phone_object(&sub).await.unwrap();

    assert_eq!(h.coordinator.phone(0).unwrap().family(), RadioFamily::Gsm);
    assert!(!h
        .log
        .events_for(0)
        .iter()
        .any(|e| matches!(e, TelephonyEvent::RadioTechnologyChanged { .. })));
}

#[tokio::test]
async fn rewired_phone_carries_data_on_the_new_family() {
    let h = start(config(&[AppFamily::ThreeGpp, AppFamily::ThreeGpp], 0, 30_000));
    // Provision records for the CDMA application too.
    h.icc.insert(
        0,
        AppFamily::ThreeGpp2,
        IccRecords {
            operator_numeric: "00100".into(),
            spn: None,
        },
    );

    let sub = h
        .coordinator
        .registry()
        .activate(0, 0, AppFamily::ThreeGpp2)
        .unwrap();
    h.coordinator.reconcile_phone_object(&sub).await.unwrap();

    let phone = h.coordinator.phone(0).unwrap();
    phone.records_loaded().await;
    phone.data_network_state(true).await;

    connect_data(&h, 0).await;
}

#[tokio::test]
async fn swap_abandons_in_flight_sessions_without_stalling() {
    let h = start(config(&[AppFamily::ThreeGpp, AppFamily::ThreeGpp], 0, 30_000));

    let sub = h
        .coordinator
        .registry()
        .activate(0, 0, AppFamily::ThreeGpp)
        .unwrap();
    h.coordinator.reconcile_phone_object(&sub).await.unwrap();
    let phone = h.coordinator.phone(0).unwrap();
    phone.records_loaded().await;

    // Establishment hangs while the family flips underneath it.
    h.radio.hold_setups(true);
    phone.data_network_state(true).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The card now reports a 3GPP2 application.
    h.coordinator.registry().deactivate(0).unwrap();
    let sub = h
        .coordinator
        .registry()
        .activate(0, 0, AppFamily::ThreeGpp2)
        .unwrap();
    h.coordinator.reconcile_phone_object(&sub).await.unwrap();
    h.radio.release_holds();

    let phone = h.coordinator.phone(0).unwrap();
    assert_eq!(phone.family(), RadioFamily::Cdma);
    // The fresh tracker answers queries; nothing deadlocks on the
    // abandoned session.
    assert!(
        wait_until(Duration::from_secs(1), || !phone.dct().is_closed()).await
    );
    assert!(h.coordinator.is_data_disconnected(0).await.unwrap());
}
