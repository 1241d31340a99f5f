mod support;

use padbridge::control::EventClass;
use padbridge::controller::{Button, ControllerState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use support::{ds4_candidate, ds4_report, wait_until, FakeHid, Harness};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

fn holding_a() -> ControllerState {
    let mut state = ControllerState::default();
    state.set_button(Button::A, true);
    state
}

fn event_kinds(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Ok(line) = rx.try_recv() {
        let json = line.splitn(3, ' ').nth(2).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(json).expect("event payload is JSON");
        kinds.push(value["event"].as_str().unwrap_or_default().to_string());
    }
    kinds
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_controller_reconnects_with_fresh_state() {
    let hid = Arc::new(FakeHid::default());
    let pad = hid.plug(ds4_candidate("/dev/hidraw1"));
    pad.stream(Some(ds4_report(&holding_a())));

    let harness = Harness::start_with(hid, |_| {});
    let devices = harness.daemon.devices.clone();
    assert!(wait_until(WAIT, || devices.slot_state(0).is_some_and(|(_, s)| s.pressed(Button::A))).await);
    assert!(wait_until(WAIT, || harness.uinput.key_presses(0, "BTN_A") == 1).await);

    let (tx, mut rx) = mpsc::channel(32);
    harness
        .daemon
        .bus
        .subscribe(HashSet::from([EventClass::Device]), tx, CancellationToken::new());

    // Drei Lese-Timeouts hintereinander trennen die Sitzung
    pad.stream(None);
    assert!(wait_until(WAIT, || !devices.has_slot(0)).await);
    assert!(wait_until(WAIT, || harness.uinput.values(0, "BTN_A") == vec![1, 0]).await);
    assert!(devices.failures().iter().any(|f| f.path == "/dev/hidraw1"));

    pad.stream(Some(ds4_report(&ControllerState::default())));
    assert!(wait_until(WAIT, || devices.has_slot(0)).await);
    let (info, state) = devices.slot_state(0).expect("slot 0 is back");
    assert_eq!(info.descriptor.path, "/dev/hidraw1");
    assert!(!state.pressed(Button::A));

    assert!(wait_until(WAIT, || harness.daemon.registry.active(0).is_some()).await);
    assert_eq!(
        event_kinds(&mut rx),
        vec!["device_detached", "device_lost", "device_attached"]
    );
    assert_eq!(harness.uinput.key_presses(0, "BTN_A"), 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replugged_controller_is_found_without_hotplug() {
    let hid = Arc::new(FakeHid::default());
    let pad = hid.plug(ds4_candidate("/dev/hidraw2"));
    pad.stream(Some(ds4_report(&ControllerState::default())));

    let harness = Harness::start_with(hid.clone(), |_| {});
    let devices = harness.daemon.devices.clone();
    assert!(wait_until(WAIT, || devices.has_slot(0)).await);

    hid.unplug("/dev/hidraw2");
    assert!(wait_until(WAIT, || devices.devices().is_empty()).await);

    let pad = hid.plug(ds4_candidate("/dev/hidraw2"));
    pad.stream(Some(ds4_report(&ControllerState::default())));
    assert!(wait_until(WAIT, || devices.has_slot(0)).await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn freed_slot_goes_to_the_next_controller() {
    let hid = Arc::new(FakeHid::default());
    let neutral = ds4_report(&ControllerState::default());
    let first = hid.plug(ds4_candidate("/dev/hidraw10"));
    first.stream(Some(neutral.clone()));
    let second = hid.plug(ds4_candidate("/dev/hidraw11"));
    second.stream(Some(neutral.clone()));

    let harness = Harness::start_with(hid.clone(), |_| {});
    let devices = harness.daemon.devices.clone();
    assert!(wait_until(WAIT, || devices.occupied_slots() == vec![0, 1]).await);
    let first_slot = devices
        .devices()
        .into_iter()
        .find(|d| d.descriptor.path == "/dev/hidraw10")
        .and_then(|d| d.slot)
        .expect("first controller has a slot");

    hid.unplug("/dev/hidraw10");
    assert!(wait_until(WAIT, || devices.occupied_slots().len() == 1).await);

    let third = hid.plug(ds4_candidate("/dev/hidraw12"));
    third.stream(Some(neutral));
    assert!(wait_until(WAIT, || devices.occupied_slots() == vec![0, 1]).await);
    let third_slot = devices
        .devices()
        .into_iter()
        .find(|d| d.descriptor.path == "/dev/hidraw12")
        .and_then(|d| d.slot);
    assert_eq!(third_slot, Some(first_slot));

    harness.stop().await;
}
