mod support;

use padbridge::control::server::MAX_LINE;
use padbridge::control::DaemonEvent;
use padbridge::controller::ControllerState;
use padbridge::daemon::{Backends, Daemon, DaemonError};
use padbridge::mapping::{AutoswitchRuleConfig, BindingConfig, ProfileConfig};
use std::sync::Arc;
use std::time::Duration;
use support::{ds4_candidate, ds4_report, ok_payload, wait_until, Client, FakeHid, FakeUinput, Harness};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

async fn with_ds4(configure: impl FnOnce(&mut padbridge::config::DaemonConfig)) -> Harness {
    let hid = Arc::new(FakeHid::default());
    let pad = hid.plug(ds4_candidate("/dev/hidraw5"));
    pad.stream(Some(ds4_report(&ControllerState::default())));
    let harness = Harness::start_with(hid, configure);
    // Der Slot ist erst nutzbar, wenn auch die Pipeline ihn übernommen hat
    assert!(wait_until(WAIT, || harness.daemon.registry.active(0).is_some()).await);
    harness
}

fn menu_profile() -> ProfileConfig {
    ProfileConfig::new("Menu", vec![BindingConfig::new("A", "button(KEY_ENTER)")])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_profile_is_reported_by_name() {
    let harness = with_ds4(|_| {}).await;
    let mut client = Client::connect(&harness.socket_path()).await;

    let (response, _) = client.request("SET_PROFILE 0 Racing").await;
    assert_eq!(response, r#"ERR ProfileNotFound "Racing""#);

    // Der aktive Slot behält sein Profil
    let active = harness.daemon.registry.active(0).expect("slot 0 has a profile");
    assert_eq!(active.name, "Default");
    let (response, _) = client.request("GET_STATE 0").await;
    assert_eq!(ok_payload(&response)["profile"], "Default");

    harness.stop().await;
}

#[tokio::test]
async fn malformed_requests_get_error_lines() {
    let harness = Harness::start(|_| {});
    let mut client = Client::connect(&harness.socket_path()).await;

    let (response, _) = client.request("FLY 3").await;
    assert_eq!(response, "ERR UnknownCommand unknown command 'FLY'");
    let (response, _) = client.request("GET_STATE abc").await;
    assert!(response.starts_with("ERR BadArgument "), "{response}");
    let (response, _) = client.request("GET_STATE 2").await;
    assert_eq!(response, "ERR SlotNotFound slot 2 has no controller");

    // Die Verbindung bleibt nach Fehlern offen
    let (response, _) = client.request("list_profiles").await;
    let payload = ok_payload(&response);
    assert_eq!(payload["default"], "Default");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_and_device_listing() {
    let harness = with_ds4(|_| {}).await;
    let mut client = Client::connect(&harness.socket_path()).await;

    let (response, _) = client.request("GET_STATE 0").await;
    let payload = ok_payload(&response);
    assert_eq!(payload["slot"], 0);
    assert_eq!(payload["name"], "DualShock 4");
    assert_eq!(payload["profile"], "Default");
    assert_eq!(payload["state"]["stick"]["x"], 0);

    let (response, _) = client.request("LIST_DEVICES").await;
    let payload = ok_payload(&response);
    let devices = payload["devices"].as_array().expect("device list");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["slot"], 0);
    assert_eq!(devices[0]["descriptor"]["path"], "/dev/hidraw5");
    assert_eq!(devices[0]["profile"], "Default");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribers_see_profile_changes() {
    let harness = with_ds4(|config| config.profiles.push(menu_profile())).await;
    let mut client = Client::connect(&harness.socket_path()).await;

    let (response, _) = client.request("SUBSCRIBE profile").await;
    assert_eq!(response, r#"OK {"subscribed":["profile"]}"#);

    let (response, events) = client.request(r#"SET_PROFILE 0 "Menu""#).await;
    assert_eq!(ok_payload(&response)["profile"], "Menu");
    assert_eq!(
        events,
        vec![r#"EVENT profile {"event":"profile_changed","slot":0,"profile":"Menu"}"#.to_string()]
    );

    let (response, _) = client.request("GET_STATE 0").await;
    assert_eq!(ok_payload(&response)["profile"], "Menu");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_input_reaches_virtual_gamepad() {
    let harness = with_ds4(|_| {}).await;
    let mut client = Client::connect(&harness.socket_path()).await;

    let (response, _) = client.request("TEST_INPUT 0 A 1").await;
    assert!(response.starts_with("OK "), "{response}");
    assert!(wait_until(WAIT, || harness.uinput.key_presses(0, "BTN_A") == 1).await);

    let (response, _) = client.request("TEST_INPUT 0 A 0").await;
    assert!(response.starts_with("OK "), "{response}");
    assert!(wait_until(WAIT, || harness.uinput.values(0, "BTN_A") == vec![1, 0]).await);

    let (response, _) = client.request("TEST_INPUT 3 A 1").await;
    assert_eq!(response, "ERR SlotNotFound slot 3 has no controller");

    harness.stop().await;
}

/// The pipeline handles focus changes on its own schedule, so the profile
/// event can come before or after the OK.
async fn focus(client: &mut Client, request: &str) -> String {
    let (response, mut events) = client.request(request).await;
    assert!(response.starts_with("OK "), "{response}");
    if events.is_empty() {
        events.push(client.read_line().await.expect("profile event"));
    }
    events.remove(0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn focus_changes_trigger_autoswitch() {
    let harness = with_ds4(|config| {
        config.profiles.push(menu_profile());
        config.autoswitch.push(AutoswitchRuleConfig {
            class: "^firefox$".into(),
            title: None,
            profile: "Menu".into(),
        });
    })
    .await;
    let mut client = Client::connect(&harness.socket_path()).await;
    client.request("SUBSCRIBE profile").await;

    let event = focus(&mut client, r#"FOCUS firefox "Mozilla Firefox""#).await;
    assert!(event.contains(r#""profile":"Menu""#), "{event}");

    // Zurück zum Standardprofil, sobald keine Regel mehr passt
    let event = focus(&mut client, "FOCUS kitty").await;
    assert!(event.contains(r#""profile":"Default""#), "{event}");

    harness.stop().await;
}

#[tokio::test]
async fn slow_subscriber_is_disconnected() {
    let harness = Harness::start(|config| config.control.client_queue = 4);
    let mut client = Client::connect(&harness.socket_path()).await;
    let (response, _) = client.request("SUBSCRIBE errors").await;
    assert!(response.starts_with("OK "));

    for i in 0..64 {
        harness
            .daemon
            .bus
            .publish(DaemonEvent::error("test", format!("event {i}")));
    }
    assert_eq!(harness.daemon.bus.subscriber_count(), 0);

    let mut received = 0;
    while client.read_line().await.is_some() {
        received += 1;
    }
    assert!(received < 64);

    harness.stop().await;
}

#[tokio::test]
async fn idle_clients_are_dropped() {
    let harness = Harness::start(|config| config.control.idle_timeout = Duration::from_millis(100));
    let mut client = Client::connect(&harness.socket_path()).await;
    assert_eq!(client.read_line().await, None);
    harness.stop().await;
}

#[tokio::test]
async fn endless_line_from_subscriber_is_cut_off() {
    let harness = Harness::start(|_| {});
    let mut client = Client::connect(&harness.socket_path()).await;
    let (response, _) = client.request("SUBSCRIBE device").await;
    assert!(response.starts_with("OK "), "{response}");

    // Kein Zeilenende: der Daemon darf das nicht unbegrenzt puffern
    let chunk = vec![b'x'; 1024];
    for _ in 0..(MAX_LINE / chunk.len() + 2) {
        if client.send_raw(&chunk).await.is_err() {
            break;
        }
    }
    assert!(client.closed().await);
    assert_eq!(harness.daemon.bus.subscriber_count(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn second_instance_cannot_take_the_socket() {
    let harness = Harness::start(|_| {});
    let mut config = support::test_config(harness.dir.path());
    config.control.socket_path = harness.socket_path();
    let backends = Backends {
        transport: Arc::new(FakeHid::default()),
        hotplug: None,
        factory: Arc::new(FakeUinput::default()),
    };
    let result = Daemon::start(config, backends, CancellationToken::new());
    assert!(matches!(result, Err(DaemonError::Socket(_))));
    harness.stop().await;
}
