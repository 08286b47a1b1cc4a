mod common;

use catcam_core::bridge::{BridgeAction, ControlBridge, Inbox, LinkFlags, RadioCallbacks};
use catcam_core::partition::InstallTarget;
use catcam_core::storage::FIRMWARE_IMAGE;
use catcam_core::strategy::{OtaController, StrategyConfig};
use catcam_core::UpdateRecord;
use serde_json::Value;

use common::*;

type Controller =
    OtaController<MemPartitions, MemRecord, MemStorage, MemFlash, NoDelay, ScriptedHttp, FakeGovernor>;

fn controller(body: Vec<u8>) -> Controller {
    let ctx = context(MemPartitions::two_slot(), MemRecord::default(), MemStorage::default())
        .with_install_target(InstallTarget::NextUpdatePartition);
    OtaController::new(ctx, ScriptedHttp::serving(body), FakeGovernor::default(), StrategyConfig::default())
}

fn status_of(v: &Value) -> &str {
    v["status"].as_str().unwrap_or("")
}

#[test]
fn ota_update_command_stages_and_requests_reboot() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(50_000));
    let mut delay = NoDelay::default();

    radio.on_connect();
    assert!(radio.on_write(
        br#"{"action":"ota_update","firmware_url":"https://fw.example/catcam.bin","version":"1.4.0"}"#
    ));

    assert_eq!(bridge.handle(&mut ota, &mut delay), BridgeAction::Reboot);

    let statuses = channel.statuses();
    let kinds: Vec<&str> = statuses.iter().map(status_of).collect();
    assert_eq!(kinds.first(), Some(&"connected"));
    assert!(kinds.contains(&"starting"));
    assert!(kinds.contains(&"downloading"));
    assert_eq!(kinds.last(), Some(&"updating"));
    assert_eq!(statuses.last().unwrap()["progress"], 100);
    assert!(statuses.iter().all(|s| s["version"] == "1.3.0"));

    assert_eq!(channel.advertising_stops.get(), 1);
    assert_eq!(ota.http.requested, vec!["https://fw.example/catcam.bin".to_string()]);
    assert_eq!(ota.ctx.record.current(), UpdateRecord::Pending { size: 50_000 });
}

#[test]
fn chunked_url_is_acknowledged_then_started() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(5_000));
    let mut delay = NoDelay::default();

    radio.on_connect();
    radio.on_write(br#"{"chunk_index":0,"total_chunks":3,"chunk_data":"https://storage.example","version":"1.4.0"}"#);
    radio.on_write(br#"{"chunk_index":1,"total_chunks":3,"chunk_data":"/firmware/catcam","version":"1.4.0"}"#);
    assert_eq!(bridge.handle(&mut ota, &mut delay), BridgeAction::None);
    assert!(ota.http.requested.is_empty());

    let acks: Vec<String> = channel
        .statuses()
        .iter()
        .filter(|s| status_of(s) == "starting")
        .map(|s| s["message"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(acks, vec!["Chunk 1/3 received", "Chunk 2/3 received"]);

    radio.on_write(br#"{"chunk_index":2,"total_chunks":3,"chunk_data":"-1.4.0.bin?sig=abc","version":"1.4.0"}"#);
    assert_eq!(bridge.handle(&mut ota, &mut delay), BridgeAction::Reboot);
    assert_eq!(
        ota.http.requested,
        vec!["https://storage.example/firmware/catcam-1.4.0.bin?sig=abc".to_string()]
    );
}

#[test]
fn cancel_during_download_keeps_the_session_alive() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(200_000));
    let mut delay = NoDelay::default();

    radio.on_connect();
    radio.on_write(br#"{"action":"ota_update","firmware_url":"https://fw.example/a.bin"}"#);
    // Queued behind the start command; seen by the transfer loop.
    radio.on_write(br#"{"action":"get_status"}"#);
    radio.on_write(br#"{"action":"ota_update","firmware_url":"https://fw.example/b.bin"}"#);
    radio.on_write(br#"{"action":"cancel_update"}"#);

    assert_eq!(bridge.handle(&mut ota, &mut delay), BridgeAction::None);

    let statuses = channel.statuses();
    let kinds: Vec<&str> = statuses.iter().map(status_of).collect();
    assert_eq!(kinds.last(), Some(&"cancelled"));
    assert!(statuses
        .iter()
        .any(|s| status_of(s) == "error" && s["message"] == "Update already in progress"));
    assert!(kinds.iter().filter(|k| **k == "downloading").count() >= 2);

    assert_eq!(ota.http.requested.len(), 1);
    assert_eq!(ota.ctx.record.current(), UpdateRecord::Idle);
    assert!(ota.ctx.storage.file(FIRMWARE_IMAGE).is_none());
    assert!(channel.advertising.get());
    assert_eq!(ota.governor.resumes.get(), 1);
}

#[test]
fn failed_download_reports_error_and_reboots() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(10_000));
    ota.http.status = 403;

    radio.on_connect();
    radio.on_write(br#"{"action":"ota_update","firmware_url":"https://fw.example/a.bin"}"#);

    assert_eq!(bridge.handle(&mut ota, &mut NoDelay::default()), BridgeAction::Reboot);
    let statuses = channel.statuses();
    let last = statuses.last().unwrap();
    assert_eq!(status_of(last), "error");
    assert!(last["message"].as_str().unwrap().contains("403"));
}

#[test]
fn protocol_errors_are_reported_not_acted_on() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(10_000));

    radio.on_connect();
    radio.on_write(br#"{"action":"ota_update"}"#);
    radio.on_write(br#"{"action":"format_sd"}"#);
    radio.on_write(br#"{"chunk_index":4,"total_chunks":2,"chunk_data":"x"}"#);
    radio.on_write(b"\xff\xfe");

    assert_eq!(bridge.handle(&mut ota, &mut NoDelay::default()), BridgeAction::None);

    let statuses = channel.statuses();
    let errors: Vec<&str> = statuses
        .iter()
        .filter(|s| status_of(s) == "error")
        .map(|s| s["message"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(errors.len(), 4);
    assert_eq!(errors[0], "No firmware URL provided");
    assert_eq!(errors[1], "Unknown command: format_sd");
    assert!(ota.http.requested.is_empty());
}

#[test]
fn nothing_is_notified_without_a_client_but_the_value_tracks() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(10_000));

    bridge.announce_ready();
    radio.on_write(br#"{"action":"cancel_update"}"#);
    bridge.handle(&mut ota, &mut NoDelay::default());

    assert!(channel.notified.borrow().is_empty());
    assert!(channel.value.borrow().contains("cancelled"));
}

#[test]
fn disconnect_readvertises_after_a_pause() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut delay = NoDelay::default();

    radio.on_connect();
    radio.on_disconnect();
    bridge.handle(&mut controller(Vec::new()), &mut delay);

    assert!(channel.advertising.get());
    assert_eq!(delay.total_ms, 500);
}

#[test]
fn restarted_chunk_transfer_never_splices_urls() {
    let mut inbox = Inbox::new();
    let link = LinkFlags::new();
    let (producer, consumer) = inbox.split();
    let mut radio = RadioCallbacks::new(producer, &link);
    let channel = RecordingRadio::default();
    let mut bridge = ControlBridge::new(consumer, &link, channel.clone(), "1.3.0");
    let mut ota = controller(image(5_000));
    let mut delay = NoDelay::default();

    radio.on_connect();
    radio.on_write(br#"{"chunk_index":0,"total_chunks":3,"chunk_data":"https://old.example/"}"#);
    radio.on_write(br#"{"chunk_index":2,"total_chunks":3,"chunk_data":"OLD.bin"}"#);
    // The phone gave up and starts over with the same number of chunks.
    radio.on_write(br#"{"chunk_index":0,"total_chunks":3,"chunk_data":"https://new.example/"}"#);
    radio.on_write(br#"{"chunk_index":1,"total_chunks":3,"chunk_data":"path/"}"#);
    assert_eq!(bridge.handle(&mut ota, &mut delay), BridgeAction::None);
    assert!(ota.http.requested.is_empty());

    radio.on_write(br#"{"chunk_index":2,"total_chunks":3,"chunk_data":"new.bin"}"#);
    assert_eq!(bridge.handle(&mut ota, &mut delay), BridgeAction::Reboot);
    assert_eq!(ota.http.requested, vec!["https://new.example/path/new.bin".to_string()]);
}
