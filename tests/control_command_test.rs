//! Serial Control Channel Integration Tests
//!
//! 受信パケットの組み立てからコマンド実行、応答、保存までを通しで検証します。
#![cfg(not(feature = "esp"))]

use std::sync::{Arc, Mutex};

use paper_face_tracker::camera::control::mock::{MockLed, RecordingCameraControl};
use paper_face_tracker::camera::{LedDimmer, SensorSetting};
use paper_face_tracker::storage::memory::MemoryStore;
use paper_face_tracker::stream::usb::MockSerialLink;
use paper_face_tracker::stream::{CommandProcessor, ControlReader};
use paper_face_tracker::{ConfigStore, WifiCredentials};

type Processor = CommandProcessor<RecordingCameraControl, MockLed>;

struct Harness {
    mock: MockSerialLink,
    reader: ControlReader<MockSerialLink>,
    processor: Processor,
    store: ConfigStore,
}

fn harness() -> Harness {
    let mock = MockSerialLink::new();
    let reader = ControlReader::new(Arc::new(Mutex::new(mock.clone())));
    let store = ConfigStore::new(Arc::new(MemoryStore::new()));
    let processor = CommandProcessor::new(
        RecordingCameraControl::new(),
        MockLed::default(),
        store.clone(),
    );
    Harness {
        mock,
        reader,
        processor,
        store,
    }
}

/// 数回ポーリングして受信分を処理し、送信された応答を返します
fn pump(h: &mut Harness) -> String {
    for _ in 0..8 {
        for line in h.reader.poll(10).unwrap() {
            if let Some(reply) = h.processor.handle_line(&line) {
                h.reader.reply(reply).unwrap();
            }
        }
    }
    String::from_utf8(h.mock.written()).unwrap()
}

#[test]
fn test_legacy_credentials_packet_is_saved_and_acknowledged() {
    let mut h = harness();
    h.mock.queue_read(b"SSID=Home");
    h.mock.queue_read(b"Net,PASS=hunter22\n");

    assert_eq!(pump(&mut h), "OK\n");

    let stored = h.store.load_credentials().unwrap().unwrap();
    assert_eq!(stored.ssid(), "HomeNet");
    assert_eq!(stored.password(), "hunter22");
}

#[test]
fn test_packet_without_newline_is_handled_after_idle() {
    let mut h = harness();
    h.mock.queue_read(b"EXPOSURE:450");

    assert_eq!(pump(&mut h), "OK\n");
    assert_eq!(h.store.load_settings().unwrap().exposure, Some(450));
}

#[test]
fn test_mixed_packets_get_replies_in_order() {
    let mut h = harness();
    h.mock
        .queue_read(b"BRIGHTNESS:64\r\nHELLO\r\nEXPOSURE:abc\r\nSSID:Cafe Wifi PASSWORD:latte123\r\n");

    // 不明なパケットには応答しない
    assert_eq!(pump(&mut h), "OK\nERROR\nOK\n");

    assert_eq!(h.processor.led().level(), 64);
    assert!(h.processor.camera().applied().is_empty());
    let stored = h.store.load_credentials().unwrap().unwrap();
    assert_eq!(stored.ssid(), "Cafe Wifi");
    assert_eq!(stored.password(), "latte123");
}

fn store_old_credentials(h: &Harness) -> WifiCredentials {
    let old = WifiCredentials::new("old", "oldpass").unwrap();
    h.store.save_credentials(&old).unwrap();
    old
}

#[test]
fn test_credentials_split_across_lines_keep_stored_pair() {
    let mut h = harness();
    let old = store_old_credentials(&h);
    h.mock.queue_read(b"SSID:net\nPASSWORD:pw\n");

    // SSID行は拒否され、PASSWORD単独の行は不明なパケットとして破棄される
    assert_eq!(pump(&mut h), "ERROR\n");
    assert_eq!(h.store.load_credentials().unwrap(), Some(old));
}

#[test]
fn test_ssid_only_packet_is_rejected() {
    let mut h = harness();
    let old = store_old_credentials(&h);
    h.mock.queue_read(b"SSID:net");

    assert_eq!(pump(&mut h), "ERROR\n");
    assert_eq!(h.store.load_credentials().unwrap(), Some(old));
}

#[test]
fn test_credentials_on_one_line_replace_stored_pair() {
    let mut h = harness();
    store_old_credentials(&h);
    h.mock.queue_read(b"SSID:net PASSWORD:pw\n");

    assert_eq!(pump(&mut h), "OK\n");
    let stored = h.store.load_credentials().unwrap().unwrap();
    assert_eq!(stored.ssid(), "net");
    assert_eq!(stored.password(), "pw");
}

#[test]
fn test_saved_settings_are_restored_on_next_boot() {
    let mut h = harness();
    h.mock.queue_read(b"EXPOSURE:800\nBRIGHTNESS:200\n");
    assert_eq!(pump(&mut h), "OK\nOK\n");

    let mut rebooted = CommandProcessor::new(
        RecordingCameraControl::new(),
        MockLed::default(),
        h.store.clone(),
    );
    rebooted
        .apply_settings(&h.store.load_settings_or_default())
        .unwrap();

    assert_eq!(
        rebooted.camera().applied(),
        vec![SensorSetting::AutoExposure(false), SensorSetting::Exposure(800)]
    );
    assert_eq!(rebooted.led().level(), 200);
}
