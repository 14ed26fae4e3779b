//! Provisioning Flow Integration Tests
//!
//! 設定フォームの送信から保存、再起動手順、再起動後の接続までを
//! モック実装で通しで検証します。
#![cfg(not(feature = "esp"))]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use paper_face_tracker::config::AccessPointSettings;
use paper_face_tracker::connectivity::mock::{MockWifiDriver, StationBehavior};
use paper_face_tracker::connectivity::ReconnectPolicy;
use paper_face_tracker::provisioning::shutdown::mock::RecordingSystemControl;
use paper_face_tracker::provisioning::{
    ProvisioningError, ProvisioningService, ShutdownSequence, CONFIRMATION_BODY,
};
use paper_face_tracker::status::{spawn_ip_reporter, IP_REPORTER_TASK};
use paper_face_tracker::storage::memory::MemoryStore;
use paper_face_tracker::storage::{KeyValueStore, WIFI_NAMESPACE};
use paper_face_tracker::tasks::TaskRegistry;
use paper_face_tracker::{BootOutcome, ConfigStore, ConnectivityHandle, ConnectivityManager};

fn wait_for_restart(control: &RecordingSystemControl) {
    for _ in 0..400 {
        if control.calls().contains(&"restart") {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("restart was not performed");
}

fn service(
    backend: &Arc<MemoryStore>,
    registry: &TaskRegistry,
    control: &RecordingSystemControl,
) -> ProvisioningService<ShutdownSequence<RecordingSystemControl>> {
    let shutdown = ShutdownSequence::new(control.clone(), registry.clone(), 1)
        .with_tick(Duration::from_millis(1));
    ProvisioningService::new(ConfigStore::new(backend.clone()), shutdown, true)
}

#[test]
fn test_form_submission_persists_and_restarts() {
    let backend = Arc::new(MemoryStore::new());
    let registry = TaskRegistry::new();
    spawn_ip_reporter(
        &registry,
        || -> Option<Ipv4Addr> { None },
        Duration::from_millis(5),
    )
    .unwrap();
    let control = RecordingSystemControl::new();
    let service = service(&backend, &registry, &control);

    let credentials = service.handle_config(b"SSID=MyNet&PASS=Secret123").unwrap();
    assert_eq!(credentials.ssid(), "MyNet");
    assert!(!CONFIRMATION_BODY.is_empty());

    assert_eq!(
        backend.get_str(WIFI_NAMESPACE, "ssid").unwrap().as_deref(),
        Some("MyNet")
    );
    assert_eq!(
        backend.get_str(WIFI_NAMESPACE, "password").unwrap().as_deref(),
        Some("Secret123")
    );

    wait_for_restart(&control);
    assert!(!registry.is_running(IP_REPORTER_TASK));
    assert_eq!(
        control.calls(),
        vec!["stop_wifi", "deinit_wifi", "stop_watchdog", "restart"]
    );
}

#[test]
fn test_failed_save_does_not_restart() {
    let backend = Arc::new(MemoryStore::new());
    backend.fail_next_open();
    let registry = TaskRegistry::new();
    let control = RecordingSystemControl::new();
    let service = service(&backend, &registry, &control);

    let result = service.handle_config(b"SSID=MyNet&PASS=Secret123");
    assert!(matches!(result, Err(ProvisioningError::Store(_))));

    thread::sleep(Duration::from_millis(20));
    assert!(control.calls().is_empty());
    assert!(backend.keys(WIFI_NAMESPACE).is_empty());
}

#[test]
fn test_malformed_body_mutates_nothing() {
    let backend = Arc::new(MemoryStore::new());
    let registry = TaskRegistry::new();
    let control = RecordingSystemControl::new();
    let service = service(&backend, &registry, &control);

    for body in [&b"SSID=MyNet"[..], b"", b"garbage", b"SSID=&PASS=x"] {
        assert!(matches!(
            service.handle_config(body),
            Err(ProvisioningError::Form(_))
        ));
    }
    assert_eq!(backend.commit_count(), 0);
    assert!(control.calls().is_empty());
}

#[test]
fn test_repeated_submission_leaves_single_credential_pair() {
    let backend = Arc::new(MemoryStore::new());
    let body = b"SSID=MyNet&PASS=Secret123";

    for _ in 0..2 {
        let control = RecordingSystemControl::new();
        let service = service(&backend, &TaskRegistry::new(), &control);
        service.handle_config(body).unwrap();
        wait_for_restart(&control);
    }

    assert_eq!(
        backend.keys(WIFI_NAMESPACE),
        vec!["password".to_string(), "ssid".to_string()]
    );
    let stored = ConfigStore::new(backend.clone())
        .load_credentials()
        .unwrap()
        .unwrap();
    assert_eq!(stored.ssid(), "MyNet");
    assert_eq!(stored.password(), "Secret123");
}

#[test]
fn test_boot_after_provisioning_connects_with_saved_credentials() {
    let backend = Arc::new(MemoryStore::new());
    let control = RecordingSystemControl::new();
    let service = service(&backend, &TaskRegistry::new(), &control);
    service
        .handle_config(b"SSID=My+Net&PASS=p%26ss%3Dword")
        .unwrap();
    wait_for_restart(&control);

    // 再起動後の起動手順
    let handle = ConnectivityHandle::new(ReconnectPolicy::default());
    let driver =
        MockWifiDriver::new(handle.clone()).with_behavior("My Net", StationBehavior::Connects);
    let mut manager = ConnectivityManager::new(driver, handle, Duration::from_millis(30));
    let access_point = AccessPointSettings {
        ssid: heapless::String::try_from("paper_face_tracker").unwrap(),
        password: heapless::String::try_from("12345678").unwrap(),
        max_connections: 4,
    };

    let outcome = manager
        .bootstrap(None, &ConfigStore::new(backend.clone()), &access_point)
        .unwrap();
    assert_eq!(
        outcome,
        BootOutcome::Station {
            ssid: "My Net".to_string()
        }
    );
    let stored = ConfigStore::new(backend).load_credentials().unwrap().unwrap();
    assert_eq!(stored.password(), "p&ss=word");
}
