use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{ConnectivityError, ConnectivityHandle, EventAction, LinkEvent, WifiDriver};
use crate::config::AccessPointSettings;
use crate::storage::WifiCredentials;

/// 接続先ごとの振る舞い
#[derive(Debug, Clone, PartialEq)]
pub enum StationBehavior {
    /// 開始後すぐにIPを取得する
    Connects,
    /// 開始はするがIPを取得できない
    NeverConnects,
    /// ドライバーがエラーを返す
    Fails(String),
}

/// ドライバーへの呼び出し記録
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    StartStation(String),
    StopStation,
    StartAccessPoint { ssid: String, open: bool },
}

/// テスト用のWi-Fiドライバー
///
/// 実機のイベントループの代わりに、開始時に`ConnectivityHandle`へ
/// イベントを直接送ります。
#[derive(Clone)]
pub struct MockWifiDriver {
    handle: ConnectivityHandle,
    behaviors: HashMap<String, StationBehavior>,
    pub calls: Arc<Mutex<Vec<DriverCall>>>,
    pub actions: Arc<Mutex<Vec<EventAction>>>,
    fail_access_point: bool,
}

impl MockWifiDriver {
    pub fn new(handle: ConnectivityHandle) -> Self {
        Self {
            handle,
            behaviors: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            actions: Arc::new(Mutex::new(Vec::new())),
            fail_access_point: false,
        }
    }

    /// テスト用: SSIDごとの振る舞いを設定（未設定はNeverConnects）
    pub fn with_behavior(mut self, ssid: &str, behavior: StationBehavior) -> Self {
        self.behaviors.insert(ssid.to_string(), behavior);
        self
    }

    /// テスト用: AP開始の失敗をシミュレート
    pub fn with_access_point_failure(mut self) -> Self {
        self.fail_access_point = true;
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<EventAction> {
        self.actions.lock().unwrap().clone()
    }

    /// テスト用: イベントを送り、返された操作を記録
    pub fn emit(&self, event: LinkEvent) -> EventAction {
        let action = self.handle.on_event(event);
        self.actions.lock().unwrap().push(action);
        action
    }
}

impl WifiDriver for MockWifiDriver {
    fn start_station(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError> {
        self.calls
            .lock()
            .unwrap()
            .push(DriverCall::StartStation(credentials.ssid().to_string()));

        let behavior = self
            .behaviors
            .get(credentials.ssid())
            .cloned()
            .unwrap_or(StationBehavior::NeverConnects);

        match behavior {
            StationBehavior::Fails(reason) => Err(ConnectivityError::Driver(reason)),
            StationBehavior::Connects => {
                if self.emit(LinkEvent::StationStarted) == EventAction::Connect {
                    self.emit(LinkEvent::GotIp);
                }
                Ok(())
            }
            StationBehavior::NeverConnects => {
                if self.emit(LinkEvent::StationStarted) == EventAction::Connect {
                    self.emit(LinkEvent::Disconnected);
                }
                Ok(())
            }
        }
    }

    fn stop_station(&mut self) -> Result<(), ConnectivityError> {
        self.calls.lock().unwrap().push(DriverCall::StopStation);
        Ok(())
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), ConnectivityError> {
        self.calls.lock().unwrap().push(DriverCall::StartAccessPoint {
            ssid: settings.ssid.to_string(),
            open: settings.is_open(),
        });
        if self.fail_access_point {
            return Err(ConnectivityError::Driver("simulated AP failure".to_string()));
        }
        Ok(())
    }
}
