//! Wi-Fi接続の状態機械
//!
//! 起動時にSTA接続を試み、タイムアウトした場合はプロビジョニング用の
//! アクセスポイントへ1度だけフォールバックします。
//! Wi-Fiイベントは`ConnectivityHandle::on_event`で解釈され、
//! ドライバーが実行すべき操作（`EventAction`）が返されます。

pub mod policy;

#[cfg(feature = "esp")]
pub mod esp;

// Mock実装（テストとnon-espビルドで使用可能）
#[cfg(not(feature = "esp"))]
pub mod mock;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::AccessPointSettings;
use crate::storage::{ConfigStore, WifiCredentials};
pub use policy::{Backoff, ReconnectPolicy};

/// 接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconfigured,
    ConnectingSta,
    ConnectedSta,
    /// 現在の起動サイクルでは終端状態
    ApFallback,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconfigured => "Unconfigured",
            ConnectionState::ConnectingSta => "ConnectingSTA",
            ConnectionState::ConnectedSta => "ConnectedSTA",
            ConnectionState::ApFallback => "APFallback",
        };
        f.write_str(name)
    }
}

/// Wi-Fiサブシステムからのイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    StationStarted,
    Disconnected,
    GotIp,
}

/// イベントに対してドライバーが行う操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    None,
    Connect,
    Reconnect { delay: Duration },
    /// 再接続ポリシーを使い切った。監視ループが再起動する
    GiveUp,
}

/// 接続管理のエラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectivityError {
    #[error("Wi-Fi driver error: {0}")]
    Driver(String),
    #[error("Wi-Fi init failed: {0}")]
    Init(String),
}

/// 起動時の接続結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    Station { ssid: String },
    AccessPoint,
}

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    /// 一度でも接続に成功したか（以降の切断は再接続ポリシーに従う）
    established: bool,
    reconnect_attempts: u32,
    restart_requested: bool,
    ssid: Option<String>,
}

/// 接続状態の共有ハンドル
///
/// イベントディスパッチのコンテキストと起動処理の両方から使われます。
/// 状態の遷移はこのハンドル経由でのみ行われます。
#[derive(Clone)]
pub struct ConnectivityHandle {
    inner: Arc<(Mutex<Shared>, Condvar)>,
    policy: ReconnectPolicy,
}

impl ConnectivityHandle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Shared {
                    state: ConnectionState::Unconfigured,
                    established: false,
                    reconnect_attempts: 0,
                    restart_requested: false,
                    ssid: None,
                }),
                Condvar::new(),
            )),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            info!("Connectivity: {} -> {}", shared.state, next);
            shared.state = next;
            self.inner.1.notify_all();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// 接続中または接続済みのSSID
    pub fn ssid(&self) -> Option<String> {
        self.lock().ssid.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// 再接続ポリシーを使い切り、再起動が必要か
    pub fn restart_requested(&self) -> bool {
        self.lock().restart_requested
    }

    /// STA接続の試行を開始します
    fn begin_attempt(&self, ssid: &str) {
        let mut shared = self.lock();
        shared.ssid = Some(ssid.to_string());
        self.transition(&mut shared, ConnectionState::ConnectingSta);
    }

    /// タイムアウトした試行を破棄します（遅れて届いたイベントは無視される）
    fn abandon_attempt(&self) {
        let mut shared = self.lock();
        if shared.state == ConnectionState::ConnectingSta {
            shared.ssid = None;
            self.transition(&mut shared, ConnectionState::Unconfigured);
        }
    }

    fn enter_ap_fallback(&self) {
        let mut shared = self.lock();
        shared.ssid = None;
        self.transition(&mut shared, ConnectionState::ApFallback);
    }

    /// IP取得まで最大`timeout`待機します。接続できた場合は`true`
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |shared| {
                shared.state == ConnectionState::ConnectingSta
            })
            .unwrap_or_else(|e| e.into_inner());
        guard.state == ConnectionState::ConnectedSta
    }

    /// Wi-Fiイベントを解釈して次の操作を返します
    pub fn on_event(&self, event: LinkEvent) -> EventAction {
        let mut shared = self.lock();
        debug!("Link event {:?} in state {}", event, shared.state);

        match (event, shared.state) {
            (LinkEvent::StationStarted, ConnectionState::ConnectingSta) => EventAction::Connect,
            (LinkEvent::GotIp, ConnectionState::ConnectingSta)
            | (LinkEvent::GotIp, ConnectionState::ConnectedSta) => {
                if shared.reconnect_attempts > 0 {
                    info!(
                        "Reconnected after {} attempt(s)",
                        shared.reconnect_attempts
                    );
                }
                shared.established = true;
                shared.reconnect_attempts = 0;
                self.transition(&mut shared, ConnectionState::ConnectedSta);
                EventAction::None
            }
            (LinkEvent::Disconnected, ConnectionState::ConnectingSta) if !shared.established => {
                // 起動時の接続待ち中はタイムアウトまで再試行する
                EventAction::Connect
            }
            (LinkEvent::Disconnected, ConnectionState::ConnectedSta)
            | (LinkEvent::Disconnected, ConnectionState::ConnectingSta) => {
                if shared.restart_requested {
                    return EventAction::None;
                }
                self.transition(&mut shared, ConnectionState::ConnectingSta);
                shared.reconnect_attempts = shared.reconnect_attempts.saturating_add(1);
                let attempt = shared.reconnect_attempts;
                if self.policy.allows(attempt) {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        "Station disconnected, reconnect attempt {} in {:?}",
                        attempt, delay
                    );
                    EventAction::Reconnect { delay }
                } else {
                    error!(
                        "Station disconnected, giving up after {} reconnect attempts",
                        attempt - 1
                    );
                    shared.restart_requested = true;
                    EventAction::GiveUp
                }
            }
            _ => EventAction::None,
        }
    }
}

/// Wi-Fiドライバーの操作
///
/// 接続の進行はイベント経由で`ConnectivityHandle`に通知されます。
pub trait WifiDriver {
    /// STAモードを設定して開始します
    fn start_station(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError>;

    fn stop_station(&mut self) -> Result<(), ConnectivityError>;

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), ConnectivityError>;
}

/// 起動時の接続手順を実行する
pub struct ConnectivityManager<D: WifiDriver> {
    driver: D,
    handle: ConnectivityHandle,
    connect_timeout: Duration,
}

impl<D: WifiDriver> ConnectivityManager<D> {
    pub fn new(driver: D, handle: ConnectivityHandle, connect_timeout: Duration) -> Self {
        Self {
            driver,
            handle,
            connect_timeout,
        }
    }

    pub fn handle(&self) -> &ConnectivityHandle {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// 起動時の接続を行います
    ///
    /// 静的認証情報があれば最初に試し、次にストアの認証情報を試します。
    /// どちらも接続できなければアクセスポイントを1度だけ開始します。
    pub fn bootstrap(
        &mut self,
        static_credentials: Option<&WifiCredentials>,
        store: &ConfigStore,
        access_point: &AccessPointSettings,
    ) -> Result<BootOutcome, ConnectivityError> {
        if let Some(credentials) = static_credentials {
            info!("Trying built-in credentials for '{}'", credentials.ssid());
            if self.try_station(credentials)? {
                return Ok(BootOutcome::Station {
                    ssid: credentials.ssid().to_string(),
                });
            }
        }

        let stored = match store.load_credentials() {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to read stored credentials: {}", e);
                None
            }
        };
        match stored {
            Some(credentials) if Some(&credentials) == static_credentials => {
                debug!("Stored credentials match built-in ones, skipping");
            }
            Some(credentials) => {
                info!("Trying stored credentials for '{}'", credentials.ssid());
                if self.try_station(&credentials)? {
                    return Ok(BootOutcome::Station {
                        ssid: credentials.ssid().to_string(),
                    });
                }
            }
            None => info!("No stored Wi-Fi credentials"),
        }

        self.fall_back_to_access_point(access_point)?;
        Ok(BootOutcome::AccessPoint)
    }

    fn try_station(&mut self, credentials: &WifiCredentials) -> Result<bool, ConnectivityError> {
        self.handle.begin_attempt(credentials.ssid());
        if let Err(e) = self.driver.start_station(credentials) {
            self.handle.abandon_attempt();
            return Err(e);
        }

        if self.handle.wait_connected(self.connect_timeout) {
            info!("Connected to '{}'", credentials.ssid());
            return Ok(true);
        }

        warn!(
            "No IP from '{}' within {:?}",
            credentials.ssid(),
            self.connect_timeout
        );
        self.handle.abandon_attempt();
        if let Err(e) = self.driver.stop_station() {
            warn!("Failed to stop station mode: {}", e);
        }
        Ok(false)
    }

    fn fall_back_to_access_point(
        &mut self,
        access_point: &AccessPointSettings,
    ) -> Result<(), ConnectivityError> {
        if self.handle.state() == ConnectionState::ApFallback {
            return Ok(());
        }
        self.handle.enter_ap_fallback();
        self.driver.start_access_point(access_point)?;
        info!(
            "Access point '{}' started ({})",
            access_point.ssid,
            if access_point.is_open() { "open" } else { "WPA2" }
        );
        Ok(())
    }
}
