use std::thread;

use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{self, esp};
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent,
};
use log::{error, info, warn};

use super::{ConnectivityError, ConnectivityHandle, EventAction, LinkEvent, WifiDriver};
use crate::config::AccessPointSettings;
use crate::storage::WifiCredentials;

fn driver_err(e: impl std::fmt::Display) -> ConnectivityError {
    ConnectivityError::Driver(e.to_string())
}

fn connect_now() {
    if let Err(e) = esp!(unsafe { sys::esp_wifi_connect() }) {
        warn!("esp_wifi_connect failed: {}", e);
    }
}

/// イベントに対する操作を実行します
///
/// イベントループのタスクをブロックしないよう、待ち時間のある再接続は別スレッドで行います。
fn execute(action: EventAction) {
    match action {
        EventAction::None => {}
        EventAction::Connect => connect_now(),
        EventAction::Reconnect { delay } if delay.is_zero() => connect_now(),
        EventAction::Reconnect { delay } => {
            let spawned = thread::Builder::new()
                .name("wifi-reconnect".into())
                .stack_size(4 * 1024)
                .spawn(move || {
                    thread::sleep(delay);
                    connect_now();
                });
            if let Err(e) = spawned {
                warn!("Failed to schedule reconnect, connecting now: {}", e);
                connect_now();
            }
        }
        EventAction::GiveUp => error!("Reconnect policy exhausted, waiting for supervised restart"),
    }
}

/// ESP-IDFのWi-Fiドライバー
pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
    _subscriptions: [EspSubscription<'static, System>; 2],
}

impl EspWifiDriver {
    /// Wi-Fiを初期化し、イベントを`handle`へ転送します
    pub fn new(
        modem: impl Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        handle: ConnectivityHandle,
    ) -> Result<Self, ConnectivityError> {
        let wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))
            .map_err(|e| ConnectivityError::Init(e.to_string()))?;

        let wifi_handle = handle.clone();
        let wifi_subscription = sysloop
            .subscribe::<WifiEvent, _>(move |event| {
                let link = match event {
                    WifiEvent::StaStarted { .. } => LinkEvent::StationStarted,
                    WifiEvent::StaDisconnected { .. } => LinkEvent::Disconnected,
                    _ => return,
                };
                execute(wifi_handle.on_event(link));
            })
            .map_err(|e| ConnectivityError::Init(e.to_string()))?;

        let ip_subscription = sysloop
            .subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned { .. } = event {
                    execute(handle.on_event(LinkEvent::GotIp));
                }
            })
            .map_err(|e| ConnectivityError::Init(e.to_string()))?;

        Ok(Self {
            wifi,
            _subscriptions: [wifi_subscription, ip_subscription],
        })
    }
}

impl WifiDriver for EspWifiDriver {
    fn start_station(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError> {
        let auth_method = if credentials.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid()
                    .try_into()
                    .map_err(|_| driver_err("SSID too long"))?,
                password: credentials
                    .password()
                    .try_into()
                    .map_err(|_| driver_err("password too long"))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(driver_err)?;
        // 接続はStaStartedイベントで開始される
        self.wifi.start().map_err(driver_err)?;
        info!("Station mode started for '{}'", credentials.ssid());
        Ok(())
    }

    fn stop_station(&mut self) -> Result<(), ConnectivityError> {
        self.wifi.stop().map_err(driver_err)
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), ConnectivityError> {
        let auth_method = if settings.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: settings.ssid.clone(),
                password: settings.password.clone(),
                auth_method,
                max_connections: settings.max_connections as u16,
                channel: 1,
                ..Default::default()
            }))
            .map_err(driver_err)?;
        self.wifi.start().map_err(driver_err)?;
        Ok(())
    }
}
