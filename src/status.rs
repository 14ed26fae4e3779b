//! IPアドレスの定期レポート

use std::net::Ipv4Addr;
use std::time::Duration;

use log::{info, warn};

use crate::tasks::{StopSignal, TaskError, TaskRegistry};

/// IPレポートタスクの名前（シャットダウン時にこの名前で停止される）
pub const IP_REPORTER_TASK: &str = "ip_reporter";

const IP_REPORTER_STACK_SIZE: usize = 4 * 1024;

/// STAインターフェースのIPアドレスの取得元
pub trait IpSource: Send + Sync {
    fn station_ip(&self) -> Option<Ipv4Addr>;
}

impl<F> IpSource for F
where
    F: Fn() -> Option<Ipv4Addr> + Send + Sync,
{
    fn station_ip(&self) -> Option<Ipv4Addr> {
        self()
    }
}

/// 停止要求まで`interval`ごとにIPアドレスをログに出します
///
/// 戻り値はIPを取得できた回数です。
pub fn run_ip_reporter<S: IpSource + ?Sized>(source: &S, interval: Duration, stop: &StopSignal) -> usize {
    let mut reported = 0;
    loop {
        match source.station_ip() {
            Some(ip) if !ip.is_unspecified() => {
                info!("IP Address: {}", ip);
                reported += 1;
            }
            _ => warn!("Failed to get IP info. Ensure Wi-Fi is connected."),
        }
        if stop.wait(interval) {
            break;
        }
    }
    reported
}

/// IPレポートタスクを起動します
pub fn spawn_ip_reporter<S>(
    registry: &TaskRegistry,
    source: S,
    interval: Duration,
) -> Result<StopSignal, TaskError>
where
    S: IpSource + 'static,
{
    registry.spawn(IP_REPORTER_TASK, IP_REPORTER_STACK_SIZE, move |stop| {
        run_ip_reporter(&source, interval, &stop);
    })
}

/// esp-netifのSTAインターフェースからIPを取得します
#[cfg(feature = "esp")]
#[derive(Debug, Default, Clone, Copy)]
pub struct NetifIpSource;

#[cfg(feature = "esp")]
impl IpSource for NetifIpSource {
    fn station_ip(&self) -> Option<Ipv4Addr> {
        use esp_idf_svc::sys::{self, esp};

        let netif = unsafe { sys::esp_netif_get_handle_from_ifkey(c"WIFI_STA_DEF".as_ptr()) };
        if netif.is_null() {
            return None;
        }
        let mut ip_info = sys::esp_netif_ip_info_t::default();
        esp!(unsafe { sys::esp_netif_get_ip_info(netif, &mut ip_info) }).ok()?;
        // lwIPのアドレスはネットワークバイトオーダー
        Some(Ipv4Addr::from(u32::from_be(ip_info.ip.addr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn reporter_stops_when_signalled() {
        let stop = StopSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let remote = stop.clone();
        let source = move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                remote.stop();
            }
            Some(Ipv4Addr::new(192, 168, 4, 2))
        };

        let reported = run_ip_reporter(&source, Duration::from_millis(1), &stop);
        assert_eq!(reported, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_ip_is_not_counted() {
        let stop = StopSignal::new();
        stop.stop();
        let reported = run_ip_reporter(&|| -> Option<Ipv4Addr> { None }, Duration::from_millis(1), &stop);
        assert_eq!(reported, 0);
    }

    #[test]
    fn reporter_task_is_cancellable_by_name() {
        let registry = TaskRegistry::new();
        spawn_ip_reporter(
            &registry,
            || Some(Ipv4Addr::LOCALHOST),
            Duration::from_millis(5),
        )
        .unwrap();
        assert!(registry.is_running(IP_REPORTER_TASK));
        assert!(registry.cancel(IP_REPORTER_TASK));
        assert!(!registry.is_running(IP_REPORTER_TASK));
    }
}
