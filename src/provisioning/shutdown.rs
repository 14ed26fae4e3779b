//! プロビジョニング後の制御された再起動

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::status::IP_REPORTER_TASK;
use crate::tasks::TaskRegistry;

const RESTART_TASK_NAME: &str = "prov-restart";
const RESTART_TASK_STACK_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownError {
    #[error("{step} failed: {reason}")]
    Step { step: &'static str, reason: String },
    #[error("failed to spawn restart task: {0}")]
    Spawn(String),
}

/// 再起動前に停止するシステム機能
pub trait SystemControl: Send {
    fn stop_wifi(&mut self) -> Result<(), ShutdownError>;

    fn deinit_wifi(&mut self) -> Result<(), ShutdownError>;

    fn stop_watchdog(&mut self) -> Result<(), ShutdownError>;

    /// 実機では戻らない
    fn restart(&mut self);
}

/// 再起動の予約
pub trait RestartTrigger: Send + Sync {
    fn schedule_restart(&self) -> Result<(), ShutdownError>;
}

/// 実行された手順
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownStep {
    Countdown(u32),
    CancelTask(String),
    StopWifi,
    DeinitWifi,
    StopWatchdog,
    Restart,
}

/// カウントダウン後にタスク・Wi-Fi・ウォッチドッグを停止して再起動する手順
///
/// 各手順は失敗しても警告を出して続行します（最後の再起動は必ず行う）。
/// IPレポートタスクはWi-Fiの停止より先に止めます。
pub struct ShutdownSequence<C: SystemControl> {
    control: Arc<Mutex<C>>,
    registry: TaskRegistry,
    countdown_secs: u32,
    tick: Duration,
    scheduled: Arc<AtomicBool>,
}

impl<C: SystemControl> Clone for ShutdownSequence<C> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            registry: self.registry.clone(),
            countdown_secs: self.countdown_secs,
            tick: self.tick,
            scheduled: self.scheduled.clone(),
        }
    }
}

impl<C: SystemControl + 'static> ShutdownSequence<C> {
    pub fn new(control: C, registry: TaskRegistry, countdown_secs: u32) -> Self {
        Self {
            control: Arc::new(Mutex::new(control)),
            registry,
            countdown_secs,
            tick: Duration::from_secs(1),
            scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// テスト用: カウントダウンの1秒を短縮します
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// 手順を現在のスレッドで実行します
    pub fn run(&self) -> Vec<ShutdownStep> {
        let mut steps = Vec::new();

        for remaining in (1..=self.countdown_secs).rev() {
            info!("Rebooting in {} seconds...", remaining);
            steps.push(ShutdownStep::Countdown(remaining));
            thread::sleep(self.tick);
        }

        if self.registry.cancel(IP_REPORTER_TASK) {
            steps.push(ShutdownStep::CancelTask(IP_REPORTER_TASK.to_string()));
        }
        for name in self.registry.cancel_all() {
            steps.push(ShutdownStep::CancelTask(name));
        }

        let mut control = self.control.lock().unwrap_or_else(|e| e.into_inner());
        let log_failure = |result: Result<(), ShutdownError>| {
            if let Err(e) = result {
                warn!("Shutdown step failed, continuing: {}", e);
            }
        };
        log_failure(control.stop_wifi());
        steps.push(ShutdownStep::StopWifi);
        log_failure(control.deinit_wifi());
        steps.push(ShutdownStep::DeinitWifi);
        log_failure(control.stop_watchdog());
        steps.push(ShutdownStep::StopWatchdog);

        info!("Restarting now");
        steps.push(ShutdownStep::Restart);
        control.restart();
        steps
    }
}

impl<C: SystemControl + 'static> RestartTrigger for ShutdownSequence<C> {
    /// 専用スレッドで手順を開始します。2回目以降の呼び出しは無視されます
    fn schedule_restart(&self) -> Result<(), ShutdownError> {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            info!("Restart already scheduled");
            return Ok(());
        }
        let sequence = self.clone();
        thread::Builder::new()
            .name(RESTART_TASK_NAME.into())
            .stack_size(RESTART_TASK_STACK_SIZE)
            .spawn(move || {
                sequence.run();
            })
            .map(|_| ())
            .map_err(|e| {
                self.scheduled.store(false, Ordering::SeqCst);
                ShutdownError::Spawn(e.to_string())
            })
    }
}

#[cfg(feature = "esp")]
pub use esp_control::EspSystemControl;

#[cfg(feature = "esp")]
mod esp_control {
    use esp_idf_svc::sys::{self, esp};

    use super::{ShutdownError, SystemControl};

    /// ESP-IDFのWi-Fi・タスクウォッチドッグ・再起動
    #[derive(Debug, Default)]
    pub struct EspSystemControl;

    fn step(step: &'static str, code: sys::esp_err_t) -> Result<(), ShutdownError> {
        esp!(code).map_err(|e| ShutdownError::Step {
            step,
            reason: e.to_string(),
        })
    }

    impl SystemControl for EspSystemControl {
        fn stop_wifi(&mut self) -> Result<(), ShutdownError> {
            step("esp_wifi_stop", unsafe { sys::esp_wifi_stop() })
        }

        fn deinit_wifi(&mut self) -> Result<(), ShutdownError> {
            step("esp_wifi_deinit", unsafe { sys::esp_wifi_deinit() })
        }

        fn stop_watchdog(&mut self) -> Result<(), ShutdownError> {
            let code = unsafe { sys::esp_task_wdt_deinit() };
            // 未初期化の場合はINVALID_STATE
            if code == sys::ESP_ERR_INVALID_STATE as sys::esp_err_t {
                return Ok(());
            }
            step("esp_task_wdt_deinit", code)
        }

        fn restart(&mut self) {
            unsafe { sys::esp_restart() };
        }
    }
}

#[cfg(not(feature = "esp"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use super::{ShutdownError, SystemControl};

    /// テスト用: 呼び出しを記録するシステム制御
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSystemControl {
        pub calls: Arc<Mutex<Vec<&'static str>>>,
        pub fail_wifi_stop: bool,
    }

    impl RecordingSystemControl {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }
    }

    impl SystemControl for RecordingSystemControl {
        fn stop_wifi(&mut self) -> Result<(), ShutdownError> {
            self.record("stop_wifi");
            if self.fail_wifi_stop {
                return Err(ShutdownError::Step {
                    step: "stop_wifi",
                    reason: "simulated".to_string(),
                });
            }
            Ok(())
        }

        fn deinit_wifi(&mut self) -> Result<(), ShutdownError> {
            self.record("deinit_wifi");
            Ok(())
        }

        fn stop_watchdog(&mut self) -> Result<(), ShutdownError> {
            self.record("stop_watchdog");
            Ok(())
        }

        fn restart(&mut self) {
            self.record("restart");
        }
    }
}

#[cfg(all(test, not(feature = "esp")))]
mod tests {
    use super::mock::RecordingSystemControl;
    use super::*;
    use crate::tasks::DEFAULT_STACK_SIZE;

    #[test]
    fn shutdown_cancels_ip_reporter_before_wifi_teardown() {
        let registry = TaskRegistry::new();
        registry
            .spawn(IP_REPORTER_TASK, DEFAULT_STACK_SIZE, |stop| {
                stop.wait(Duration::from_secs(10));
            })
            .unwrap();
        let control = RecordingSystemControl::new();
        let sequence = ShutdownSequence::new(control.clone(), registry.clone(), 3)
            .with_tick(Duration::from_millis(1));

        let steps = sequence.run();
        assert_eq!(
            steps,
            vec![
                ShutdownStep::Countdown(3),
                ShutdownStep::Countdown(2),
                ShutdownStep::Countdown(1),
                ShutdownStep::CancelTask(IP_REPORTER_TASK.to_string()),
                ShutdownStep::StopWifi,
                ShutdownStep::DeinitWifi,
                ShutdownStep::StopWatchdog,
                ShutdownStep::Restart,
            ]
        );
        assert!(!registry.is_running(IP_REPORTER_TASK));
        assert_eq!(
            control.calls(),
            vec!["stop_wifi", "deinit_wifi", "stop_watchdog", "restart"]
        );
    }

    #[test]
    fn failing_step_does_not_prevent_restart() {
        let control = RecordingSystemControl {
            fail_wifi_stop: true,
            ..Default::default()
        };
        let sequence = ShutdownSequence::new(control.clone(), TaskRegistry::new(), 0);
        let steps = sequence.run();
        assert_eq!(steps.last(), Some(&ShutdownStep::Restart));
        assert_eq!(control.calls().last(), Some(&"restart"));
    }

    #[test]
    fn restart_is_scheduled_once() {
        let control = RecordingSystemControl::new();
        let sequence = ShutdownSequence::new(control.clone(), TaskRegistry::new(), 1)
            .with_tick(Duration::from_millis(1));
        sequence.schedule_restart().unwrap();
        sequence.schedule_restart().unwrap();
        assert!(sequence.is_scheduled());

        for _ in 0..200 {
            if control.calls().contains(&"restart") {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            control.calls().iter().filter(|c| **c == "restart").count(),
            1
        );
    }
}
