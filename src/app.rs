//! 起動シーケンス
//!
//! ネットワークモード（STA/APフォールバック + HTTP配信）と
//! シリアルモード（UARTによるフレーム配信 + 制御コマンド受信）。

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::gpio::AnyOutputPin;
use esp_idf_svc::hal::ledc::{CHANNEL1, TIMER1};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys;
use log::{error, info, warn};

use crate::camera::esp::{EspCameraControl, EspCameraPool, LedcDimmer};
use crate::camera::{FrameSource, LedDimmer, NoLed};
use crate::config::AppConfig;
use crate::connectivity::esp::EspWifiDriver;
use crate::connectivity::{BootOutcome, ConnectivityHandle, ConnectivityManager};
use crate::provisioning::server::register_provisioning_handlers;
use crate::provisioning::shutdown::EspSystemControl;
use crate::provisioning::{ProvisioningService, ShutdownSequence};
use crate::status::{spawn_ip_reporter, NetifIpSource};
use crate::storage::nvs::NvsStore;
use crate::storage::ConfigStore;
use crate::stream::http::{start_control_server, start_stream_server};
use crate::stream::uart::UartLink;
use crate::stream::usb::SharedLink;
use crate::stream::{CommandProcessor, ControlReader, StreamError, UsbFrameWriter, UsbStreamer};
use crate::tasks::{StopSignal, TaskRegistry};

type Processor = CommandProcessor<EspCameraControl, Box<dyn LedDimmer>>;

const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(1);
const CONTROL_READER_TASK: &str = "usb_control";
const CONTROL_READER_STACK_SIZE: usize = 6 * 1024;
const CONTROL_POLL_TIMEOUT_MS: u32 = 50;
const STREAM_RETRY_DELAY: Duration = Duration::from_millis(500);

/// 初期化済みのカメラと制御
struct CameraRuntime {
    source: FrameSource<EspCameraPool>,
    processor: Arc<Mutex<Processor>>,
}

/// 致命的なエラーの後、再起動せずに停止します
pub fn halt() -> ! {
    error!("Device halted. Fix the problem above and reset the board.");
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn log_memory_status() {
    let psram = unsafe { sys::heap_caps_get_free_size(sys::MALLOC_CAP_SPIRAM) };
    if psram > 0 {
        info!("PSRAM is available. Free PSRAM: {} bytes", psram);
    } else {
        warn!("PSRAM is not available on this module");
    }
}

fn init_led(channel: CHANNEL1, timer: TIMER1, led_pin: Option<i32>) -> Box<dyn LedDimmer> {
    let Some(pin) = led_pin else {
        return Box::new(NoLed::default());
    };
    // ボード定義のピン番号で、カメラのピンとは重ならない
    let pin = unsafe { AnyOutputPin::new(pin) };
    match LedcDimmer::new(channel, timer, pin) {
        Ok(dimmer) => Box::new(dimmer),
        Err(e) => {
            warn!("LED PWM init failed, continuing without LED: {}", e);
            Box::new(NoLed::default())
        }
    }
}

/// カメラを初期化し、保存済みのカメラ設定を適用します
fn init_camera(
    config: &AppConfig,
    store: &ConfigStore,
    led: Box<dyn LedDimmer>,
) -> anyhow::Result<CameraRuntime> {
    let profile = config.board_profile();
    info!("Initializing camera for {}", profile.id);
    let pool = EspCameraPool::init(profile).map_err(|e| anyhow!("camera: {}", e))?;
    let source = FrameSource::new(pool);

    let control = EspCameraControl::new().map_err(|e| anyhow!("camera sensor: {}", e))?;
    let mut processor = CommandProcessor::new(control, led, store.clone());
    if let Err(e) = processor.apply_settings(&store.load_settings_or_default()) {
        warn!("Failed to apply stored camera settings: {}", e);
    }

    Ok(CameraRuntime {
        source,
        processor: Arc::new(Mutex::new(processor)),
    })
}

/// 再接続の上限に達したら再起動します（戻らない）
fn supervise(handle: &ConnectivityHandle, registry: &TaskRegistry) -> ! {
    loop {
        if handle.restart_requested() {
            warn!("Reconnect attempts exhausted, restarting");
            ShutdownSequence::new(EspSystemControl, registry.clone(), 0).run();
        }
        thread::sleep(SUPERVISOR_INTERVAL);
    }
}

/// ネットワークモード
///
/// 接続できればHTTP配信のみ、APフォールバック時は設定フォームも提供します。
/// 配信サーバーはどちらの場合も起動します。
pub fn run_network_mode(
    config: &AppConfig,
    peripherals: Peripherals,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> anyhow::Result<()> {
    log_memory_status();

    let store = ConfigStore::new(Arc::new(NvsStore::new(nvs.clone())));
    let profile = config.board_profile();
    let led = init_led(
        peripherals.ledc.channel1,
        peripherals.ledc.timer1,
        profile.led_pin,
    );
    let camera = init_camera(config, &store, led)?;

    info!("Initializing Wi-Fi...");
    let handle = ConnectivityHandle::new(config.reconnect.clone());
    let driver = EspWifiDriver::new(peripherals.modem, sysloop, nvs, handle.clone())?;
    let mut manager = ConnectivityManager::new(driver, handle.clone(), config.sta_connect_timeout);
    let outcome = manager.bootstrap(
        config.static_credentials.as_ref(),
        &store,
        &config.access_point,
    )?;

    let registry = TaskRegistry::new();
    let mut control_server = start_control_server(camera.processor.clone())?;

    match &outcome {
        BootOutcome::Station { ssid } => {
            info!("Wi-Fi connected to '{}'. Skipping provisioning", ssid);
        }
        BootOutcome::AccessPoint => {
            warn!(
                "Wi-Fi not connected. Serving configuration form on AP '{}'",
                config.access_point.ssid
            );
            let shutdown = ShutdownSequence::new(
                EspSystemControl,
                registry.clone(),
                config.restart_countdown_secs,
            );
            let service = ProvisioningService::new(
                store.clone(),
                shutdown,
                config.decode_html_entities,
            );
            register_provisioning_handlers(&mut control_server, Arc::new(service))?;
        }
    }

    info!("Starting stream server...");
    let _stream_server = start_stream_server(
        camera.source.clone(),
        config.stream_port,
        config.stream_fps_hint,
    )?;

    spawn_ip_reporter(&registry, NetifIpSource, config.ip_report_interval)?;
    info!("System initialization complete. Ready for operation.");

    let _keep_alive = (manager, control_server);
    supervise(&handle, &registry)
}

/// UART0をフレーム配信に使うため、コンソールへのログ出力を止めます
fn silence_console(level: log::LevelFilter) {
    info!("Serial link takes over UART0, console logging set to {}", level);
    log::set_max_level(level);
    if level == log::LevelFilter::Off {
        unsafe { sys::esp_log_level_set(c"*".as_ptr(), sys::esp_log_level_t_ESP_LOG_NONE) };
    }
}

fn run_control_reader(
    link: SharedLink<UartLink<'static>>,
    processor: Arc<Mutex<Processor>>,
    stop: StopSignal,
) {
    let mut reader = ControlReader::new(link);
    while !stop.is_stopped() {
        let lines = match reader.poll(CONTROL_POLL_TIMEOUT_MS) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Control read failed: {}", e);
                stop.wait(STREAM_RETRY_DELAY);
                continue;
            }
        };
        for line in lines {
            let reply = processor
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .handle_line(&line);
            if let Some(reply) = reply {
                if let Err(e) = reader.reply(reply) {
                    warn!("Failed to send reply: {}", e);
                }
            }
        }
    }
}

/// シリアルモード
///
/// UARTでフレームを送り続け、同じリンクで制御コマンドを受け付けます。
pub fn run_serial_mode(
    config: &AppConfig,
    peripherals: Peripherals,
    nvs: EspDefaultNvsPartition,
) -> anyhow::Result<()> {
    let store = ConfigStore::new(Arc::new(NvsStore::new(nvs)));
    let profile = config.board_profile();
    let led = init_led(
        peripherals.ledc.channel1,
        peripherals.ledc.timer1,
        profile.led_pin,
    );
    let camera = init_camera(config, &store, led)?;

    silence_console(config.serial.log_level);
    let link = UartLink::new(
        peripherals.uart0,
        profile.uart_tx,
        profile.uart_rx,
        config.serial.baud_rate,
    )?;
    let link: SharedLink<UartLink<'static>> = Arc::new(Mutex::new(link));

    let registry = TaskRegistry::new();
    {
        let link = link.clone();
        let processor = camera.processor.clone();
        registry.spawn(CONTROL_READER_TASK, CONTROL_READER_STACK_SIZE, move |stop| {
            run_control_reader(link, processor, stop)
        })?;
    }

    let mut streamer = UsbStreamer::new(
        camera.source.consumer(),
        UsbFrameWriter::new(config.serial.chunk_size),
        config.serial.frame_interval,
    );
    let stop = StopSignal::new();
    loop {
        match streamer.run(&link, &stop) {
            Ok(_) => return Ok(()),
            Err(StreamError::SourceClosed) => return Err(anyhow!("frame source closed")),
            Err(e) => {
                warn!("USB stream interrupted ({}), restarting session", e);
                thread::sleep(STREAM_RETRY_DELAY);
            }
        }
    }
}
