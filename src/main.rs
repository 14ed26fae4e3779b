use esp_idf_svc::{hal::peripherals::Peripherals, nvs::EspDefaultNvsPartition};
use log::{error, info};

use paper_face_tracker::{app, AppConfig, VERSION};

#[cfg(all(feature = "mode-wifi", feature = "mode-usb"))]
compile_error!("features `mode-wifi` and `mode-usb` are mutually exclusive");

#[cfg(not(any(feature = "mode-wifi", feature = "mode-usb")))]
compile_error!("enable exactly one transport mode: `mode-wifi` or `mode-usb`");

/// アプリケーションのメインエントリーポイント
fn main() -> anyhow::Result<()> {
    // ESP-IDFの基本初期化
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // 設定ファイル読み込み
    let config = AppConfig::load().map_err(|e| {
        error!("設定ファイルの読み込みに失敗しました: {}", e);
        anyhow::anyhow!("設定ファイルの読み込みエラー: {}", e)
    })?;
    log::set_max_level(config.log_level);
    info!("Paper Face Tracker v{} (board: {})", VERSION, config.board);

    // ペリフェラルとシステムリソースの初期化
    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    #[cfg(feature = "mode-wifi")]
    let result = {
        let sysloop = esp_idf_svc::eventloop::EspSystemEventLoop::take()?;
        app::run_network_mode(&config, peripherals, sysloop, nvs)
    };

    #[cfg(feature = "mode-usb")]
    let result = app::run_serial_mode(&config, peripherals, nvs);

    if let Err(e) = result {
        error!("起動に失敗しました: {:#}", e);
        app::halt();
    }
    Ok(())
}
