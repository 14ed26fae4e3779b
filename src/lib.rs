/*!
 * # Paper Face Tracker Camera Firmware
 *
 * ESP32カメラのJPEGフレームをWi-Fi(HTTP MJPEG)またはUSBシリアルで配信するファームウェア
 *
 * ## モジュール構成
 * - `config`: ビルド時設定（cfg.toml）の読み込みと検証、ボード定義
 * - `storage`: 不揮発ストレージ（NVS）への認証情報・カメラ設定の保存
 * - `camera`: フレーム取得、センサー制御、LED調光
 * - `connectivity`: STA接続とAPフォールバックの状態機械
 * - `provisioning`: 設定フォームの解析と制御された再起動
 * - `stream`: MJPEG/USBシリアル配信と制御コマンド
 * - `tasks`: 名前付きバックグラウンドタスクと停止シグナル
 * - `status`: IPアドレスの定期レポート
 *
 * `esp`フィーチャーを無効にするとモック実装でホスト上のテストが可能です:
 * `cargo test --no-default-features`
 */

pub mod camera;
pub mod config;
pub mod connectivity;
pub mod provisioning;
pub mod status;
pub mod storage;
pub mod stream;
pub mod tasks;

#[cfg(feature = "esp")]
pub mod app;

pub use camera::{CaptureError, FrameBuffer, FrameConsumer, FrameMeta, FrameSource, PixelFormat};
pub use config::{AppConfig, BoardId, BoardProfile, ConfigError};
pub use connectivity::{BootOutcome, ConnectionState, ConnectivityHandle, ConnectivityManager};
pub use storage::{ConfigStore, KeyValueStore, Settings, StoreError, WifiCredentials};

/// ライブラリのバージョン情報
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
