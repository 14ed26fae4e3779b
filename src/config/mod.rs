//! ビルド時設定（cfg.toml）とボード定義

pub mod board;
pub mod validation;

use std::time::Duration;

use heapless::String as HString;

use crate::connectivity::{Backoff, ReconnectPolicy};
use crate::storage::WifiCredentials;
pub use board::{BoardId, BoardProfile, CameraPins, FrameSize};
use validation::{
    parse_log_level, parse_static_credentials, validate_ap_password, validate_ap_ssid,
    validate_chunk_size, validate_max_connections, validate_nonzero, ValidationError,
};

/// アプリケーション設定
///
/// この構造体はビルド時に`toml-cfg`によって`cfg.toml`ファイルから
/// 読み込まれた設定を保持します。
#[toml_cfg::toml_config]
pub struct Config {
    #[default("paper-face-tracker")]
    board: &'static str,

    #[default("")]
    wifi_ssid: &'static str,

    #[default("")]
    wifi_password: &'static str,

    #[default("paper_face_tracker")]
    ap_ssid: &'static str,

    #[default("12345678")] // 空にするとオープンAP
    ap_password: &'static str,

    #[default(4)]
    ap_max_connections: u8,

    #[default(5000)]
    sta_connect_timeout_ms: u64,

    #[default(0)] // 0は無制限
    reconnect_max_attempts: u32,

    #[default(0)] // 0は即時再接続
    reconnect_backoff_ms: u64,

    #[default(30000)]
    reconnect_backoff_max_ms: u64,

    #[default(81)]
    stream_port: u16,

    #[default(60)]
    stream_fps_hint: u32,

    #[default(3000000)]
    usb_baud_rate: u32,

    #[default(64)]
    usb_chunk_size: usize,

    #[default(100)]
    usb_frame_interval_ms: u64,

    #[default(3)]
    restart_countdown_secs: u32,

    #[default(true)]
    decode_html_entities: bool,

    #[default(2000)]
    ip_report_interval_ms: u64,

    #[default("info")]
    log_level: &'static str,
}

/// 設定エラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown board: {0}")]
    UnknownBoard(String),
    #[error("invalid SSID length: {0} bytes (1-32)")]
    InvalidSsid(usize),
    #[error("password too long: {0} bytes (max 64)")]
    PasswordTooLong(usize),
    #[error("AP password must be empty or 8-63 bytes, got {0}")]
    InvalidApPassword(usize),
    #[error("{0} must not be zero")]
    ZeroValue(&'static str),
    #[error("usb_chunk_size must be 1-64, got {0}")]
    InvalidChunkSize(usize),
    #[error("ap_max_connections must be 1-10, got {0}")]
    InvalidMaxConnections(u8),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

impl From<ValidationError> for ConfigError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::SsidLength(len) => ConfigError::InvalidSsid(len),
            ValidationError::PasswordTooLong(len) => ConfigError::PasswordTooLong(len),
            ValidationError::ApPasswordLength(len) => ConfigError::InvalidApPassword(len),
            ValidationError::ZeroTimeout(name) => ConfigError::ZeroValue(name),
            ValidationError::ChunkSize(size) => ConfigError::InvalidChunkSize(size),
            ValidationError::MaxConnections(n) => ConfigError::InvalidMaxConnections(n),
            ValidationError::LogLevel(level) => ConfigError::InvalidLogLevel(level),
        }
    }
}

/// プロビジョニング用アクセスポイントの設定
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPointSettings {
    pub ssid: HString<32>,
    pub password: HString<64>,
    pub max_connections: u8,
}

impl AccessPointSettings {
    /// パスワードが空ならオープンAP
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

/// シリアル配信の設定
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub chunk_size: usize,
    pub frame_interval: Duration,
    /// リンク使用中のログレベル（UART0はコンソールと共用のため常に`Off`）
    pub log_level: log::LevelFilter,
}

/// 検証済みのアプリケーション設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub board: BoardId,
    /// ビルド時に埋め込まれた認証情報（NVSより優先して試行）
    pub static_credentials: Option<WifiCredentials>,
    pub access_point: AccessPointSettings,
    pub sta_connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub stream_port: u16,
    pub stream_fps_hint: u32,
    pub serial: SerialSettings,
    pub restart_countdown_secs: u32,
    pub decode_html_entities: bool,
    pub ip_report_interval: Duration,
    pub log_level: log::LevelFilter,
}

impl AppConfig {
    /// `cfg.toml`から設定を読み込みます
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_config(&CONFIG)
    }

    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let board = config
            .board
            .parse::<BoardId>()
            .map_err(|e| ConfigError::UnknownBoard(e.0))?;

        let static_credentials = parse_static_credentials(config.wifi_ssid, config.wifi_password)?;

        validate_ap_ssid(config.ap_ssid)?;
        validate_ap_password(config.ap_password)?;
        validate_max_connections(config.ap_max_connections)?;
        let access_point = AccessPointSettings {
            ssid: HString::try_from(config.ap_ssid)
                .map_err(|_| ConfigError::InvalidSsid(config.ap_ssid.len()))?,
            password: HString::try_from(config.ap_password)
                .map_err(|_| ConfigError::InvalidApPassword(config.ap_password.len()))?,
            max_connections: config.ap_max_connections,
        };

        validate_nonzero("sta_connect_timeout_ms", config.sta_connect_timeout_ms)?;
        validate_nonzero("stream_port", config.stream_port as u64)?;
        validate_nonzero("usb_baud_rate", config.usb_baud_rate as u64)?;
        validate_nonzero("ip_report_interval_ms", config.ip_report_interval_ms)?;
        validate_chunk_size(config.usb_chunk_size)?;
        // 確認ページの送信より先に再起動しないよう、最低1秒待つ
        validate_nonzero("restart_countdown_secs", config.restart_countdown_secs as u64)?;

        let reconnect = ReconnectPolicy {
            max_attempts: match config.reconnect_max_attempts {
                0 => None,
                n => Some(n),
            },
            backoff: match config.reconnect_backoff_ms {
                0 => Backoff::Immediate,
                base => Backoff::Exponential {
                    base: Duration::from_millis(base),
                    max: Duration::from_millis(config.reconnect_backoff_max_ms.max(base)),
                },
            },
        };

        Ok(Self {
            board,
            static_credentials,
            access_point,
            sta_connect_timeout: Duration::from_millis(config.sta_connect_timeout_ms),
            reconnect,
            stream_port: config.stream_port,
            stream_fps_hint: config.stream_fps_hint,
            serial: SerialSettings {
                baud_rate: config.usb_baud_rate,
                chunk_size: config.usb_chunk_size,
                frame_interval: Duration::from_millis(config.usb_frame_interval_ms),
                log_level: log::LevelFilter::Off,
            },
            restart_countdown_secs: config.restart_countdown_secs,
            decode_html_entities: config.decode_html_entities,
            ip_report_interval: Duration::from_millis(config.ip_report_interval_ms),
            log_level: parse_log_level(config.log_level)?,
        })
    }

    pub fn board_profile(&self) -> &'static BoardProfile {
        self.board.profile()
    }
}
