//! 制御コマンドの解析と実行
//!
//! USBシリアルの受信行とHTTPの`/control`クエリを同じ`ControlCommand`に変換し、
//! `CommandProcessor`でカメラ・LEDへの適用と保存を行います。

use log::{debug, info, warn};

use crate::camera::{led_level, CameraControl, ControlError, LedDimmer, SensorSetting};
use crate::provisioning::{url_decode, DecodeError};
use crate::storage::{ConfigStore, CredentialsError, Settings, StoreError, WifiCredentials};

const TAG_SSID: &str = "SSID:";
const TAG_PASSWORD: &str = "PASSWORD:";
const TAG_EXPOSURE: &str = "EXPOSURE:";
const TAG_BRIGHTNESS: &str = "BRIGHTNESS:";

/// 設定ツールが送る旧形式 `SSID=<ssid>,PASS=<password>`
const LEGACY_SSID_PREFIX: &str = "SSID=";
const LEGACY_PASS_MARKER: &str = ",PASS=";

/// 成功時・失敗時の応答行
pub const REPLY_OK: &str = "OK";
pub const REPLY_ERROR: &str = "ERROR";

/// 解析されたコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// フォーマット: "SSID:<ssid> PASSWORD:<password>" または "SSID=<ssid>,PASS=<password>"
    ///
    /// 両方のタグが同じ行に必要です。
    Credentials(WifiCredentials),
    /// フォーマット: "EXPOSURE:<n>"
    Exposure(i32),
    /// フォーマット: "BRIGHTNESS:<n>"
    Brightness(i32),
    /// 不明なコマンド（ログに出して破棄）
    Unknown(String),
}

/// コマンド解析エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("invalid number for {tag}: '{value}'")]
    InvalidNumber { tag: &'static str, value: String },
    #[error("invalid credentials: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("unknown control variable '{0}'")]
    UnknownVariable(String),
    #[error("query is not valid UTF-8 after decoding")]
    Decode(#[from] DecodeError),
}

/// タグの直後から空白までの値
fn token_after<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let start = line.find(tag)? + tag.len();
    let rest = &line[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn parse_number(tag: &'static str, value: &str) -> Result<i32, CommandParseError> {
    if value.is_empty() {
        return Err(CommandParseError::MissingValue(tag));
    }
    value.parse::<i32>().map_err(|_| CommandParseError::InvalidNumber {
        tag,
        value: value.to_string(),
    })
}

fn parse_credentials(line: &str) -> Result<ControlCommand, CommandParseError> {
    let start = line.find(TAG_SSID).map(|i| i + TAG_SSID.len()).unwrap_or(0);
    let rest = &line[start..];

    // SSIDは空白を含みうるため、PASSWORDタグの直前までを取る。
    // PASSWORDタグの無い行は保存済みのパスワードを消さないよう拒否する
    let pos = rest
        .find(TAG_PASSWORD)
        .ok_or(CommandParseError::MissingValue("PASSWORD"))?;
    let (ssid, password) = (rest[..pos].trim(), rest[pos + TAG_PASSWORD.len()..].trim());
    if ssid.is_empty() {
        return Err(CommandParseError::MissingValue("SSID"));
    }
    Ok(ControlCommand::Credentials(WifiCredentials::new(ssid, password)?))
}

fn parse_legacy_credentials(line: &str) -> Result<ControlCommand, CommandParseError> {
    let body = &line[LEGACY_SSID_PREFIX.len()..];
    let (ssid, password) = body
        .split_once(LEGACY_PASS_MARKER)
        .ok_or(CommandParseError::MissingValue("PASS"))?;
    if ssid.is_empty() {
        return Err(CommandParseError::MissingValue("SSID"));
    }
    Ok(ControlCommand::Credentials(WifiCredentials::new(ssid, password)?))
}

/// シリアルの受信行を解析します
///
/// タグは行内の部分一致で探します。どのタグも無い行は`Unknown`になります。
pub fn parse_control_line(line: &str) -> Result<ControlCommand, CommandParseError> {
    let trimmed = line.trim();
    debug!("Parsing control line: '{}'", trimmed);

    if trimmed.starts_with(LEGACY_SSID_PREFIX) {
        return parse_legacy_credentials(trimmed);
    }
    if trimmed.contains(TAG_SSID) {
        return parse_credentials(trimmed);
    }
    if let Some(value) = token_after(trimmed, TAG_EXPOSURE) {
        return parse_number("EXPOSURE", value).map(ControlCommand::Exposure);
    }
    if let Some(value) = token_after(trimmed, TAG_BRIGHTNESS) {
        return parse_number("BRIGHTNESS", value).map(ControlCommand::Brightness);
    }

    warn!("Unknown control packet: '{}'", trimmed);
    Ok(ControlCommand::Unknown(trimmed.to_string()))
}

/// `/control`のクエリ（`var=exposure&val=300`）を解析します
pub fn parse_control_query(query: &str) -> Result<ControlCommand, CommandParseError> {
    let mut var = None;
    let mut val = None;
    for pair in query.trim_start_matches('?').split('&') {
        match pair.split_once('=') {
            Some(("var", v)) => var = Some(url_decode(v)?),
            Some(("val", v)) => val = Some(url_decode(v)?),
            _ => {}
        }
    }

    let var = var.ok_or(CommandParseError::MissingValue("var"))?;
    let val = val.ok_or(CommandParseError::MissingValue("val"))?;
    match var.as_str() {
        "exposure" => parse_number("exposure", &val).map(ControlCommand::Exposure),
        "brightness" | "led_intensity" => {
            parse_number("brightness", &val).map(ControlCommand::Brightness)
        }
        other => Err(CommandParseError::UnknownVariable(other.to_string())),
    }
}

/// コマンド実行のエラー
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("control failed: {0}")]
    Control(#[from] ControlError),
    #[error("failed to persist setting: {0}")]
    Store(#[from] StoreError),
    #[error("unrecognized command '{0}'")]
    Unrecognized(String),
}

/// コマンドの検証・適用・保存
///
/// 値の検証に失敗した場合は何も適用・保存しません。
pub struct CommandProcessor<C: CameraControl, L: LedDimmer> {
    camera: C,
    led: L,
    store: ConfigStore,
}

impl<C: CameraControl, L: LedDimmer> CommandProcessor<C, L> {
    pub fn new(camera: C, led: L, store: ConfigStore) -> Self {
        Self { camera, led, store }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    /// 保存済みの設定を起動時に適用します（保存はしない）
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<(), CommandError> {
        if let Some(exposure) = settings.exposure {
            self.camera.set_manual_exposure(exposure)?;
            info!("Applied stored exposure {}", exposure);
        }
        if let Some(brightness) = settings.led_brightness {
            self.led.set_level(led_level(brightness)?)?;
            info!("Applied stored LED brightness {}", brightness);
        }
        Ok(())
    }

    pub fn execute(&mut self, command: ControlCommand) -> Result<(), CommandError> {
        match command {
            ControlCommand::Credentials(credentials) => {
                self.store.save_credentials(&credentials)?;
                info!("Wi-Fi credentials for '{}' saved", credentials.ssid());
            }
            ControlCommand::Exposure(exposure) => {
                SensorSetting::Exposure(exposure).validate()?;
                self.camera.set_manual_exposure(exposure)?;
                self.store.save_exposure(exposure)?;
                info!("Exposure set to {}", exposure);
            }
            ControlCommand::Brightness(brightness) => {
                let level = led_level(brightness)?;
                self.led.set_level(level)?;
                self.store.save_led_brightness(brightness)?;
                info!("LED brightness set to {}", brightness);
            }
            ControlCommand::Unknown(packet) => return Err(CommandError::Unrecognized(packet)),
        }
        Ok(())
    }

    /// 受信行を処理し、応答行を返します
    ///
    /// 不明なパケットは破棄して`None`を返します（応答しない）。
    pub fn handle_line(&mut self, line: &str) -> Option<&'static str> {
        let result = parse_control_line(line)
            .map_err(CommandError::from)
            .and_then(|command| self.execute(command));
        match result {
            Ok(()) => Some(REPLY_OK),
            Err(CommandError::Unrecognized(_)) => None,
            Err(e) => {
                warn!("Control command failed: {}", e);
                Some(REPLY_ERROR)
            }
        }
    }
}
