//! 不揮発ストレージ
//!
//! 名前空間付きのキー/値ストアと、認証情報・カメラ設定を扱う型付きファサード。

mod credentials;

#[cfg(feature = "esp")]
pub mod nvs;

// Mock実装（テストとnon-espビルドで使用可能）
#[cfg(not(feature = "esp"))]
pub mod memory;

use std::sync::Arc;

use log::{debug, info, warn};

pub use credentials::{CredentialsError, Settings, WifiCredentials, PASSWORD_MAX_LEN, SSID_MAX_LEN};

/// Wi-Fi認証情報の名前空間
pub const WIFI_NAMESPACE: &str = "wifi_config";
pub const KEY_SSID: &str = "ssid";
pub const KEY_PASSWORD: &str = "password";

/// カメラ設定の名前空間
pub const CAMERA_NAMESPACE: &str = "camera_config";
pub const KEY_EXPOSURE: &str = "exposure";
pub const KEY_LED_BRIGHTNESS: &str = "led_brightness";

/// ストレージ操作の結果の型
pub type StoreResult<T> = Result<T, StoreError>;

/// ストレージのエラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open namespace '{namespace}': {reason}")]
    Open { namespace: String, reason: String },
    #[error("failed to read '{key}': {reason}")]
    Read { key: String, reason: String },
    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },
    #[error("stored value for '{key}' is invalid: {reason}")]
    Corrupt { key: String, reason: String },
}

/// 書き込む値
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreValue<'a> {
    Str(&'a str),
    I32(i32),
}

/// 名前空間付きキー/値ストア
///
/// `write`は1つの名前空間に対して「オープン → 全項目書き込み → コミット → クローズ」を
/// 1回の操作として行い、失敗時もハンドルを必ず解放します。
/// 実装は内部で書き込みを直列化しなければなりません。
pub trait KeyValueStore: Send + Sync {
    fn get_str(&self, namespace: &str, key: &str) -> StoreResult<Option<String>>;

    fn get_i32(&self, namespace: &str, key: &str) -> StoreResult<Option<i32>>;

    fn write(&self, namespace: &str, entries: &[(&str, StoreValue<'_>)]) -> StoreResult<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get_str(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        (**self).get_str(namespace, key)
    }

    fn get_i32(&self, namespace: &str, key: &str) -> StoreResult<Option<i32>> {
        (**self).get_i32(namespace, key)
    }

    fn write(&self, namespace: &str, entries: &[(&str, StoreValue<'_>)]) -> StoreResult<()> {
        (**self).write(namespace, entries)
    }
}

/// 読み戻した保存値
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Str(String),
    I32(i32),
}

impl StoredValue {
    fn as_value(&self) -> StoreValue<'_> {
        match self {
            StoredValue::Str(s) => StoreValue::Str(s),
            StoredValue::I32(v) => StoreValue::I32(*v),
        }
    }
}

impl From<StoreValue<'_>> for StoredValue {
    fn from(value: StoreValue<'_>) -> Self {
        match value {
            StoreValue::Str(s) => StoredValue::Str(s.to_string()),
            StoreValue::I32(v) => StoredValue::I32(v),
        }
    }
}

/// 1項目ずつ即時に永続化される名前空間ハンドル
pub(crate) trait EntryWriter {
    /// 現在の値を`like`と同じ型で読み込みます
    fn current(&mut self, key: &str, like: StoreValue<'_>) -> StoreResult<Option<StoredValue>>;

    fn set(&mut self, key: &str, value: StoreValue<'_>) -> StoreResult<()>;

    fn remove(&mut self, key: &str) -> StoreResult<()>;
}

/// 全項目を書き込みます
///
/// 途中の項目で失敗した場合は、書き込み済みの項目を以前の値に戻してから
/// エラーを返します（以前に無かった項目は削除）。
pub(crate) fn write_entries<W: EntryWriter + ?Sized>(
    writer: &mut W,
    entries: &[(&str, StoreValue<'_>)],
) -> StoreResult<()> {
    let previous = entries
        .iter()
        .map(|(key, value)| writer.current(key, *value))
        .collect::<StoreResult<Vec<_>>>()?;

    for (done, (key, value)) in entries.iter().enumerate() {
        let Err(e) = writer.set(key, *value) else {
            continue;
        };
        warn!("Write of '{}' failed, restoring {} entries", key, done);
        for ((key, _), old) in entries[..done].iter().zip(&previous).rev() {
            let restored = match old {
                Some(old) => writer.set(key, old.as_value()),
                None => writer.remove(key),
            };
            if let Err(restore_err) = restored {
                warn!("Failed to restore '{}': {}", key, restore_err);
            }
        }
        return Err(e);
    }
    Ok(())
}

/// 認証情報とカメラ設定を扱う型付きストア
#[derive(Clone)]
pub struct ConfigStore {
    backend: Arc<dyn KeyValueStore>,
}

impl ConfigStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// 保存されているWi-Fi認証情報を読み込みます
    ///
    /// SSIDが未保存または空の場合は`None`を返します。
    pub fn load_credentials(&self) -> StoreResult<Option<WifiCredentials>> {
        let ssid = match self.backend.get_str(WIFI_NAMESPACE, KEY_SSID)? {
            Some(ssid) if !ssid.is_empty() => ssid,
            _ => {
                debug!("No stored Wi-Fi credentials");
                return Ok(None);
            }
        };
        let password = self
            .backend
            .get_str(WIFI_NAMESPACE, KEY_PASSWORD)?
            .unwrap_or_default();

        WifiCredentials::new(&ssid, &password)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: KEY_SSID.to_string(),
                reason: e.to_string(),
            })
    }

    /// Wi-Fi認証情報を保存します（SSIDとパスワードは両方とも更新されるか、どちらも変わらない）
    pub fn save_credentials(&self, credentials: &WifiCredentials) -> StoreResult<()> {
        self.backend.write(
            WIFI_NAMESPACE,
            &[
                (KEY_SSID, StoreValue::Str(credentials.ssid())),
                (KEY_PASSWORD, StoreValue::Str(credentials.password())),
            ],
        )?;
        info!("Wi-Fi credentials saved for SSID '{}'", credentials.ssid());
        Ok(())
    }

    /// カメラ設定を読み込みます（未保存の項目は`None`）
    pub fn load_settings(&self) -> StoreResult<Settings> {
        let settings = Settings {
            exposure: self.backend.get_i32(CAMERA_NAMESPACE, KEY_EXPOSURE)?,
            led_brightness: self.backend.get_i32(CAMERA_NAMESPACE, KEY_LED_BRIGHTNESS)?,
        };
        debug!("Loaded camera settings: {:?}", settings);
        Ok(settings)
    }

    pub fn save_exposure(&self, exposure: i32) -> StoreResult<()> {
        self.backend
            .write(CAMERA_NAMESPACE, &[(KEY_EXPOSURE, StoreValue::I32(exposure))])
    }

    pub fn save_led_brightness(&self, brightness: i32) -> StoreResult<()> {
        self.backend.write(
            CAMERA_NAMESPACE,
            &[(KEY_LED_BRIGHTNESS, StoreValue::I32(brightness))],
        )
    }

    /// 読み込みに失敗した場合は警告を出して既定値を返します
    pub fn load_settings_or_default(&self) -> Settings {
        self.load_settings().unwrap_or_else(|e| {
            warn!("Failed to load camera settings, using defaults: {}", e);
            Settings::default()
        })
    }
}
