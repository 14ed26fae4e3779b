use std::fmt;

use heapless::String as HString;

/// SSIDの最大長（バイト）
pub const SSID_MAX_LEN: usize = 32;
/// パスワードの最大長（バイト）
pub const PASSWORD_MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("SSID must not be empty")]
    EmptySsid,
    #[error("SSID exceeds 32 bytes ({0})")]
    SsidTooLong(usize),
    #[error("password exceeds 64 bytes ({0})")]
    PasswordTooLong(usize),
}

/// Wi-Fi認証情報
///
/// 長さ制限は型で保証されます。パスワードが空の場合はオープンネットワークです。
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: HString<SSID_MAX_LEN>,
    password: HString<PASSWORD_MAX_LEN>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, CredentialsError> {
        if ssid.is_empty() {
            return Err(CredentialsError::EmptySsid);
        }
        let ssid = HString::try_from(ssid).map_err(|_| CredentialsError::SsidTooLong(ssid.len()))?;
        let password = HString::try_from(password)
            .map_err(|_| CredentialsError::PasswordTooLong(password.len()))?;
        Ok(Self { ssid, password })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// パスワードはログに出さない
impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid.as_str())
            .field("password", &"***")
            .finish()
    }
}

/// カメラ関連の調整値
///
/// Wi-Fi認証情報とは別の名前空間に保存されます。未保存の項目は`None`です。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    pub exposure: Option<i32>,
    pub led_brightness: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_enforce_length_limits() {
        assert_eq!(WifiCredentials::new("", "x"), Err(CredentialsError::EmptySsid));
        assert_eq!(
            WifiCredentials::new(&"s".repeat(33), ""),
            Err(CredentialsError::SsidTooLong(33))
        );
        assert_eq!(
            WifiCredentials::new("ok", &"p".repeat(65)),
            Err(CredentialsError::PasswordTooLong(65))
        );
        assert!(WifiCredentials::new(&"s".repeat(32), &"p".repeat(64)).is_ok());
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = WifiCredentials::new("home", "hunter2").unwrap();
        let text = format!("{:?}", creds);
        assert!(text.contains("home"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn empty_password_is_open_network() {
        assert!(WifiCredentials::new("cafe", "").unwrap().is_open());
    }
}
