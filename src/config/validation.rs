use crate::storage::{WifiCredentials, PASSWORD_MAX_LEN, SSID_MAX_LEN};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    SsidLength(usize),
    PasswordTooLong(usize),
    ApPasswordLength(usize),
    ZeroTimeout(&'static str),
    ChunkSize(usize),
    MaxConnections(u8),
    LogLevel(String),
}

/// 静的Wi-Fi認証情報を検証します（SSIDが空なら未設定として扱う）
pub fn parse_static_credentials(
    ssid: &str,
    password: &str,
) -> Result<Option<WifiCredentials>, ValidationError> {
    if ssid.is_empty() {
        return Ok(None);
    }
    if ssid.len() > SSID_MAX_LEN {
        return Err(ValidationError::SsidLength(ssid.len()));
    }
    if password.len() > PASSWORD_MAX_LEN {
        return Err(ValidationError::PasswordTooLong(password.len()));
    }
    WifiCredentials::new(ssid, password)
        .map(Some)
        .map_err(|_| ValidationError::SsidLength(ssid.len()))
}

pub fn validate_ap_ssid(ssid: &str) -> Result<(), ValidationError> {
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN {
        Err(ValidationError::SsidLength(ssid.len()))
    } else {
        Ok(())
    }
}

/// WPA2のパスフレーズは8〜63バイト。空文字はオープンAP
pub fn validate_ap_password(password: &str) -> Result<(), ValidationError> {
    match password.len() {
        0 | 8..=63 => Ok(()),
        len => Err(ValidationError::ApPasswordLength(len)),
    }
}

pub fn validate_max_connections(value: u8) -> Result<(), ValidationError> {
    if (1..=10).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::MaxConnections(value))
    }
}

pub fn validate_nonzero(name: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        Err(ValidationError::ZeroTimeout(name))
    } else {
        Ok(())
    }
}

pub fn validate_chunk_size(value: usize) -> Result<(), ValidationError> {
    if (1..=64).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::ChunkSize(value))
    }
}

pub fn parse_log_level(value: &str) -> Result<log::LevelFilter, ValidationError> {
    value
        .trim()
        .parse::<log::LevelFilter>()
        .map_err(|_| ValidationError::LogLevel(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_static_ssid_means_unconfigured() {
        assert_eq!(parse_static_credentials("", "whatever"), Ok(None));
    }

    #[test]
    fn static_credentials_are_parsed() {
        let creds = parse_static_credentials("home", "secret").unwrap().unwrap();
        assert_eq!(creds.ssid(), "home");
        assert_eq!(creds.password(), "secret");
    }

    #[test]
    fn overlong_ssid_is_rejected() {
        let ssid = "x".repeat(33);
        assert_eq!(
            parse_static_credentials(&ssid, ""),
            Err(ValidationError::SsidLength(33))
        );
    }

    #[test]
    fn ap_password_bounds() {
        assert!(validate_ap_password("").is_ok());
        assert!(validate_ap_password("12345678").is_ok());
        assert_eq!(
            validate_ap_password("1234567"),
            Err(ValidationError::ApPasswordLength(7))
        );
        assert!(validate_ap_password(&"p".repeat(64)).is_err());
    }

    #[test]
    fn chunk_size_bounds() {
        assert!(validate_chunk_size(64).is_ok());
        assert!(validate_chunk_size(0).is_err());
        assert!(validate_chunk_size(65).is_err());
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!(parse_log_level("debug"), Ok(log::LevelFilter::Debug));
        assert_eq!(parse_log_level("INFO"), Ok(log::LevelFilter::Info));
        assert!(parse_log_level("loud").is_err());
    }
}
