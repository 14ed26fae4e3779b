use log::{debug, warn};

use super::decode::{decode_html_entities, url_decode, DecodeError};
use crate::storage::{CredentialsError, WifiCredentials};

/// 受信するフォーム本文の上限（バイト）
pub const MAX_FORM_BODY: usize = 512;

const SSID_PREFIX: &str = "SSID=";
const PASS_MARKER: &str = "&PASS=";

/// 設定フォーム
pub const CONFIG_FORM_HTML: &str = concat!(
    "<!DOCTYPE html>",
    "<html>",
    "<head><meta charset=\"utf-8\"><title>Paper Face Tracker</title></head>",
    "<body>",
    "<h1>Wi-Fi Configuration</h1>",
    "<form action=\"/config\" method=\"post\">",
    "SSID: <input type=\"text\" name=\"SSID\"><br>",
    "Password: <input type=\"password\" name=\"PASS\"><br>",
    "<input type=\"submit\" value=\"Submit\">",
    "</form>",
    "</body>",
    "</html>"
);

/// 保存成功時の応答本文
pub const CONFIRMATION_BODY: &str = "WiFi Configured. Rebooting...";

/// フォーム解析のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("request body too large ({len} > {max} bytes)")]
    BodyTooLarge { len: usize, max: usize },
    #[error("request body is empty")]
    EmptyBody,
    #[error("body does not start with SSID=")]
    MissingSsid,
    #[error("body has no &PASS= marker")]
    MissingPassMarker,
    #[error("{0} is empty")]
    EmptyField(&'static str),
    #[error("{field}: {source}")]
    Decode {
        field: &'static str,
        source: DecodeError,
    },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

/// 受信バッファの長さを検査します
pub fn check_body_len(len: usize) -> Result<(), FormError> {
    if len > MAX_FORM_BODY {
        warn!("Form body too large: {} bytes", len);
        return Err(FormError::BodyTooLarge {
            len,
            max: MAX_FORM_BODY,
        });
    }
    Ok(())
}

fn decode_field(field: &'static str, raw: &str, html_entities: bool) -> Result<String, FormError> {
    let decoded = url_decode(raw).map_err(|source| FormError::Decode { field, source })?;
    let decoded = if html_entities {
        decode_html_entities(&decoded)
    } else {
        decoded
    };
    if decoded.is_empty() {
        warn!("Form field {} is empty", field);
        return Err(FormError::EmptyField(field));
    }
    Ok(decoded)
}

/// `SSID=<v>&PASS=<v>`形式の本文を解析します
///
/// パスワードは次の`&`まで（以降の項目は無視）。
/// `html_entities`が有効な場合はURLデコード後に数値文字参照もデコードします。
pub fn parse_config_form(body: &[u8], html_entities: bool) -> Result<WifiCredentials, FormError> {
    check_body_len(body.len())?;
    if body.is_empty() {
        return Err(FormError::EmptyBody);
    }

    // URLエンコード済みの本文はASCIIのみ
    let text = String::from_utf8_lossy(body);
    let text = text.trim_end_matches(['\0', '\r', '\n', ' ']);

    let rest = text.strip_prefix(SSID_PREFIX).ok_or_else(|| {
        warn!("Invalid data format. Expected format: SSID=<SSID>&PASS=<Password>");
        FormError::MissingSsid
    })?;
    let (raw_ssid, raw_pass) = rest.split_once(PASS_MARKER).ok_or_else(|| {
        warn!("Invalid data format. Expected format: SSID=<SSID>&PASS=<Password>");
        FormError::MissingPassMarker
    })?;
    let raw_pass = raw_pass.split('&').next().unwrap_or_default();

    let ssid = decode_field("SSID", raw_ssid, html_entities)?;
    let password = decode_field("PASS", raw_pass, html_entities)?;
    debug!("Received SSID: {}", ssid);

    Ok(WifiCredentials::new(&ssid, &password)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_form() {
        let creds = parse_config_form(b"SSID=MyNet&PASS=Secret123", true).unwrap();
        assert_eq!(creds.ssid(), "MyNet");
        assert_eq!(creds.password(), "Secret123");
    }

    #[test]
    fn decodes_url_and_entities() {
        let creds =
            parse_config_form(b"SSID=Caf%C3%A9+Net&PASS=p%26%23x41%3Bss", true).unwrap();
        assert_eq!(creds.ssid(), "Café Net");
        assert_eq!(creds.password(), "pAss");

        let raw = parse_config_form(b"SSID=Net&PASS=p%26%23x41%3Bss", false).unwrap();
        assert_eq!(raw.password(), "p&#x41;ss");
    }

    #[test]
    fn browser_entity_for_non_latin_ssid() {
        let creds = parse_config_form(b"SSID=%26%2326085%3B%26%2326412%3B&PASS=x", true).unwrap();
        assert_eq!(creds.ssid(), "日本");
    }

    #[test]
    fn trailing_fields_and_newlines_are_ignored() {
        let creds = parse_config_form(b"SSID=a&PASS=b&submit=Submit\r\n", true).unwrap();
        assert_eq!(creds.password(), "b");
    }

    #[test]
    fn missing_marker_is_rejected() {
        assert_eq!(
            parse_config_form(b"SSID=MyNet&PASSWORD=x", true),
            Err(FormError::MissingPassMarker)
        );
        assert_eq!(
            parse_config_form(b"ssid=MyNet&PASS=x", true),
            Err(FormError::MissingSsid)
        );
        assert_eq!(parse_config_form(b"", true), Err(FormError::EmptyBody));
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert_eq!(
            parse_config_form(b"SSID=&PASS=x", true),
            Err(FormError::EmptyField("SSID"))
        );
        assert_eq!(
            parse_config_form(b"SSID=net&PASS=", true),
            Err(FormError::EmptyField("PASS"))
        );
    }

    #[test]
    fn oversize_body_is_rejected() {
        let body = vec![b'a'; MAX_FORM_BODY + 1];
        assert_eq!(
            parse_config_form(&body, true),
            Err(FormError::BodyTooLarge {
                len: MAX_FORM_BODY + 1,
                max: MAX_FORM_BODY
            })
        );
    }

    #[test]
    fn overlong_ssid_after_decoding_is_rejected() {
        let body = format!("SSID={}&PASS=x", "s".repeat(33));
        assert_eq!(
            parse_config_form(body.as_bytes(), true),
            Err(FormError::Credentials(CredentialsError::SsidTooLong(33)))
        );
    }
}
