//! フォーム値のデコード（URLエンコードとHTML数値文字参照）

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("decoded value is not valid UTF-8")]
    InvalidUtf8,
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// `application/x-www-form-urlencoded`の値をデコードします
///
/// `+`は空白、`%XX`はバイトに変換します。不正なエスケープはそのまま残します。
pub fn url_decode(input: &str) -> Result<String, DecodeError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let escaped = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| Some((hex_value(hex[0])?, hex_value(hex[1])?)));
                match escaped {
                    Some((hi, lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| DecodeError::InvalidUtf8)
}

/// `url_decode`の逆変換（非予約文字以外を`%XX`に、空白を`+`にする）
pub fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => {
                const HEX: &[u8; 16] = b"0123456789ABCDEF";
                out.push('%');
                out.push(HEX[(b >> 4) as usize] as char);
                out.push(HEX[(b & 0x0F) as usize] as char);
            }
        }
    }
    out
}

/// `&#NNN;`または`&#xHH;`形式の数値文字参照を1つ解析します
///
/// 成功時は（文字, 消費したバイト数）を返します。
fn parse_numeric_reference(input: &str) -> Option<(char, usize)> {
    let rest = input.strip_prefix("&#")?;
    let (digits, radix, prefix_len) = match rest.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, 16, 3),
        None => (rest, 10, 2),
    };
    let end = digits.find(';')?;
    let number = &digits[..end];
    if number.is_empty() || number.len() > 8 {
        return None;
    }
    if !number.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let code_point = u32::from_str_radix(number, radix).ok()?;
    // サロゲートと0x10FFFF超はNone
    let ch = char::from_u32(code_point)?;
    Some((ch, prefix_len + end + 1))
}

/// HTML数値文字参照をUTF-8にデコードします
///
/// 解釈できない参照はそのまま残します。
pub fn decode_html_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find("&#") {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        match parse_numeric_reference(candidate) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &candidate[consumed..];
            }
            None => {
                out.push_str("&#");
                rest = &candidate[2..];
            }
        }
    }
    out.push_str(rest);
    out
}
