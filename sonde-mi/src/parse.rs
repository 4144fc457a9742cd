//! 応答の断片を数値として読むための小さなヘルパー

use crate::Result;

/// `address = ...` の値を読む
///
/// `0x` で始まれば16進数、それ以外は10進数として扱います。
///
/// # Examples
/// ```
/// use sonde_mi::parse::parse_address;
///
/// assert_eq!(parse_address("0x08061664").unwrap(), 0x08061664);
/// assert_eq!(parse_address("4096").unwrap(), 4096);
/// ```
pub fn parse_address(text: &str) -> Result<u64> {
    let text = text.trim();
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"));
    let parsed = match digits {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", text, e))
}

/// 先頭の10進数字列を取り出す
///
/// `"42, address = 0x1"` のように数字の後ろに別の情報が続く場合に使います。
/// 数字で始まらない場合は None を返します。
pub fn leading_number(text: &str) -> Option<u32> {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x1").unwrap(), 1);
        assert_eq!(parse_address(" 0XFF ").unwrap(), 255);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xnope").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("42, address = 0x1"), Some(42));
        assert_eq!(leading_number(" 7"), Some(7));
        assert_eq!(leading_number("x7"), None);
        assert_eq!(leading_number(""), None);
    }
}
