//! ブレークポイント設定応答の解析

use crate::parse::{leading_number, parse_address};
use crate::ParseError;

/// 応答のプレフィックス
const REPLY_PREFIX: &str = "Breakpoint ";

/// ツールが確定させたブレークポイント情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointResponse {
    /// ツール側のブレークポイント番号
    pub id: u32,
    /// 解決されたファイル名（保留中の場合は None）
    pub file: Option<String>,
    /// 解決された行番号（保留中の場合は None）
    pub line: Option<u32>,
    /// 解決されたアドレス
    pub address: Option<u64>,
}

impl BreakpointResponse {
    /// 位置が解決されていない（保留中の）ブレークポイントかどうか
    pub fn is_pending(&self) -> bool {
        self.file.is_none()
    }
}

/// ブレークポイント設定の応答を解析する
///
/// 応答は `Breakpoint <id>: where = <module>`<symbol> at <file>:<line>, address = <addr>`
/// の形式です。最初の ':' までを番号、最後の ':' 以降を行番号、その間の
/// `at` 句をファイル名として取り出します。`<file>:<line>:<column>` の形式にも対応します。
pub fn parse_break_insert(reply: &str) -> Result<BreakpointResponse, ParseError> {
    let reply = reply.trim();
    if !reply.starts_with(REPLY_PREFIX) {
        return Err(ParseError::UnexpectedPrefix {
            expected: REPLY_PREFIX,
            reply: reply.to_string(),
        });
    }

    // 位置情報は1行目にしか現れない
    let first_line = reply.lines().next().unwrap_or(reply);

    let pos1 = first_line.find(':').ok_or_else(|| ParseError::Syntax {
        offset: first_line.len(),
        reason: "missing ':' after breakpoint number",
    })?;
    let number = first_line[REPLY_PREFIX.len()..pos1].trim();
    let id = number
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidNumber(number.to_string()))?;

    let address = first_line.find("address = ").and_then(|pos| {
        let rest = &first_line[pos + "address = ".len()..];
        let end = rest
            .find(|c: char| c == ',' || c.is_whitespace())
            .unwrap_or(rest.len());
        parse_address(&rest[..end]).ok()
    });

    let mut response = BreakpointResponse {
        id,
        file: None,
        line: None,
        address,
    };

    let pos2 = match first_line.rfind(':') {
        Some(pos2) if pos2 > pos1 => pos2,
        _ => return Ok(response),
    };

    // `module::function` のように行番号でないコロンは位置情報として扱わない
    let mut line = match leading_number(&first_line[pos2 + 1..]) {
        Some(line) => line,
        None => return Ok(response),
    };

    let span = &first_line[pos1 + 1..pos2];
    let mut file = match span.rfind(" at ") {
        Some(at) => &span[at + " at ".len()..],
        None => span,
    }
    .trim();

    // `file:line:column` の場合、最後の数字は列番号
    if let Some((head, tail)) = file.rsplit_once(':') {
        if let Ok(n) = tail.parse::<u32>() {
            if !head.is_empty() {
                file = head;
                line = n;
            }
        }
    }

    if !file.is_empty() {
        response.file = Some(file.to_string());
        response.line = Some(line);
    }

    Ok(response)
}
