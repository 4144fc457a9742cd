//! 解析エラー

use thiserror::Error;

/// 応答テキストの解析エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// 期待したプレフィックスで始まっていない
    #[error("expected reply starting with '{expected}', got: {reply}")]
    UnexpectedPrefix { expected: &'static str, reply: String },

    /// 数値として解釈できない
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// レコードの構文エラー
    #[error("malformed record at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: &'static str },
}
