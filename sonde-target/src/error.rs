//! トランスポートエラー

use thiserror::Error;

/// デバッガプロセスのエラー種別
///
/// メッセージはそのままユーザーに表示されます。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// プロセスの起動に失敗した
    #[error(
        "The debugger process failed to start. Either the invoked program '{program}' \
         is missing, or you may have insufficient permissions to invoke the program: {reason}"
    )]
    FailedToStart { program: String, reason: String },

    /// 起動後にプロセスがクラッシュした
    #[error("The debugger process crashed some time after starting successfully.")]
    Crashed,

    /// 応答待ちがタイムアウトした
    #[error("The debugger process did not respond within {0} ms.")]
    Timedout(u64),

    /// 書き込みエラー
    #[error(
        "An error occurred when attempting to write to the debugger process. For example, \
         the process may not be running, or it may have closed its input channel: {0}"
    )]
    WriteError(String),

    /// 読み取りエラー
    #[error(
        "An error occurred when attempting to read from the debugger process. For example, \
         the process may not be running: {0}"
    )]
    ReadError(String),

    /// その他
    #[error("An unknown error in the debugger process occurred: {0}")]
    Unknown(String),
}

impl TransportError {
    /// 起動後のクラッシュかどうか（終了通知が後に続く）
    pub fn is_crash(&self) -> bool {
        matches!(self, TransportError::Crashed)
    }
}
