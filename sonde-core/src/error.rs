//! エンジンのエラー定義

use crate::EngineState;
use sonde_target::TransportError;
use thiserror::Error;

/// プロトコル違反
///
/// いずれも統合上の誤りであり、ログに記録したうえで該当の更新を破棄します。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// 待機中のコマンドがないのに応答が届いた
    #[error("received a response while no command is pending: {0}")]
    EmptyQueue(String),

    /// 応答が期待した形式ではない
    #[error("unexpected reply to '{command}': {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// 状態遷移表にない遷移
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: EngineState, to: EngineState },

    /// 操作が現在の状態では許可されていない
    #[error("'{operation}' is not allowed in state {state}")]
    WrongState {
        operation: &'static str,
        state: EngineState,
    },

    /// 対象のブレークポイントが存在しない
    #[error("unknown breakpoint {0}")]
    UnknownBreakpoint(usize),
}

/// エンジン操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
