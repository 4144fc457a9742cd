//! エンジンとデバッグ対象プロセスのライフサイクル

use crate::ProtocolError;
use std::fmt;
use tracing::{debug, error};

/// ライフサイクルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    DebuggerNotReady,

    EngineSetupRequested,
    EngineSetupOk,
    EngineSetupFailed,

    InferiorSetupRequested,
    InferiorSetupOk,
    InferiorSetupFailed,

    EngineRunRequested,
    EngineRunFailed,

    InferiorRunRequested,
    InferiorRunOk,

    InferiorStopRequested,
    InferiorStopOk,

    InferiorShutdownRequested,
    InferiorShutdownOk,

    EngineShutdownRequested,
    /// 正常終了
    EngineShutdownOk,
    /// ツールプロセスの予期しない終了
    EngineSpontaneousShutdown,
}

impl EngineState {
    /// 終端状態かどうか
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::EngineShutdownOk | EngineState::EngineSpontaneousShutdown
        )
    }

    /// `self` から `to` への遷移が許可されているか
    pub fn can_transition_to(self, to: EngineState) -> bool {
        use EngineState::*;

        if self.is_terminal() {
            return false;
        }
        if to == EngineSpontaneousShutdown {
            return true;
        }

        matches!(
            (self, to),
            (DebuggerNotReady, EngineSetupRequested)
                | (EngineSetupRequested, EngineSetupOk)
                | (EngineSetupRequested, EngineSetupFailed)
                | (EngineSetupOk, InferiorSetupRequested)
                | (InferiorSetupRequested, InferiorSetupOk)
                | (InferiorSetupRequested, InferiorSetupFailed)
                | (InferiorSetupOk, EngineRunRequested)
                | (InferiorSetupOk, EngineShutdownRequested)
                | (EngineRunRequested, InferiorRunOk)
                | (EngineRunRequested, InferiorStopOk)
                | (EngineRunRequested, EngineRunFailed)
                | (InferiorStopOk, InferiorRunRequested)
                | (InferiorRunRequested, InferiorRunOk)
                | (InferiorRunOk, InferiorStopRequested)
                | (InferiorRunOk, InferiorStopOk)
                | (InferiorStopRequested, InferiorStopOk)
                | (InferiorStopOk, InferiorShutdownRequested)
                | (InferiorRunOk, InferiorShutdownRequested)
                | (InferiorShutdownRequested, InferiorShutdownOk)
                | (InferiorShutdownOk, EngineShutdownRequested)
                | (EngineSetupFailed, EngineShutdownRequested)
                | (InferiorSetupFailed, EngineShutdownRequested)
                | (EngineRunFailed, EngineShutdownRequested)
                | (EngineShutdownRequested, EngineShutdownOk)
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 状態遷移を検証しながら現在の状態を保持する
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: EngineState,
}

impl StateMachine {
    /// `DebuggerNotReady` から開始する
    pub fn new() -> Self {
        Self {
            state: EngineState::DebuggerNotReady,
        }
    }

    /// 現在の状態
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// 現在の状態がいずれかに一致するか
    pub fn is_in(&self, states: &[EngineState]) -> bool {
        states.contains(&self.state)
    }

    /// 状態を遷移させる
    ///
    /// 遷移表にない遷移は状態を変えずにエラーを返します。
    pub fn transition(&mut self, to: EngineState) -> Result<(), ProtocolError> {
        if !self.state.can_transition_to(to) {
            error!("Invalid state transition {} -> {}", self.state, to);
            return Err(ProtocolError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!("State {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// 操作の前提状態を確認する
    pub fn require(
        &self,
        operation: &'static str,
        allowed: &[EngineState],
    ) -> Result<(), ProtocolError> {
        if self.is_in(allowed) {
            Ok(())
        } else {
            Err(ProtocolError::WrongState {
                operation,
                state: self.state,
            })
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
