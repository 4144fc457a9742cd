//! Sonde デバッガエンジンのコア機能
//!
//! このクレートは、外部デバッガツールを駆動するエンジンを提供します。
//! コマンドと応答の対応付け、ライフサイクルの状態機械、ブレークポイントの同期、
//! スタックと変数ツリーの更新を行い、結果をイベントとして通知します。

pub mod backend;
pub mod breakpoint;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod lldb;
pub mod queue;
pub mod session;
pub mod stack;
pub mod state;
pub mod tooltip;
pub mod watch;

pub use backend::{Backend, Capabilities, ExecAction, InferiorEvent};
pub use breakpoint::{
    BreakHandler, Breakpoint, BreakpointLocation, BreakpointModelId, BreakpointParameters,
    BreakpointState,
};
pub use command::Command;
pub use config::{BackendKind, EngineConfig};
pub use engine::{Continuation, Engine, EngineEvent};
pub use error::{EngineError, ProtocolError};
pub use lldb::{create_backend, LldbBackend};
pub use queue::{CommandQueue, Cookie, Response};
pub use session::Session;
pub use state::{EngineState, StateMachine};
pub use tooltip::ToolTipOutcome;
pub use watch::{FetchOptions, FetchRequest, WatchHandler};

// 他のクレートから使用するために再エクスポート
pub use sonde_mi::{StackFrame, WatchItem};
pub use sonde_target::{CommandSink, TransportError};

/// エンジンの結果型
pub type Result<T> = anyhow::Result<T>;
