//! デバッガバックエンドの抽象化
//!
//! コマンドの組み立てと応答の解釈はバックエンドごとに異なりますが、
//! キュー・フレーマー・状態機械は共通です。

use crate::breakpoint::BreakpointParameters;
use crate::watch::FetchRequest;
use sonde_mi::{Backtrace, BreakpointResponse, ParseError, WatchItem};
use std::collections::BTreeSet;
use std::path::Path;

/// 実行制御の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecAction {
    /// 関数の中へ
    StepIn,
    /// 次の行へ
    StepOver,
    /// 関数から抜ける
    StepOut,
    /// 1命令
    StepInstruction,
    /// 1命令（呼び出しはまたぐ）
    NextInstruction,
    Continue,
}

impl ExecAction {
    /// ステップ実行かどうか
    pub fn is_stepping(self) -> bool {
        !matches!(self, ExecAction::Continue)
    }
}

/// バックエンドの対応機能
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// ブレークポイントの条件式
    pub break_conditions: bool,
}

/// デバッグ対象の状態変化
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferiorEvent {
    /// 停止した
    Stopped {
        thread: Option<u64>,
        reason: Option<String>,
    },
    /// 終了した
    Exited(i32),
}

/// デバッガバックエンド
pub trait Backend {
    fn name(&self) -> &'static str;

    /// 応答の区切りとなるプロンプト
    fn prompt_marker(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// デバッグ対象を読み込むコマンド
    fn setup_inferior_command(&self, executable: &Path) -> String;

    /// デバッグ対象を引数付きで起動するコマンド
    fn run_command(&self, args: &[String]) -> String;

    fn execution_command(&self, action: ExecAction) -> String;

    fn interrupt_command(&self) -> String;

    fn kill_inferior_command(&self) -> String;

    fn select_frame_command(&self, index: usize) -> String;

    fn select_thread_command(&self, thread: u64) -> String;

    fn insert_breakpoint_command(&self, params: &BreakpointParameters) -> String;

    /// ツール側の番号でブレークポイントを削除するコマンド
    fn remove_breakpoint_command(&self, response_id: u32) -> String;

    fn backtrace_command(&self) -> String;

    fn locals_command(&self, request: &FetchRequest) -> String;

    fn quit_command(&self) -> String;

    fn parse_break_insert(&self, reply: &str) -> Result<BreakpointResponse, ParseError>;

    fn parse_backtrace(&self, block: &str) -> Backtrace;

    fn parse_locals(&self, block: &str, expanded: &BTreeSet<String>) -> Vec<WatchItem>;

    /// 応答がエラーならそのメッセージを返す
    fn error_message(&self, block: &str) -> Option<String>;

    /// 応答に含まれる停止・終了の通知を取り出す
    fn inferior_event(&self, block: &str) -> Option<InferiorEvent>;
}
