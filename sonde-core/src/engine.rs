//! デバッグエンジン
//!
//! デバッガツールへのコマンド送信、応答ブロックと継続の対応付け、
//! ライフサイクルの状態遷移、ブレークポイント・スタック・変数モデルの更新を
//! まとめて行います。
//!
//! エンジンは単一スレッドで動作し、全ての入力（トランスポートのイベントと
//! 利用者の操作）は `&mut self` を通して順に処理されます。継続はコマンドを
//! 書き込むだけで応答を待たないため、応答処理が再入することはありません。

use crate::backend::{Backend, ExecAction, InferiorEvent};
use crate::breakpoint::{
    BreakHandler, Breakpoint, BreakpointModelId, BreakpointParameters, BreakpointState,
};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::lldb::create_backend;
use crate::queue::{CommandQueue, Cookie, Response};
use crate::stack::StackHandler;
use crate::state::{EngineState, StateMachine};
use crate::tooltip::{ToolTipOutcome, ToolTipState};
use crate::watch::{WatchHandler, TOOLTIP_PREFIX};
use crate::{EngineError, ProtocolError, Result};
use sonde_mi::{StackFrame, WatchItem};
use sonde_target::{CommandSink, ResponseFramer, TransportError, TransportEvent};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// ブレークポイントを同期できる状態
const SYNC_STATES: [EngineState; 3] = [
    EngineState::InferiorSetupOk,
    EngineState::EngineRunRequested,
    EngineState::InferiorStopOk,
];

/// 応答を処理する継続
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// 起動直後のプロンプト
    FirstPrompt,
    InferiorSetup,
    RunEngine,
    Execution(ExecAction),
    Interrupt,
    /// フレーム・スレッド選択の後に全体を更新する
    UpdateAll,
    Backtrace,
    ListLocals,
    BreakInsert,
    DebuggerCommand,
}

/// エンジンから利用者への通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    /// 状態表示
    Status(String),
    /// デバッガツールの出力
    Console(String),
    /// 利用者に確認を求める警告
    Warning { title: String, text: String },
    /// 現在位置へ移動する
    GotoLocation { file: String, line: u32 },
    /// 現在位置の表示を消す
    ResetLocation,
    FramesUpdated {
        frames: Vec<StackFrame>,
        current: Option<usize>,
    },
    LocalsUpdated(Vec<WatchItem>),
    BreakpointsUpdated(Vec<Breakpoint>),
    /// 式の評価結果
    ToolTip { expression: String, text: String },
    /// デバッグ対象が終了した
    InferiorExited(i32),
}

/// デバッグエンジン
pub struct Engine {
    config: EngineConfig,
    backend: Box<dyn Backend>,
    state: StateMachine,
    queue: CommandQueue<Continuation>,
    framer: ResponseFramer,
    /// 継続の実行を待つ応答ブロック
    ready: VecDeque<String>,
    /// デバッガツールへの書き込み口（起動前と終了後は None）
    sink: Option<Box<dyn CommandSink>>,
    breakpoints: BreakHandler,
    stack: StackHandler,
    watch: WatchHandler,
    tooltip: ToolTipState,
    /// 最後に通知した現在位置
    location: Option<(String, u32)>,
    events: Vec<EngineEvent>,
}

impl Engine {
    /// 設定に従ってバックエンドを選び、エンジンを作成する
    pub fn new(config: EngineConfig) -> Result<Self> {
        let backend = create_backend(&config)?;
        Ok(Self::with_backend(config, backend))
    }

    /// バックエンドを指定してエンジンを作成する
    pub fn with_backend(config: EngineConfig, backend: Box<dyn Backend>) -> Self {
        let framer = ResponseFramer::new(backend.prompt_marker());
        Self {
            config,
            backend,
            state: StateMachine::new(),
            queue: CommandQueue::new(),
            framer,
            ready: VecDeque::new(),
            sink: None,
            breakpoints: BreakHandler::new(),
            stack: StackHandler::new(),
            watch: WatchHandler::new(),
            tooltip: ToolTipState::new(),
            location: None,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn breakpoints(&self) -> &BreakHandler {
        &self.breakpoints
    }

    pub fn stack(&self) -> &StackHandler {
        &self.stack
    }

    pub fn watch(&self) -> &WatchHandler {
        &self.watch
    }

    /// 応答待ちのコマンドがあるかどうか
    pub fn has_pending_commands(&self) -> bool {
        !self.queue.is_empty()
    }

    /// 溜まった通知を取り出す
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    /// 現在位置が変わったときだけ通知する
    fn goto_location(&mut self, file: String, line: u32) {
        if self.location.as_ref() == Some(&(file.clone(), line)) {
            return;
        }
        self.location = Some((file.clone(), line));
        self.emit(EngineEvent::GotoLocation { file, line });
    }

    fn reset_location(&mut self) {
        self.location = None;
        self.emit(EngineEvent::ResetLocation);
    }

    fn warning(&mut self, title: &str, text: impl Into<String>) {
        self.emit(EngineEvent::Warning {
            title: title.to_string(),
            text: text.into(),
        });
    }

    /// 状態を遷移させる（遷移表にない遷移はログに残して無視する）
    fn set_state(&mut self, to: EngineState) -> bool {
        match self.state.transition(to) {
            Ok(()) => {
                self.emit(EngineEvent::StateChanged(to));
                true
            }
            Err(_) => false,
        }
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[EngineState],
    ) -> std::result::Result<(), EngineError> {
        self.state.require(operation, allowed).map_err(|e| {
            warn!("{}", e);
            e.into()
        })
    }

    /// コマンドをキューに積んで書き込む
    fn post(&mut self, text: String, continuation: Option<Continuation>, cookie: Cookie) {
        match self.sink.as_deref_mut() {
            Some(sink) => self.queue.enqueue(sink, text, continuation, cookie),
            None => error!("Debugger process not running, command ignored: {}", text),
        }
    }

    // ---- ライフサイクル ----

    /// デバッガツールを起動する
    ///
    /// `spawn` が失敗した場合は `EngineSetupFailed` に遷移してエラーを返し、
    /// それ以上の操作は行いません。成功すると対象の読み込みと起動が自動的に続きます。
    pub fn setup_engine<F>(&mut self, spawn: F) -> std::result::Result<(), EngineError>
    where
        F: FnOnce(&EngineConfig) -> std::result::Result<Box<dyn CommandSink>, TransportError>,
    {
        self.require("setup engine", &[EngineState::DebuggerNotReady])?;
        self.set_state(EngineState::EngineSetupRequested);
        info!(
            "Starting {} backend: {}",
            self.backend.name(),
            self.config.debugger_command.display()
        );

        // 起動直後のプロンプトを受け取る
        self.queue.expect(Continuation::FirstPrompt);

        match spawn(&self.config) {
            Ok(sink) => {
                self.sink = Some(sink);
                self.set_state(EngineState::EngineSetupOk);
                self.setup_inferior();
                Ok(())
            }
            Err(e) => {
                error!("Adapter start failed: {}", e);
                self.queue.clear();
                self.set_state(EngineState::EngineSetupFailed);
                self.warning("Adapter start failed", e.to_string());
                Err(e.into())
            }
        }
    }

    fn setup_inferior(&mut self) {
        if !self.set_state(EngineState::InferiorSetupRequested) {
            return;
        }
        let executable = match &self.config.executable {
            Some(path) => absolute_path(path),
            None => {
                self.warning("Inferior setup failed", "No executable specified");
                self.notify_inferior_setup_failed();
                return;
            }
        };
        let command = self.backend.setup_inferior_command(&executable);
        self.post(command, Some(Continuation::InferiorSetup), Cookie::None);
    }

    fn handle_inferior_setup(&mut self, response: Response) {
        if let Some(message) = self.backend.error_message(&response.data) {
            warn!("Inferior setup failed: {}", message);
            self.warning("Inferior setup failed", message);
            self.notify_inferior_setup_failed();
            return;
        }
        if self.set_state(EngineState::InferiorSetupOk) {
            self.run_engine();
        }
    }

    fn notify_inferior_setup_failed(&mut self) {
        self.set_state(EngineState::InferiorSetupFailed);
        self.request_engine_shutdown();
    }

    fn run_engine(&mut self) {
        if !self.set_state(EngineState::EngineRunRequested) {
            return;
        }
        self.attempt_breakpoint_synchronization();
        self.emit(EngineEvent::Status("Running requested...".to_string()));
        let command = self.backend.run_command(&self.config.inferior_args);
        self.post(command, Some(Continuation::RunEngine), Cookie::None);
    }

    fn handle_run_engine(&mut self, response: Response) {
        if let Some(message) = self.backend.error_message(&response.data) {
            warn!("Running failed: {}", message);
            self.set_state(EngineState::EngineRunFailed);
            self.warning("Running failed", message);
            self.request_engine_shutdown();
            return;
        }
        self.set_state(EngineState::InferiorRunOk);
        self.apply_inferior_event(&response.data);
    }

    /// デバッグ対象とデバッガツールを終了する
    pub fn shutdown(&mut self) -> std::result::Result<(), EngineError> {
        use EngineState::*;
        self.require(
            "shutdown",
            &[
                InferiorRunOk,
                InferiorStopOk,
                InferiorSetupOk,
                InferiorShutdownOk,
                EngineSetupFailed,
                InferiorSetupFailed,
                EngineRunFailed,
            ],
        )?;
        if self.state.is_in(&[InferiorRunOk, InferiorStopOk]) {
            self.shutdown_inferior();
        }
        self.request_engine_shutdown();
        Ok(())
    }

    /// 状態に関係なくデバッガツールを強制終了する
    pub fn abort(&mut self) {
        warn!("Aborting session in state {}", self.state.state());
        match self.sink.as_mut() {
            Some(sink) => sink.kill(),
            None => {
                if !self.state.state().is_terminal() {
                    self.set_state(EngineState::EngineSpontaneousShutdown);
                }
            }
        }
    }

    fn shutdown_inferior(&mut self) {
        self.set_state(EngineState::InferiorShutdownRequested);
        let command = self.backend.kill_inferior_command();
        self.post(command, None, Cookie::None);
        self.set_state(EngineState::InferiorShutdownOk);
    }

    fn request_engine_shutdown(&mut self) {
        if !self.set_state(EngineState::EngineShutdownRequested) {
            return;
        }
        let quit = self.backend.quit_command();
        match self.sink.as_mut() {
            Some(sink) => {
                debug!("input: {}", quit);
                sink.write(format!("{}\n", quit).as_bytes());
                sink.kill();
            }
            None => {
                self.set_state(EngineState::EngineShutdownOk);
            }
        }
    }

    // ---- 実行制御 ----

    pub fn step(&mut self) -> std::result::Result<(), EngineError> {
        self.execute(ExecAction::StepIn, "step")
    }

    pub fn step_over(&mut self) -> std::result::Result<(), EngineError> {
        self.execute(ExecAction::StepOver, "step over")
    }

    pub fn step_out(&mut self) -> std::result::Result<(), EngineError> {
        self.execute(ExecAction::StepOut, "step out")
    }

    pub fn step_instruction(&mut self) -> std::result::Result<(), EngineError> {
        self.execute(ExecAction::StepInstruction, "step instruction")
    }

    pub fn next_instruction(&mut self) -> std::result::Result<(), EngineError> {
        self.execute(ExecAction::NextInstruction, "next instruction")
    }

    pub fn continue_inferior(&mut self) -> std::result::Result<(), EngineError> {
        self.execute(ExecAction::Continue, "continue")
    }

    fn execute(
        &mut self,
        action: ExecAction,
        operation: &'static str,
    ) -> std::result::Result<(), EngineError> {
        self.require(operation, &[EngineState::InferiorStopOk])?;
        self.reset_location();
        let status = if action.is_stepping() {
            "Step requested..."
        } else {
            "Continue requested..."
        };
        self.emit(EngineEvent::Status(status.to_string()));
        // 再開するとスタックと評価結果は古くなる
        self.stack.reset();
        self.tooltip.clear();
        self.set_state(EngineState::InferiorRunRequested);
        let command = self.backend.execution_command(action);
        self.post(command, Some(Continuation::Execution(action)), Cookie::None);
        Ok(())
    }

    fn handle_execution(&mut self, action: ExecAction, response: Response) {
        self.set_state(EngineState::InferiorRunOk);
        if let Some(message) = self.backend.error_message(&response.data) {
            warn!("{:?} failed: {}", action, message);
            self.warning("Execution failed", message);
            // 実行されていないので停止状態に戻す
            self.notify_inferior_stopped(None, None);
            return;
        }
        self.apply_inferior_event(&response.data);
    }

    /// 実行中のデバッグ対象を停止する
    pub fn interrupt_inferior(&mut self) -> std::result::Result<(), EngineError> {
        self.require("interrupt", &[EngineState::InferiorRunOk])?;
        self.set_state(EngineState::InferiorStopRequested);
        self.emit(EngineEvent::Status("Interrupt requested...".to_string()));
        let command = self.backend.interrupt_command();
        self.post(command, Some(Continuation::Interrupt), Cookie::None);
        Ok(())
    }

    fn handle_interrupt(&mut self, response: Response) {
        if let Some(message) = self.backend.error_message(&response.data) {
            warn!("Interrupt failed: {}", message);
            self.warning("Interrupt failed", message);
            return;
        }
        // 停止通知が応答に含まれない場合は後から単独で届く
        self.apply_inferior_event(&response.data);
    }

    /// 応答に含まれる停止・終了の通知を反映する
    fn apply_inferior_event(&mut self, block: &str) -> bool {
        match self.backend.inferior_event(block) {
            Some(InferiorEvent::Stopped { thread, reason }) => {
                self.notify_inferior_stopped(thread, reason);
                true
            }
            Some(InferiorEvent::Exited(code)) => {
                self.notify_inferior_exited(code);
                true
            }
            None => false,
        }
    }

    fn notify_inferior_stopped(&mut self, thread: Option<u64>, reason: Option<String>) {
        if !self.state.is_in(&[EngineState::InferiorRunOk, EngineState::InferiorStopRequested]) {
            debug!("Ignoring stop notification in state {}", self.state.state());
            return;
        }
        self.set_state(EngineState::InferiorStopOk);

        let hit = reason.as_deref().and_then(|r| self.breakpoint_hit(r));
        let mut status = match (thread, reason) {
            (Some(thread), Some(reason)) => format!("Stopped: thread {}, {}", thread, reason),
            (None, Some(reason)) => format!("Stopped: {}", reason),
            (Some(thread), None) => format!("Stopped: thread {}", thread),
            (None, None) => "Stopped".to_string(),
        };
        if let Some(id) = hit {
            status.push_str(&format!(" (breakpoint #{})", id));
        }
        self.emit(EngineEvent::Status(status));

        self.attempt_breakpoint_synchronization();
        self.update_all();
    }

    /// 停止理由 `breakpoint N.M` からモデル側のブレークポイントを探す
    fn breakpoint_hit(&self, reason: &str) -> Option<BreakpointModelId> {
        let number = reason.strip_prefix("breakpoint ")?;
        let end = number
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(number.len());
        let response_id = number[..end].parse().ok()?;
        self.breakpoints.find_by_response_id(response_id)
    }

    fn notify_inferior_exited(&mut self, code: i32) {
        info!("Inferior exited with status {}", code);
        self.emit(EngineEvent::InferiorExited(code));

        if self.state.state() == EngineState::InferiorStopRequested {
            self.set_state(EngineState::InferiorStopOk);
        }
        if !self.state.is_in(&[EngineState::InferiorRunOk, EngineState::InferiorStopOk]) {
            warn!("Exit notification in state {}", self.state.state());
            return;
        }
        // プロセスは既に終了しているので kill は不要
        self.set_state(EngineState::InferiorShutdownRequested);
        self.set_state(EngineState::InferiorShutdownOk);
        self.request_engine_shutdown();
    }

    /// フレームを選択する
    pub fn activate_frame(&mut self, index: usize) -> std::result::Result<(), EngineError> {
        self.require("select frame", &[EngineState::InferiorStopOk])?;
        self.reset_location();
        let command = self.backend.select_frame_command(index);
        self.post(command, Some(Continuation::UpdateAll), Cookie::None);
        Ok(())
    }

    /// スレッドを選択する
    pub fn select_thread(&mut self, thread: u64) -> std::result::Result<(), EngineError> {
        self.require("select thread", &[EngineState::InferiorStopOk])?;
        self.reset_location();
        let command = self.backend.select_thread_command(thread);
        self.post(command, Some(Continuation::UpdateAll), Cookie::None);
        Ok(())
    }

    /// デバッガツールのコマンドをそのまま実行する
    pub fn execute_debugger_command(
        &mut self,
        command: &str,
    ) -> std::result::Result<(), EngineError> {
        self.require("debugger command", &[EngineState::InferiorStopOk])?;
        self.post(
            command.to_string(),
            Some(Continuation::DebuggerCommand),
            Cookie::Expression(command.to_string()),
        );
        Ok(())
    }

    fn handle_debugger_command(&mut self, response: Response) {
        if let Cookie::Expression(command) = &response.cookie {
            debug!("Reply to '{}': {} bytes", command, response.data.len());
        }
        if !response.data.is_empty() {
            self.emit(EngineEvent::Console(response.data));
        }
    }

    // ---- ブレークポイント ----

    /// ブレークポイントを追加する
    ///
    /// 同期できる状態であればすぐに挿入し、そうでなければ次の停止時に挿入します。
    pub fn add_breakpoint(&mut self, params: BreakpointParameters) -> BreakpointModelId {
        let id = self.breakpoints.add(params);
        if self.state.is_in(&SYNC_STATES) {
            if let Err(e) = self.insert_breakpoint(id) {
                warn!("Failed to insert breakpoint {}: {}", id, e);
            }
        }
        self.emit_breakpoints();
        id
    }

    /// ブレークポイントを削除する
    pub fn delete_breakpoint(
        &mut self,
        id: BreakpointModelId,
    ) -> std::result::Result<(), EngineError> {
        let inserted = self.breakpoints.request_removal(id)?;
        if inserted && self.state.is_in(&SYNC_STATES) {
            self.remove_breakpoint(id)?;
        }
        self.emit_breakpoints();
        Ok(())
    }

    /// 挿入待ちのブレークポイントをツールに設定する
    pub fn insert_breakpoint(
        &mut self,
        id: BreakpointModelId,
    ) -> std::result::Result<(), EngineError> {
        self.require("insert breakpoint", &SYNC_STATES)?;
        let bp = self
            .breakpoints
            .get(id)
            .ok_or(ProtocolError::UnknownBreakpoint(id))?;
        if bp.state != BreakpointState::InsertRequested {
            debug!("Breakpoint {} already synchronized ({:?})", id, bp.state);
            return Ok(());
        }

        let mut params = bp.params.clone();
        if !self.backend.capabilities().break_conditions {
            params.condition = None;
        }

        self.breakpoints.notify_insert_proceeding(id)?;
        let command = self.backend.insert_breakpoint_command(&params);
        self.post(command, Some(Continuation::BreakInsert), Cookie::Breakpoint(id));
        Ok(())
    }

    fn handle_break_insert(&mut self, response: Response) {
        let id = match &response.cookie {
            Cookie::Breakpoint(id) => *id,
            other => {
                error!("Breakpoint reply without breakpoint cookie: {:?}", other);
                return;
            }
        };
        let parsed = self.backend.parse_break_insert(&response.data);

        if self.breakpoints.get(id).is_none() {
            // 応答待ちの間に削除された
            if let Ok(reply) = parsed {
                info!("Breakpoint {} was deleted while inserting", id);
                let command = self.backend.remove_breakpoint_command(reply.id);
                self.post(command, None, Cookie::None);
            }
            return;
        }

        match parsed {
            Ok(reply) => {
                if reply.is_pending() {
                    info!("Breakpoint {} has no location yet", id);
                }
                let result = self
                    .breakpoints
                    .set_response(id, reply)
                    .and_then(|_| self.breakpoints.notify_insert_ok(id));
                if let Err(e) = result {
                    warn!("{}", e);
                }
            }
            Err(e) => {
                warn!("Failed to insert breakpoint {}: {}", id, e);
                let text = self
                    .backend
                    .error_message(&response.data)
                    .unwrap_or_else(|| e.to_string());
                self.warning("Breakpoint insertion failed", text);
                if let Err(e) = self.breakpoints.notify_insert_failed(id) {
                    warn!("{}", e);
                }
            }
        }
        self.emit_breakpoints();
    }

    /// ブレークポイントをツールから削除する
    ///
    /// 応答を待たずに削除済みとして扱います。
    pub fn remove_breakpoint(
        &mut self,
        id: BreakpointModelId,
    ) -> std::result::Result<(), EngineError> {
        self.require("remove breakpoint", &SYNC_STATES)?;
        let response_id = self
            .breakpoints
            .get(id)
            .and_then(|bp| bp.response.as_ref())
            .map(|response| response.id)
            .ok_or(ProtocolError::UnknownBreakpoint(id))?;

        self.breakpoints.notify_remove_proceeding(id)?;
        info!("Deleting breakpoint {} (debugger id {})", id, response_id);
        let command = self.backend.remove_breakpoint_command(response_id);
        self.post(command, None, Cookie::Breakpoint(id));
        self.breakpoints.notify_remove_ok(id)?;
        Ok(())
    }

    fn attempt_breakpoint_synchronization(&mut self) {
        for id in self.breakpoints.pending_removals() {
            if let Err(e) = self.remove_breakpoint(id) {
                warn!("Failed to remove breakpoint {}: {}", id, e);
            }
        }
        for id in self.breakpoints.pending_insertions() {
            if let Err(e) = self.insert_breakpoint(id) {
                warn!("Failed to insert breakpoint {}: {}", id, e);
            }
        }
    }

    // ---- スタックと変数 ----

    /// バックトレースから変数までを取り直す
    fn update_all(&mut self) {
        let command = self.backend.backtrace_command();
        self.post(command, Some(Continuation::Backtrace), Cookie::None);
    }

    fn handle_backtrace(&mut self, response: Response) {
        let backtrace = self.backend.parse_backtrace(&response.data);
        debug!("Parsed {} frames", backtrace.frames.len());
        self.stack.set_backtrace(backtrace);

        if let Some(frame) = self.stack.current_frame() {
            let (file, line) = (frame.file.clone(), frame.line);
            self.goto_location(file, line);
        }
        self.report_frames();
        self.update_locals();
    }

    fn update_locals(&mut self) {
        let request = self
            .watch
            .fetch_request(self.config.fetch_options(), &self.tooltip.pending());
        let command = self.backend.locals_command(&request);
        self.post(command, Some(Continuation::ListLocals), Cookie::None);
    }

    fn handle_list_locals(&mut self, response: Response) {
        let items = self.backend.parse_locals(&response.data, self.watch.expanded());
        debug!("Parsed {} watch items", items.len());

        // ツールチップの結果は変数ツリーに入れない
        let (tooltips, items): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| item.iname.split('.').next() == Some(TOOLTIP_PREFIX));
        for (expression, item) in self.tooltip.resolve(&tooltips) {
            let text = describe_item(&item);
            self.emit(EngineEvent::ToolTip { expression, text });
        }
        self.watch.insert_data(items);
        self.report_locals();
    }

    /// ウォッチ式を追加し、その iname を返す
    pub fn add_watcher(&mut self, expression: &str) -> String {
        let iname = self.watch.add_watcher(expression);
        if self.state.state() == EngineState::InferiorStopOk {
            self.update_locals();
        }
        iname
    }

    pub fn remove_watcher(&mut self, expression: &str) -> bool {
        let removed = self.watch.remove_watcher(expression);
        if removed {
            self.report_locals();
        }
        removed
    }

    /// 変数の展開状態を変更する
    pub fn set_expanded(&mut self, iname: &str, expanded: bool) {
        self.watch.set_expanded(iname, expanded);
        if expanded && self.state.state() == EngineState::InferiorStopOk {
            self.update_locals();
        }
    }

    /// 型ごとの表示形式を設定する（空文字列で解除）
    pub fn set_type_format(&mut self, type_name: &str, format: &str) {
        self.watch.set_type_format(type_name, format);
        if self.state.state() == EngineState::InferiorStopOk {
            self.update_locals();
        }
    }

    /// 項目ごとの表示形式を設定する（空文字列で解除）
    pub fn set_individual_format(&mut self, iname: &str, format: &str) {
        self.watch.set_individual_format(iname, format);
        if self.state.state() == EngineState::InferiorStopOk {
            self.update_locals();
        }
    }

    /// ツールチップ用に式を評価する
    ///
    /// 評価できない式は理由を [`EngineEvent::ToolTip`] で通知します。
    /// 評価を要求した場合、結果は変数の取得後に通知されます。
    pub fn set_tooltip_expression(
        &mut self,
        expression: &str,
    ) -> std::result::Result<ToolTipOutcome, EngineError> {
        self.require("tooltip", &[EngineState::InferiorStopOk])?;
        let outcome = self.tooltip.request(expression);
        match &outcome {
            ToolTipOutcome::Message(text) => {
                let text = text.clone();
                self.emit(EngineEvent::ToolTip {
                    expression: expression.to_string(),
                    text,
                });
            }
            ToolTipOutcome::Cached(item) => {
                let text = describe_item(item);
                self.emit(EngineEvent::ToolTip {
                    expression: expression.to_string(),
                    text,
                });
            }
            ToolTipOutcome::Requested { .. } => self.update_locals(),
            ToolTipOutcome::Ignored => {}
        }
        Ok(outcome)
    }

    /// 現在のスタックを通知する
    pub fn report_frames(&mut self) {
        let frames = self.stack.frames().to_vec();
        let current = self.stack.current_index();
        self.emit(EngineEvent::FramesUpdated { frames, current });
    }

    /// 現在の変数ツリーを通知する
    pub fn report_locals(&mut self) {
        let items = self.watch.items().cloned().collect();
        self.emit(EngineEvent::LocalsUpdated(items));
    }

    /// ブレークポイント一覧を通知する
    pub fn report_breakpoints(&mut self) {
        self.emit_breakpoints();
    }

    fn emit_breakpoints(&mut self) {
        let breakpoints = self.breakpoints.all().cloned().collect();
        self.emit(EngineEvent::BreakpointsUpdated(breakpoints));
    }

    // ---- 利用者のコマンド ----

    /// REPL のコマンドを実行する
    pub fn handle_command(&mut self, command: Command) -> std::result::Result<(), EngineError> {
        match command {
            Command::Break(params) => {
                self.add_breakpoint(params);
                Ok(())
            }
            Command::Delete(id) => self.delete_breakpoint(id),
            Command::Continue => self.continue_inferior(),
            Command::Step => self.step(),
            Command::Next => self.step_over(),
            Command::Finish => self.step_out(),
            Command::StepInstruction => self.step_instruction(),
            Command::NextInstruction => self.next_instruction(),
            Command::Interrupt => self.interrupt_inferior(),
            Command::Frame(index) => self.activate_frame(index),
            Command::Thread(thread) => self.select_thread(thread),
            Command::Backtrace => {
                self.report_frames();
                Ok(())
            }
            Command::Locals => {
                self.report_locals();
                Ok(())
            }
            Command::Watch(expression) => {
                self.add_watcher(&expression);
                Ok(())
            }
            Command::Unwatch(expression) => {
                self.remove_watcher(&expression);
                Ok(())
            }
            Command::Expand(iname) => {
                self.set_expanded(&iname, true);
                Ok(())
            }
            Command::Collapse(iname) => {
                self.set_expanded(&iname, false);
                Ok(())
            }
            Command::TypeFormat { type_name, format } => {
                self.set_type_format(&type_name, &format);
                Ok(())
            }
            Command::Format { iname, format } => {
                self.set_individual_format(&iname, &format);
                Ok(())
            }
            Command::Print(expression) => self.set_tooltip_expression(&expression).map(|_| ()),
            Command::Raw(command) => self.execute_debugger_command(&command),
            Command::InfoBreakpoints => {
                self.report_breakpoints();
                Ok(())
            }
            Command::Help => Ok(()),
            Command::Quit => self.shutdown(),
        }
    }

    // ---- トランスポート ----

    /// トランスポートのイベントを処理する
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::OutputReady(data) => self.handle_output(&data),
            TransportEvent::StandardError(data) => self.handle_stderr(&data),
            TransportEvent::Error(e) => self.handle_transport_error(e),
            TransportEvent::Terminated(code) => self.handle_terminated(code),
        }
    }

    /// 標準出力のデータを処理する
    ///
    /// 区切られたブロックは一度 `ready` に積み、フレーミングが終わってから
    /// 順に継続へ渡します。
    pub fn handle_output(&mut self, data: &[u8]) {
        let blocks = self.framer.feed(data);
        self.ready.extend(blocks);
        self.dispatch_ready();
    }

    fn dispatch_ready(&mut self) {
        while let Some(block) = self.ready.pop_front() {
            self.handle_response(block);
        }
    }

    fn handle_response(&mut self, block: String) {
        debug!("output: {}", block);

        if self.queue.is_empty() {
            // ツールが自発的に出力したブロック
            if !self.apply_inferior_event(&block) {
                warn!("{}", ProtocolError::EmptyQueue(block));
            }
            return;
        }

        let (command, response) = match self.queue.dequeue(block) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        debug!("dequeue: '{}' {:?}", command.text, command.continuation);

        if let Some(continuation) = command.continuation {
            self.run_continuation(continuation, response);
        }
    }

    fn run_continuation(&mut self, continuation: Continuation, response: Response) {
        match continuation {
            Continuation::FirstPrompt => debug!("Debugger ready"),
            Continuation::InferiorSetup => self.handle_inferior_setup(response),
            Continuation::RunEngine => self.handle_run_engine(response),
            Continuation::Execution(action) => self.handle_execution(action, response),
            Continuation::Interrupt => self.handle_interrupt(response),
            Continuation::UpdateAll => {
                if let Some(message) = self.backend.error_message(&response.data) {
                    self.warning("Selection failed", message);
                }
                self.update_all();
            }
            Continuation::Backtrace => self.handle_backtrace(response),
            Continuation::ListLocals => self.handle_list_locals(response),
            Continuation::BreakInsert => self.handle_break_insert(response),
            Continuation::DebuggerCommand => self.handle_debugger_command(response),
        }
    }

    /// 標準エラー出力を処理する
    pub fn handle_stderr(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data).trim_end().to_string();
        if text.is_empty() {
            return;
        }
        warn!("Debugger stderr: {}", text);
        self.emit(EngineEvent::Console(text));
    }

    /// トランスポートのエラーを処理する
    pub fn handle_transport_error(&mut self, error: TransportError) {
        if self.state.state() == EngineState::EngineShutdownRequested {
            debug!("Ignoring debugger error during shutdown: {}", error);
            return;
        }
        error!("Debugger I/O error: {}", error);
        if error.is_crash() {
            // 終了通知が続く
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.kill();
        }
        self.warning("Debugger I/O Error", error.to_string());
    }

    /// デバッガツールの終了を処理する
    pub fn handle_terminated(&mut self, code: Option<i32>) {
        info!("Debugger process finished, code {:?}", code);
        self.sink = None;
        self.queue.clear();
        self.ready.clear();
        self.framer.clear();

        match self.state.state() {
            EngineState::EngineShutdownRequested => {
                self.set_state(EngineState::EngineShutdownOk);
            }
            state if state.is_terminal() => {}
            _ => {
                self.set_state(EngineState::EngineSpontaneousShutdown);
                self.emit(EngineEvent::Status(
                    "Debugger process finished unexpectedly".to_string(),
                ));
            }
        }
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// 評価結果の表示文字列
fn describe_item(item: &WatchItem) -> String {
    match (&item.value, &item.type_name) {
        (Some(value), Some(type_name)) => format!("{} = ({}) {}", item.name, type_name, value),
        (Some(value), None) => format!("{} = {}", item.name, value),
        (None, _) => format!("{} = <not accessible>", item.name),
    }
}
