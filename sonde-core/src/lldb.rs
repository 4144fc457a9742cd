//! LLDB バックエンド

use crate::backend::{Backend, Capabilities, ExecAction, InferiorEvent};
use crate::breakpoint::{BreakpointLocation, BreakpointParameters};
use crate::config::{BackendKind, EngineConfig};
use crate::watch::FetchRequest;
use crate::Result;
use regex::Regex;
use sonde_mi::{
    parse_break_insert, parse_watch_records, Backtrace, BreakpointResponse, FrameParser, ParseError,
    WatchItem,
};
use std::collections::BTreeSet;
use std::path::Path;

/// 設定に従ってバックエンドを作成する
pub fn create_backend(config: &EngineConfig) -> Result<Box<dyn Backend>> {
    match config.backend {
        BackendKind::Lldb => Ok(Box::new(LldbBackend::new(&config.prompt_marker)?)),
    }
}

/// LLDB のコマンドラインを操作するバックエンド
pub struct LldbBackend {
    prompt_marker: String,
    frames: FrameParser,
    stopped: Regex,
    exited: Regex,
    thread: Regex,
    stop_reason: Regex,
}

impl LldbBackend {
    /// 新しいバックエンドを作成する
    pub fn new(prompt_marker: &str) -> Result<Self> {
        Ok(Self {
            prompt_marker: prompt_marker.to_string(),
            frames: FrameParser::new()?,
            stopped: Regex::new(r"(?m)^Process (\d+) stopped")?,
            exited: Regex::new(r"(?m)^Process (\d+) exited with status = (-?\d+)")?,
            thread: Regex::new(r"(?m)^\* thread #(\d+)")?,
            stop_reason: Regex::new(r"stop reason = ([^\n]*)")?,
        })
    }
}

/// 引数を二重引用符で囲む
fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Backend for LldbBackend {
    fn name(&self) -> &'static str {
        "lldb"
    }

    fn prompt_marker(&self) -> &str {
        &self.prompt_marker
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            break_conditions: true,
        }
    }

    fn setup_inferior_command(&self, executable: &Path) -> String {
        format!("target create {}", quote(&executable.display().to_string()))
    }

    fn run_command(&self, args: &[String]) -> String {
        let mut command = "process launch".to_string();
        if !args.is_empty() {
            command.push_str(" --");
            for arg in args {
                command.push(' ');
                command.push_str(&quote(arg));
            }
        }
        command
    }

    fn execution_command(&self, action: ExecAction) -> String {
        match action {
            ExecAction::StepIn => "thread step-in",
            ExecAction::StepOver => "thread step-over",
            ExecAction::StepOut => "thread step-out",
            ExecAction::StepInstruction => "thread step-inst",
            ExecAction::NextInstruction => "thread step-inst-over",
            ExecAction::Continue => "process continue",
        }
        .to_string()
    }

    fn interrupt_command(&self) -> String {
        "process interrupt".to_string()
    }

    fn kill_inferior_command(&self) -> String {
        "process kill".to_string()
    }

    fn select_frame_command(&self, index: usize) -> String {
        format!("frame select {}", index)
    }

    fn select_thread_command(&self, thread: u64) -> String {
        format!("thread select {}", thread)
    }

    fn insert_breakpoint_command(&self, params: &BreakpointParameters) -> String {
        let mut command = match &params.location {
            BreakpointLocation::Function(name) => format!("break set --name {}", name),
            BreakpointLocation::FileAndLine { file, line } => {
                format!("break set --file {} --line {}", quote(file), line)
            }
        };
        if let Some(condition) = params.condition.as_deref().filter(|c| !c.is_empty()) {
            command.push_str(" --condition ");
            command.push_str(&quote(condition));
        }
        if !params.enabled {
            command.push_str(" --disable");
        }
        command
    }

    fn remove_breakpoint_command(&self, response_id: u32) -> String {
        format!("break delete {}", response_id)
    }

    fn backtrace_command(&self) -> String {
        "bt".to_string()
    }

    fn locals_command(&self, request: &FetchRequest) -> String {
        format!(
            "qdebug('{}','{}','{}','{}','{}')",
            request.options,
            request.expanded,
            request.type_formats,
            request.individual_formats,
            request.watchers
        )
    }

    fn quit_command(&self) -> String {
        "quit".to_string()
    }

    fn parse_break_insert(
        &self,
        reply: &str,
    ) -> std::result::Result<BreakpointResponse, ParseError> {
        parse_break_insert(reply)
    }

    fn parse_backtrace(&self, block: &str) -> Backtrace {
        self.frames.parse(block)
    }

    fn parse_locals(&self, block: &str, expanded: &BTreeSet<String>) -> Vec<WatchItem> {
        parse_watch_records(block, expanded)
    }

    fn error_message(&self, block: &str) -> Option<String> {
        block
            .lines()
            .find_map(|line| line.trim_start().strip_prefix("error: "))
            .map(|message| message.trim().to_string())
    }

    fn inferior_event(&self, block: &str) -> Option<InferiorEvent> {
        if let Some(caps) = self.exited.captures(block) {
            let code = caps[2].parse().unwrap_or(-1);
            return Some(InferiorEvent::Exited(code));
        }
        if self.stopped.is_match(block) {
            let thread = self
                .thread
                .captures(block)
                .and_then(|caps| caps[1].parse().ok());
            let reason = self
                .stop_reason
                .captures(block)
                .map(|caps| caps[1].trim().to_string());
            return Some(InferiorEvent::Stopped { thread, reason });
        }
        None
    }
}
