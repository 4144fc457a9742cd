//! スタックフレームのモデル

use sonde_mi::{Backtrace, StackFrame};

/// 現在のスタック
#[derive(Debug, Default)]
pub struct StackHandler {
    frames: Vec<StackFrame>,
    current_index: Option<usize>,
}

impl StackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析済みのバックトレースで置き換える
    pub fn set_backtrace(&mut self, backtrace: Backtrace) {
        self.frames = backtrace.frames;
        self.current_index = backtrace.current.filter(|&i| i < self.frames.len());
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// 現在のフレーム
    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.current_index.and_then(|i| self.frames.get(i))
    }

    /// 再開時にスタックを破棄する
    pub fn reset(&mut self) {
        self.frames.clear();
        self.current_index = None;
    }
}
