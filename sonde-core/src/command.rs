//! デバッガコマンド

use crate::breakpoint::{BreakpointLocation, BreakpointParameters};

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定
    Break(BreakpointParameters),
    /// ブレークポイントを削除
    Delete(usize),
    /// 実行継続
    Continue,
    /// ステップ実行
    Step,
    /// 次の行へ
    Next,
    /// 現在の関数から抜けるまで実行
    Finish,
    /// 1命令実行
    StepInstruction,
    /// 1命令実行（呼び出しはまたぐ）
    NextInstruction,
    /// 実行中のプロセスを停止
    Interrupt,
    /// フレームを選択
    Frame(usize),
    /// スレッドを選択
    Thread(u64),
    /// バックトレース表示
    Backtrace,
    /// ローカル変数表示
    Locals,
    /// ウォッチ式を追加
    Watch(String),
    /// ウォッチ式を削除
    Unwatch(String),
    /// 変数を展開
    Expand(String),
    /// 変数を折りたたむ
    Collapse(String),
    /// 型ごとの表示形式を設定（空なら解除）
    TypeFormat { type_name: String, format: String },
    /// 項目ごとの表示形式を設定（空なら解除）
    Format { iname: String, format: String },
    /// 式を評価して表示
    Print(String),
    /// デバッガツールにそのまま送る
    Raw(String),
    /// ブレークポイント一覧表示
    InfoBreakpoints,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (head, rest) = match input.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (input, ""),
        };
        if head.is_empty() {
            return None;
        }

        match head {
            "break" | "b" => parse_break(rest).map(Command::Break),
            "delete" | "d" => rest.parse().ok().map(Command::Delete),
            "continue" | "c" => Some(Command::Continue),
            "step" | "s" => Some(Command::Step),
            "next" | "n" => Some(Command::Next),
            "finish" | "f" => Some(Command::Finish),
            "stepi" | "si" => Some(Command::StepInstruction),
            "nexti" | "ni" => Some(Command::NextInstruction),
            "interrupt" => Some(Command::Interrupt),
            "frame" => rest.parse().ok().map(Command::Frame),
            "thread" => rest.parse().ok().map(Command::Thread),
            "backtrace" | "bt" => Some(Command::Backtrace),
            "locals" | "l" => Some(Command::Locals),
            "watch" => non_empty(rest).map(Command::Watch),
            "unwatch" => non_empty(rest).map(Command::Unwatch),
            "expand" => non_empty(rest).map(Command::Expand),
            "collapse" => non_empty(rest).map(Command::Collapse),
            "typeformat" => parse_type_format(rest),
            "format" => parse_format(rest),
            "print" | "p" => non_empty(rest).map(Command::Print),
            "raw" => non_empty(rest).map(Command::Raw),
            "info" => match rest {
                "breakpoints" | "break" | "b" => Some(Command::InfoBreakpoints),
                _ => None,
            },
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

fn non_empty(rest: &str) -> Option<String> {
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// `<type>=[<format>]`（型名は空白を含んでもよい）
fn parse_type_format(rest: &str) -> Option<Command> {
    let (type_name, format) = rest.split_once('=')?;
    let type_name = type_name.trim();
    if type_name.is_empty() {
        return None;
    }
    Some(Command::TypeFormat {
        type_name: type_name.to_string(),
        format: format.trim().to_string(),
    })
}

/// `<iname> [<format>]`
fn parse_format(rest: &str) -> Option<Command> {
    let (iname, format) = match rest.split_once(char::is_whitespace) {
        Some((iname, format)) => (iname, format.trim()),
        None => (rest, ""),
    };
    if iname.is_empty() {
        return None;
    }
    Some(Command::Format {
        iname: iname.to_string(),
        format: format.to_string(),
    })
}

/// `<location> [if <condition>]`
fn parse_break(rest: &str) -> Option<BreakpointParameters> {
    let (location, condition) = match rest.split_once(" if ") {
        Some((location, condition)) => (location, non_empty(condition.trim())),
        None => (rest, None),
    };
    let mut params = BreakpointParameters::new(BreakpointLocation::parse(location)?);
    params.condition = condition;
    Some(params)
}
