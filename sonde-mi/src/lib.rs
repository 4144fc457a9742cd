//! Sonde 応答テキスト解析
//!
//! このクレートは、デバッガツールが出力する半構造化テキストを型付きのレコードに
//! 変換する機能を提供します。
//! ブレークポイント設定応答、バックトレース、タグ付きレコード形式の変数ダンプを扱います。

pub mod breakpoint;
pub mod error;
pub mod frames;
pub mod parse;
pub mod record;
pub mod watch;

pub use breakpoint::{parse_break_insert, BreakpointResponse};
pub use error::ParseError;
pub use frames::{Backtrace, FrameParser, StackFrame};
pub use record::{MiKind, MiValue};
pub use watch::{parse_watch_records, WatchItem};

/// 解析の結果型
pub type Result<T> = anyhow::Result<T>;
