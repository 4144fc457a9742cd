//! Sonde ターゲットツール制御
//!
//! このクレートは、外部のコマンドラインデバッガ（lldb など）をサブプロセスとして
//! 起動し、その標準入出力を扱うための低レベル機能を提供します。
//! 書き込みはノンブロッキングで行い、読み取り結果・エラー・終了はイベントとして通知します。
//! 出力ストリームはプロンプトマーカーで応答ブロックに分割されます。

pub mod error;
pub mod framer;
pub mod transport;

pub use error::TransportError;
pub use framer::ResponseFramer;
pub use transport::{CommandSink, Transport, TransportEvent};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
