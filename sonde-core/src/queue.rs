//! コマンドキュー
//!
//! 書き込んだコマンドと、その応答を処理する継続を FIFO で対応付けます。
//! コマンドは応答を待たずに続けて書き込めますが、ツールが入力順に応答を
//! 返すことを前提にしています。

use crate::breakpoint::BreakpointModelId;
use crate::ProtocolError;
use sonde_target::CommandSink;
use std::collections::VecDeque;
use tracing::debug;

/// 応答に引き継がれる呼び出し元の識別情報
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cookie {
    #[default]
    None,
    /// 対象のブレークポイント
    Breakpoint(BreakpointModelId),
    /// 評価した式
    Expression(String),
}

/// 応答待ちのコマンド
#[derive(Debug, Clone)]
pub struct PendingCommand<K> {
    /// 書き込んだテキスト（書き込まずに待機する場合は空）
    pub text: String,
    /// 応答を処理する継続
    pub continuation: Option<K>,
    pub cookie: Cookie,
}

/// 応答ブロックとコマンドの cookie の組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: String,
    pub cookie: Cookie,
}

/// 応答待ちコマンドの FIFO
#[derive(Debug)]
pub struct CommandQueue<K> {
    pending: VecDeque<PendingCommand<K>>,
}

impl<K> CommandQueue<K> {
    /// 空のキューを作成する
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// コマンドをキューに積み、すぐに書き込む
    ///
    /// 継続のないコマンドも応答ブロックを1つ消費するため、キューに積みます。
    pub fn enqueue(
        &mut self,
        sink: &mut dyn CommandSink,
        text: impl Into<String>,
        continuation: Option<K>,
        cookie: Cookie,
    ) {
        let text = text.into();
        debug!("input: {}", text);

        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        self.pending.push_back(PendingCommand {
            text,
            continuation,
            cookie,
        });
        sink.write(&line);
    }

    /// 書き込みを伴わずに応答を待つ
    ///
    /// 起動直後のバナーのように、コマンドなしで届く応答を受け取るために使います。
    pub fn expect(&mut self, continuation: K) {
        self.pending.push_back(PendingCommand {
            text: String::new(),
            continuation: Some(continuation),
            cookie: Cookie::None,
        });
    }

    /// 最も古いコマンドを取り出し、応答ブロックと対応付ける
    pub fn dequeue(
        &mut self,
        block: String,
    ) -> Result<(PendingCommand<K>, Response), ProtocolError> {
        let command = self
            .pending
            .pop_front()
            .ok_or_else(|| ProtocolError::EmptyQueue(block.clone()))?;

        if command.continuation.is_none() {
            debug!("No continuation for response to '{}': {}", command.text, block);
        }

        let response = Response {
            data: block,
            cookie: command.cookie.clone(),
        };
        Ok((command, response))
    }

    /// 応答待ちのコマンド数
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// 応答待ちのコマンドがないかどうか
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 全ての応答待ちを破棄する
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<K> Default for CommandQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink(Vec<u8>);

    impl CommandSink for VecSink {
        fn write(&mut self, data: &[u8]) {
            self.0.extend_from_slice(data);
        }

        fn kill(&mut self) {}
    }

    #[test]
    fn test_fifo_order_and_cookie() {
        let mut sink = VecSink::default();
        let mut queue = CommandQueue::new();
        queue.enqueue(&mut sink, "bt", Some(1), Cookie::None);
        queue.enqueue(&mut sink, "break delete 4", None, Cookie::None);
        queue.enqueue(&mut sink, "break set --name main", Some(3), Cookie::Breakpoint(7));
        assert_eq!(sink.0, b"bt\nbreak delete 4\nbreak set --name main\n");

        let (command, response) = queue.dequeue("a".to_string()).unwrap();
        assert_eq!(command.continuation, Some(1));
        assert_eq!(response.data, "a");

        let (command, _) = queue.dequeue("b".to_string()).unwrap();
        assert_eq!(command.continuation, None);

        let (command, response) = queue.dequeue("c".to_string()).unwrap();
        assert_eq!(command.continuation, Some(3));
        assert_eq!(response.cookie, Cookie::Breakpoint(7));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_expect_does_not_write() {
        let mut queue: CommandQueue<u8> = CommandQueue::new();
        queue.expect(0);
        assert_eq!(queue.len(), 1);
        let (command, _) = queue.dequeue("banner".to_string()).unwrap();
        assert!(command.text.is_empty());
    }

    #[test]
    fn test_dequeue_empty() {
        let mut queue: CommandQueue<u8> = CommandQueue::new();
        let err = queue.dequeue("stray".to_string()).unwrap_err();
        assert_eq!(err, ProtocolError::EmptyQueue("stray".to_string()));
    }
}
