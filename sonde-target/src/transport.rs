//! デバッガツールのプロセス制御

use crate::TransportError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// 読み取りバッファのサイズ
const READ_CHUNK_SIZE: usize = 4096;

/// 終了通知の前に標準出力の読み切りを待つ時間
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// トランスポートから通知されるイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 標準出力のデータ
    OutputReady(Vec<u8>),
    /// 標準エラー出力のデータ
    StandardError(Vec<u8>),
    /// I/Oエラー
    Error(TransportError),
    /// プロセス終了（シグナルで終了した場合は None）
    Terminated(Option<i32>),
}

/// コマンドの書き込み先
///
/// `write` は呼び出し元をブロックしてはいけません。
/// 書き込みの失敗は戻り値ではなく [`TransportEvent::Error`] で通知します。
pub trait CommandSink {
    /// データを書き込む
    fn write(&mut self, data: &[u8]);

    /// プロセスを強制終了する
    fn kill(&mut self);
}

/// デバッガツールのサブプロセス
pub struct Transport {
    /// 書き込みタスクへの送信口
    writer: mpsc::UnboundedSender<Vec<u8>>,
    /// イベント送信口（書き込み失敗の通知用）
    events: mpsc::UnboundedSender<TransportEvent>,
    /// 強制終了の要求
    kill_switch: Option<oneshot::Sender<()>>,
    /// プロセスID
    pid: Option<u32>,
}

impl Transport {
    /// デバッガツールを起動する
    ///
    /// 起動の失敗はここで同期的に返されます。起動後の出力・エラー・終了は
    /// 返される受信口にイベントとして届きます。
    /// tokio ランタイム上で呼び出す必要があります。
    pub fn spawn<P: AsRef<Path>>(
        program: P,
        args: &[String],
    ) -> std::result::Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let program = program.as_ref();
        info!("Starting debugger: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::FailedToStart {
                program: program.display().to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        match stdin {
            Some(stdin) => {
                tokio::spawn(write_loop(stdin, write_rx, event_tx.clone()));
            }
            None => {
                let _ = event_tx.send(TransportEvent::Error(TransportError::WriteError(
                    "stdin is not piped".to_string(),
                )));
            }
        }

        let stdout_task = stdout.map(|stdout| {
            tokio::spawn(read_loop(stdout, event_tx.clone(), TransportEvent::OutputReady))
        });
        if let Some(stderr) = stderr {
            tokio::spawn(read_loop(stderr, event_tx.clone(), TransportEvent::StandardError));
        }

        // 終了監視
        let wait_tx = event_tx.clone();
        tokio::spawn(async move {
            // 送信側が破棄された場合も強制終了として扱う
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let killed = exited.is_none();
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill debugger process: {}", e);
                    }
                    child.wait().await
                }
            };

            // 終了通知より前に残りの出力を届ける
            if let Some(task) = stdout_task {
                if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
                    debug!("Debugger stdout still open after exit");
                }
            }

            match status {
                Ok(status) => {
                    let code = status.code();
                    if code.is_none() && !killed {
                        let _ = wait_tx.send(TransportEvent::Error(TransportError::Crashed));
                    }
                    info!("Debugger process finished: {}", status);
                    let _ = wait_tx.send(TransportEvent::Terminated(code));
                }
                Err(e) => {
                    let error = TransportError::Unknown(e.to_string());
                    let _ = wait_tx.send(TransportEvent::Error(error));
                    let _ = wait_tx.send(TransportEvent::Terminated(None));
                }
            }
        });

        Ok((
            Self {
                writer: write_tx,
                events: event_tx,
                kill_switch: Some(kill_tx),
                pid,
            },
            event_rx,
        ))
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl CommandSink for Transport {
    fn write(&mut self, data: &[u8]) {
        if self.writer.send(data.to_vec()).is_err() {
            let _ = self.events.send(TransportEvent::Error(TransportError::WriteError(
                "input channel is closed".to_string(),
            )));
        }
    }

    fn kill(&mut self) {
        if let Some(kill_switch) = self.kill_switch.take() {
            let _ = kill_switch.send(());
        }
    }
}

/// 書き込みタスク
async fn write_loop(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(data) = rx.recv().await {
        let result = match stdin.write_all(&data).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let _ = events.send(TransportEvent::Error(TransportError::WriteError(e.to_string())));
            break;
        }
    }
}

/// 読み取りタスク
async fn read_loop<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<TransportEvent>,
    wrap: fn(Vec<u8>) -> TransportEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if events.send(wrap(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let error = TransportError::ReadError(e.to_string());
                let _ = events.send(TransportEvent::Error(error));
                break;
            }
        }
    }
}
