//! デバッグセッション
//!
//! トランスポートのイベントと利用者のコマンドを1つのタスクで受け取り、
//! 順にエンジンへ渡します。エンジンの通知はチャネルで利用者側に送ります。

use crate::command::Command;
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineEvent};
use crate::state::EngineState;
use crate::Result;
use sonde_target::{CommandSink, Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// デバッグセッション
pub struct Session {
    engine: Engine,
}

impl Session {
    /// 新しいセッションを作成する
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            engine: Engine::new(config)?,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// デバッガツールを起動し、終了するまでイベントを処理する
    ///
    /// コマンドの送信側が閉じられるとセッションを終了します。
    /// 戻り値は最終的なエンジンの状態です。
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        notify: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<EngineState> {
        let mut transport_events = None;
        let setup = self.engine.setup_engine(|config| {
            let (transport, events) =
                Transport::spawn(&config.debugger_command, &config.debugger_args)?;
            info!("Debugger started, pid {:?}", transport.pid());
            transport_events = Some(events);
            Ok(Box::new(transport) as Box<dyn CommandSink>)
        });
        forward_events(&mut self.engine, &notify);
        setup?;

        let mut transport_events = match transport_events {
            Some(events) => events,
            None => anyhow::bail!("Debugger started without an event channel"),
        };

        let timeout = self.engine.config().response_timeout();
        let mut last_activity = Instant::now();
        let mut commands_open = true;

        while !self.engine.state().is_terminal() {
            // 応答待ちの間だけタイムアウトを監視する
            let deadline = match timeout {
                Some(timeout) if self.engine.has_pending_commands() => {
                    Some(last_activity + timeout)
                }
                _ => None,
            };

            tokio::select! {
                event = transport_events.recv() => match event {
                    Some(event) => {
                        if matches!(event, TransportEvent::OutputReady(_)) {
                            last_activity = Instant::now();
                        }
                        self.engine.handle_transport_event(event);
                    }
                    None => {
                        warn!("Transport event channel closed");
                        self.engine.handle_terminated(None);
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if !self.engine.has_pending_commands() {
                            last_activity = Instant::now();
                        }
                        if let Err(e) = self.engine.handle_command(command) {
                            let _ = notify.send(EngineEvent::Warning {
                                title: "Command rejected".to_string(),
                                text: e.to_string(),
                            });
                        }
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        commands_open = false;
                        if self.engine.shutdown().is_err() {
                            self.engine.abort();
                        }
                    }
                },
                _ = wait_deadline(deadline), if deadline.is_some() => {
                    let ms = timeout.map_or(0, |t| t.as_millis() as u64);
                    warn!("No response from debugger within {} ms", ms);
                    self.engine.handle_transport_error(TransportError::Timedout(ms));
                    last_activity = Instant::now();
                }
            }

            forward_events(&mut self.engine, &notify);
        }

        forward_events(&mut self.engine, &notify);
        info!("Session finished in state {}", self.engine.state());
        Ok(self.engine.state())
    }
}

fn forward_events(engine: &mut Engine, notify: &mpsc::UnboundedSender<EngineEvent>) {
    for event in engine.take_events() {
        // 受信側が閉じていても処理は続ける
        let _ = notify.send(event);
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
