//! エンジンの結合テスト
//!
//! 書き込みを記録するだけの書き込み口をデバッガツールの代わりに使い、
//! 応答ブロックを手で流し込んで状態とコマンド列を確認します。

use sonde_core::{
    BreakpointLocation, BreakpointParameters, BreakpointState, CommandSink, Engine, EngineConfig,
    EngineError, EngineEvent, EngineState, ProtocolError, ToolTipOutcome, TransportError,
};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

/// 書き込みを記録する
#[derive(Clone, Default)]
struct Recorder {
    writes: Rc<RefCell<Vec<String>>>,
    killed: Rc<Cell<bool>>,
}

impl Recorder {
    fn writes(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }

    fn last(&self) -> String {
        self.writes.borrow().last().cloned().unwrap_or_default()
    }

    fn count(&self) -> usize {
        self.writes.borrow().len()
    }
}

impl CommandSink for Recorder {
    fn write(&mut self, data: &[u8]) {
        self.writes
            .borrow_mut()
            .push(String::from_utf8_lossy(data).into_owned());
    }

    fn kill(&mut self) {
        self.killed.set(true);
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        executable: Some(PathBuf::from("/bin/app")),
        ..Default::default()
    }
}

fn feed(engine: &mut Engine, text: &str) {
    engine.handle_output(text.as_bytes());
}

/// 起動して `process launch` を書き込んだところまで進める
fn launched_engine() -> (Engine, Recorder) {
    let recorder = Recorder::default();
    let mut engine = Engine::new(config()).unwrap();
    let sink = recorder.clone();
    engine
        .setup_engine(move |_| Ok(Box::new(sink) as Box<dyn CommandSink>))
        .unwrap();
    feed(&mut engine, "(lldb) ");
    feed(&mut engine, "Current executable set to '/bin/app' (x86_64).\n(lldb) ");
    assert_eq!(engine.state(), EngineState::EngineRunRequested);
    (engine, recorder)
}

/// 最初のブレークポイントで停止し、更新が終わったところまで進める
fn stopped_engine() -> (Engine, Recorder) {
    let (mut engine, recorder) = launched_engine();
    feed(
        &mut engine,
        "Process 7 launched: '/bin/app' (x86_64)\n\
         Process 7 stopped\n\
         * thread #1, name = 'app', stop reason = breakpoint 1.1\n(lldb) ",
    );
    assert_eq!(engine.state(), EngineState::InferiorStopOk);
    assert_eq!(recorder.last(), "bt\n");
    feed(&mut engine, "(lldb) ");
    assert_eq!(recorder.last(), "qdebug('defaults','','','','')\n");
    feed(&mut engine, "(lldb) ");
    assert!(!engine.has_pending_commands());
    engine.take_events();
    (engine, recorder)
}

fn states(events: &[EngineEvent]) -> Vec<EngineState> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

#[test]
fn test_startup_sequence() {
    let (mut engine, recorder) = launched_engine();
    assert_eq!(
        recorder.writes(),
        vec!["target create \"/bin/app\"\n".to_string(), "process launch\n".to_string()]
    );
    assert_eq!(
        states(&engine.take_events()),
        vec![
            EngineState::EngineSetupRequested,
            EngineState::EngineSetupOk,
            EngineState::InferiorSetupRequested,
            EngineState::InferiorSetupOk,
            EngineState::EngineRunRequested,
        ]
    );

    feed(&mut engine, "Process 7 launched: '/bin/app' (x86_64)\n(lldb) ");
    assert_eq!(engine.state(), EngineState::InferiorRunOk);
}

#[test]
fn test_setup_failure() {
    let mut engine = Engine::new(config()).unwrap();
    let result = engine.setup_engine(|config| {
        Err(TransportError::FailedToStart {
            program: config.debugger_command.display().to_string(),
            reason: "No such file or directory".to_string(),
        })
    });
    assert!(matches!(result, Err(EngineError::Transport(TransportError::FailedToStart { .. }))));
    assert_eq!(engine.state(), EngineState::EngineSetupFailed);
    assert!(!engine.has_pending_commands());
    assert!(engine
        .take_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::Warning { title, .. } if title == "Adapter start failed")));

    engine.shutdown().unwrap();
    assert_eq!(engine.state(), EngineState::EngineShutdownOk);
}

#[test]
fn test_inferior_setup_error_shuts_down() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(config()).unwrap();
    let sink = recorder.clone();
    engine
        .setup_engine(move |_| Ok(Box::new(sink) as Box<dyn CommandSink>))
        .unwrap();
    feed(&mut engine, "(lldb) error: unable to find executable for '/bin/app'\n(lldb) ");

    assert_eq!(engine.state(), EngineState::EngineShutdownRequested);
    assert_eq!(recorder.last(), "quit\n");
    assert!(recorder.killed.get());

    engine.handle_terminated(None);
    assert_eq!(engine.state(), EngineState::EngineShutdownOk);
}

#[test]
fn test_breakpoint_round_trip() {
    let (mut engine, recorder) = stopped_engine();
    let id = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::FileAndLine {
        file: "app.cpp".to_string(),
        line: 42,
    }));
    let command = recorder.last();
    assert!(command.contains("app.cpp"));
    assert!(command.contains("42"));
    assert_eq!(
        engine.breakpoints().get(id).unwrap().state,
        BreakpointState::InsertProceeding
    );

    feed(
        &mut engine,
        "Breakpoint 3: where = app`main + 10 at app.cpp:42, address = 0x1\n(lldb) ",
    );
    let bp = engine.breakpoints().get(id).unwrap();
    assert_eq!(bp.state, BreakpointState::Inserted);
    let response = bp.response.as_ref().unwrap();
    assert_eq!(response.id, 3);
    assert_eq!(response.file.as_deref(), Some("app.cpp"));
    assert_eq!(response.line, Some(42));
}

#[test]
fn test_breakpoint_insert_failure_is_local() {
    let (mut engine, _recorder) = stopped_engine();
    let bad = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::Function(
        "missing".to_string(),
    )));
    let good = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::Function(
        "main".to_string(),
    )));

    feed(
        &mut engine,
        "error: invalid function name\n(lldb) \
         Breakpoint 2: where = app`main + 4 at main.c:3, address = 0x10\n(lldb) ",
    );
    assert_eq!(
        engine.breakpoints().get(bad).unwrap().state,
        BreakpointState::InsertFailed
    );
    assert_eq!(
        engine.breakpoints().get(good).unwrap().state,
        BreakpointState::Inserted
    );
    assert_eq!(engine.state(), EngineState::InferiorStopOk);
}

#[test]
fn test_pending_breakpoints_synchronized_before_launch() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(config()).unwrap();
    let id = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::Function(
        "main".to_string(),
    )));
    assert_eq!(
        engine.breakpoints().get(id).unwrap().state,
        BreakpointState::InsertRequested
    );

    let sink = recorder.clone();
    engine
        .setup_engine(move |_| Ok(Box::new(sink) as Box<dyn CommandSink>))
        .unwrap();
    feed(&mut engine, "(lldb) Current executable set to '/bin/app' (x86_64).\n(lldb) ");
    assert_eq!(
        recorder.writes(),
        vec![
            "target create \"/bin/app\"\n".to_string(),
            "break set --name main\n".to_string(),
            "process launch\n".to_string(),
        ]
    );

    feed(
        &mut engine,
        "Breakpoint 1: where = app`main + 4 at main.c:3, address = 0x10\n(lldb) \
         Process 7 launched: '/bin/app' (x86_64)\n(lldb) ",
    );
    assert_eq!(
        engine.breakpoints().get(id).unwrap().state,
        BreakpointState::Inserted
    );
    assert_eq!(engine.state(), EngineState::InferiorRunOk);

    // ツール側の番号からモデル側のブレークポイントを引く
    feed(
        &mut engine,
        "Process 7 stopped\n* thread #1, name = 'app', stop reason = breakpoint 1.1\n(lldb) ",
    );
    assert!(engine.take_events().contains(&EngineEvent::Status(format!(
        "Stopped: thread 1, breakpoint 1.1 (breakpoint #{})",
        id
    ))));
}

#[test]
fn test_optimistic_removal() {
    let (mut engine, recorder) = stopped_engine();
    let id = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::Function(
        "main".to_string(),
    )));
    feed(
        &mut engine,
        "Breakpoint 3: where = app`main + 10 at app.cpp:42, address = 0x1\n(lldb) ",
    );

    engine.delete_breakpoint(id).unwrap();
    assert!(engine.breakpoints().get(id).is_none());
    assert_eq!(recorder.last(), "break delete 3\n");
    // 削除の応答はまだ届いていない
    assert!(engine.has_pending_commands());
}

#[test]
fn test_fifo_regardless_of_chunking() {
    let replies = "Breakpoint 4: where = app`a + 1 at a.c:10, address = 0x1\n(lldb) \
                   Breakpoint 5: where = app`b + 1 at b.c:20, address = 0x2\n(lldb) ";

    for chunk in 1..=replies.len() {
        let (mut engine, _recorder) = stopped_engine();
        let a = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::Function(
            "a".to_string(),
        )));
        let b = engine.add_breakpoint(BreakpointParameters::new(BreakpointLocation::Function(
            "b".to_string(),
        )));

        for part in replies.as_bytes().chunks(chunk) {
            engine.handle_output(part);
        }

        let a = engine.breakpoints().get(a).unwrap().response.clone().unwrap();
        let b = engine.breakpoints().get(b).unwrap().response.clone().unwrap();
        assert_eq!((a.id, a.file.as_deref()), (4, Some("a.c")), "chunk size {}", chunk);
        assert_eq!((b.id, b.file.as_deref()), (5, Some("b.c")), "chunk size {}", chunk);
    }
}

#[test]
fn test_operation_in_terminal_state_rejected() {
    let (mut engine, recorder) = stopped_engine();
    engine.handle_terminated(Some(1));
    assert_eq!(engine.state(), EngineState::EngineSpontaneousShutdown);

    let writes = recorder.count();
    let err = engine.continue_inferior().unwrap_err();
    assert_eq!(
        err,
        EngineError::Protocol(ProtocolError::WrongState {
            operation: "continue",
            state: EngineState::EngineSpontaneousShutdown,
        })
    );
    assert_eq!(recorder.count(), writes);
    assert_eq!(engine.state(), EngineState::EngineSpontaneousShutdown);
}

#[test]
fn test_wrong_state_has_no_side_effects() {
    let (mut engine, recorder) = launched_engine();
    feed(&mut engine, "Process 7 launched: '/bin/app' (x86_64)\n(lldb) ");
    assert_eq!(engine.state(), EngineState::InferiorRunOk);

    let writes = recorder.count();
    assert!(engine.step().is_err());
    assert!(engine.activate_frame(1).is_err());
    assert!(engine.execute_debugger_command("register read").is_err());
    assert!(engine.set_tooltip_expression("x").is_err());
    assert_eq!(recorder.count(), writes);
    assert_eq!(engine.state(), EngineState::InferiorRunOk);
}

#[test]
fn test_step_refreshes_stack_and_locals() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.py");
    let util = dir.path().join("util.py");
    for path in [&main, &util] {
        let mut file = File::create(path).unwrap();
        writeln!(file, "pass").unwrap();
    }

    let (mut engine, recorder) = stopped_engine();
    engine.step().unwrap();
    assert_eq!(engine.state(), EngineState::InferiorRunRequested);
    assert_eq!(recorder.last(), "thread step-in\n");

    feed(
        &mut engine,
        "Process 7 stopped\n* thread #1, name = 'app', stop reason = step in\n(lldb) ",
    );
    assert_eq!(engine.state(), EngineState::InferiorStopOk);
    assert_eq!(recorder.last(), "bt\n");

    let block = format!(
        "  {}(14)main()\n> {}(7)cube()\n  /does/not/exist.py(2)gone()\n(lldb) ",
        main.display(),
        util.display()
    );
    feed(&mut engine, &block);
    assert_eq!(engine.stack().frames().len(), 2);
    assert_eq!(engine.stack().current_index(), Some(0));
    assert_eq!(engine.stack().frames()[1].function, "main()");

    let events = engine.take_events();
    assert!(events.contains(&EngineEvent::GotoLocation {
        file: util.display().to_string(),
        line: 7,
    }));
    assert!(recorder.last().starts_with("qdebug("));

    feed(
        &mut engine,
        "{iname=\"local.x\",name=\"x\",value=\"1\",type=\"int\",numchild=\"0\"}\n(lldb) ",
    );
    assert_eq!(
        engine.watch().item("local.x").unwrap().value.as_deref(),
        Some("1")
    );
    assert!(engine
        .take_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::LocalsUpdated(items) if items.len() == 1)));
}

#[test]
fn test_locals_updates_are_incremental() {
    let (mut engine, _recorder) = stopped_engine();
    engine.add_watcher("a + b");
    feed(
        &mut engine,
        "{iname=\"local.x\",name=\"x\",value=\"1\"},{iname=\"watch.0\",name=\"a + b\",value=\"5\"}\n(lldb) ",
    );

    engine.set_expanded("local.s", true);
    feed(&mut engine, "{iname=\"local.x\",name=\"x\",value=\"2\"}\n(lldb) ");

    assert_eq!(engine.watch().item("local.x").unwrap().value.as_deref(), Some("2"));
    assert_eq!(engine.watch().item("watch.0").unwrap().value.as_deref(), Some("5"));
}

#[test]
fn test_tooltip_evaluation_and_cache() {
    let (mut engine, recorder) = stopped_engine();

    let outcome = engine.set_tooltip_expression("count").unwrap();
    assert_eq!(
        outcome,
        ToolTipOutcome::Requested {
            expression: "count".to_string(),
            iname: "tooltip.0".to_string(),
        }
    );
    let expected = format!("qdebug('defaults','','','','{}')\n", hex::encode("count#tooltip.0"));
    assert_eq!(recorder.last(), expected);

    feed(
        &mut engine,
        "{iname=\"tooltip.0\",name=\"count\",value=\"3\",type=\"int\"}\n(lldb) ",
    );
    assert!(engine.take_events().contains(&EngineEvent::ToolTip {
        expression: "count".to_string(),
        text: "count = (int) 3".to_string(),
    }));

    let writes = recorder.count();
    assert!(matches!(
        engine.set_tooltip_expression("count").unwrap(),
        ToolTipOutcome::Cached(_)
    ));
    assert_eq!(recorder.count(), writes);

    assert!(matches!(
        engine.set_tooltip_expression("i = 0").unwrap(),
        ToolTipOutcome::Message(_)
    ));
    assert_eq!(recorder.count(), writes);
}

#[test]
fn test_unsolicited_stop_after_continue() {
    let (mut engine, recorder) = stopped_engine();
    engine.continue_inferior().unwrap();
    assert_eq!(recorder.last(), "process continue\n");
    feed(&mut engine, "Process 7 resuming\n(lldb) ");
    assert_eq!(engine.state(), EngineState::InferiorRunOk);

    feed(
        &mut engine,
        "Process 7 stopped\n* thread #2, name = 'worker', stop reason = signal SIGINT\n(lldb) ",
    );
    assert_eq!(engine.state(), EngineState::InferiorStopOk);
    assert_eq!(recorder.last(), "bt\n");
    assert!(engine.take_events().contains(&EngineEvent::Status(
        "Stopped: thread 2, signal SIGINT".to_string()
    )));
}

#[test]
fn test_unrecognized_unsolicited_block_dropped() {
    let (mut engine, recorder) = stopped_engine();
    let writes = recorder.count();
    feed(&mut engine, "something unexpected\n(lldb) ");
    assert_eq!(engine.state(), EngineState::InferiorStopOk);
    assert_eq!(recorder.count(), writes);
}

#[test]
fn test_interrupt() {
    let (mut engine, recorder) = stopped_engine();
    engine.continue_inferior().unwrap();
    feed(&mut engine, "Process 7 resuming\n(lldb) ");

    engine.interrupt_inferior().unwrap();
    assert_eq!(engine.state(), EngineState::InferiorStopRequested);
    assert_eq!(recorder.last(), "process interrupt\n");

    feed(
        &mut engine,
        "Process 7 stopped\n* thread #1, name = 'app', stop reason = signal SIGSTOP\n(lldb) ",
    );
    assert_eq!(engine.state(), EngineState::InferiorStopOk);
}

#[test]
fn test_inferior_exit_shuts_down() {
    let (mut engine, recorder) = stopped_engine();
    engine.continue_inferior().unwrap();
    feed(&mut engine, "Process 7 exited with status = 0 (0x00000000)\n(lldb) ");

    assert!(engine.take_events().contains(&EngineEvent::InferiorExited(0)));
    assert_eq!(engine.state(), EngineState::EngineShutdownRequested);
    assert_eq!(recorder.last(), "quit\n");
    assert!(recorder.killed.get());

    engine.handle_terminated(Some(0));
    assert_eq!(engine.state(), EngineState::EngineShutdownOk);
}

#[test]
fn test_user_shutdown_kills_inferior() {
    let (mut engine, recorder) = stopped_engine();
    engine.shutdown().unwrap();
    let writes = recorder.writes();
    assert_eq!(
        &writes[writes.len() - 2..],
        &["process kill\n".to_string(), "quit\n".to_string()]
    );
    assert_eq!(engine.state(), EngineState::EngineShutdownRequested);
}

#[test]
fn test_transport_errors() {
    let (mut engine, recorder) = stopped_engine();
    engine.handle_transport_error(TransportError::Crashed);
    assert!(!recorder.killed.get());

    engine.handle_transport_error(TransportError::ReadError("broken pipe".to_string()));
    assert!(recorder.killed.get());
    assert!(engine
        .take_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::Warning { title, .. } if title == "Debugger I/O Error")));

    engine.handle_terminated(None);
    assert_eq!(engine.state(), EngineState::EngineSpontaneousShutdown);
}

#[test]
fn test_frame_selection_refreshes() {
    let (mut engine, recorder) = stopped_engine();
    engine.activate_frame(2).unwrap();
    assert_eq!(recorder.last(), "frame select 2\n");
    feed(&mut engine, "frame #2: 0x0000000000401136 app`main at app.cpp:42\n(lldb) ");
    assert_eq!(recorder.last(), "bt\n");

    feed(&mut engine, "(lldb) (lldb) ");
    engine.select_thread(3).unwrap();
    assert_eq!(recorder.last(), "thread select 3\n");
}

#[test]
fn test_raw_command_output() {
    let (mut engine, _recorder) = stopped_engine();
    engine.execute_debugger_command("register read pc").unwrap();
    feed(&mut engine, "pc = 0x0000000000401136  app`main + 10\n(lldb) ");
    assert!(engine.take_events().contains(&EngineEvent::Console(
        "pc = 0x0000000000401136  app`main + 10".to_string()
    )));
}

#[test]
fn test_tooltips_stay_out_of_locals() {
    let (mut engine, recorder) = stopped_engine();
    engine.set_tooltip_expression("count").unwrap();
    feed(
        &mut engine,
        "{iname=\"local.x\",name=\"x\",value=\"1\"},\
         {iname=\"tooltip.0\",name=\"count\",value=\"3\",type=\"int\"}\n(lldb) ",
    );
    assert!(engine.watch().item("tooltip.0").is_none());

    engine.continue_inferior().unwrap();
    feed(&mut engine, "Process 7 resuming\n(lldb) ");
    feed(
        &mut engine,
        "Process 7 stopped\n* thread #1, name = 'app', stop reason = step over\n(lldb) ",
    );
    feed(&mut engine, "(lldb) ");
    // 再開で評価待ちの式は捨てられている
    assert_eq!(recorder.last(), "qdebug('defaults','','','','')\n");
    feed(&mut engine, "{iname=\"local.x\",name=\"x\",value=\"2\"}\n(lldb) ");
    engine.take_events();

    let outcome = engine.set_tooltip_expression("count").unwrap();
    assert_eq!(
        outcome,
        ToolTipOutcome::Requested {
            expression: "count".to_string(),
            iname: "tooltip.0".to_string(),
        }
    );
    feed(
        &mut engine,
        "{iname=\"local.x\",name=\"x\",value=\"2\"},\
         {iname=\"tooltip.0\",name=\"count\",value=\"4\",type=\"int\"}\n(lldb) ",
    );

    let events = engine.take_events();
    assert!(events.contains(&EngineEvent::ToolTip {
        expression: "count".to_string(),
        text: "count = (int) 4".to_string(),
    }));
    let inames: Vec<_> = engine.watch().items().map(|i| i.iname.clone()).collect();
    assert_eq!(inames, vec!["local.x".to_string()]);
    assert!(events.iter().all(|e| match e {
        EngineEvent::LocalsUpdated(items) => items.iter().all(|i| !i.iname.starts_with("tooltip")),
        _ => true,
    }));
}

#[test]
fn test_format_overrides_sent_with_locals() {
    let (mut engine, recorder) = stopped_engine();

    engine.set_type_format("unsigned int", "hex");
    assert_eq!(
        recorder.last(),
        format!("qdebug('defaults','','{}=hex','','')\n", hex::encode("unsigned int"))
    );
    feed(&mut engine, "(lldb) ");

    engine
        .handle_command(sonde_core::Command::Format {
            iname: "local.x".to_string(),
            format: "binary".to_string(),
        })
        .unwrap();
    assert_eq!(
        recorder.last(),
        format!(
            "qdebug('defaults','','{}=hex','local.x=binary','')\n",
            hex::encode("unsigned int")
        )
    );
    feed(&mut engine, "(lldb) ");

    engine.set_type_format("unsigned int", "");
    assert_eq!(recorder.last(), "qdebug('defaults','','','local.x=binary','')\n");
    feed(&mut engine, "(lldb) ");

    // 実行中は次の停止まで送らない
    engine.continue_inferior().unwrap();
    let writes = recorder.count();
    engine.set_individual_format("local.x", "");
    assert_eq!(recorder.count(), writes);
}

#[test]
fn test_resume_clears_stack_and_location() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.py");
    let mut file = File::create(&main).unwrap();
    writeln!(file, "pass").unwrap();
    let frames = format!("> {}(3)main()\n(lldb) ", main.display());

    let (mut engine, recorder) = stopped_engine();
    engine.select_thread(1).unwrap();
    assert_eq!(recorder.last(), "thread select 1\n");
    assert!(engine.take_events().contains(&EngineEvent::ResetLocation));

    feed(&mut engine, "(lldb) ");
    feed(&mut engine, &frames);
    feed(&mut engine, "(lldb) ");
    assert_eq!(engine.stack().frames().len(), 1);
    let gotos = engine
        .take_events()
        .iter()
        .filter(|e| matches!(e, EngineEvent::GotoLocation { .. }))
        .count();
    assert_eq!(gotos, 1);

    engine.continue_inferior().unwrap();
    assert!(engine.stack().frames().is_empty());
    assert_eq!(engine.stack().current_index(), None);
    engine.report_frames();
    assert!(engine.take_events().contains(&EngineEvent::FramesUpdated {
        frames: Vec::new(),
        current: None,
    }));

    // 再開後の停止では同じ位置でも改めて通知する
    feed(&mut engine, "Process 7 resuming\n(lldb) ");
    feed(
        &mut engine,
        "Process 7 stopped\n* thread #1, name = 'app', stop reason = step over\n(lldb) ",
    );
    feed(&mut engine, &frames);
    assert!(engine.take_events().contains(&EngineEvent::GotoLocation {
        file: main.display().to_string(),
        line: 3,
    }));
}
