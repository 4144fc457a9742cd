//! Sonde CLI - コマンドラインインターフェース
//!
//! 外部デバッガツールを駆動する sonde エンジンの REPL インターフェース

use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use sonde_core::{
    Breakpoint, BreakpointLocation, BreakpointState, Command, EngineConfig, EngineEvent, Session,
    StackFrame, WatchItem,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Sonde - debugger front end for command-line debuggers
#[derive(Parser)]
#[command(name = "sonde")]
#[command(version = "0.1.0")]
#[command(
    about = "Drives a command-line debugger and presents structured debugging state",
    long_about = None
)]
struct Cli {
    /// Path to the config file (default: ~/.config/sonde/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debugger executable to run
    #[arg(long)]
    debugger: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "sonde_core=trace"
    #[arg(long)]
    log_level: Option<String>,

    /// Path to the executable binary
    executable: PathBuf,

    /// Arguments to pass to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    println!("Sonde - Debugger Front End");
    println!("Version 0.1.0");
    println!();

    let config = load_config(&cli)?;
    info!(
        "Debugging {} with {}",
        cli.executable.display(),
        config.debugger_command.display()
    );
    let session = Session::new(config)?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    // rustyline はブロッキングするので専用スレッドで動かす
    std::thread::spawn(move || {
        if let Err(e) = run_repl(command_tx) {
            eprintln!("Error: {}", e);
        }
    });
    let printer = tokio::spawn(print_events(event_rx));

    let result = session.run(command_rx, event_tx).await;
    // 送信側が閉じるので残りの通知を出し切ってから終わる
    let _ = printer.await;
    let state = result?;
    println!("Session finished ({})", state);

    Ok(())
}

/// ログ出力を初期化する
///
/// `--log-level` が優先され、なければ `RUST_LOG`、どちらもなければ warn です。
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 設定ファイルを読み込み、コマンドライン引数で上書きする
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(debugger) = &cli.debugger {
        config.debugger_command = debugger.clone();
    }
    config.executable = Some(cli.executable.clone());
    if !cli.args.is_empty() {
        config.inferior_args = cli.args.clone();
    }
    debug!("Effective config: {:?}", config);
    Ok(config)
}

/// REPLループを実行する
fn run_repl(commands: mpsc::UnboundedSender<Command>) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(sonde) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match Command::parse(line) {
                    Some(Command::Help) => print_help(),
                    Some(Command::Quit) => {
                        let _ = commands.send(Command::Quit);
                        break;
                    }
                    Some(command) => {
                        if commands.send(command).is_err() {
                            println!("Session has ended");
                            break;
                        }
                    }
                    None => {
                        println!("Unknown command: {}", line);
                        println!("Type 'help' for available commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                let _ = commands.send(Command::Quit);
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                let _ = commands.send(Command::Quit);
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// エンジンからの通知を表示する
async fn print_events(mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        print_event(&event);
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged(state) => debug!("State: {}", state),
        EngineEvent::Status(text) => println!("{}", text),
        EngineEvent::Console(text) => println!("{}", text),
        EngineEvent::Warning { title, text } => eprintln!("{}: {}", title, text),
        EngineEvent::GotoLocation { file, line } => println!("At {}:{}", file, line),
        EngineEvent::ResetLocation => {}
        EngineEvent::FramesUpdated { frames, current } => print_frames(frames, *current),
        EngineEvent::LocalsUpdated(items) => print_locals(items),
        EngineEvent::BreakpointsUpdated(breakpoints) => print_breakpoints(breakpoints),
        EngineEvent::ToolTip { text, .. } => println!("{}", text),
        EngineEvent::InferiorExited(code) => println!("Process exited with code {}", code),
    }
}

fn print_frames(frames: &[StackFrame], current: Option<usize>) {
    if frames.is_empty() {
        println!("No stack frames");
        return;
    }
    for (index, frame) in frames.iter().enumerate() {
        let marker = if Some(index) == current { "*" } else { " " };
        println!(
            "{} #{} {} at {}:{}",
            marker, frame.level, frame.function, frame.file, frame.line
        );
    }
}

fn print_locals(items: &[WatchItem]) {
    if items.is_empty() {
        println!("No local variables");
        return;
    }
    for item in items {
        // トップレベル（local.x）をインデントなしで表示する
        let depth = item.iname.matches('.').count().saturating_sub(1);
        let value = item.value.as_deref().unwrap_or("<not accessible>");
        let indent = "  ".repeat(depth);
        match &item.type_name {
            Some(type_name) => {
                println!("{}{}: {} = {}", indent, item.name, type_name, value);
            }
            None => println!("{}{} = {}", indent, item.name, value),
        }
    }
}

fn print_breakpoints(breakpoints: &[Breakpoint]) {
    if breakpoints.is_empty() {
        println!("No breakpoints");
        return;
    }
    for bp in breakpoints {
        let state = match bp.state {
            BreakpointState::InsertRequested => "pending",
            BreakpointState::InsertProceeding => "inserting",
            BreakpointState::Inserted => "inserted",
            BreakpointState::InsertFailed => "failed",
            BreakpointState::RemoveRequested | BreakpointState::RemoveProceeding => "removing",
        };
        let location = match &bp.params.location {
            BreakpointLocation::Function(name) => name.clone(),
            BreakpointLocation::FileAndLine { file, line } => format!("{}:{}", file, line),
        };
        let resolved = match &bp.response {
            Some(response) => match (&response.file, response.line) {
                (Some(file), Some(line)) => format!(" (#{} at {}:{})", response.id, file, line),
                _ => format!(" (#{})", response.id),
            },
            None => String::new(),
        };
        let condition = bp
            .params
            .condition
            .as_deref()
            .map(|c| format!(" if {}", c))
            .unwrap_or_default();
        println!("  {}: {}{} [{}]{}", bp.id, location, condition, state, resolved);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help                 - Show this help message");
    println!("  quit/exit/q          - Exit the debugger");
    println!();
    println!("Execution:");
    println!("  continue (c)         - Continue execution");
    println!("  step (s)             - Step into");
    println!("  next (n)             - Step over");
    println!("  finish (f)           - Step out of the current function");
    println!("  stepi / nexti        - Step one instruction");
    println!("  interrupt            - Stop the running program");
    println!();
    println!("Breakpoints:");
    println!("  break <file>:<line>|<function> [if <cond>]");
    println!("  delete <n>           - Delete breakpoint n");
    println!("  info breakpoints     - List breakpoints");
    println!();
    println!("Inspection:");
    println!("  bt                   - Show the stack");
    println!("  frame <n>            - Select frame n");
    println!("  thread <n>           - Select thread n");
    println!("  locals (l)           - Show local variables");
    println!("  watch <expr>         - Add a watch expression");
    println!("  unwatch <expr>       - Remove a watch expression");
    println!("  expand <iname>       - Expand a variable (e.g. local.s)");
    println!("  collapse <iname>     - Collapse a variable");
    println!("  format <iname> [fmt] - Set the display format of a variable");
    println!("  typeformat <type>=[fmt] - Set the display format of a type");
    println!("  print (p) <expr>     - Evaluate an expression");
    println!("  raw <cmd>            - Send a command to the debugger as is");
    println!();
    println!("Examples:");
    println!("  break main.c:42");
    println!("  break compute if i > 3");
    println!("  print count");
}
