use anyhow::{Context, Result};
use clap::Parser;
use interview_core::{
    Command, LineKind, Mode, Orchestrator, OrchestratorState, OutputChannel, Revelation, Role,
    UiEvent,
};
use interview_native_utils::device::{get_available_inputs, get_available_outputs};
use interviewer_service::config::Config;
use interviewer_service::page::FilePageSource;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

const HELP: &str = "\
Type a message and press Enter to send it.
  /talk                          start recording, press Enter on an empty line to send
  /mode voice|text               spoken or written replies
  /persona interviewer|sage      who you are talking to
  /reveal none|hints|full        how much of the solution may be given away
  /refresh                       re-read the problem file
  /history                       show the conversation so far
  /clear                         forget the conversation
  /quit";

#[derive(Parser)]
#[command(version, about = "Practice a coding interview from the terminal")]
struct Cli {
    /// Problem JSON with title, description, topics, hints and testCases
    #[arg(long)]
    problem: Option<PathBuf>,
    /// Source file with your current solution, re-read on every turn
    #[arg(long)]
    code: Option<PathBuf>,
    /// JSON with lastInput, runtimeError and runtimeException from your last run
    #[arg(long)]
    run_output: Option<PathBuf>,
    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[derive(Debug, PartialEq)]
enum Input {
    Submit(String),
    Talk,
    EndTalk,
    Channel(OutputChannel),
    Persona(Mode),
    Reveal(Revelation),
    Refresh,
    History,
    Clear,
    Help,
    Quit,
    Invalid(String),
    Nothing,
}

fn parse_input(line: &str, talking: bool) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return if talking { Input::EndTalk } else { Input::Nothing };
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Submit(line.to_string());
    };
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(name, arg)| (name, arg.trim()))
        .unwrap_or((command, ""));

    match name {
        "talk" => Input::Talk,
        "mode" => arg
            .parse::<OutputChannel>()
            .map_or_else(|e| Input::Invalid(e.to_string()), Input::Channel),
        "persona" => arg
            .parse::<Mode>()
            .map_or_else(|e| Input::Invalid(e.to_string()), Input::Persona),
        "reveal" => arg
            .parse::<Revelation>()
            .map_or_else(|e| Input::Invalid(e.to_string()), Input::Reveal),
        "refresh" => Input::Refresh,
        "history" => Input::History,
        "clear" => Input::Clear,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command '/{other}', try /help")),
    }
}

/// Keeps the prompt's idea of an open voice turn in step with the orchestrator, so an
/// empty line after a failed `/talk` does nothing.
fn track_talking(talking: &AtomicBool, event: &UiEvent) {
    match event {
        UiEvent::State {
            state: OrchestratorState::Listening,
        } => talking.store(true, Ordering::SeqCst),
        UiEvent::State {
            state: OrchestratorState::Idle | OrchestratorState::Error,
        } => talking.store(false, Ordering::SeqCst),
        _ => {}
    }
}

fn render(event: UiEvent) {
    let mut out = std::io::stdout();
    match event {
        UiEvent::State { state } => match state {
            OrchestratorState::AwaitingConnection => println!("(connecting...)"),
            OrchestratorState::Listening => println!("(listening, press Enter to send)"),
            OrchestratorState::Transcribing => println!("(transcribing...)"),
            _ => tracing::debug!("State: {state:?}"),
        },
        UiEvent::Line { kind, text } => match kind {
            LineKind::User => println!("you> {text}"),
            LineKind::Notice => println!("\n{text}\n"),
            LineKind::Error => println!("! {text}"),
        },
        UiEvent::StreamStarted => print!("interviewer> "),
        UiEvent::Fragment { text } => print!("{text}"),
        UiEvent::StreamEnded { .. } => println!(),
        UiEvent::TextInput { visible } => {
            if visible {
                println!("(type your message and press Enter)");
            }
        }
        UiEvent::Prompt {
            system_prompt,
            user_message,
        } => tracing::debug!("System prompt:\n{system_prompt}\nUser message:\n{user_message}"),
        UiEvent::History { messages } => {
            if messages.is_empty() {
                println!("(no conversation yet)");
            }
            for message in messages {
                let who = match message.role() {
                    Role::User => "you",
                    Role::Assistant => "interviewer",
                };
                println!(
                    "[{}] {who}> {}",
                    message.timestamp().format("%H:%M:%S"),
                    message.content()
                );
            }
        }
    }
    let _ = out.flush();
}

fn print_devices() -> Result<()> {
    println!("Input devices:");
    for line in get_available_inputs().context("Failed to list input devices")? {
        println!("{line}");
    }
    println!("Output devices:");
    for line in get_available_outputs().context("Failed to list output devices")? {
        println!("{line}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so they do not interleave with the transcript.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        return print_devices();
    }

    // --- 4. Wire the orchestrator ---
    let page = Arc::new(FilePageSource::new(args.problem, args.code, args.run_output));
    let collaborators = interviewer_service::collaborators(&config, page);
    let mut settings = config.settings();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let (orchestrator, handle) = Orchestrator::new(
        collaborators,
        settings.clone(),
        config.orchestrator_options(),
        ui_tx,
    );
    let orchestrator_task = tokio::spawn(orchestrator.run());
    let talking = Arc::new(AtomicBool::new(false));
    let render_talking = talking.clone();
    let render_task = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            track_talking(&render_talking, &event);
            render(event);
        }
    });

    tracing::info!("Interviewer started with the {} channel", settings.policy.channel);
    println!("{HELP}");
    handle.send(Command::Start);

    // --- 5. Read commands until /quit, EOF or Ctrl-C ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down...");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line, talking.load(Ordering::SeqCst)) {
            Input::Submit(text) => {
                handle.submit_text(text);
            }
            Input::Talk => {
                talking.store(true, Ordering::SeqCst);
                handle.begin_turn();
            }
            Input::EndTalk => {
                talking.store(false, Ordering::SeqCst);
                handle.end_turn();
            }
            Input::Channel(channel) => {
                settings.policy.channel = channel;
                handle.send(Command::UpdateSettings(settings.clone()));
            }
            Input::Persona(mode) => {
                settings.policy.mode = mode;
                handle.send(Command::UpdateSettings(settings.clone()));
            }
            Input::Reveal(revelation) => {
                settings.policy.revelation = revelation;
                handle.send(Command::UpdateSettings(settings.clone()));
            }
            Input::Refresh => {
                handle.send(Command::RefreshProblem);
            }
            Input::History => {
                handle.send(Command::ShowHistory);
            }
            Input::Clear => {
                handle.send(Command::ClearHistory);
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Invalid(message) => println!("! {message}"),
            Input::Nothing => {}
        }
    }

    tracing::info!("Shutting down...");
    handle.shutdown();
    drop(handle);
    // The orchestrator owns the UI sender; dropping it ends the render task.
    drop(orchestrator_task.await.context("Orchestrator task panicked")?);
    render_task.await.context("Render task panicked")?;
    Ok(())
}
