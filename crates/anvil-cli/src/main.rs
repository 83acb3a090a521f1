mod config;

use anvil_agent::{
    Agent, AgentRunResult, ApplyReport, CancelHandle, RunOptions, Session, StopReason,
    WorkspaceGuard,
};
use anvil_llm::HttpChatBackend;
use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use config::{API_KEY_ENV, AnvilConfig, CONFIG_ENV, config_path, load_config, write_config};
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "anvil")]
#[command(about = "Let a chat model read and edit a local project through a fixed tool set")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent on one message.
    Run(RunArgs),
    /// Interactive session over stdin. Ctrl-C cancels a running turn, or
    /// quits at the prompt.
    Chat(ChatArgs),
    /// Write a default config file.
    Init(InitArgs),
}

#[derive(clap::Args, Debug)]
struct SessionArgs {
    #[arg(long)]
    workspace: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    chat_id: Option<String>,
    #[arg(long)]
    max_steps: Option<usize>,
    #[arg(long, action = ArgAction::SetTrue)]
    auto_apply: bool,
    #[arg(long, short, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long, short)]
    message: String,
    #[command(flatten)]
    session: SessionArgs,
    /// Apply pending changes after the run.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "discard")]
    accept: bool,
    /// Drop pending changes after the run.
    #[arg(long, action = ArgAction::SetTrue)]
    discard: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(clap::Args, Debug)]
struct InitArgs {
    #[arg(long)]
    workspace: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Self::Run(args) => args.session.verbose,
            Self::Chat(args) => args.session.verbose,
            Self::Init(_) => false,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_tracing(cli.command.verbose());

    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Chat(args) => chat_command(args).await,
        Commands::Init(args) => init_command(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_command(args: RunArgs) -> Result<ExitCode> {
    let (cfg, workspace) = load_settings(&args.session)?;
    let agent = build_agent(&cfg, &workspace)?;
    let mut session = new_session(&cfg)?;

    let mut result = run_with_interrupt(&agent, &mut session, &args.message).await;
    let snapshot = if args.json {
        Some(serde_json::to_value(&result).context("serialize run result")?)
    } else {
        print_run_summary(&result);
        None
    };

    let mut report = None;
    if args.accept {
        report = Some(result.changes.accept_all(agent.guard()));
    } else if args.discard {
        let discarded = result.changes.discard_all();
        if snapshot.is_none() {
            println!("discarded {discarded} change(s)");
        }
    }

    match snapshot {
        Some(result_json) => {
            let output = json!({ "result": result_json, "apply_report": report });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("serialize output")?
            );
        }
        None => {
            if let Some(report) = &report {
                print_apply_report(report);
            }
        }
    }

    if report.as_ref().is_some_and(|report| !report.is_success()) {
        return Ok(ExitCode::from(3));
    }
    Ok(exit_code_for_stop(result.stopped_reason))
}

async fn chat_command(args: ChatArgs) -> Result<ExitCode> {
    let (cfg, workspace) = load_settings(&args.session)?;
    let agent = build_agent(&cfg, &workspace)?;
    let mut session = new_session(&cfg)?;
    println!(
        "anvil chat in {} (model {}). Type /exit or press Ctrl-C to quit.",
        agent.guard().root().display(),
        session.model_id
    );

    let mut lines = spawn_stdin_reader();
    loop {
        prompt("> ")?;
        let line = match next_input(&mut lines).await? {
            Input::Line(line) => line,
            Input::Closed => break,
            Input::Interrupted => {
                println!();
                return Ok(ExitCode::from(130));
            }
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "/exit" | "/quit") {
            break;
        }

        let mut result = run_with_interrupt(&agent, &mut session, message).await;
        print_run_summary(&result);
        if result.changes.is_empty() {
            continue;
        }

        prompt("apply? [y/N] ")?;
        let input = next_input(&mut lines).await?;
        let accepted = matches!(
            &input,
            Input::Line(answer) if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        );
        if accepted {
            print_apply_report(&result.changes.accept_all(agent.guard()));
        } else {
            println!("discarded {} change(s)", result.changes.discard_all());
        }
        if matches!(input, Input::Interrupted) {
            return Ok(ExitCode::from(130));
        }
    }
    Ok(ExitCode::SUCCESS)
}

enum Input {
    Line(String),
    Closed,
    Interrupted,
}

/// Reads stdin on its own thread so the runtime keeps polling signals while
/// the user is typing.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (sender, receiver) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

async fn next_input(lines: &mut mpsc::UnboundedReceiver<std::io::Result<String>>) -> Result<Input> {
    tokio::select! {
        line = lines.recv() => match line {
            Some(line) => Ok(Input::Line(line.context("read stdin")?)),
            None => Ok(Input::Closed),
        },
        Ok(()) = tokio::signal::ctrl_c() => Ok(Input::Interrupted),
    }
}

fn init_command(args: InitArgs) -> Result<ExitCode> {
    let workspace = match args.workspace {
        Some(workspace) => workspace,
        None => std::env::current_dir().context("determine current directory")?,
    };
    let path = config_path(
        args.config.as_deref(),
        std::env::var(CONFIG_ENV).ok(),
        &workspace,
    );
    if path.exists() {
        bail!("config file already exists at {}", path.display());
    }
    write_config(&path, &AnvilConfig::default())?;
    println!("wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Loads the config file and layers environment and flag overrides on top.
fn load_settings(args: &SessionArgs) -> Result<(AnvilConfig, PathBuf)> {
    let base = match &args.workspace {
        Some(workspace) => workspace.clone(),
        None => std::env::current_dir().context("determine current directory")?,
    };
    let path = config_path(args.config.as_deref(), std::env::var(CONFIG_ENV).ok(), &base);
    debug!(path = %path.display(), "loading config");
    let mut cfg = load_config(&path)?;
    cfg.apply_env_overrides(std::env::var(API_KEY_ENV).ok());

    if let Some(model) = &args.model {
        cfg.session.default_model = model.clone();
    }
    if let Some(chat_id) = &args.chat_id {
        cfg.session.chat_id = Some(chat_id.clone());
    }
    if let Some(max_steps) = args.max_steps {
        cfg.agent.max_steps = max_steps;
    }
    if args.auto_apply {
        cfg.agent.auto_apply = true;
    }

    let workspace = match (&args.workspace, &cfg.session.workspace) {
        (Some(workspace), _) => workspace.clone(),
        (None, Some(configured)) if configured.is_relative() => base.join(configured),
        (None, Some(configured)) => configured.clone(),
        (None, None) => base,
    };
    Ok((cfg, workspace))
}

fn build_agent(cfg: &AnvilConfig, workspace: &Path) -> Result<Agent> {
    let guard = WorkspaceGuard::new(workspace)
        .with_context(|| format!("open workspace {}", workspace.display()))?;
    let backend = HttpChatBackend::new(cfg.backend.clone()).context("configure chat backend")?;
    Agent::new(Arc::new(backend), guard, cfg.agent.clone()).context("configure agent")
}

fn new_session(cfg: &AnvilConfig) -> Result<Session> {
    let model = cfg.session.default_model.trim();
    if model.is_empty() {
        bail!("no model configured; pass --model or set session.default_model");
    }
    let session = Session::new(model);
    Ok(match &cfg.session.chat_id {
        Some(chat_id) => session.with_chat_id(chat_id.clone()),
        None => session,
    })
}

/// Runs one message with Ctrl-C wired to the run's cancel handle.
async fn run_with_interrupt(agent: &Agent, session: &mut Session, message: &str) -> AgentRunResult {
    let cancel = CancelHandle::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = agent
        .run(
            session,
            message,
            RunOptions {
                cancel: Some(cancel),
                ..RunOptions::default()
            },
        )
        .await;
    watcher.abort();
    result
}

fn prompt(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{text}").context("write prompt")?;
    stdout.flush().context("flush stdout")
}

fn print_run_summary(result: &AgentRunResult) {
    println!("{}", result.answer);
    if !result.pending_changes().is_empty() {
        println!();
        println!("pending changes:");
        for change in result.pending_changes() {
            print!("{}", change.diff());
        }
    }
    if !result.applied.is_empty() {
        println!();
        println!("applied changes:");
        for change in &result.applied {
            println!("- {} {}", change.kind.as_str(), change.path);
        }
    }
    println!();
    println!("stopped_reason: {}", result.stopped_reason);
    println!("steps: {}", result.steps);
    println!("model_calls: {}", result.model_calls);
    if let Some(failure) = &result.failure {
        println!("failure: [{}] {}", failure.kind, failure.message);
    }
}

fn print_apply_report(report: &ApplyReport) {
    for path in &report.applied {
        println!("applied: {path}");
    }
    if let Some(failure) = &report.failed {
        println!("failed: {} ({})", failure.path, failure.message);
    }
    for path in &report.not_attempted {
        println!("not applied: {path}");
    }
}

fn exit_code_for_stop(reason: StopReason) -> ExitCode {
    match reason {
        StopReason::Answered | StopReason::StepLimit => ExitCode::SUCCESS,
        StopReason::FatalError => ExitCode::from(2),
        StopReason::Cancelled => ExitCode::from(130),
    }
}
