#![forbid(unsafe_code)]

//! `agent-console`: headless driver for the agent session engine.
//!
//! Spawns an ACP agent, submits one prompt, and prints every session event
//! to stdout as a JSON line until the turn ends.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use agent_console::config::AgentCommand;
use agent_console::engine::events::SessionEvent;
use agent_console::logging::{self, LogFormat};
use agent_console::models::permission::PermissionKind;
use agent_console::models::turn::StopReason;
use agent_console::{AppError, EngineConfig, Result, Session};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "agent-console", about = "Drive an ACP coding agent headlessly", version, long_about = None)]
struct Cli {
    /// TOML configuration file. `--agent` and `--cwd` override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent executable.
    #[arg(long)]
    agent: Option<String>,

    /// Argument passed to the agent; repeat for several.
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Workspace root the agent works in.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Prompt to submit. `@path` references attach workspace files.
    #[arg(long)]
    prompt: String,

    /// Answer every permission request with its first allow option.
    #[arg(long)]
    auto_allow: bool,

    /// Diagnostic log format; logging is enabled by `AGENT_CONSOLE_LOG`.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    if let Some(path) = logging::init_from_env(args.log_format.into())? {
        info!(log = %path.display(), "agent-console starting");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

fn build_config(args: &Cli) -> Result<EngineConfig> {
    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    match (&args.config, &args.agent) {
        (Some(path), agent) => {
            let mut config = EngineConfig::load_from_path(path)?;
            if let Some(command) = agent {
                config.agent = AgentCommand::new(command.clone(), args.args.clone());
            }
            if args.cwd.is_some() {
                config.workspace_root = cwd.canonicalize().map_err(|err| {
                    AppError::Config(format!("invalid workspace root {}: {err}", cwd.display()))
                })?;
            }
            Ok(config)
        }
        (None, Some(command)) => {
            EngineConfig::new(AgentCommand::new(command.clone(), args.args.clone()), cwd)
        }
        (None, None) => Err(AppError::Config(
            "either --agent or --config is required".into(),
        )),
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = build_config(&args)?;
    let session = Session::spawn(config)?;
    let events = session.subscribe();

    let printer = tokio::spawn(print_events(session.clone(), events, args.auto_allow));

    let outcome = async {
        let caps = session.wait_ready().await?;
        info!(session_id = %caps.session_id, "agent ready");

        let turn = session.run_turn(&args.prompt);
        tokio::pin!(turn);
        tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, cancelling turn");
                if let Err(err) = session.cancel().await {
                    warn!(%err, "cancel failed");
                }
                turn.await
            }
        }
    }
    .await;

    session.shutdown().await;
    let _ = printer.await;

    let turn = outcome?;
    if turn.stop_reason == StopReason::AgentError {
        return Err(AppError::AgentInternal(
            turn.error.clone().unwrap_or_else(|| "turn failed".into()),
        ));
    }
    Ok(())
}

async fn print_events(
    session: Session,
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    auto_allow: bool,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(%err, "event not serializable"),
        }

        match event {
            SessionEvent::PermissionRequested { request } => {
                let choice = if auto_allow {
                    request
                        .options
                        .iter()
                        .find(|o| o.kind != PermissionKind::Deny)
                } else {
                    request.deny_option()
                };
                if let Some(option) = choice {
                    if let Err(err) = session.answer_permission(&request.id, &option.id).await {
                        warn!(permission_id = %request.id, %err, "could not answer permission");
                    }
                }
            }
            SessionEvent::Closed => break,
            _ => {}
        }
    }
}
