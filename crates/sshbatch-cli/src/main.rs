//! sshbatch CLI
//!
//! Runs a JSON list of commands on one host over SSH and streams the output

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use eyre::{WrapErr, bail};
use sshbatch_core::{
    CancellationSignal, ConnectionSettings, EventReceiver, ExecutionStatus, FailurePolicy,
    LogEvent, LogOrigin, RunnerConfig, SessionRunner, SettingsStore, load_commands, queue,
};
use sshbatch_exec::{
    ConnectionParams, Connector, Credential, LocalConnector, SshConnector, parse_port,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// How often queued events are printed
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shell convention for "terminated by Ctrl-C"
const EXIT_STOPPED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "sshbatch", version)]
#[command(about = "Run a list of commands on a remote host over SSH", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to sshbatch.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a command file on a host
    Run(RunArgs),
    /// Validate a command file and list its commands
    Check {
        /// JSON command file
        file: PathBuf,
    },
    /// Show the saved connection settings
    Settings,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON command file
    file: PathBuf,

    /// Host name or IP address (defaults to the saved host)
    #[arg(long)]
    host: Option<String>,

    /// Login user (defaults to the saved user)
    #[arg(short, long)]
    user: Option<String>,

    /// SSH port (defaults to the saved port, then 22)
    #[arg(short, long)]
    port: Option<String>,

    /// Authenticate with this private key file
    #[arg(long, conflicts_with_all = ["key_env", "password_env"])]
    key: Option<PathBuf>,

    /// Authenticate with a base64 private key held in this variable
    #[arg(long, conflicts_with = "password_env")]
    key_env: Option<String>,

    /// Read the password from this variable instead of prompting
    #[arg(long)]
    password_env: Option<String>,

    /// Read the key passphrase from this variable
    #[arg(long)]
    passphrase_env: Option<String>,

    /// Stop at the first command that exits non-zero
    #[arg(long)]
    abort_on_failure: bool,

    /// Run the commands on this machine through `sh -c`
    #[arg(long)]
    local: bool,

    /// Remember host, user and port for later runs
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run(args) => run(args, cli.config.as_deref()).await,
        Commands::Check { file } => {
            check(&file)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Settings => {
            show_settings()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    let mut runner_config = config.runner;
    if args.abort_on_failure {
        runner_config.failure_policy = FailurePolicy::Abort;
    }

    let commands = load_commands(&args.file)
        .wrap_err_with(|| format!("cannot run {}", args.file.display()))?;

    let store = SettingsStore::default_location()?;
    let saved = store.load();
    let params = connection_params(&args, &saved)?;

    if let Some(settings) = settings_to_save(&args, &params) {
        store
            .save(&settings)
            .wrap_err("failed to save connection settings")?;
    }

    let connector = build_connector(&runner_config, args.local);
    let runner = SessionRunner::new(connector, runner_config);

    let (log_tx, mut log_rx) = queue();
    let (status_tx, mut status_rx) = queue();
    let cancel = CancellationSignal::new();

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            runner
                .run(params, &commands, log_tx, status_tx, cancel)
                .await
        }
    });

    let mut interrupts = interrupts();
    let code = consume(handle, &mut log_rx, &mut status_rx, &cancel, &mut interrupts).await?;
    Ok(ExitCode::from(code))
}

/// Forward every Ctrl-C press; one listener task for the whole run
fn interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                break;
            }
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Print events until the run ends; returns the process exit code
///
/// The first interrupt cancels the run, the second gives up on it.
async fn consume(
    mut handle: JoinHandle<ExecutionStatus>,
    log_rx: &mut EventReceiver<LogEvent>,
    status_rx: &mut EventReceiver<ExecutionStatus>,
    cancel: &CancellationSignal,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<u8> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                print_pending(log_rx, status_rx);
            }
            Some(()) = interrupts.recv() => {
                if cancel.cancel() {
                    eprintln!("stopping after the current command, press Ctrl-C again to quit");
                } else {
                    print_pending(log_rx, status_rx);
                    return Ok(EXIT_STOPPED);
                }
            }
            joined = &mut handle => {
                let status = joined.wrap_err("run task failed")?;
                print_pending(log_rx, status_rx);
                return Ok(exit_code(status));
            }
        }
    }
}

/// Settings to persist for `--save`; local runs only carry placeholders
fn settings_to_save(args: &RunArgs, params: &ConnectionParams) -> Option<ConnectionSettings> {
    if !args.save {
        return None;
    }
    if args.local {
        tracing::warn!("--save is ignored for local runs");
        return None;
    }
    Some(ConnectionSettings::from_params(params))
}

/// Merge command-line values with saved settings
fn connection_params(args: &RunArgs, saved: &ConnectionSettings) -> Result<ConnectionParams> {
    let host = pick(args.host.as_deref(), &saved.ip);
    let user = pick(args.user.as_deref(), &saved.user);

    let (host, user) = if args.local {
        (
            host.unwrap_or_else(|| "localhost".to_string()),
            user.unwrap_or_else(|| "local".to_string()),
        )
    } else {
        match (host, user) {
            (Some(host), Some(user)) => (host, user),
            (None, _) => bail!("no host given and none saved, pass --host"),
            (_, None) => bail!("no user given and none saved, pass --user"),
        }
    };

    let port = match pick(args.port.as_deref(), &saved.port) {
        Some(text) => parse_port(&text)?,
        None => sshbatch_exec::result::DEFAULT_PORT,
    };

    let credential = if args.local {
        Credential::password(String::new())
    } else {
        credential(args, &host, &user)?
    };

    let params = ConnectionParams::new(host, user, credential).with_port(port);
    params.validate()?;
    Ok(params)
}

/// First non-blank of the argument and the saved value
fn pick(arg: Option<&str>, saved: &str) -> Option<String> {
    arg.map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| Some(saved.trim()).filter(|value| !value.is_empty()))
        .map(str::to_string)
}

fn credential(args: &RunArgs, host: &str, user: &str) -> Result<Credential> {
    let credential = if let Some(path) = &args.key {
        Credential::key_file(path)
    } else if let Some(var) = &args.key_env {
        Credential::env_key(var)
    } else if let Some(var) = &args.password_env {
        return Ok(Credential::password(read_env(var)?));
    } else {
        let password = rpassword::prompt_password(format!("password for {user}@{host}: "))
            .wrap_err("failed to read password")?;
        return Ok(Credential::password(password));
    };

    match &args.passphrase_env {
        Some(var) => Ok(credential.with_passphrase(read_env(var)?)),
        None => Ok(credential),
    }
}

fn read_env(var: &str) -> Result<String> {
    std::env::var(var).wrap_err_with(|| format!("environment variable {var} is not set"))
}

fn build_connector(config: &RunnerConfig, local: bool) -> Arc<dyn Connector> {
    if local {
        return Arc::new(LocalConnector::new());
    }

    let connector = SshConnector::new(config.host_key_policy);
    match &config.known_hosts {
        Some(path) => Arc::new(connector.with_known_hosts(path.clone())),
        None => Arc::new(connector),
    }
}

fn print_pending(
    log_rx: &mut EventReceiver<LogEvent>,
    status_rx: &mut EventReceiver<ExecutionStatus>,
) {
    for event in log_rx.drain() {
        match event.origin {
            LogOrigin::Stdout => println!("{event}"),
            LogOrigin::Stderr | LogOrigin::System => eprintln!("{event}"),
        }
    }
    for status in status_rx.drain() {
        tracing::debug!(status = %status, "status changed");
        if status.is_terminal() {
            eprintln!("finished: {status}");
        }
    }
}

fn exit_code(status: ExecutionStatus) -> u8 {
    match status {
        ExecutionStatus::Done => 0,
        ExecutionStatus::Stopped => EXIT_STOPPED,
        ExecutionStatus::Connecting | ExecutionStatus::Running | ExecutionStatus::Error => 1,
    }
}

fn check(file: &Path) -> Result<()> {
    let commands = load_commands(file)?;

    for (index, descriptor) in commands.iter().enumerate() {
        match descriptor.description() {
            Some(description) => {
                println!("{:>3}. {} ({description})", index + 1, descriptor.command());
            }
            None => println!("{:>3}. {}", index + 1, descriptor.command()),
        }
    }
    println!("{} commands in {}", commands.len(), file.display());
    Ok(())
}

fn show_settings() -> Result<()> {
    let store = SettingsStore::default_location()?;
    let settings = store.load();

    println!("settings file: {}", store.path().display());
    if settings.is_empty() {
        println!("no saved settings");
        return Ok(());
    }
    println!("host: {}", settings.ip);
    println!("user: {}", settings.user);
    println!("port: {}", settings.port);
    Ok(())
}
