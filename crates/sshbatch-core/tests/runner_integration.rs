use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sshbatch_core::*;
use sshbatch_exec::error::ExecError;
use sshbatch_exec::keys::Credential;
use sshbatch_exec::local::LocalConnector;
use sshbatch_exec::process::{RemoteProcess, StreamKind};
use sshbatch_exec::result::{CommandExit, ConnectionParams};
use sshbatch_exec::traits::{Connector, RemoteSession};

// Mock transport: answers a few fixed commands and records what it was asked to run
#[derive(Default)]
struct MockConnector {
    dispatched: Arc<Mutex<Vec<String>>>,
    connect_error: Option<ExecError>,
    exec_error_on: Option<String>,
    cancel_after: Option<(usize, CancellationSignal)>,
    fail_close: bool,
}

impl MockConnector {
    fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _params: &ConnectionParams,
        _timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        Ok(Box::new(MockSession {
            dispatched: Arc::clone(&self.dispatched),
            exec_error_on: self.exec_error_on.clone(),
            cancel_after: self.cancel_after.clone(),
            fail_close: self.fail_close,
        }))
    }

    fn connector_type(&self) -> &'static str {
        "mock"
    }
}

struct MockSession {
    dispatched: Arc<Mutex<Vec<String>>>,
    exec_error_on: Option<String>,
    cancel_after: Option<(usize, CancellationSignal)>,
    fail_close: bool,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str) -> Result<RemoteProcess, ExecError> {
        let count = {
            let mut dispatched = self.dispatched.lock().unwrap();
            dispatched.push(command.to_string());
            dispatched.len()
        };

        if self.exec_error_on.as_deref() == Some(command) {
            return Err(ExecError::Protocol("channel open refused".to_string()));
        }

        let (mut feed, process) = RemoteProcess::channel();
        match command {
            "false" => feed.exit(CommandExit::Code(1)),
            "warn" => {
                feed.push(StreamKind::Stderr, b"careful\n");
                feed.exit(CommandExit::Code(0));
            }
            "hang" => {
                // exit arrives but the output streams never close
                feed.push(StreamKind::Stdout, b"started\n");
                feed.exit(CommandExit::Code(0));
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(feed);
                });
                return Ok(process);
            }
            other => {
                let text = other.strip_prefix("echo ").unwrap_or(other);
                feed.push(StreamKind::Stdout, format!("{text}\n").as_bytes());
                feed.exit(CommandExit::Code(0));
            }
        }
        feed.close_output();

        if let Some((after, cancel)) = &self.cancel_after
            && *after == count
        {
            cancel.cancel();
        }
        Ok(process)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if self.fail_close {
            return Err(ExecError::Network("connection reset".to_string()));
        }
        Ok(())
    }
}

fn params() -> ConnectionParams {
    ConnectionParams::new("192.168.1.100", "testuser", Credential::password("secret"))
}

fn sequence(commands: &[&str]) -> CommandSequence {
    commands.iter().map(|c| CommandDescriptor::new(*c)).collect()
}

struct Outcome {
    result: ExecutionStatus,
    statuses: Vec<ExecutionStatus>,
    events: Vec<LogEvent>,
}

impl Outcome {
    fn lines(&self, origin: LogOrigin) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.line.as_str())
            .collect()
    }

    fn has_line(&self, needle: &str) -> bool {
        self.events.iter().any(|e| e.line.contains(needle))
    }
}

async fn run(
    connector: Arc<dyn Connector>,
    config: RunnerConfig,
    commands: &CommandSequence,
    cancel: CancellationSignal,
) -> Outcome {
    let runner = SessionRunner::new(connector, config);
    let (log_tx, mut log_rx) = queue();
    let (status_tx, mut status_rx) = queue();

    let result = runner.run(params(), commands, log_tx, status_tx, cancel).await;

    Outcome {
        result,
        statuses: status_rx.drain(),
        events: log_rx.drain(),
    }
}

fn assert_single_terminal(outcome: &Outcome) {
    let statuses = &outcome.statuses;
    assert_eq!(statuses.first(), Some(&ExecutionStatus::Connecting));
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == ExecutionStatus::Connecting)
            .count(),
        1
    );
    assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
    assert_eq!(statuses.last(), Some(&outcome.result));
}

#[tokio::test]
async fn test_continue_after_failed_command() {
    let connector = Arc::new(MockConnector::default());
    let commands = sequence(&["echo a", "false", "echo b"]);

    let outcome = run(
        connector.clone(),
        RunnerConfig::default(),
        &commands,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Done);
    assert_eq!(
        outcome.statuses,
        vec![
            ExecutionStatus::Connecting,
            ExecutionStatus::Running,
            ExecutionStatus::Done
        ]
    );
    assert_eq!(connector.dispatched(), vec!["echo a", "false", "echo b"]);
    assert_eq!(outcome.lines(LogOrigin::Stdout), vec!["a", "b"]);
    assert!(outcome.has_line("(exit code: 1)"));
    assert!(outcome.has_line("command 2 exited with code 1"));
    assert!(outcome.has_line("all commands completed"));
    assert!(outcome.has_line("connection closed"));
}

#[tokio::test]
async fn test_abort_policy_stops_after_failure() {
    let connector = Arc::new(MockConnector::default());
    let commands = sequence(&["echo a", "false", "echo b"]);
    let config = RunnerConfig::default().with_failure_policy(FailurePolicy::Abort);

    let outcome = run(connector.clone(), config, &commands, CancellationSignal::new()).await;

    assert_eq!(outcome.result, ExecutionStatus::Error);
    assert_eq!(connector.dispatched(), vec!["echo a", "false"]);
    assert_single_terminal(&outcome);
}

#[tokio::test]
async fn test_connect_failure_dispatches_nothing() {
    let connector = Arc::new(MockConnector {
        connect_error: Some(ExecError::AuthenticationFailed("denied".to_string())),
        ..MockConnector::default()
    });
    let commands = sequence(&["echo a", "echo b"]);

    let outcome = run(
        connector.clone(),
        RunnerConfig::default(),
        &commands,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Error);
    assert_eq!(
        outcome.statuses,
        vec![ExecutionStatus::Connecting, ExecutionStatus::Error]
    );
    assert!(connector.dispatched().is_empty());
    assert!(outcome.has_line("authentication failed"));
    assert!(
        outcome
            .events
            .iter()
            .any(|e| e.severity == Severity::Error && e.origin == LogOrigin::System)
    );
}

#[tokio::test]
async fn test_network_failure_reported() {
    let connector = Arc::new(MockConnector {
        connect_error: Some(ExecError::Network("connection refused".to_string())),
        ..MockConnector::default()
    });

    let outcome = run(
        connector,
        RunnerConfig::default(),
        &sequence(&["uptime"]),
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Error);
    assert!(outcome.has_line("network error: connection refused"));
}

#[tokio::test]
async fn test_cancel_between_commands() {
    let cancel = CancellationSignal::new();
    let connector = Arc::new(MockConnector {
        cancel_after: Some((2, cancel.clone())),
        ..MockConnector::default()
    });
    let commands = sequence(&["echo 1", "echo 2", "echo 3", "echo 4"]);

    let outcome = run(connector.clone(), RunnerConfig::default(), &commands, cancel).await;

    assert_eq!(outcome.result, ExecutionStatus::Stopped);
    assert_eq!(connector.dispatched(), vec!["echo 1", "echo 2"]);
    assert!(outcome.has_line("cancelled before command 3/4"));
    assert_single_terminal(&outcome);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let cancel = CancellationSignal::new();
    cancel.cancel();
    let connector = Arc::new(MockConnector::default());

    let outcome = run(
        connector.clone(),
        RunnerConfig::default(),
        &sequence(&["echo 1", "echo 2"]),
        cancel,
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Stopped);
    assert!(connector.dispatched().is_empty());
    assert_eq!(
        outcome.statuses,
        vec![
            ExecutionStatus::Connecting,
            ExecutionStatus::Running,
            ExecutionStatus::Stopped
        ]
    );
}

#[tokio::test]
async fn test_cancel_during_last_command_ends_in_error() {
    let cancel = CancellationSignal::new();
    let connector = Arc::new(MockConnector {
        cancel_after: Some((1, cancel.clone())),
        ..MockConnector::default()
    });

    let outcome = run(
        connector,
        RunnerConfig::default(),
        &sequence(&["echo only"]),
        cancel,
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Error);
    assert_eq!(
        outcome.statuses,
        vec![
            ExecutionStatus::Connecting,
            ExecutionStatus::Running,
            ExecutionStatus::Error
        ]
    );
    assert!(outcome.has_line("cancelled during the last command"));
    assert!(!outcome.has_line("all commands completed"));
}

#[tokio::test]
async fn test_close_failure_keeps_terminal_status() {
    let connector = Arc::new(MockConnector {
        fail_close: true,
        ..MockConnector::default()
    });

    let outcome = run(
        connector,
        RunnerConfig::default(),
        &sequence(&["echo a"]),
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Done);
    assert_single_terminal(&outcome);
    assert!(outcome.has_line("connection closed"));
    assert!(
        outcome
            .events
            .iter()
            .any(|e| e.severity == Severity::Error
                && e.line.contains("error while closing connection"))
    );
}

#[tokio::test]
async fn test_blank_command_skipped() {
    let connector = Arc::new(MockConnector::default());
    let commands = sequence(&["echo a", "   ", "echo b"]);

    let outcome = run(
        connector.clone(),
        RunnerConfig::default(),
        &commands,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Done);
    assert_eq!(connector.dispatched(), vec!["echo a", "echo b"]);
    assert!(
        outcome
            .events
            .iter()
            .any(|e| e.severity == Severity::Warning && e.line.contains("command 2"))
    );
}

#[tokio::test]
async fn test_stderr_tagged() {
    let connector = Arc::new(MockConnector::default());

    let outcome = run(
        connector,
        RunnerConfig::default(),
        &sequence(&["warn"]),
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Done);
    assert_eq!(outcome.lines(LogOrigin::Stderr), vec!["careful"]);
    assert!(outcome.lines(LogOrigin::Stdout).is_empty());
}

#[tokio::test]
async fn test_dispatch_failure_ends_run() {
    let connector = Arc::new(MockConnector {
        exec_error_on: Some("echo b".to_string()),
        ..MockConnector::default()
    });
    let commands = sequence(&["echo a", "echo b", "echo c"]);

    let outcome = run(
        connector.clone(),
        RunnerConfig::default(),
        &commands,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Error);
    assert_eq!(connector.dispatched(), vec!["echo a", "echo b"]);
    assert!(outcome.has_line("SSH protocol error: channel open refused"));
    assert!(outcome.has_line("connection closed"));
    assert_single_terminal(&outcome);
}

#[tokio::test]
async fn test_stuck_reader_abandoned_after_grace() {
    let connector = Arc::new(MockConnector::default());
    let config = RunnerConfig::default().with_reader_grace(Duration::from_millis(100));

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        run(
            connector,
            config,
            &sequence(&["hang", "echo next"]),
            CancellationSignal::new(),
        ),
    )
    .await
    .expect("run finishes despite a stuck stream");

    assert_eq!(outcome.result, ExecutionStatus::Done);
    assert!(outcome.has_line("stdout reader did not finish"));
    assert_eq!(outcome.lines(LogOrigin::Stdout), vec!["started", "next"]);
}

#[tokio::test]
async fn test_description_in_progress_line() {
    let connector = Arc::new(MockConnector::default());
    let commands: CommandSequence = vec![
        CommandDescriptor::new("echo a").with_description("first step"),
    ]
    .into();

    let outcome = run(
        connector,
        RunnerConfig::default(),
        &commands,
        CancellationSignal::new(),
    )
    .await;

    assert!(outcome.has_line("running 1/1: echo a (first step)"));
}

#[tokio::test]
async fn test_empty_sequence_is_done() {
    let connector = Arc::new(MockConnector::default());

    let outcome = run(
        connector,
        RunnerConfig::default(),
        &CommandSequence::new(),
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Done);
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_connector_sequence() {
    let commands = sequence(&["echo a", "false", "echo b >&2"]);

    let outcome = run(
        Arc::new(LocalConnector::new()),
        RunnerConfig::default(),
        &commands,
        CancellationSignal::new(),
    )
    .await;

    assert_eq!(outcome.result, ExecutionStatus::Done);
    assert_eq!(outcome.lines(LogOrigin::Stdout), vec!["a"]);
    assert_eq!(outcome.lines(LogOrigin::Stderr), vec!["b"]);
    assert!(outcome.has_line("(exit code: 1)"));
}
