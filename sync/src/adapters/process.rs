use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::adapters::base::{AdapterExit, DestinationAdapter, SourceAdapter};
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::Message;

/// Command line of a connector process.
#[derive(Debug, Clone)]
pub struct ConnectorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ConnectorCommand {
    /// Builds a command for `program` with the given arguments.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }
}

/// Source adapter backed by a child connector process.
///
/// The child's stdout carries the line-delimited protocol stream consumed by
/// the pipeline; stderr is left attached to the parent for operator
/// visibility. The child is spawned with `kill_on_drop` so an aborted
/// attempt never leaks a connector process.
#[derive(Debug, Clone)]
pub struct ProcessSource {
    command: ConnectorCommand,
    child: Arc<Mutex<Option<Child>>>,
}

impl ProcessSource {
    /// Creates a source adapter running `command`.
    pub fn new(command: ConnectorCommand) -> Self {
        Self {
            command,
            child: Arc::new(Mutex::new(None)),
        }
    }
}

impl SourceAdapter for ProcessSource {
    type Output = ChildStdout;

    async fn start(&self) -> SyncResult<ChildStdout> {
        let mut guard = self.child.lock().await;

        if guard.is_some() {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Source process was already started"
            ));
        }

        info!(program = %self.command.program, "starting source connector process");

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                sync_error!(
                    ErrorKind::SourceStartFailed,
                    "Failed to spawn the source connector process",
                    detail = err.to_string(),
                    source: err
                )
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            sync_error!(
                ErrorKind::SourceStartFailed,
                "Source connector process has no captured stdout"
            )
        })?;

        *guard = Some(child);

        Ok(stdout)
    }

    async fn stop(&self, grace: Duration) -> SyncResult<AdapterExit> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Source process was never started"
            ));
        };

        stop_child("source", &mut child, grace).await
    }
}

#[derive(Debug)]
struct DestinationProcess {
    child: Child,
    stdin: ChildStdin,
}

/// Destination adapter backed by a child connector process.
///
/// Messages are written to the child's stdin, one JSON line each. Closing
/// stdin is the graceful stop signal: a well-behaved destination connector
/// drains its input and exits on EOF.
#[derive(Debug, Clone)]
pub struct ProcessDestination {
    command: ConnectorCommand,
    inner: Arc<Mutex<Option<DestinationProcess>>>,
}

impl ProcessDestination {
    /// Creates a destination adapter running `command`.
    pub fn new(command: ConnectorCommand) -> Self {
        Self {
            command,
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl DestinationAdapter for ProcessDestination {
    async fn start(&self) -> SyncResult<()> {
        let mut guard = self.inner.lock().await;

        if guard.is_some() {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Destination process was already started"
            ));
        }

        info!(program = %self.command.program, "starting destination connector process");

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationStartFailed,
                    "Failed to spawn the destination connector process",
                    detail = err.to_string(),
                    source: err
                )
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            sync_error!(
                ErrorKind::DestinationStartFailed,
                "Destination connector process has no captured stdin"
            )
        })?;

        *guard = Some(DestinationProcess { child, stdin });

        Ok(())
    }

    async fn write(&self, message: &Message) -> SyncResult<()> {
        let mut guard = self.inner.lock().await;
        let Some(process) = guard.as_mut() else {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Destination process is not running"
            ));
        };

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        process.stdin.write_all(&line).await.map_err(|err| {
            sync_error!(
                ErrorKind::DestinationIoFailed,
                "Failed to write to the destination connector process",
                detail = err.to_string(),
                source: err
            )
        })
    }

    async fn flush(&self) -> SyncResult<()> {
        let mut guard = self.inner.lock().await;
        let Some(process) = guard.as_mut() else {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Destination process is not running"
            ));
        };

        process.stdin.flush().await.map_err(|err| {
            sync_error!(
                ErrorKind::DestinationIoFailed,
                "Failed to flush the destination connector process",
                detail = err.to_string(),
                source: err
            )
        })
    }

    async fn stop(&self, grace: Duration) -> SyncResult<AdapterExit> {
        let Some(process) = self.inner.lock().await.take() else {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Destination process was never started"
            ));
        };

        let DestinationProcess { mut child, stdin } = process;

        // Closing stdin signals EOF, the graceful stop request.
        drop(stdin);

        stop_child("destination", &mut child, grace).await
    }
}

/// Waits up to `grace` for a voluntary exit, then force-kills.
async fn stop_child(role: &str, child: &mut Child, grace: Duration) -> SyncResult<AdapterExit> {
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(role, code = ?status.code(), "connector process exited");

            Ok(AdapterExit {
                code: status.code(),
            })
        }
        Ok(Err(err)) => Err(sync_error!(
            ErrorKind::IoError,
            "Failed to collect the connector process exit status",
            detail = err.to_string(),
            source: err
        )),
        Err(_) => {
            warn!(role, "connector process did not exit within the grace period, killing it");

            child.start_kill().map_err(|err| {
                sync_error!(
                    ErrorKind::IoError,
                    "Failed to kill the connector process",
                    detail = err.to_string(),
                    source: err
                )
            })?;
            let status = child.wait().await.map_err(|err| {
                sync_error!(
                    ErrorKind::IoError,
                    "Failed to collect the killed connector process exit status",
                    detail = err.to_string(),
                    source: err
                )
            })?;

            Ok(AdapterExit {
                code: status.code(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn sh(script: &str) -> ConnectorCommand {
        ConnectorCommand::new("sh", ["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn source_process_streams_stdout_and_exits_cleanly() {
        let source = ProcessSource::new(sh(
            r#"printf '{"type": "RECORD", "stream": "s", "payload": {"id": 1}}\n'"#,
        ));

        let output = source.start().await.unwrap();
        let mut lines = BufReader::new(output).lines();

        let line = lines.next_line().await.unwrap().unwrap();
        let message: Message = serde_json::from_str(&line).unwrap();
        assert_eq!(message, Message::record("s", json!({"id": 1})));
        assert!(lines.next_line().await.unwrap().is_none());

        let exit = source.stop(Duration::from_secs(5)).await.unwrap();
        assert!(exit.success());
    }

    #[tokio::test]
    async fn destination_process_accepts_writes_and_stops_on_eof() {
        let destination = ProcessDestination::new(sh("cat > /dev/null"));
        destination.start().await.unwrap();

        destination
            .write(&Message::record("s", json!({"id": 1})))
            .await
            .unwrap();
        destination.flush().await.unwrap();

        let exit = destination.stop(Duration::from_secs(5)).await.unwrap();
        assert!(exit.success());
    }

    #[tokio::test]
    async fn unresponsive_process_is_killed_after_grace() {
        let destination = ProcessDestination::new(sh("trap '' TERM; sleep 30"));
        destination.start().await.unwrap();

        let exit = destination.stop(Duration::from_millis(200)).await.unwrap();
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let source = ProcessSource::new(ConnectorCommand::new(
            "definitely-not-a-real-connector",
            Vec::new(),
        ));

        let err = source.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceStartFailed);
    }
}
