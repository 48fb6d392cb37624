//! Spawning and supervising external commands.
//!
//! Every command the benchmark issues goes through here: one-shot commands
//! are run to completion under a timeout with [`execute_command`], long-lived
//! ones (task start, daemons, workloads) are held as a [`ProcessHandle`]
//! whose stdout and stderr are merged into a single line stream.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::utils::display_command;

/// Output of a command run to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builds a command from an argv. Children get their own process group so a
/// group kill reaches everything they fork (sudo, shells, tee).
pub fn build_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    Ok(command)
}

/// Runs `argv` to completion, capturing output.
///
/// # Returns
/// * `Err(Error::Timeout)` if the command is still running after `timeout`.
///   The child is killed when its handle is dropped.
/// * `Ok(CommandOutput)` otherwise, whatever the exit status.
pub async fn execute_command(argv: &[String], timeout: Duration) -> Result<CommandOutput> {
    let mut command = build_command(argv)?;
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = command.spawn().map_err(|source| Error::Spawn {
        command: display_command(argv),
        source,
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| Error::timeout(display_command(argv), timeout))??;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: output.status,
    })
}

/// Like [`execute_command`] but only logs failures. For best-effort steps
/// (chown, rm, kill) whose failure must not abort a round.
pub async fn execute_best_effort(argv: &[String], timeout: Duration) -> bool {
    match execute_command(argv, timeout).await {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!(
                command = %display_command(argv),
                status = %output.status,
                stderr = %output.stderr.trim(),
                "command failed"
            );
            false
        }
        Err(e) => {
            warn!(command = %display_command(argv), error = %e, "command failed");
            false
        }
    }
}

/// A spawned long-running command. Owned by exactly one phase or daemon slot.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawns `argv` with stdout and stderr merged into one line stream.
    ///
    /// # Arguments
    /// * `name` - Label used in log lines.
    /// * `argv` - Program followed by its arguments.
    /// * `tee` - Optional file every output line is appended to.
    pub fn spawn(name: &str, argv: &[String], tee: Option<PathBuf>) -> Result<ProcessHandle> {
        let mut command = build_command(argv)?;
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            command: display_command(argv),
            source,
        })?;
        debug!(process = name, command = %display_command(argv), pid = ?child.id(), "spawned");

        let (tx, rx) = mpsc::unbounded_channel();
        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(stdout, tx.clone(), tee.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(stderr, tx, tee)));
        }

        Ok(ProcessHandle {
            name: name.to_string(),
            child,
            lines: rx,
            forwarders,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// `true` while the child has not been reaped.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Next merged output line, or `None` once both streams are closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Waits for the child to exit, up to `timeout`.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => Err(Error::timeout(format!("waiting for {}", self.name), timeout)),
        }
    }

    /// Collects every remaining output line until the streams close or
    /// `timeout` elapses.
    pub async fn drain(&mut self, timeout: Duration) -> Vec<String> {
        let mut drained = Vec::new();
        let _ = tokio::time::timeout(timeout, async {
            while let Some(line) = self.lines.recv().await {
                drained.push(line);
            }
        })
        .await;
        drained
    }

    /// SIGKILLs the child's process group through `privilege_prefix`, then
    /// the child itself. Never fails; problems are logged.
    pub async fn kill(&mut self, privilege_prefix: &[String], timeout: Duration) {
        if let Some(pid) = self.child.id() {
            let mut argv = privilege_prefix.to_vec();
            argv.extend([
                "kill".to_string(),
                "-s".to_string(),
                "9".to_string(),
                "--".to_string(),
                format!("-{}", pid),
            ]);
            execute_best_effort(&argv, timeout).await;
        }
        if let Err(e) = self.child.start_kill() {
            debug!(process = %self.name, error = %e, "direct kill failed");
        }
        if self.wait_timeout(timeout).await.is_err() {
            warn!(process = %self.name, "did not exit after kill");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

async fn open_log(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>, tee: Option<PathBuf>)
where
    R: AsyncRead + Unpin,
{
    let mut tee_file = match tee {
        Some(path) => match open_log(&path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open runtime log");
                None
            }
        },
        None => None,
    };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(file) = tee_file.as_mut() {
            if file.write_all(format!("{}\n", line).as_bytes()).await.is_ok() {
                let _ = file.flush().await;
            }
        }
        if tx.send(line).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_command_captures_stdout() {
        let output = execute_command(&argv(&["echo", "hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_execute_command_times_out() {
        let err = execute_command(&argv(&["sleep", "5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let err = execute_command(&[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCommand));
    }

    #[tokio::test]
    async fn test_handle_merges_stdout_and_stderr() {
        let mut handle = ProcessHandle::spawn(
            "merge",
            &argv(&["sh", "-c", "echo out; echo err 1>&2"]),
            None,
        )
        .unwrap();
        let mut lines = handle.drain(Duration::from_secs(5)).await;
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert!(handle.wait_timeout(Duration::from_secs(5)).await.unwrap().success());
    }

    #[tokio::test]
    async fn test_handle_tees_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runtime.log");
        let mut handle =
            ProcessHandle::spawn("tee", &argv(&["echo", "ready"]), Some(log.clone())).unwrap();
        assert_eq!(handle.next_line().await.as_deref(), Some("ready"));
        handle.wait_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.next_line().await, None);
        let written = std::fs::read_to_string(&log).unwrap();
        assert_eq!(written, "ready\n");
    }

    #[tokio::test]
    async fn test_kill_stops_long_running_child() {
        let mut handle = ProcessHandle::spawn("sleeper", &argv(&["sleep", "30"]), None).unwrap();
        assert!(handle.is_running());
        handle.kill(&[], Duration::from_secs(5)).await;
        assert!(!handle.is_running());
    }
}
