//! Downstream server process management.
//!
//! Spawns the JSON-RPC server subprocess with piped stdio and, on
//! unix, its own process group so that teardown can kill forked
//! workers along with the direct child. Two background tasks
//! accompany every process: a stderr forwarder that surfaces the
//! server's diagnostic output through tracing (stderr is not part of
//! the protocol stream), and an exit watcher that logs the exit
//! status. Process exit is never signalled to the session directly —
//! the session observes it when the stdio transport errors out and
//! the downstream disconnect signal fires.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Handle to a spawned downstream server process.
///
/// Owns the stdio pipes until [`ServerProcess::take_stdio`] hands
/// them to the peer transport, and the kill capability for the whole
/// process group.
#[derive(Debug)]
pub struct ServerProcess {
    command: String,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    /// One-shot trigger telling the exit watcher to kill the direct
    /// child; the process-group signal does not reach it on platforms
    /// without process groups.
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ServerProcess {
    /// Spawn `command` with `args`, piped stdio, and its own process
    /// group.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` when the binary is missing, not
    /// executable, or its stdio pipes cannot be captured. Spawn
    /// failure is fatal to session establishment; the gateway must
    /// not create a session for it.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn {command}: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture server stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture server stderr".into()))?;

        let pid = child.id();
        info!(command, pid = pid.unwrap_or(0), "server process spawned");

        tokio::spawn(forward_stderr(command.to_owned(), stderr));

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor_exit(command.to_owned(), child, kill_rx));

        Ok(Self {
            command: command.to_owned(),
            pid,
            stdin: Some(stdin),
            stdout: Some(stdout),
            kill_tx: Some(kill_tx),
        })
    }

    /// Hand the stdio pipes over as a duplex byte stream pair,
    /// suitable for wrapping as a peer connection transport.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` when the pipes were already taken.
    pub fn take_stdio(&mut self) -> Result<(ChildStdout, ChildStdin)> {
        match (self.stdout.take(), self.stdin.take()) {
            (Some(stdout), Some(stdin)) => Ok((stdout, stdin)),
            _ => Err(AppError::Spawn("server stdio already taken".into())),
        }
    }

    /// Close the process: drop any stdio still held, then terminate
    /// the whole process group.
    ///
    /// Idempotent in effect — invoking it on an already-exited
    /// process neither errors nor hangs. Closing stdin first gives a
    /// well-behaved server the chance to exit on its own before the
    /// group signal lands.
    pub fn close(&mut self) {
        drop(self.stdin.take());
        drop(self.stdout.take());

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            kill_process_group(&self.command, pid);
        }

        // Direct-child kill via the exit watcher. On platforms
        // without process groups this is the only termination path, a
        // known limitation: forked grandchildren are not reaped there.
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

/// Send `SIGKILL` to the whole process group.
///
/// `ESRCH` means the group is already gone, which close() must
/// tolerate.
#[cfg(unix)]
fn kill_process_group(command: &str, pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(command, pid, "pid out of range for group kill");
        return;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => info!(command, pid, "server process group killed"),
        Err(nix::errno::Errno::ESRCH) => {
            debug!(command, pid, "server process group already exited");
        }
        Err(err) => warn!(command, pid, %err, "failed to kill server process group"),
    }
}

/// Forward the server's stderr lines to the host's diagnostic output.
async fn forward_stderr(command: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(command, line, "server stderr"),
            Ok(None) => break,
            Err(err) => {
                debug!(command, %err, "server stderr stream ended");
                break;
            }
        }
    }
}

/// Await process exit and log the status.
///
/// When the kill trigger fires first, the direct child is killed and
/// the watcher keeps waiting so the exit status is still collected.
async fn monitor_exit(command: String, mut child: Child, mut kill_rx: oneshot::Receiver<()>) {
    tokio::select! {
        result = child.wait() => {
            log_exit(&command, result);
            return;
        }
        _ = &mut kill_rx => {
            if let Err(err) = child.start_kill() {
                debug!(command, %err, "direct child kill failed (already exited?)");
            }
        }
    }

    log_exit(&command, child.wait().await);
}

fn log_exit(command: &str, result: std::io::Result<std::process::ExitStatus>) {
    match result {
        Ok(status) => match status.code() {
            Some(code) => info!(command, code, "server process exited"),
            None => info!(command, "server process terminated by signal"),
        },
        Err(err) => warn!(command, %err, "error waiting for server process"),
    }
}
