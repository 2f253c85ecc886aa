//! Issuing single commands on the cluster machine.
//!
//! A command is turned into shell text for the local shell: the
//! working directory change is prefixed, the transport wraps it for
//! the target host (e.g. `ssh -t host '...'`), and a redirect path is
//! appended as shell redirection of the *local* shell. The process
//! runs concurrently with the caller; failures only surface when its
//! `JobHandle` is awaited.

use std::{
    fmt::Display,
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use crate::{
    debug,
    io_utils::bash::{bash_cd_then, bash_redirect_stdout, bash_string_from_cmd},
    notice,
};

/// The address of the machine to run on, e.g. `user@machine`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Host(pub String);

impl Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExit {
    Success,
    /// Exit code, `None` if killed by a signal
    Failure(Option<i32>),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteJobError {
    #[error("could not issue command {shell_text:?}: {source}")]
    Spawn {
        shell_text: String,
        source: std::io::Error,
    },
    #[error("remote command failed with {}: {shell_text:?}", exit_code_string(.code))]
    Failed {
        shell_text: String,
        code: Option<i32>,
    },
    #[error("remote command did not finish within {after:?}: {shell_text:?}")]
    TimedOut {
        shell_text: String,
        after: Duration,
    },
    #[error("error waiting for command {shell_text:?}: {source}")]
    Wait {
        shell_text: String,
        source: std::io::Error,
    },
}

fn exit_code_string(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".into(),
    }
}

impl RemoteJobError {
    /// The command was issued, ran, and exited unsuccessfully.
    pub fn is_remote_command_failure(&self) -> bool {
        matches!(self, RemoteJobError::Failed { .. })
    }

    pub fn shell_text(&self) -> &str {
        match self {
            RemoteJobError::Spawn { shell_text, .. }
            | RemoteJobError::Failed { shell_text, .. }
            | RemoteJobError::TimedOut { shell_text, .. }
            | RemoteJobError::Wait { shell_text, .. } => shell_text,
        }
    }
}

/// A started process.
pub trait JobProcess: Send {
    /// Non-blocking check for completion
    fn try_wait(&mut self) -> std::io::Result<Option<JobExit>>;
    fn kill(&mut self) -> std::io::Result<()>;
}

impl JobProcess for Child {
    fn try_wait(&mut self) -> std::io::Result<Option<JobExit>> {
        Ok(Child::try_wait(self)?.map(|status| {
            if status.success() {
                JobExit::Success
            } else {
                JobExit::Failure(status.code())
            }
        }))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self)?;
        // Reap it
        Child::wait(self)?;
        Ok(())
    }
}

/// Generic "run this shell command on this host" capability.
pub trait Transport {
    /// Wrap `remote_command` (shell text meant for `host`) into shell
    /// text for the local shell.
    fn shell_text(&self, host: &Host, remote_command: &str) -> String;

    /// Start `shell_text` in the local shell, without waiting for it.
    fn spawn(&self, shell_text: &str) -> std::io::Result<Box<dyn JobProcess>>;
}

fn spawn_bash(shell_text: &str) -> std::io::Result<Box<dyn JobProcess>> {
    let child = Command::new("bash")
        .arg("-c")
        .arg(shell_text)
        .stdin(Stdio::null())
        .spawn()?;
    Ok(Box::new(child))
}

/// Runs commands through ssh.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            program: "ssh".into(),
            args: vec!["-t".into()],
        }
    }
}

impl Transport for SshTransport {
    fn shell_text(&self, host: &Host, remote_command: &str) -> String {
        let mut cmd: Vec<&str> = vec![&self.program];
        cmd.extend(self.args.iter().map(String::as_str));
        cmd.push(&host.0);
        cmd.push(remote_command);
        bash_string_from_cmd(cmd)
    }

    fn spawn(&self, shell_text: &str) -> std::io::Result<Box<dyn JobProcess>> {
        spawn_bash(shell_text)
    }
}

/// Runs commands on this machine (the host is ignored), in a `bash -c`
/// subshell so that redirection applies the same way as with ssh.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn shell_text(&self, _host: &Host, remote_command: &str) -> String {
        bash_string_from_cmd(["bash", "-c", remote_command])
    }

    fn spawn(&self, shell_text: &str) -> std::io::Result<Box<dyn JobProcess>> {
        spawn_bash(shell_text)
    }
}

/// How long to wait for jobs.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// `None` waits forever
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Handle to a dispatched command, to await its completion.
pub struct JobHandle {
    shell_text: String,
    process: Box<dyn JobProcess>,
    outcome: Option<Result<(), RemoteJobError>>,
}

impl JobHandle {
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Check for completion without blocking; returns whether the job
    /// is resolved.
    pub fn poll(&mut self) -> bool {
        if self.outcome.is_none() {
            match self.process.try_wait() {
                Ok(None) => (),
                Ok(Some(JobExit::Success)) => {
                    debug!("finished: {}", self.shell_text);
                    self.outcome = Some(Ok(()))
                }
                Ok(Some(JobExit::Failure(code))) => {
                    self.outcome = Some(Err(RemoteJobError::Failed {
                        shell_text: self.shell_text.clone(),
                        code,
                    }))
                }
                Err(source) => {
                    self.outcome = Some(Err(RemoteJobError::Wait {
                        shell_text: self.shell_text.clone(),
                        source,
                    }))
                }
            }
        }
        self.is_resolved()
    }

    /// Kill the local process and resolve the job as timed out. Only
    /// the local end (e.g. the ssh client) can be killed; with `ssh
    /// -t` the remote side is hung up on.
    pub fn time_out(&mut self, after: Duration) {
        if self.outcome.is_none() {
            if let Err(e) = self.process.kill() {
                notice!("could not kill timed out command {:?}: {e}", self.shell_text);
            }
            self.outcome = Some(Err(RemoteJobError::TimedOut {
                shell_text: self.shell_text.clone(),
                after,
            }));
        }
    }

    /// Block until the job is resolved (or timed out per `policy`).
    pub fn wait(mut self, policy: &WaitPolicy) -> Result<(), RemoteJobError> {
        let start = Instant::now();
        loop {
            if self.poll() {
                break;
            }
            if let Some(timeout) = policy.timeout {
                if start.elapsed() >= timeout {
                    if !self.poll() {
                        self.time_out(timeout);
                    }
                    break;
                }
            }
            thread::sleep(policy.poll_interval);
        }
        self.into_outcome()
            .expect("loop only exits when resolved")
    }

    /// The result if resolved
    pub fn into_outcome(self) -> Option<Result<(), RemoteJobError>> {
        self.outcome
    }
}

/// Issues commands in a fixed working directory via a transport.
pub struct RemoteExecutor<T: Transport> {
    transport: T,
    working_dir: String,
}

impl<T: Transport> RemoteExecutor<T> {
    pub fn new(transport: T, working_dir: String) -> Self {
        Self {
            transport,
            working_dir,
        }
    }

    /// The full local shell text for running `command` on `host`.
    pub fn shell_text(&self, host: &Host, command: &str, redirect: Option<&Path>) -> String {
        let remote_command = bash_cd_then(&self.working_dir, command);
        let shell_text = self.transport.shell_text(host, &remote_command);
        if let Some(path) = redirect {
            bash_redirect_stdout(&shell_text, path)
        } else {
            shell_text
        }
    }

    /// Start `command` on `host`. Non-blocking unless `blocking` is
    /// true, in which case the returned handle is already resolved. A
    /// non-zero exit is only reported when awaiting the handle.
    pub fn dispatch(
        &self,
        host: &Host,
        command: &str,
        redirect: Option<&Path>,
        blocking: bool,
        policy: &WaitPolicy,
    ) -> Result<JobHandle, RemoteJobError> {
        let shell_text = self.shell_text(host, command, redirect);
        notice!("running: {shell_text}");
        let process = self
            .transport
            .spawn(&shell_text)
            .map_err(|source| RemoteJobError::Spawn {
                shell_text: shell_text.clone(),
                source,
            })?;
        let mut handle = JobHandle {
            shell_text,
            process,
            outcome: None,
        };
        if blocking {
            let shell_text = handle.shell_text.clone();
            let outcome = handle.wait(policy);
            handle = JobHandle {
                shell_text,
                process: Box::new(Resolved),
                outcome: Some(outcome),
            };
        }
        Ok(handle)
    }

    /// Run `command` on `host` and wait for it.
    pub fn run_blocking(
        &self,
        host: &Host,
        command: &str,
        policy: &WaitPolicy,
    ) -> Result<(), RemoteJobError> {
        self.dispatch(host, command, None, true, policy)?
            .into_outcome()
            .expect("blocking dispatch resolves the handle")
    }
}

/// Stand-in process for handles resolved during dispatch
struct Resolved;

impl JobProcess for Resolved {
    fn try_wait(&mut self) -> std::io::Result<Option<JobExit>> {
        Ok(Some(JobExit::Success))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
