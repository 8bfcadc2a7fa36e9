//! Fully-specified external commands and the process-runner capability.
//!
//! A [`CommandSpec`] is pure data: argv, environment additions, stdin
//! source, working directory, process-group placement, and an optional
//! bounded wait. The [`ProcessRunner`] seam lets tests substitute a
//! [`RecordingRunner`] without touching any global state.

use crate::cancel::CancelToken;
use crate::{EngineError, RETRY_EXIT_CODE};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StdinSource {
    /// Inherit the launcher's stdin (interactive commands).
    #[default]
    Inherit,
    Null,
    /// Feed the given text through a pipe (Dockerfile, provisioning stream).
    Text(String),
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Step name used in diagnostics and by the recording runner.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    /// Environment additions on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub stdin: StdinSource,
    /// Place the child in its own process group so cancellation reaches the
    /// whole subtree.
    pub own_group: bool,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            stdin: StdinSource::Inherit,
            own_group: false,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Position of `flag value` in the argument vector, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.chars().any(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Capability for running external commands. One implementation talks to the
/// host; the recording one drives orchestrator tests.
pub trait ProcessRunner {
    /// Runs the command attached to the launcher's stdio and waits for it.
    fn run(&self, spec: &CommandSpec) -> Result<(), EngineError>;

    /// Runs the command and returns its captured standard output.
    fn capture(&self, spec: &CommandSpec) -> Result<String, EngineError>;
}

/// Runs commands on the host, registering each child's process group with
/// the cancellation token for the duration of the wait.
pub struct HostRunner {
    cancel: CancelToken,
}

impl HostRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    fn prepare(&self, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        if spec.own_group {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    fn feed_stdin(child: &mut Child, spec: &CommandSpec) {
        if let StdinSource::Text(text) = &spec.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                let text = text.clone();
                // Written from a separate thread so a slow reader cannot
                // deadlock against the pipe buffer.
                std::thread::spawn(move || {
                    let _ = pipe.write_all(text.as_bytes());
                });
            }
        }
    }

    fn wait(child: &mut Child, spec: &CommandSpec) -> Result<ExitStatus, EngineError> {
        let Some(timeout) = spec.timeout else {
            return Ok(child.wait()?);
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Timeout {
                    step: spec.label.clone(),
                    seconds: timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn interpret(&self, spec: &CommandSpec, status: ExitStatus) -> Result<(), EngineError> {
        if status.success() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                step: spec.label.clone(),
            });
        }
        let code = status.code().unwrap_or(-1);
        if code == RETRY_EXIT_CODE {
            return Err(EngineError::RetryRequested {
                step: spec.label.clone(),
            });
        }
        Err(EngineError::ExternalCommand {
            step: spec.label.clone(),
            code,
        })
    }

    fn spawn_and_wait(&self, spec: &CommandSpec, mut cmd: Command) -> Result<ExitStatus, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                step: spec.label.clone(),
            });
        }
        tracing::debug!(step = %spec.label, command = %spec, "spawning external command");
        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            step: spec.label.clone(),
            source,
        })?;
        Self::feed_stdin(&mut child, spec);
        let registered = spec.own_group;
        if registered {
            if let Ok(pid) = i32::try_from(child.id()) {
                self.cancel.register_pgid(pid);
            }
        }
        let waited = Self::wait(&mut child, spec);
        if registered {
            self.cancel.clear_pgid();
        }
        waited
    }
}

impl ProcessRunner for HostRunner {
    fn run(&self, spec: &CommandSpec) -> Result<(), EngineError> {
        let mut cmd = self.prepare(spec);
        match &spec.stdin {
            StdinSource::Inherit => cmd.stdin(Stdio::inherit()),
            StdinSource::Null => cmd.stdin(Stdio::null()),
            StdinSource::Text(_) => cmd.stdin(Stdio::piped()),
        };
        let status = self.spawn_and_wait(spec, cmd)?;
        self.interpret(spec, status)
    }

    fn capture(&self, spec: &CommandSpec) -> Result<String, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                step: spec.label.clone(),
            });
        }
        let mut cmd = self.prepare(spec);
        cmd.stdin(Stdio::null());
        tracing::debug!(step = %spec.label, command = %spec, "capturing external command");
        let output = cmd.output().map_err(|source| EngineError::Spawn {
            step: spec.label.clone(),
            source,
        })?;
        self.interpret(spec, output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Records every command instead of running it. Failures and probe outputs
/// are scripted per step label.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<CommandSpec>>,
    failures: Mutex<HashMap<String, i32>>,
    outputs: Mutex<HashMap<String, String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the step with this label fail with the given exit code.
    pub fn fail_step(&self, label: &str, code: i32) {
        lock(&self.failures).insert(label.to_owned(), code);
    }

    /// Scripts captured stdout for the step with this label.
    pub fn respond(&self, label: &str, output: &str) {
        lock(&self.outputs).insert(label.to_owned(), output.to_owned());
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        lock(&self.commands).clone()
    }

    pub fn labels(&self) -> Vec<String> {
        lock(&self.commands).iter().map(|c| c.label.clone()).collect()
    }

    fn record(&self, spec: &CommandSpec) -> Result<(), EngineError> {
        lock(&self.commands).push(spec.clone());
        if let Some(code) = lock(&self.failures).get(&spec.label).copied() {
            if code == RETRY_EXIT_CODE {
                return Err(EngineError::RetryRequested {
                    step: spec.label.clone(),
                });
            }
            return Err(EngineError::ExternalCommand {
                step: spec.label.clone(),
                code,
            });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<(), EngineError> {
        self.record(spec)
    }

    fn capture(&self, spec: &CommandSpec) -> Result<String, EngineError> {
        self.record(spec)?;
        Ok(lock(&self.outputs).get(&spec.label).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_whitespace_args() {
        let spec = CommandSpec::new("probe", "docker")
            .arg("ps")
            .arg("--filter")
            .arg("name=my app");
        assert_eq!(spec.to_string(), "docker ps --filter 'name=my app'");
    }

    #[test]
    fn flag_value_finds_pairs() {
        let spec = CommandSpec::new("run", "docker")
            .args(["run", "--name", "app", "-i"]);
        assert_eq!(spec.flag_value("--name"), Some("app"));
        assert_eq!(spec.flag_value("--missing"), None);
        assert!(spec.has_arg("-i"));
    }

    #[test]
    fn host_runner_runs_true() {
        let runner = HostRunner::new(CancelToken::new());
        let spec = CommandSpec::new("noop", "true");
        runner.run(&spec).unwrap();
    }

    #[test]
    fn host_runner_reports_exit_code() {
        let runner = HostRunner::new(CancelToken::new());
        let spec = CommandSpec::new("fail", "false");
        let err = runner.run(&spec).unwrap_err();
        assert!(matches!(err, EngineError::ExternalCommand { code, .. } if code != 0));
    }

    #[test]
    fn host_runner_detects_retry_sentinel() {
        let runner = HostRunner::new(CancelToken::new());
        let spec = CommandSpec::new("retry", "sh").args(["-c", "exit 77"]);
        let err = runner.run(&spec).unwrap_err();
        assert!(matches!(err, EngineError::RetryRequested { step } if step == "retry"));
    }

    #[test]
    fn host_runner_captures_stdout() {
        let runner = HostRunner::new(CancelToken::new());
        let spec = CommandSpec::new("echo", "echo").arg("hello");
        assert_eq!(runner.capture(&spec).unwrap(), "hello\n");
    }

    #[test]
    fn host_runner_pipes_stdin_text() {
        let runner = HostRunner::new(CancelToken::new());
        let mut spec = CommandSpec::new("cat", "sh").args(["-c", "cat > /dev/null"]);
        spec.stdin = StdinSource::Text("line one\nline two\n".to_owned());
        runner.run(&spec).unwrap();
    }

    #[test]
    fn host_runner_refuses_after_cancel() {
        let token = CancelToken::new();
        token.trigger();
        let runner = HostRunner::new(token);
        let err = runner.run(&CommandSpec::new("late", "true")).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[test]
    fn host_runner_times_out() {
        let runner = HostRunner::new(CancelToken::new());
        let mut spec = CommandSpec::new("sleepy", "sleep").arg("5");
        spec.timeout = Some(Duration::from_millis(100));
        let err = runner.run(&spec).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[test]
    fn recording_runner_scripts_failures_and_outputs() {
        let runner = RecordingRunner::new();
        runner.fail_step("bad", 3);
        runner.respond("probe", "abc123\n");

        runner.run(&CommandSpec::new("ok", "docker")).unwrap();
        let err = runner.run(&CommandSpec::new("bad", "docker")).unwrap_err();
        assert!(matches!(err, EngineError::ExternalCommand { code: 3, .. }));
        assert_eq!(runner.capture(&CommandSpec::new("probe", "docker")).unwrap(), "abc123\n");
        assert_eq!(runner.labels(), vec!["ok", "bad", "probe"]);
    }
}
