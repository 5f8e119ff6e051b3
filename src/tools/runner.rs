// src/tools/runner.rs
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{truncate_output, DiscoveryError, DiscoveryResult};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const STDERR_LIMIT: usize = 500;

/// One external command to run
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub fail_on_nonzero: bool,
    pub stdin: Option<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            fail_on_nonzero: false,
            stdin: None,
        }
    }

    pub fn fail_on_nonzero(mut self, fail: bool) -> Self {
        self.fail_on_nonzero = fail;
        self
    }

    /// Feed newline-joined lines on stdin
    pub fn stdin_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = lines.into_iter()
            .map(|l| l.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        self.stdin = Some(joined);
        self
    }

    pub fn input_lines(&self) -> usize {
        self.stdin.as_deref().map(|s| s.lines().count()).unwrap_or(0)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam between stage modules and process execution
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> DiscoveryResult<ToolOutput>;
}

/// Runs tools as child processes with timeout and termination escalation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self { grace: DEFAULT_GRACE_PERIOD }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time between the graceful and the forceful termination signal
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Resolve each tool on PATH
    pub fn check_dependencies(tools: &[&str]) -> BTreeMap<String, Option<PathBuf>> {
        let results: BTreeMap<String, Option<PathBuf>> = tools.iter()
            .map(|tool| (tool.to_string(), which::which(tool).ok()))
            .collect();

        let missing: Vec<&str> = results.iter()
            .filter(|(_, path)| path.is_none())
            .map(|(tool, _)| tool.as_str())
            .collect();
        if !missing.is_empty() {
            warn!("Missing tools: {}", missing.join(", "));
        }

        results
    }

    /// SIGTERM to the tool's process group, SIGKILL once the grace period
    /// runs out. Descendants holding the output pipes share the group.
    async fn terminate(&self, child: &mut Child, group: Option<u32>, tool: &str) {
        #[cfg(unix)]
        {
            if let Some(pgid) = group {
                use nix::sys::signal::{killpg, Signal};
                use nix::unistd::Pid;

                let pgid = Pid::from_raw(pgid as i32);
                match killpg(pgid, Signal::SIGTERM) {
                    Ok(()) => match tokio::time::timeout(self.grace, child.wait()).await {
                        Ok(Ok(status)) => debug!("{} exited after SIGTERM with {}", tool, status),
                        _ => warn!("{} survived SIGTERM for {:?}, killing", tool, self.grace),
                    },
                    Err(e) => debug!("SIGTERM to {} failed: {}", tool, e),
                }
                // the group is usually gone by now
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = group;

        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.kill().await {
                error!("Failed to kill {}: {}", tool, e);
            }
        }
    }

    fn timeout_error(invocation: &ToolInvocation) -> DiscoveryError {
        DiscoveryError::ToolTimeout {
            tool: invocation.program.clone(),
            seconds: invocation.timeout.as_secs(),
            input_lines: invocation.input_lines(),
        }
    }
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                debug!("Output stream closed early: {}", e);
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> DiscoveryResult<ToolOutput> {
        let tool = invocation.program.as_str();
        let path = which::which(tool)
            .map_err(|_| DiscoveryError::ToolNotFound(tool.to_string()))?;

        debug!("Running: {}", invocation.command_line());

        let mut command = Command::new(&path);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let deadline = Instant::now() + invocation.timeout;
        let mut child = command
            .spawn()
            .map_err(|e| DiscoveryError::ToolExecution {
                tool: tool.to_string(),
                exit_code: None,
                stderr: format!("Failed to spawn: {}", e),
            })?;
        let group = child.id();

        if let (Some(payload), Some(mut stdin)) = (invocation.stdin.clone(), child.stdin.take()) {
            let tool_name = tool.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!("Writing stdin to {} failed: {}", tool_name, e);
                }
                // dropping stdin closes the pipe
            });
        }

        let mut stdout_task = spawn_reader(child.stdout.take());
        let mut stderr_task = spawn_reader(child.stderr.take());

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(DiscoveryError::ToolExecution {
                    tool: tool.to_string(),
                    exit_code: None,
                    stderr: format!("Failed to wait for process: {}", e),
                });
            }
            Err(_) => {
                error!("Tool {} timed out after {:?}", tool, invocation.timeout);
                self.terminate(&mut child, group, tool).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Self::timeout_error(invocation));
            }
        };

        // a leftover descendant can hold the pipes open after the tool exits
        let drained = tokio::time::timeout_at(deadline, async {
            ((&mut stdout_task).await, (&mut stderr_task).await)
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
            Err(_) => {
                error!("Tool {} exited but its output stayed open past {:?}", tool, invocation.timeout);
                self.terminate(&mut child, group, tool).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Self::timeout_error(invocation));
            }
        };

        let output = ToolOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        };

        if !output.success() {
            warn!(
                "Tool {} exited with code {:?}: {}",
                tool,
                output.exit_code,
                truncate_output(&output.stderr, 200)
            );
            if invocation.fail_on_nonzero {
                return Err(DiscoveryError::ToolExecution {
                    tool: tool.to_string(),
                    exit_code: output.exit_code,
                    stderr: truncate_output(&output.stderr, STDERR_LIMIT),
                });
            }
        }

        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str, timeout: Duration) -> ToolInvocation {
        ToolInvocation::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_found() {
        let runner = ProcessRunner::new();
        let invocation = ToolInvocation::new("surely-not-an-installed-tool-42", vec![], Duration::from_secs(5));
        let err = runner.run(&invocation).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stdin_payload_is_written_and_closed() {
        let runner = ProcessRunner::new();
        let invocation = ToolInvocation::new("cat", vec![], Duration::from_secs(5))
            .stdin_lines(["a.example.com", "b.example.com"]);

        let output = runner.run(&invocation).await.unwrap();
        assert_eq!(output.stdout, "a.example.com\nb.example.com");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tolerated_unless_requested() {
        let runner = ProcessRunner::new();
        let script = "echo partial; echo oops >&2; exit 3";

        let output = runner.run(&sh(script, Duration::from_secs(5))).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "partial");

        let err = runner.run(&sh(script, Duration::from_secs(5)).fail_on_nonzero(true)).await.unwrap_err();
        match err {
            DiscoveryError::ToolExecution { exit_code, stderr, .. } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let runner = ProcessRunner::new().with_grace_period(Duration::from_millis(500));
        let invocation = ToolInvocation::new("sleep", vec!["30".to_string()], Duration::from_millis(200))
            .stdin_lines(["one", "two", "three"]);

        let started = Instant::now();
        let err = runner.run(&invocation).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            DiscoveryError::ToolTimeout { tool, input_lines, .. } => {
                assert_eq!(tool, "sleep");
                assert_eq!(input_lines, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_process_ignoring_sigterm_is_killed_after_grace() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}; trap '' TERM; exec sleep 30", pid_file.display());

        let runner = ProcessRunner::new().with_grace_period(Duration::from_millis(300));
        let started = Instant::now();
        let err = runner.run(&sh(&script, Duration::from_millis(500))).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(kill(Pid::from_raw(pid), None).is_err(), "process {pid} still alive");
    }

    #[tokio::test]
    async fn test_background_child_holding_output_times_out() {
        let runner = ProcessRunner::new().with_grace_period(Duration::from_millis(300));
        let started = Instant::now();
        let err = runner.run(&sh("sleep 8 & echo hi", Duration::from_secs(1))).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(4), "run took {:?}", started.elapsed());
    }

    #[test]
    fn test_check_dependencies() {
        let results = ProcessRunner::check_dependencies(&["sh", "surely-not-an-installed-tool-42"]);
        assert!(results["sh"].is_some());
        assert!(results["surely-not-an-installed-tool-42"].is_none());
    }
}
