use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use crate::{
    dynamic_routing::node::Endpoint,
    request_router::classify::{classify, FailureClass},
};

/// Variables through which the collaborator learns which endpoint to talk to.
pub const API_TARGET_VARS: [&str; 3] = ["ALEPH_API_SERVER", "ALEPH_API_HOST", "ALEPH_API_URL"];

/// Harmless warnings the collaborator prints on every run; dropped from its error stream.
pub const STDERR_NOISE: &[&str] = &[
    "Could not import library 'magic'",
    "Consider installing rusty-rlp",
    "No account type specified",
    "Detected ETH account",
];

/// Exit code reported when the collaborator exceeds its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when the collaborator cannot be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// What a delegated call produced, passed back to the caller untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error, minus known noise.
    pub stderr: String,
    /// Exit status, `0` on success.
    pub exit_code: i32,
}

impl CallOutput {
    /// Creates a new `CallOutput`.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// The class of the failure, `None` on success.
    pub fn failure_class(&self) -> Option<FailureClass> {
        (!self.is_success()).then(|| classify(&self.stderr))
    }

    /// Whether the call failed in a way another endpoint might not.
    pub fn is_network_failure(&self) -> bool {
        self.failure_class() == Some(FailureClass::Network)
    }
}

/// A unit of work delegated to an external collaborator, parameterized by its target.
#[async_trait]
pub trait Call: Send + Sync {
    /// Performs the call against `target`, or against the collaborator's own default when `None`.
    async fn invoke(&self, target: Option<&Endpoint>) -> CallOutput;
}

/// Runs a program, pointing it at the target through [`API_TARGET_VARS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCall {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
    timeout: Option<Duration>,
}

impl ProcessCall {
    /// Creates a call of `program` with `args`, without input or timeout.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: None,
        }
    }

    /// Feeds `input` to the program's standard input.
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Kills the program if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn strip_noise(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !STDERR_NOISE.iter().any(|noise| line.contains(noise)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Call for ProcessCall {
    async fn invoke(&self, target: Option<&Endpoint>) -> CallOutput {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in API_TARGET_VARS {
            match target {
                Some(endpoint) => command.env(var, endpoint.as_str()),
                None => command.env_remove(var),
            };
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return CallOutput::new(
                    "",
                    format!("Failed to start {}: {err}", self.program),
                    SPAWN_FAILURE_EXIT_CODE,
                )
            }
        };

        // Input is fed while the output pipes drain.
        let stdin = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut pipe)) = (self.stdin.as_deref(), stdin) {
                if let Err(err) = pipe.write_all(input.as_bytes()).await {
                    debug!("failed to write stdin of {}: {err}", self.program);
                }
            }
        };
        let exchange = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(output) => output,
                Err(_) => {
                    return CallOutput::new(
                        "",
                        format!("TimeoutError: {} did not finish within {timeout:?}", self.program),
                        TIMEOUT_EXIT_CODE,
                    )
                }
            },
            None => exchange.await,
        };

        match output {
            Ok(output) => CallOutput::new(
                String::from_utf8_lossy(&output.stdout),
                strip_noise(&String::from_utf8_lossy(&output.stderr)),
                // Killed by a signal.
                output.status.code().unwrap_or(1),
            ),
            Err(err) => CallOutput::new("", format!("Failed to wait for {}: {err}", self.program), 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_of_outputs() {
        assert!(CallOutput::new("ok", "", 0).is_success());
        assert_eq!(CallOutput::new("ok", "TimeoutError", 0).failure_class(), None);
        assert!(CallOutput::new("", "", 1).is_network_failure());
        assert!(CallOutput::new("", "HTTP 503", 1).is_network_failure());
        assert_eq!(
            CallOutput::new("", "Error: invalid key", 1).failure_class(),
            Some(FailureClass::NonNetwork)
        );
    }

    #[test]
    fn noise_lines_are_removed() {
        let stderr = "Could not import library 'magic', file type detection disabled\nreal problem\nDetected ETH account\n";
        assert_eq!(strip_noise(stderr), "real problem");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn target_is_exported_to_the_child() {
        let call = ProcessCall::new(
            "sh",
            ["-c", r#"printf '%s %s %s' "$ALEPH_API_SERVER" "$ALEPH_API_HOST" "$ALEPH_API_URL""#],
        );
        let endpoint = Endpoint::new("http://10.0.0.1:4024").unwrap();

        let output = call.invoke(Some(&endpoint)).await;

        assert_eq!(output.exit_code, 0);
        assert_eq!(
            output.stdout,
            "http://10.0.0.1:4024 http://10.0.0.1:4024 http://10.0.0.1:4024"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn default_target_clears_the_variables() {
        let call = ProcessCall::new("sh", ["-c", r#"printf '%s' "${ALEPH_API_URL:-unset}""#]);

        let output = call.invoke(None).await;

        assert_eq!(output.stdout, "unset");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_stderr_and_status_are_passed_through() {
        let call = ProcessCall::new(
            "sh",
            [
                "-c",
                r#"cat; echo "$1" >&2; echo "bad argument" >&2; exit 3"#,
                "sh",
                "Consider installing rusty-rlp to improve performance",
            ],
        )
        .with_stdin("payload");

        let output = call.invoke(None).await;

        assert_eq!(output.stdout, "payload");
        assert_eq!(output.stderr, "bad argument");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.failure_class(), Some(FailureClass::NonNetwork));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_call_times_out() {
        let call = ProcessCall::new("sleep", ["5"]).with_timeout(Duration::from_millis(100));

        let output = call.invoke(None).await;

        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(output.stderr.starts_with("TimeoutError"));
        assert!(output.is_network_failure());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_stdin_is_fed_while_output_drains() {
        let input = "x".repeat(1 << 20);
        let call = ProcessCall::new("cat", Vec::<String>::new())
            .with_stdin(input.clone())
            .with_timeout(Duration::from_secs(10));

        let output = tokio::time::timeout(Duration::from_secs(20), call.invoke(None))
            .await
            .expect("invoke must honour its own timeout");

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.len(), input.len());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_covers_a_child_stuck_on_its_input() {
        // Never reads stdin, so a large input can only be written partially.
        let call = ProcessCall::new("sleep", ["5"])
            .with_stdin("x".repeat(1 << 20))
            .with_timeout(Duration::from_millis(200));

        let output = tokio::time::timeout(Duration::from_secs(4), call.invoke(None))
            .await
            .expect("invoke must honour its own timeout");

        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let call = ProcessCall::new("/nonexistent/aleph-cli", Vec::<String>::new());

        let output = call.invoke(None).await;

        assert_eq!(output.exit_code, SPAWN_FAILURE_EXIT_CODE);
        assert!(output.stderr.contains("/nonexistent/aleph-cli"));
    }
}
