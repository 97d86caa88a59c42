//! Running Larky scripts with the debug server enabled.
//!
//! The debugger only speaks the wire protocol; something else has to start
//! the script so a debug server is listening on the agreed port. That is a
//! [`ScriptEvaluator`]: [`ProcessEvaluator`] shells out to a Larky runner,
//! [`FnEvaluator`] wraps an async closure (tests, embedding).

use std::{
    future::Future,
    io::{self, Write as _},
    path::PathBuf,
    process::Stdio,
};

pub use satellite_core::BoxFuture;
use satellite_core::HttpMessage;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

/// Cap on the stderr captured from a failing runner.
const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("failed to start script runner `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("script runner exited with {}: {stderr}", status.map_or_else(|| "a signal".to_string(), |code| format!("status {code}")))]
    Failed { status: Option<i32>, stderr: String },
    #[error("script runner produced an invalid result: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("script failed: {0}")]
    Script(String),
}

/// Evaluates a script against an HTTP message with debugging enabled on
/// `debug_port`, producing the transformed message.
pub trait ScriptEvaluator: Send + Sync + 'static {
    fn evaluate(
        &self,
        script: String,
        message: HttpMessage,
        debug_port: u16,
    ) -> BoxFuture<Result<HttpMessage, EvaluationError>>;
}

/// [`ScriptEvaluator`] backed by an async closure.
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> ScriptEvaluator for FnEvaluator<F>
where
    F: Fn(String, HttpMessage, u16) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpMessage, EvaluationError>> + Send + 'static,
{
    fn evaluate(
        &self,
        script: String,
        message: HttpMessage,
        debug_port: u16,
    ) -> BoxFuture<Result<HttpMessage, EvaluationError>> {
        Box::pin((self.f)(script, message, debug_port))
    }
}

/// Runs an external Larky runner per evaluation.
///
/// The runner is invoked as
/// `<program> <args..> --debug --debug-port <port> --script <file>` with the
/// script written to a temporary file. The message is written to its stdin as
/// JSON and the resulting message is read back from stdout as JSON.
#[derive(Debug, Clone)]
pub struct ProcessEvaluator {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessEvaluator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn run(
        self,
        script: String,
        message: HttpMessage,
        debug_port: u16,
    ) -> Result<HttpMessage, EvaluationError> {
        let mut script_file = tempfile::Builder::new()
            .prefix("larky-")
            .suffix(".star")
            .tempfile()?;
        script_file.write_all(script.as_bytes())?;
        script_file.flush()?;

        let input = serde_json::to_vec(&message)?;

        tracing::debug!(
            target: "satellite.debugger",
            program = %self.program.display(),
            debug_port,
            "starting script runner"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--debug")
            .arg("--debug-port")
            .arg(debug_port.to_string())
            .arg("--script")
            .arg(script_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EvaluationError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // Feed stdin concurrently so a runner that writes before reading
        // everything cannot deadlock on a full pipe.
        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(&input).await;
                drop(stdin);
                written
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(task) = stdin_task {
            match task.await {
                Ok(Ok(())) => {}
                // The runner may legitimately exit without draining stdin.
                Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(err) => return Err(io::Error::other(err).into()),
            }
        }
        drop(script_file);

        if !output.status.success() {
            let stderr = truncate_lossy(&output.stderr, MAX_STDERR_BYTES);
            return Err(EvaluationError::Failed {
                status: output.status.code(),
                stderr,
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

impl ScriptEvaluator for ProcessEvaluator {
    fn evaluate(
        &self,
        script: String,
        message: HttpMessage,
        debug_port: u16,
    ) -> BoxFuture<Result<HttpMessage, EvaluationError>> {
        Box::pin(self.clone().run(script, message, debug_port))
    }
}

fn truncate_lossy(bytes: &[u8], max: usize) -> String {
    let bytes = &bytes[..bytes.len().min(max)];
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_evaluator_passes_the_debug_port_through() {
        let evaluator = FnEvaluator::new(|script: String, message: HttpMessage, port: u16| async move {
            Ok::<_, EvaluationError>(
                message
                    .with_header("x-port", port.to_string())
                    .with_header("x-script", script),
            )
        });

        let out = evaluator
            .evaluate("print(1)".to_string(), HttpMessage::new("u", "d"), 7300)
            .await
            .unwrap();
        assert_eq!(out.headers.get("x-port").map(String::as_str), Some("7300"));
        assert_eq!(out.headers.get("x-script").map(String::as_str), Some("print(1)"));
    }

    #[test]
    fn stderr_is_truncated_and_trimmed() {
        assert_eq!(truncate_lossy(b"  boom\n", 64), "boom");
        assert_eq!(truncate_lossy(b"abcdef", 3), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_evaluator_round_trips_the_message_through_the_runner() {
        let evaluator = ProcessEvaluator::new("sh").with_args(["-c", "cat"]);
        let message = HttpMessage::new("https://example.com", "{\"a\":1}").with_header("k", "v");

        let out = evaluator
            .evaluate("def main(): pass".to_string(), message.clone(), 7300)
            .await
            .unwrap();
        assert_eq!(out, message);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_evaluator_reports_stderr_on_failure() {
        let evaluator = ProcessEvaluator::new("sh").with_args(["-c", "echo boom >&2; exit 3"]);

        let err = evaluator
            .evaluate(String::new(), HttpMessage::default(), 7300)
            .await
            .unwrap_err();
        match err {
            EvaluationError::Failed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_runner_is_a_spawn_error() {
        let evaluator = ProcessEvaluator::new("/nonexistent/larky-debug-eval");
        let err = evaluator
            .evaluate(String::new(), HttpMessage::default(), 7300)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Spawn { .. }), "{err:?}");
    }
}
