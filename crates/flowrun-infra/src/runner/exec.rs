//! `tool/exec.Run`: run a process.
//!
//! Fields:
//! - `cmd`: a string (split on whitespace) or a list of strings
//! - `dir`: working directory
//! - `env`: struct of `NAME: value` or list of `"NAME=value"` strings
//! - `stdin`: string fed to the process
//! - `stdout` / `stderr`: captured into the result when present and not
//!   `null`; otherwise forwarded to the run's streams
//! - `mustSucceed` (default `true`): a non-zero exit fails the task
//!
//! The child is killed when the run is cancelled.

use std::process::Stdio as ProcessStdio;

use flowrun_core::{RunContext, Runner, RunnerError};
use flowrun_types::{Kind, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const RUN: &str = "tool/exec.Run";

/// Runs the command described by the task value.
pub struct Run;

impl Run {
    /// Checks the command shape up front so a malformed `cmd` fails before
    /// anything is spawned.
    pub fn new(value: &Value) -> Result<Run, RunnerError> {
        match value.get("cmd") {
            None => Err(RunnerError::MissingField("cmd".to_string())),
            Some(Value::String(_) | Value::List(_) | Value::Incomplete(_)) => Ok(Run),
            Some(other) => Err(RunnerError::InvalidField {
                field: "cmd".to_string(),
                expected: Kind::List,
                got: other.kind(),
            }),
        }
    }
}

fn command_line(ctx: &RunContext) -> Result<Vec<String>, RunnerError> {
    let args: Vec<String> = match ctx.field("cmd")? {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::List(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or(RunnerError::InvalidField {
                    field: "cmd".to_string(),
                    expected: Kind::String,
                    got: item.kind(),
                })
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(RunnerError::InvalidField {
                field: "cmd".to_string(),
                expected: Kind::List,
                got: other.kind(),
            });
        }
    };
    if args.is_empty() {
        return Err(RunnerError::failed("empty command"));
    }
    Ok(args)
}

fn environment(ctx: &RunContext) -> Result<Vec<(String, String)>, RunnerError> {
    let mut vars = Vec::new();
    match ctx.value.get("env") {
        None | Some(Value::Incomplete(_)) => {}
        Some(Value::Struct(fields)) => {
            for (name, value) in fields {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Int(_) | Value::Float(_) | Value::Bool(_) => value.to_string(),
                    other => {
                        return Err(RunnerError::failed(format!(
                            "unsupported type {} for environment variable {name}",
                            other.kind()
                        )));
                    }
                };
                vars.push((name.clone(), text));
            }
        }
        Some(Value::List(items)) => {
            for item in items {
                let entry = item
                    .as_str()
                    .ok_or_else(|| RunnerError::failed("env entries must be strings"))?;
                let (name, value) = entry.split_once('=').ok_or_else(|| {
                    RunnerError::failed(format!("env entry {entry:?} is not NAME=value"))
                })?;
                vars.push((name.to_string(), value.to_string()));
            }
        }
        Some(other) => {
            return Err(RunnerError::InvalidField {
                field: "env".to_string(),
                expected: Kind::Struct,
                got: other.kind(),
            });
        }
    }
    Ok(vars)
}

/// A stream is captured when its field exists and is not `null`.
fn captures(ctx: &RunContext, field: &str) -> bool {
    !matches!(ctx.value.get(field), None | Some(Value::Null))
}

impl Runner for Run {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let args = command_line(ctx)?;
        let must_succeed = ctx.bool_or("mustSucceed", true)?;
        let capture_stdout = captures(ctx, "stdout");
        let capture_stderr = captures(ctx, "stderr");
        let stdin = ctx.opt_string("stdin")?.map(str::to_string);

        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .envs(environment(ctx)?)
            .stdin(if stdin.is_some() {
                ProcessStdio::piped()
            } else {
                ProcessStdio::null()
            })
            .stdout(ProcessStdio::piped())
            .stderr(ProcessStdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = ctx.opt_string("dir")? {
            command.current_dir(dir);
        }

        tracing::debug!(task = %ctx.task, cmd = ?args, "spawning process");
        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::failed(format!("command {:?} failed to start: {e}", args[0])))?;

        // Feed stdin while collecting output so neither side fills its pipe
        // and stalls the other.
        let pipe = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                match pipe.write_all(input.as_bytes()).await {
                    // The child may exit without reading all of its input.
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };
        let exchange = async move {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        };

        let output = tokio::select! {
            output = exchange => output?,
            _ = ctx.cancel.cancelled() => {
                tracing::debug!(task = %ctx.task, "run cancelled, killing process");
                return Err(RunnerError::failed("cancelled"));
            }
        };

        let mut result = vec![("success", Value::Bool(output.status.success()))];
        if capture_stdout {
            result.push((
                "stdout",
                Value::String(String::from_utf8_lossy(&output.stdout).into_owned()),
            ));
        } else {
            ctx.stdio.write_stdout(&output.stdout)?;
        }
        if capture_stderr {
            result.push((
                "stderr",
                Value::String(String::from_utf8_lossy(&output.stderr).into_owned()),
            ));
        } else {
            ctx.stdio.write_stderr(&output.stderr)?;
        }

        if must_succeed && !output.status.success() {
            return Err(RunnerError::failed(format!(
                "command {:?} failed: {}",
                args.join(" "),
                output.status
            )));
        }
        Ok(Some(Value::structure(result)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::testutil::{context, json};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn captures_stdout_when_declared() {
        let (ctx, _) = context(
            RUN,
            json(json!({ "cmd": "echo hello world", "stdout": { "$incomplete": "string" } })),
            "",
        );
        let out = Run.run(&ctx).await.unwrap().unwrap();
        assert_eq!(out.get("stdout"), Some(&Value::string("hello world\n")));
        assert_eq!(out.get("success"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn forwards_stdout_when_not_declared() {
        let (ctx, out) = context(RUN, json(json!({ "cmd": ["echo", "forwarded"] })), "");
        let result = Run.run(&ctx).await.unwrap().unwrap();
        assert!(result.get("stdout").is_none());
        assert_eq!(out.contents(), "forwarded\n");
    }

    #[tokio::test]
    async fn feeds_stdin_and_env_and_dir() {
        let tmp = TempDir::new().unwrap();
        let (ctx, _) = context(
            RUN,
            json(json!({
                "cmd": ["sh", "-c", "cat; printf \"$GREETING\"; pwd"],
                "stdin": "in:",
                "env": { "GREETING": "hi:" },
                "dir": tmp.path().to_str().unwrap(),
                "stdout": { "$incomplete": "string" }
            })),
            "",
        );
        let out = Run.run(&ctx).await.unwrap().unwrap();
        let stdout = out.get("stdout").and_then(Value::as_str).unwrap().to_string();
        assert!(stdout.starts_with("in:hi:"), "{stdout}");
        let dir_name = tmp.path().file_name().unwrap().to_str().unwrap();
        assert!(stdout.trim_end().ends_with(dir_name), "{stdout}");
    }

    #[tokio::test]
    async fn failing_command_is_an_error_unless_allowed() {
        let (ctx, _) = context(RUN, json(json!({ "cmd": ["sh", "-c", "exit 3"] })), "");
        let err = Run.run(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("failed"), "{err}");

        let (ctx, _) = context(
            RUN,
            json(json!({ "cmd": ["sh", "-c", "exit 3"], "mustSucceed": false })),
            "",
        );
        let out = Run.run(&ctx).await.unwrap().unwrap();
        assert_eq!(out.get("success"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let (ctx, _) = context(RUN, json(json!({ "cmd": ["sleep", "30"] })), "");
        let cancel = ctx.cancel.clone();
        let started = std::time::Instant::now();
        let (result, ()) = tokio::join!(Run.run(&ctx), async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });
        assert!(result.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn large_stdin_and_stdout_are_exchanged_concurrently() {
        let input = "x".repeat(300_000);
        let (ctx, _) = context(
            RUN,
            json(json!({
                "cmd": ["cat"],
                "stdin": input,
                "stdout": { "$incomplete": "string" }
            })),
            "",
        );
        let out = tokio::time::timeout(std::time::Duration::from_secs(10), Run.run(&ctx))
            .await
            .expect("cat should not stall")
            .unwrap()
            .unwrap();
        let stdout = out.get("stdout").and_then(Value::as_str).unwrap();
        assert_eq!(stdout.len(), 300_000);
    }

    #[tokio::test]
    async fn unread_stdin_is_not_an_error() {
        let (ctx, _) = context(
            RUN,
            json(json!({ "cmd": ["true"], "stdin": "y".repeat(300_000) })),
            "",
        );
        let out = Run.run(&ctx).await.unwrap().unwrap();
        assert_eq!(out.get("success"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_stdin_write() {
        let (ctx, _) = context(
            RUN,
            json(json!({ "cmd": ["sleep", "30"], "stdin": "z".repeat(300_000) })),
            "",
        );
        let cancel = ctx.cancel.clone();
        let run = async {
            let (result, ()) = tokio::join!(Run.run(&ctx), async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                cancel.cancel();
            });
            result
        };
        let result = tokio::time::timeout(std::time::Duration::from_secs(10), run)
            .await
            .expect("cancellation should end the run");
        assert!(result.is_err());
    }

    #[test]
    fn constructor_rejects_bad_cmd() {
        assert!(Run::new(&json(json!({ "cmd": 3 }))).is_err());
        assert!(Run::new(&json(json!({}))).is_err());
        assert!(Run::new(&json(json!({ "cmd": "ls" }))).is_ok());
    }
}
