use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use tokio::process::Command;
use tracing::trace;

/// Error from a failed command.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

/// Format a human-readable display string for a command invocation.
pub(crate) fn format_command_display<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend(args.iter().map(AsRef::as_ref));
    parts.join(" ")
}

fn build<S: AsRef<str>>(program: &str, args: &[S], env: &[(String, String)]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(AsRef::as_ref));
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd
}

/// Execute a command and capture its output.
///
/// Returns trimmed stdout on success, stderr in the error otherwise.
pub async fn exec<S: AsRef<str>>(
    program: &str,
    args: &[S],
    env: &[(String, String)],
) -> Result<String, CommandError> {
    let cmd_display = format_command_display(program, args);
    trace!(command = %cmd_display, "exec");

    let output = build(program, args, env)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| CommandError {
            command: cmd_display.clone(),
            detail: e.to_string(),
        })?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(CommandError {
            command: cmd_display,
            detail: stderr,
        })
    }
}

/// Execute a command with inherited stdio and return its exit code.
///
/// A process killed by a signal reports `128 + signo`, like a shell.
pub async fn exec_inherit<S: AsRef<str>>(
    program: &str,
    args: &[S],
    env: &[(String, String)],
) -> Result<i32, CommandError> {
    let cmd_display = format_command_display(program, args);
    trace!(command = %cmd_display, "exec_inherit");

    let status = build(program, args, env)
        .status()
        .await
        .map_err(|e| CommandError {
            command: cmd_display,
            detail: e.to_string(),
        })?;

    if let Some(code) = status.code() {
        return Ok(code);
    }
    Ok(status.signal().map_or(1, |sig| 128 + sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ENV: &[(String, String)] = &[];

    #[test]
    fn format_command_display_joins_args() {
        let display = format_command_display("docker", &["ps", "-a", "-q"]);
        assert_eq!(display, "docker ps -a -q");
    }

    #[tokio::test]
    async fn exec_returns_trimmed_stdout() {
        let output = exec("echo", &["hello"], NO_ENV).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn exec_passes_env() {
        let env = vec![("QUBE_TEST".to_string(), "x1".to_string())];
        let output = exec("sh", &["-c", "echo $QUBE_TEST"], &env).await.unwrap();
        assert_eq!(output, "x1");
    }

    #[tokio::test]
    async fn exec_error_contains_stderr() {
        let err = exec("sh", &["-c", "echo oops >&2; exit 1"], NO_ENV)
            .await
            .unwrap_err();
        assert!(err.detail.contains("oops"), "detail was: {}", err.detail);
        assert!(err.command.starts_with("sh -c"), "command was: {}", err.command);
    }

    #[tokio::test]
    async fn exec_inherit_surfaces_exit_code() {
        assert_eq!(exec_inherit("true", &[] as &[&str], NO_ENV).await.unwrap(), 0);
        assert_eq!(exec_inherit("sh", &["-c", "exit 7"], NO_ENV).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn exec_inherit_missing_program_is_an_error() {
        let err = exec_inherit("/nonexistent/qube-bin", &["x"], NO_ENV)
            .await
            .unwrap_err();
        assert_eq!(err.command, "/nonexistent/qube-bin x");
    }
}
