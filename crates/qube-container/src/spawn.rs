use std::path::PathBuf;

use async_trait::async_trait;

use crate::command::{self, CommandError, format_command_display};

/// A command to run on the host: program, argv and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        format_command_display(&self.program, &self.args)
    }
}

/// The single seam through which every external binary is run.
#[async_trait]
pub trait Spawn: Send + Sync {
    /// Run to completion, capturing trimmed stdout. Non-zero exit is an error.
    async fn output(&self, cmd: &CommandSpec) -> Result<String, CommandError>;
    /// Run with inherited stdio and return the exit code.
    async fn status(&self, cmd: &CommandSpec) -> Result<i32, CommandError>;
    /// Locate `program` on `PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;
}

/// Runs commands on the real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

#[async_trait]
impl Spawn for SystemSpawner {
    async fn output(&self, cmd: &CommandSpec) -> Result<String, CommandError> {
        command::exec(&cmd.program, &cmd.args, &cmd.env).await
    }

    async fn status(&self, cmd: &CommandSpec) -> Result<i32, CommandError> {
        command::exec_inherit(&cmd.program, &cmd.args, &cmd.env).await
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use recorder::Recorder;

#[cfg(any(test, feature = "test-util"))]
mod recorder {
    use std::path::PathBuf;
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;

    use super::{CommandSpec, Spawn};
    use crate::command::CommandError;

    /// A [`Spawn`] that records every command instead of running it.
    ///
    /// Responses are matched by prefix against the rendered command line;
    /// unmatched commands succeed with empty output.
    #[derive(Debug, Default)]
    pub struct Recorder {
        calls: Mutex<Vec<CommandSpec>>,
        responses: Vec<(String, Result<String, i32>)>,
        on_path: Vec<String>,
    }

    impl Recorder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Programs reported as present by [`Spawn::which`].
        pub fn with_path(mut self, programs: &[&str]) -> Self {
            self.on_path.extend(programs.iter().map(|p| p.to_string()));
            self
        }

        /// Commands starting with `prefix` succeed with `stdout`.
        pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
            self.responses.push((prefix.to_string(), Ok(stdout.to_string())));
            self
        }

        /// Commands starting with `prefix` exit with `code`.
        pub fn fail(mut self, prefix: &str, code: i32) -> Self {
            self.responses.push((prefix.to_string(), Err(code)));
            self
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Rendered command lines, in call order.
        pub fn lines(&self) -> Vec<String> {
            self.calls().iter().map(CommandSpec::display).collect()
        }

        fn record(&self, cmd: &CommandSpec) -> Result<String, i32> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(cmd.clone());
            let line = cmd.display();
            self.responses
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map_or(Ok(String::new()), |(_, r)| r.clone())
        }
    }

    #[async_trait]
    impl Spawn for Recorder {
        async fn output(&self, cmd: &CommandSpec) -> Result<String, CommandError> {
            self.record(cmd).map_err(|code| CommandError {
                command: cmd.display(),
                detail: format!("exit status {code}"),
            })
        }

        async fn status(&self, cmd: &CommandSpec) -> Result<i32, CommandError> {
            Ok(self.record(cmd).err().unwrap_or(0))
        }

        fn which(&self, program: &str) -> Option<PathBuf> {
            self.on_path
                .iter()
                .any(|p| p == program)
                .then(|| PathBuf::from(format!("/usr/bin/{program}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_builder() {
        let cmd = CommandSpec::new("podman")
            .arg("ps")
            .args(["-a", "-q"])
            .env("DISPLAY", ":1");
        assert_eq!(cmd.display(), "podman ps -a -q");
        assert_eq!(cmd.env, vec![("DISPLAY".to_string(), ":1".to_string())]);
    }

    #[tokio::test]
    async fn recorder_matches_prefixes() {
        let rec = Recorder::new()
            .respond("docker ps", "abc123")
            .fail("docker run", 125);
        let ps = CommandSpec::new("docker").args(["ps", "-q"]);
        let run = CommandSpec::new("docker").args(["run", "img"]);

        assert_eq!(rec.output(&ps).await.unwrap(), "abc123");
        assert_eq!(rec.status(&run).await.unwrap(), 125);
        assert!(rec.output(&run).await.is_err());
        assert_eq!(rec.lines(), vec!["docker ps -q", "docker run img", "docker run img"]);
    }

    #[tokio::test]
    async fn system_spawner_runs_commands() {
        let out = SystemSpawner
            .output(&CommandSpec::new("echo").arg("hi"))
            .await
            .unwrap();
        assert_eq!(out, "hi");
        assert!(SystemSpawner.which("sh").is_some());
    }
}
