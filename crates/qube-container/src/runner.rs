use std::fmt;
use std::path::PathBuf;

use qube_profile::RunnerChoice;
use tracing::debug;

use crate::error::{ContainerError, Result};
use crate::spawn::{CommandSpec, Spawn};

/// Used when neither podman nor docker is found on `PATH`.
pub const FALLBACK_RUNNER: &str = "/usr/bin/docker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Docker,
    Podman,
}

impl RunnerKind {
    fn binary_name(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// A resolved container runner binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runner {
    pub kind: RunnerKind,
    pub binary: PathBuf,
}

impl Runner {
    /// Honor an explicit choice, else prefer podman, then docker, then the
    /// static fallback.
    pub fn resolve(choice: RunnerChoice, spawn: &dyn Spawn) -> Result<Self> {
        let runner = match choice {
            RunnerChoice::Docker => Self::explicit(RunnerKind::Docker, spawn)?,
            RunnerChoice::Podman => Self::explicit(RunnerKind::Podman, spawn)?,
            RunnerChoice::Firecracker => return Err(ContainerError::UnsupportedRunner(choice)),
            RunnerChoice::Default => [RunnerKind::Podman, RunnerKind::Docker]
                .into_iter()
                .find_map(|kind| {
                    spawn
                        .which(kind.binary_name())
                        .map(|binary| Self { kind, binary })
                })
                .unwrap_or_else(|| Self {
                    kind: RunnerKind::Docker,
                    binary: PathBuf::from(FALLBACK_RUNNER),
                }),
        };
        debug!(runner = %runner.kind, binary = %runner.binary.display(), "resolved runner");
        Ok(runner)
    }

    fn explicit(kind: RunnerKind, spawn: &dyn Spawn) -> Result<Self> {
        let binary = spawn
            .which(kind.binary_name())
            .ok_or_else(|| ContainerError::DependencyMissing(kind.binary_name().to_string()))?;
        Ok(Self { kind, binary })
    }

    /// A command invoking this runner with `args`.
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.binary.to_string_lossy()).args(args)
    }

    /// Id of the container named exactly `name`, if one exists.
    pub async fn find_container(&self, spawn: &dyn Spawn, name: &str) -> Result<Option<String>> {
        let filter = format!("name=^{name}$");
        let out = spawn
            .output(&self.command(["ps", "-a", "-q", "--filter", filter.as_str()]))
            .await?;
        Ok(out.lines().next().map(str::trim).filter(|id| !id.is_empty()).map(String::from))
    }
}
