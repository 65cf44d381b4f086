use std::path::PathBuf;

use qube_container::{CommandError, ContainerError, XauthError};
use qube_inception::InceptionError;
use qube_profile::ProfileError;

#[derive(Debug, thiserror::Error)]
pub enum QubesomeError {
    #[error("config {}: {message}", path.display())]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("profile {0} not found")]
    ProfileNotFound(String),

    #[error("workload {workload} not found in profile {profile}")]
    WorkloadNotFound { workload: String, profile: String },

    #[error("{0} not found in PATH")]
    DependencyMissing(String),

    #[error("{}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("no mime handler for {0:?}")]
    UnhandledScheme(String),

    #[error("profile {0} is already running")]
    ProfileAlreadyRunning(String),

    #[error("profile {0} is not running, start it first")]
    ProfileNotRunning(String),

    #[error("{command} exited with status {code}")]
    RunnerFailure { command: String, code: i32 },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("interrupted by {0}")]
    Interrupted(&'static str),

    #[error("logging setup: {0}")]
    Logging(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Xauth(#[from] XauthError),

    #[error(transparent)]
    Inception(#[from] InceptionError),
}

impl QubesomeError {
    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Filesystem { path, source }
    }
}

pub type QubesomeResult<T> = Result<T, QubesomeError>;
