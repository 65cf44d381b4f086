use std::path::PathBuf;

use qube_profile::{ProfileError, RunnerChoice};

use crate::command::CommandError;

#[derive(Debug, thiserror::Error)]
pub enum XauthError {
    #[error("invalid parent authority: {0} bytes, need at least 50")]
    InvalidAuthority(usize),

    #[error("entropy source failed: {0}")]
    Crypto(#[source] rand::Error),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Xauth(#[from] XauthError),

    #[error("{0} not found in PATH")]
    DependencyMissing(String),

    #[error("runner {0} is not supported for containers")]
    UnsupportedRunner(RunnerChoice),

    #[error("{}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flatpak {app} is not allowed in profile {profile}")]
    FlatpakNotAllowed { app: String, profile: String },
}

impl ContainerError {
    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Filesystem { path, source }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
