use std::path::{Path, PathBuf};

use qube_container::{DataPaths, ProfileRuntime, RuntimePaths};
use qube_profile::{ComposeContext, Expansions};

use crate::error::{QubesomeError, QubesomeResult};

/// Name of the top-level config file, both under `~/.qubesome` and inside
/// git or local profile checkouts.
pub const CONFIG_FILE: &str = "qubesome.config";

/// Everything read from the process environment, captured once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnv {
    pub home: PathBuf,
    pub uid: u32,
    /// `/run/user/<uid>/qubesome`
    pub runtime_base: PathBuf,
    pub state_home: Option<PathBuf>,
    pub xdg_runtime_dir: Option<PathBuf>,
    pub wayland: bool,
    pub xauthority: Option<String>,
    pub display: Option<String>,
}

impl HostEnv {
    pub fn from_process() -> QubesomeResult<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let home = var("HOME").ok_or(QubesomeError::MissingEnv("HOME"))?;
        let uid = nix::unistd::getuid().as_raw();
        Ok(Self {
            home: PathBuf::from(home),
            uid,
            runtime_base: PathBuf::from(format!("/run/user/{uid}/qubesome")),
            state_home: var("XDG_STATE_HOME").map(PathBuf::from),
            xdg_runtime_dir: var("XDG_RUNTIME_DIR").map(PathBuf::from),
            wayland: var("XDG_SESSION_TYPE").is_some_and(|s| s == "wayland"),
            xauthority: var("XAUTHORITY"),
            display: var("DISPLAY"),
        })
    }

    /// `~/.qubesome`
    pub fn qubesome_dir(&self) -> PathBuf {
        self.home.join(".qubesome")
    }

    pub fn default_config(&self) -> PathBuf {
        self.qubesome_dir().join(CONFIG_FILE)
    }

    /// Parent of all git profile checkouts.
    pub fn git_dir(&self) -> PathBuf {
        self.qubesome_dir().join("git")
    }

    /// `$XDG_STATE_HOME/qubesome/qubesome.log`, `~/.local/state` when unset.
    pub fn log_file(&self) -> PathBuf {
        self.state_home
            .clone()
            .unwrap_or_else(|| self.home.join(".local").join("state"))
            .join("qubesome")
            .join("qubesome.log")
    }

    pub fn runtime(&self, profile: &str) -> ProfileRuntime {
        ProfileRuntime {
            profile: profile.to_string(),
            uid: self.uid,
            runtime: RuntimePaths::with_base(self.runtime_base.clone(), profile),
            data: DataPaths::new(&self.home, profile),
        }
    }

    /// `${GITDIR}` is the directory holding the loaded config.
    pub fn expansions(&self, config_dir: &Path) -> Expansions {
        Expansions::for_host(&self.home, Some(config_dir))
    }

    pub fn compose_context(&self, config_dir: &Path) -> ComposeContext {
        ComposeContext {
            expansions: self.expansions(config_dir),
            wayland: self.wayland,
            xdg_runtime_dir: self.xdg_runtime_dir.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_env(root: &Path) -> HostEnv {
    HostEnv {
        home: root.join("home"),
        uid: 1000,
        runtime_base: root.join("run").join("qubesome"),
        state_home: None,
        xdg_runtime_dir: None,
        wayland: false,
        xauthority: None,
        display: None,
    }
}
