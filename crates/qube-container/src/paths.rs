use std::path::{Path, PathBuf};

pub use qube_proto::IN_PROFILE_SOCKET;

/// Where the running executable is mounted inside containers.
pub const IN_CONTAINER_EXECUTABLE: &str = "/usr/local/bin/qubesome";

/// Runtime paths for one profile under `/run/user/<uid>/qubesome/<profile>/`.
///
/// Ephemeral: created by `start`, gone after reboot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    dir: PathBuf,
}

impl RuntimePaths {
    pub fn new(uid: u32, profile: &str) -> Self {
        Self::with_base(PathBuf::from(format!("/run/user/{uid}/qubesome")), profile)
    }

    /// Runtime paths under a different base (the `qubesome` directory).
    pub fn with_base(base: PathBuf, profile: &str) -> Self {
        Self {
            dir: base.join(profile),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn socket(&self) -> PathBuf {
        self.dir.join("qube.sock")
    }

    /// Stand-in for `/run/user/<uid>` in containers without host dbus.
    pub fn isolated_run_user(&self) -> PathBuf {
        self.dir.join("user")
    }
}

/// Persistent per-profile data under `~/.qubesome/profiles/<profile>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    dir: PathBuf,
}

impl DataPaths {
    pub fn new(home: &Path, profile: &str) -> Self {
        Self::with_dir(home.join(".qubesome").join("profiles").join(profile))
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn server_cookie(&self) -> PathBuf {
        self.dir.join(".Xserver-cookie")
    }

    pub fn client_cookie(&self) -> PathBuf {
        self.dir.join(".Xclient-cookie")
    }

    pub fn machine_id(&self) -> PathBuf {
        self.dir.join("machine-id")
    }

    /// Holds `mimeapps.list` and the default handler `.desktop` file.
    pub fn applications(&self) -> PathBuf {
        self.dir.join("applications")
    }
}

/// Everything a launch needs to know about where a profile lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRuntime {
    pub profile: String,
    pub uid: u32,
    pub runtime: RuntimePaths,
    pub data: DataPaths,
}

impl ProfileRuntime {
    pub fn new(profile: &str, uid: u32, home: &Path) -> Self {
        Self {
            profile: profile.to_string(),
            uid,
            runtime: RuntimePaths::new(uid, profile),
            data: DataPaths::new(home, profile),
        }
    }

    pub fn socket(&self) -> PathBuf {
        self.runtime.socket()
    }
}
