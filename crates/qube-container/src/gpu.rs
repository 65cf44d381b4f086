use std::path::Path;

use tracing::warn;

use crate::runner::RunnerKind;
use crate::spawn::{CommandSpec, Spawn};

pub const NVIDIA_TOOLKIT: &str = "nvidia-container-toolkit";
pub const AMD_KFD: &str = "/dev/kfd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuSupport {
    Nvidia,
    Amd,
}

impl GpuSupport {
    pub fn detect(spawn: &dyn Spawn, kfd: &Path) -> Option<Self> {
        if spawn.which(NVIDIA_TOOLKIT).is_some() {
            Some(Self::Nvidia)
        } else if kfd.exists() {
            Some(Self::Amd)
        } else {
            None
        }
    }

    pub fn run_flag(self, runner: RunnerKind) -> &'static str {
        match (self, runner) {
            (Self::Nvidia, RunnerKind::Docker) => "--gpus=all",
            (Self::Nvidia, RunnerKind::Podman) => "--device=nvidia.com/gpu=all",
            (Self::Amd, _) => "--device=/dev/kfd",
        }
    }
}

/// Tell the desktop user a GPU was requested but none is usable.
pub async fn notify_missing(spawn: &dyn Spawn, workload: &str) {
    warn!(workload = %workload, "gpu requested but not detected, starting without it");
    let cmd = CommandSpec::new("dbus-send").args([
        "--session".to_string(),
        "--type=method_call".to_string(),
        "--dest=org.freedesktop.Notifications".to_string(),
        "/org/freedesktop/Notifications".to_string(),
        "org.freedesktop.Notifications.Notify".to_string(),
        "string:qubesome".to_string(),
        "uint32:0".to_string(),
        "string:".to_string(),
        "string:GPU not available".to_string(),
        format!("string:{workload} was started without GPU access"),
        "array:string:".to_string(),
        "dict:string:string:".to_string(),
        "int32:5000".to_string(),
    ]);
    if let Err(e) = spawn.output(&cmd).await {
        warn!(error = %e, "desktop notification failed");
    }
}
