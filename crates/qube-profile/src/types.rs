use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Which container runner a profile or workload asks for.
///
/// An empty string in YAML means [`RunnerChoice::Default`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerChoice {
    #[default]
    #[serde(rename = "", alias = "default")]
    Default,
    Docker,
    Podman,
    Firecracker,
}

impl FromStr for RunnerChoice {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "default" => Ok(Self::Default),
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "firecracker" => Ok(Self::Firecracker),
            other => Err(ProfileError::UnknownRunner(other.to_string())),
        }
    }
}

impl fmt::Display for RunnerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Docker => f.write_str("docker"),
            Self::Podman => f.write_str("podman"),
            Self::Firecracker => f.write_str("firecracker"),
        }
    }
}

/// Host capabilities. A profile uses it to state what it allows, a workload
/// to state what it wants; the effective set is their intersection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostAccess {
    pub x11: bool,
    pub camera: bool,
    pub microphone: bool,
    pub speakers: bool,
    pub smartcard: bool,
    pub dbus: bool,
    pub bluetooth: bool,
    pub machine_id: bool,
    pub local_time: bool,
    pub var_run_user: bool,
    pub mime: bool,
    pub privileged: bool,
    /// Empty, `none`, or a runner-specific network name.
    pub network: String,
    pub gpus: String,
    pub caps_add: Vec<String>,
    pub devices: Vec<String>,
    /// Human-readable USB product-name prefixes.
    pub usb_devices: Vec<String>,
    /// `host_path[:container_path[:ro]]` entries.
    pub paths: Vec<String>,
    /// Labels of profile external drives to mount.
    pub external_drives: Vec<String>,
}

impl HostAccess {
    /// Whether any audio device is requested.
    pub fn audio(&self) -> bool {
        self.microphone || self.speakers
    }

    /// Whether the host `/run/user/<uid>` must be shared with the container.
    pub fn shares_run_user(&self) -> bool {
        self.dbus || self.bluetooth || self.var_run_user
    }
}

/// Persistent configuration of one isolated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Filled in from the key of the `profiles` map when not given.
    #[serde(default)]
    pub name: String,
    /// X display number used by the nested server.
    pub display: u8,
    /// Directory holding the profile's dotfiles and `workloads/`.
    pub path: PathBuf,
    pub window_manager: String,
    #[serde(default)]
    pub xephyr_args: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub runner: RunnerChoice,
    #[serde(default)]
    pub host_access: HostAccess,
    /// `label:host_path:mount_path` triples.
    #[serde(default)]
    pub external_drives: Vec<String>,
    /// Reverse-DNS flatpak ids allowed in this profile.
    #[serde(default)]
    pub flatpaks: Vec<String>,
    /// Override for the nested-server image.
    #[serde(default)]
    pub image: String,
}

impl Profile {
    /// Container name of the nested X server.
    pub fn container_name(&self) -> String {
        format!("qubesome-{}", self.name)
    }

    /// Look up an external drive by label.
    pub fn external_drive(&self, label: &str) -> Option<ExternalDrive> {
        self.external_drives
            .iter()
            .filter_map(|d| ExternalDrive::parse(d).ok())
            .find(|d| d.label == label)
    }
}

/// A parsed `label:host_path:mount_path` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDrive {
    pub label: String,
    pub host_path: PathBuf,
    pub mount_path: PathBuf,
}

impl ExternalDrive {
    pub fn parse(entry: &str) -> Result<Self, ProfileError> {
        let malformed = || ProfileError::MalformedExternalDrive(entry.to_string());
        let mut parts = entry.splitn(3, ':');
        let label = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let host = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let mount = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let host_path = PathBuf::from(host);
        let mount_path = PathBuf::from(mount);
        if !host_path.is_absolute() || !mount_path.is_absolute() {
            return Err(malformed());
        }
        Ok(Self {
            label: label.to_string(),
            host_path,
            mount_path,
        })
    }
}

/// An application declared by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub single_instance: bool,
    /// URI schemes this workload handles.
    #[serde(default)]
    pub mime_apps: Vec<String>,
    #[serde(default)]
    pub user: Option<u32>,
    #[serde(default)]
    pub runner: Option<RunnerChoice>,
    #[serde(default)]
    pub host_access: HostAccess,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_choice_parses_empty_as_default() {
        assert_eq!("".parse::<RunnerChoice>().unwrap(), RunnerChoice::Default);
        assert_eq!("podman".parse::<RunnerChoice>().unwrap(), RunnerChoice::Podman);
        let err = "lxc".parse::<RunnerChoice>().unwrap_err();
        assert!(matches!(err, ProfileError::UnknownRunner(r) if r == "lxc"));
    }

    #[test]
    fn runner_choice_deserializes_from_yaml() {
        let r: RunnerChoice = serde_yaml_ng::from_str("''").unwrap();
        assert_eq!(r, RunnerChoice::Default);
        let r: RunnerChoice = serde_yaml_ng::from_str("docker").unwrap();
        assert_eq!(r, RunnerChoice::Docker);
        assert!(serde_yaml_ng::from_str::<RunnerChoice>("lxc").is_err());
    }

    #[test]
    fn workload_yaml_uses_camel_case_and_defaults() {
        let yaml = r#"
name: firefox
image: ghcr.io/qubesome/firefox:latest
command: firefox
singleInstance: true
mimeApps: [http, https]
hostAccess:
  x11: true
  machineId: true
  usbDevices: [YubiKey]
  paths: ["${HOME}/Downloads:/home/user/Downloads"]
unknownKey: ignored
"#;
        let w: Workload = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(w.name, "firefox");
        assert!(w.single_instance);
        assert_eq!(w.mime_apps, vec!["http", "https"]);
        assert!(w.host_access.x11);
        assert!(w.host_access.machine_id);
        assert!(!w.host_access.camera);
        assert_eq!(w.host_access.usb_devices, vec!["YubiKey"]);
        assert!(w.args.is_empty());
        assert!(w.runner.is_none());
    }

    #[test]
    fn external_drive_requires_three_absolute_parts() {
        let d = ExternalDrive::parse("backup:/media/backup:/mnt/backup").unwrap();
        assert_eq!(d.label, "backup");
        assert_eq!(d.host_path, PathBuf::from("/media/backup"));
        assert_eq!(d.mount_path, PathBuf::from("/mnt/backup"));

        assert!(ExternalDrive::parse("backup:/media/backup").is_err());
        assert!(ExternalDrive::parse(":/a:/b").is_err());
        assert!(ExternalDrive::parse("x:relative:/b").is_err());
    }

    #[test]
    fn shares_run_user_follows_dbus_family() {
        let mut access = HostAccess::default();
        assert!(!access.shares_run_user());
        access.bluetooth = true;
        assert!(access.shares_run_user());
    }
}
