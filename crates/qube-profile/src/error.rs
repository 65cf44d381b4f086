use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("invalid profile name {0:?}: must be 1-50 characters of [A-Za-z0-9_-]")]
    InvalidName(String),

    #[error("invalid workload name {0:?}")]
    InvalidWorkloadName(String),

    #[error("invalid timezone {0:?}: must not contain whitespace")]
    InvalidTimezone(String),

    #[error("invalid dns server {0:?}: must be an IP address")]
    InvalidDns(String),

    #[error("invalid image reference {0:?}")]
    InvalidImage(String),

    #[error("unknown runner {0:?}: expected docker, podman or firecracker")]
    UnknownRunner(String),

    #[error("path {0:?} is not absolute after expansion")]
    NonAbsolutePath(String),

    #[error("malformed external drive {0:?}: expected label:host_path:mount_path")]
    MalformedExternalDrive(String),

    #[error("invalid flatpak id {0:?}")]
    InvalidFlatpak(String),

    #[error("profile {0}: window manager must not be empty")]
    MissingWindowManager(String),

    #[error("usb enumeration failed at {}: {source}", path.display())]
    UsbEnumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usb enumeration pattern: {0}")]
    UsbPattern(String),
}

pub type Result<T> = std::result::Result<T, ProfileError>;
