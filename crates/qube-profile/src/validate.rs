//! Field-level validation for profiles and workloads.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ProfileError, Result};
use crate::expand::{Expansions, PathSpec};
use crate::types::{ExternalDrive, Profile, Workload};

#[allow(clippy::expect_used)] // literal patterns
static PROFILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").expect("valid regex"));

#[allow(clippy::expect_used)]
static WORKLOAD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,50}$").expect("valid regex"));

/// `[registry[:port]/]path[:tag][@sha256:digest]`
#[allow(clippy::expect_used)]
static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^[A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)*(?::[0-9]+)?",
        r"(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",
        r"(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?",
        r"(?:@sha256:[a-f0-9]{64})?$",
    ))
    .expect("valid regex")
});

#[allow(clippy::expect_used)]
static FLATPAK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z_][A-Za-z0-9_-]*){2,}$").expect("valid regex")
});

pub fn profile_name(name: &str) -> Result<()> {
    if PROFILE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ProfileError::InvalidName(name.to_string()))
    }
}

pub fn workload_name(name: &str) -> Result<()> {
    if WORKLOAD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ProfileError::InvalidWorkloadName(name.to_string()))
    }
}

pub fn image(reference: &str) -> Result<()> {
    if IMAGE_REF.is_match(reference) {
        Ok(())
    } else {
        Err(ProfileError::InvalidImage(reference.to_string()))
    }
}

fn timezone(tz: &str) -> Result<()> {
    if tz.chars().any(char::is_whitespace) {
        return Err(ProfileError::InvalidTimezone(tz.to_string()));
    }
    Ok(())
}

fn dns(server: &str) -> Result<()> {
    server
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ProfileError::InvalidDns(server.to_string()))
}

fn flatpak(id: &str) -> Result<()> {
    if FLATPAK_ID.is_match(id) {
        Ok(())
    } else {
        Err(ProfileError::InvalidFlatpak(id.to_string()))
    }
}

impl Profile {
    /// Check every field that has a fixed shape. Path entries are checked
    /// after expansion.
    pub fn validate(&self, expansions: &Expansions) -> Result<()> {
        profile_name(&self.name)?;
        if self.window_manager.trim().is_empty() {
            return Err(ProfileError::MissingWindowManager(self.name.clone()));
        }
        if !self.timezone.is_empty() {
            timezone(&self.timezone)?;
        }
        if !self.dns.is_empty() {
            dns(&self.dns)?;
        }
        if !self.image.is_empty() {
            image(&self.image)?;
        }
        let path = expansions.expand(&self.path.to_string_lossy());
        if !std::path::Path::new(&path).is_absolute() {
            return Err(ProfileError::NonAbsolutePath(path));
        }
        for entry in &self.host_access.paths {
            PathSpec::parse(entry, expansions)?;
        }
        for drive in &self.external_drives {
            ExternalDrive::parse(drive)?;
        }
        for id in &self.flatpaks {
            flatpak(id)?;
        }
        Ok(())
    }
}

impl Workload {
    pub fn validate(&self, expansions: &Expansions) -> Result<()> {
        workload_name(&self.name)?;
        image(&self.image)?;
        for entry in &self.host_access.paths {
            PathSpec::parse(entry, expansions)?;
        }
        Ok(())
    }
}
