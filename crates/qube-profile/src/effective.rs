//! Intersection of a workload's requests with its profile's allowances.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::Result;
use crate::expand::{Expansions, PathSpec, is_within};
use crate::types::{ExternalDrive, HostAccess, Profile, RunnerChoice, Workload};

/// Host facts the composer needs. Built once by the caller so composition
/// itself never reads the environment.
#[derive(Debug, Clone, Default)]
pub struct ComposeContext {
    pub expansions: Expansions,
    /// `XDG_SESSION_TYPE == wayland`
    pub wayland: bool,
    /// Host `$XDG_RUNTIME_DIR`, only used under wayland.
    pub xdg_runtime_dir: Option<PathBuf>,
}

/// The immutable run descriptor handed to the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveWorkload {
    /// `<workload>-<profile>`
    pub name: String,
    pub workload: String,
    pub profile: String,
    pub display: u8,
    pub image: String,
    pub command: String,
    pub args: Vec<String>,
    pub single_instance: bool,
    pub user: Option<u32>,
    pub runner: RunnerChoice,
    pub timezone: String,
    pub dns: String,
    /// Effective capabilities; `paths` holds expanded `host:container[:ro]`.
    pub host_access: HostAccess,
    /// Drives both requested by label and declared by the profile.
    pub external_drives: Vec<ExternalDrive>,
    pub env: Vec<(String, String)>,
    /// Extra `host:container` binds added by the composer itself.
    pub extra_mounts: Vec<String>,
}

impl EffectiveWorkload {
    /// Validate both sides and intersect them.
    pub fn compose(workload: &Workload, profile: &Profile, ctx: &ComposeContext) -> Result<Self> {
        profile.validate(&ctx.expansions)?;
        workload.validate(&ctx.expansions)?;

        let want = &workload.host_access;
        let allow = &profile.host_access;

        let host_access = HostAccess {
            x11: want.x11 && allow.x11,
            camera: want.camera && allow.camera,
            microphone: want.microphone && allow.microphone,
            speakers: want.speakers && allow.speakers,
            smartcard: want.smartcard && allow.smartcard,
            dbus: want.dbus && allow.dbus,
            bluetooth: want.bluetooth && allow.bluetooth,
            machine_id: want.machine_id && allow.machine_id,
            local_time: want.local_time && allow.local_time,
            var_run_user: want.var_run_user && allow.var_run_user,
            mime: want.mime && allow.mime,
            privileged: want.privileged && allow.privileged,
            network: effective_network(&want.network, &allow.network),
            gpus: effective_gpus(&want.gpus, &allow.gpus),
            caps_add: intersect(&want.caps_add, &allow.caps_add),
            devices: intersect(&want.devices, &allow.devices),
            usb_devices: intersect(&want.usb_devices, &allow.usb_devices),
            paths: allowed_paths(workload, profile, &ctx.expansions)?,
            external_drives: intersect(&want.external_drives, &profile_drive_labels(profile)),
        };

        let external_drives = host_access
            .external_drives
            .iter()
            .filter_map(|label| profile.external_drive(label))
            .collect();

        let mut env = Vec::new();
        let mut extra_mounts = Vec::new();
        if ctx.wayland {
            env.push(("DISPLAY".to_string(), ":0".to_string()));
            // Shares the whole host runtime dir regardless of var_run_user.
            if let Some(dir) = &ctx.xdg_runtime_dir {
                extra_mounts.push(format!("{}:/run/user/1000", dir.display()));
            }
        } else {
            env.push(("DISPLAY".to_string(), format!(":{}", profile.display)));
        }

        let runner = match workload.runner {
            Some(choice) if choice != RunnerChoice::Default => choice,
            _ => profile.runner,
        };

        let ew = Self {
            name: format!("{}-{}", workload.name, profile.name),
            workload: workload.name.clone(),
            profile: profile.name.clone(),
            display: profile.display,
            image: workload.image.clone(),
            command: workload.command.clone(),
            args: workload.args.clone(),
            single_instance: workload.single_instance,
            user: workload.user,
            runner,
            timezone: profile.timezone.clone(),
            dns: profile.dns.clone(),
            host_access,
            external_drives,
            env,
            extra_mounts,
        };
        debug!(workload = %ew.name, runner = %ew.runner, "composed effective workload");
        Ok(ew)
    }
}

/// Profile wins; without one only `none` passes through from the workload.
fn effective_network(want: &str, allow: &str) -> String {
    if !allow.is_empty() {
        allow.to_string()
    } else if want == "none" {
        want.to_string()
    } else {
        String::new()
    }
}

fn effective_gpus(want: &str, allow: &str) -> String {
    if allow.is_empty() || allow != want {
        String::new()
    } else {
        allow.to_string()
    }
}

/// Entries of `want` also present in `allow`, in `want` order, deduplicated.
fn intersect(want: &[String], allow: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in want {
        if allow.contains(item) && !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn profile_drive_labels(profile: &Profile) -> Vec<String> {
    profile
        .external_drives
        .iter()
        .filter_map(|d| ExternalDrive::parse(d).ok())
        .map(|d| d.label)
        .collect()
}

fn allowed_paths(workload: &Workload, profile: &Profile, exp: &Expansions) -> Result<Vec<String>> {
    let roots = profile
        .host_access
        .paths
        .iter()
        .map(|p| PathSpec::parse(p, exp).map(|spec| spec.host))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for entry in &workload.host_access.paths {
        let spec = PathSpec::parse(entry, exp)?;
        if roots.iter().any(|root| is_within(&spec.host, root)) {
            out.push(spec.to_entry());
        } else {
            warn!(
                workload = %workload.name,
                profile = %profile.name,
                path = %spec.host.display(),
                "path not allowed by profile, dropping"
            );
        }
    }
    Ok(out)
}
