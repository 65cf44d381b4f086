//! Commands for a profile's nested X server and its window manager.

use std::path::Path;

use qube_profile::Profile;

use crate::paths::{IN_CONTAINER_EXECUTABLE, IN_PROFILE_SOCKET, ProfileRuntime};
use crate::spawn::{CommandSpec, Spawn};

pub const DEFAULT_SCREEN: &str = "3440x1440";
pub const DEFAULT_XORG_IMAGE: &str = "ghcr.io/qubesome/xorg:latest";

const XORG_HOME: &str = "/home/xorg-user";

/// First resolution of the primary output in `xrandr` output, e.g.
/// `DP-1 connected primary 2560x1440+0+0 (normal ...)` gives `2560x1440`.
pub fn parse_primary_resolution(xrandr: &str) -> Option<String> {
    xrandr
        .lines()
        .filter(|line| line.contains(" connected primary "))
        .find_map(|line| {
            line.split_whitespace()
                .skip_while(|w| *w != "primary")
                .nth(1)
                .and_then(|geometry| geometry.split('+').next())
                .filter(|res| {
                    res.split_once('x').is_some_and(|(w, h)| {
                        w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok()
                    })
                })
                .map(str::to_string)
        })
}

/// Screen size for the nested server: the host primary output when
/// `xrandr` can tell, else [`DEFAULT_SCREEN`].
pub async fn screen_resolution(spawn: &dyn Spawn) -> String {
    spawn
        .output(&CommandSpec::new("xrandr"))
        .await
        .ok()
        .and_then(|out| parse_primary_resolution(&out))
        .unwrap_or_else(|| DEFAULT_SCREEN.to_string())
}

/// Image for the nested server.
pub fn xorg_image(profile: &Profile) -> &str {
    if profile.image.is_empty() {
        DEFAULT_XORG_IMAGE
    } else {
        &profile.image
    }
}

/// Arguments after the runner binary that start the nested server.
pub fn run_args(
    profile: &Profile,
    rt: &ProfileRuntime,
    executable: &Path,
    screen: &str,
    host_display: Option<&str>,
) -> Vec<String> {
    let display = profile.display;
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-d".to_string(),
        format!("--name={}", profile.container_name()),
        "--network=none".to_string(),
        "--cap-drop=ALL".to_string(),
        "--security-opt=no-new-privileges".to_string(),
    ];
    if let Some(host) = host_display {
        args.push(format!("--env=DISPLAY={host}"));
    }
    for volume in [
        "/tmp/.X11-unix:/tmp/.X11-unix".to_string(),
        format!("{}:{XORG_HOME}/.Xserver", rt.data.server_cookie().display()),
        format!("{}:{XORG_HOME}/.Xauthority", rt.data.client_cookie().display()),
        format!("{}:{IN_CONTAINER_EXECUTABLE}:ro", executable.display()),
        format!("{}:{IN_PROFILE_SOCKET}:ro", rt.socket().display()),
    ] {
        args.push("-v".to_string());
        args.push(volume);
    }
    args.push(xorg_image(profile).to_string());
    args.extend([
        "Xephyr".to_string(),
        format!(":{display}"),
        "-title".to_string(),
        format!("{} :{display}", profile.container_name()),
        "-auth".to_string(),
        format!("{XORG_HOME}/.Xserver"),
        "-extension".to_string(),
        "MIT-SHM".to_string(),
        "-extension".to_string(),
        "XTEST".to_string(),
        "-nopn".to_string(),
        "-nolisten".to_string(),
        "tcp".to_string(),
        "-screen".to_string(),
        screen.to_string(),
        "-resizeable".to_string(),
    ]);
    args.extend(profile.xephyr_args.split_whitespace().map(String::from));
    args
}

/// Arguments after the runner binary that start the window manager inside
/// the nested server container.
pub fn window_manager_args(profile: &Profile) -> Vec<String> {
    vec![
        "exec".to_string(),
        "--detach".to_string(),
        format!("--env=DISPLAY=:{}", profile.display),
        profile.container_name(),
        "sh".to_string(),
        "-c".to_string(),
        profile.window_manager.clone(),
    ]
}
