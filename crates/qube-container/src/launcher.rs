//! Turns an [`EffectiveWorkload`] into a runner invocation and executes it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use qube_profile::{EffectiveWorkload, UsbResolver, clean, dedup};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ContainerError, Result};
use crate::gpu::{self, AMD_KFD, GpuSupport};
use crate::mime::{HandlerFiles, write_handler_files};
use crate::paths::{IN_CONTAINER_EXECUTABLE, IN_PROFILE_SOCKET, ProfileRuntime};
use crate::runner::{Runner, RunnerKind};
use crate::spawn::Spawn;

/// Flags every workload container starts with.
const BASE_FLAGS: &[&str] = &[
    "run",
    "--rm",
    "-d",
    "--security-opt=seccomp=unconfined",
    "--security-opt=no-new-privileges",
];

/// The workload's `XDG_RUNTIME_DIR` inside every image.
const CONTAINER_RUN_USER: &str = "/run/user/1000";

/// Host locations the launcher inspects or mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    pub localtime: PathBuf,
    pub machine_id: PathBuf,
    pub kfd: PathBuf,
    pub dev: PathBuf,
}

impl Default for HostLayout {
    fn default() -> Self {
        Self {
            localtime: PathBuf::from("/etc/localtime"),
            machine_id: PathBuf::from("/etc/machine-id"),
            kfd: PathBuf::from(AMD_KFD),
            dev: PathBuf::from("/dev"),
        }
    }
}

/// What the launcher discovered about the host for one launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    /// Resolved target when `/etc/localtime` is a symlink.
    pub localtime_target: Option<PathBuf>,
    pub gpu: Option<GpuSupport>,
    pub video_devices: Vec<PathBuf>,
    /// Resolved USB bus and hidraw nodes.
    pub usb_devices: Vec<PathBuf>,
    pub executable: PathBuf,
    /// Handler files and the image's home directory.
    pub mime: Option<(HandlerFiles, String)>,
}

pub struct Launcher {
    spawn: Arc<dyn Spawn>,
    usb: UsbResolver,
    host: HostLayout,
    executable: PathBuf,
    /// Image reference to its default user's home, discovered once.
    homes: Mutex<HashMap<String, String>>,
}

impl Launcher {
    pub fn new(spawn: Arc<dyn Spawn>, executable: PathBuf) -> Self {
        Self {
            spawn,
            usb: UsbResolver::default(),
            host: HostLayout::default(),
            executable,
            homes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_usb(mut self, usb: UsbResolver) -> Self {
        self.usb = usb;
        self
    }

    pub fn with_host(mut self, host: HostLayout) -> Self {
        self.host = host;
        self
    }

    /// Start `ew`, or exec into its running container when it is single
    /// instance. Returns the runner's exit code.
    pub async fn launch(
        &self,
        ew: &EffectiveWorkload,
        rt: &ProfileRuntime,
        extra_args: &[String],
    ) -> Result<i32> {
        let runner = Runner::resolve(ew.runner, self.spawn.as_ref())?;

        if ew.single_instance
            && let Some(id) = runner.find_container(self.spawn.as_ref(), &ew.name).await?
        {
            info!(workload = %ew.name, container = %id, "already running, exec into it");
            let mut args = vec!["exec".to_string(), "--detach".to_string(), id];
            if !ew.command.is_empty() {
                args.push(ew.command.clone());
            }
            args.extend(ew.args.iter().cloned());
            args.extend(extra_args.iter().cloned());
            return Ok(self.spawn.status(&runner.command(args)).await?);
        }

        let facts = self.gather(ew, &runner, rt).await?;
        let args = build_run_args(ew, runner.kind, rt, &self.host, &facts, extra_args);
        info!(workload = %ew.name, runner = %runner.kind, image = %ew.image, "starting workload");
        let code = self.spawn.status(&runner.command(args)).await?;
        debug!(workload = %ew.name, code, "runner exited");
        Ok(code)
    }

    async fn gather(
        &self,
        ew: &EffectiveWorkload,
        runner: &Runner,
        rt: &ProfileRuntime,
    ) -> Result<HostFacts> {
        let access = &ew.host_access;

        let mut gpu = None;
        if !access.gpus.is_empty() {
            gpu = GpuSupport::detect(self.spawn.as_ref(), &self.host.kfd);
            if gpu.is_none() {
                gpu::notify_missing(self.spawn.as_ref(), &ew.name).await;
            }
        }

        let localtime_target = if access.local_time {
            symlink_target(&self.host.localtime)
        } else {
            None
        };

        let video_devices = if access.camera {
            video_devices(&self.host.dev)?
        } else {
            Vec::new()
        };

        let usb_devices = dedup(self.usb.resolve(&access.usb_devices)?);

        for entry in &access.paths {
            let host = entry.split_once(':').map_or(entry.as_str(), |(h, _)| h);
            fs::metadata(host).map_err(ContainerError::fs(host))?;
        }
        for drive in &ew.external_drives {
            fs::metadata(&drive.host_path).map_err(ContainerError::fs(&drive.host_path))?;
        }

        if !access.shares_run_user() {
            if !claims_run_user(ew) {
                let dir = rt.runtime.isolated_run_user();
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(&dir)
                    .map_err(ContainerError::fs(&dir))?;
            }
            if !access.machine_id {
                ensure_machine_id(&rt.data.machine_id())?;
            }
        }

        let mime = if access.mime {
            let files = write_handler_files(&rt.data.applications())?;
            let home = self.image_home(runner, &ew.image).await;
            Some((files, home))
        } else {
            None
        };

        Ok(HostFacts {
            localtime_target,
            gpu,
            video_devices,
            usb_devices,
            executable: self.executable.clone(),
            mime,
        })
    }

    async fn image_home(&self, runner: &Runner, image: &str) -> String {
        let mut homes = self.homes.lock().await;
        if let Some(home) = homes.get(image) {
            return home.clone();
        }
        let home = self.discover_home(runner, image).await;
        homes.insert(image.to_string(), home.clone());
        home
    }

    /// Home directory of the image's default user, from `ls /home` inside it.
    async fn discover_home(&self, runner: &Runner, image: &str) -> String {
        let cmd = runner.command(["run", "--rm", "--network=none", "--entrypoint=ls", image, "/home"]);
        match self.spawn.output(&cmd).await {
            Ok(out) => match out.lines().map(str::trim).find(|l| !l.is_empty()) {
                Some(user) => format!("/home/{user}"),
                None => "/root".to_string(),
            },
            Err(e) => {
                debug!(image = %image, error = %e, "could not list /home, assuming /root");
                "/root".to_string()
            }
        }
    }
}

fn symlink_target(path: &Path) -> Option<PathBuf> {
    let target = fs::read_link(path).ok()?;
    if target.is_absolute() {
        return Some(clean(&target));
    }
    path.parent().map(|dir| clean(&dir.join(target)))
}

fn video_devices(dev: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dev).map_err(ContainerError::fs(dev))?;
    let mut out: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("video"))
        .map(|e| e.path())
        .collect();
    out.sort();
    Ok(out)
}

/// Create the per-profile machine-id (32 hex chars) unless it exists.
fn ensure_machine_id(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(ContainerError::fs(dir))?;
    }
    let mut id = [0u8; 16];
    rand::rngs::OsRng
        .try_fill_bytes(&mut id)
        .map_err(|e| ContainerError::fs(path)(std::io::Error::other(e)))?;
    let hex: String = id.iter().map(|b| format!("{b:02x}")).collect();

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)
        .map_err(ContainerError::fs(path))?;
    writeln!(file, "{hex}").map_err(ContainerError::fs(path))
}

/// True when a composer mount already targets the container's run dir.
fn claims_run_user(ew: &EffectiveWorkload) -> bool {
    ew.extra_mounts
        .iter()
        .any(|m| m.split(':').nth(1) == Some(CONTAINER_RUN_USER))
}

fn volume(args: &mut Vec<String>, spec: String) {
    args.push("-v".to_string());
    args.push(spec);
}

/// Full runner argument vector for a new workload container.
pub fn build_run_args(
    ew: &EffectiveWorkload,
    runner: RunnerKind,
    rt: &ProfileRuntime,
    host: &HostLayout,
    facts: &HostFacts,
    extra_args: &[String],
) -> Vec<String> {
    let access = &ew.host_access;
    let docker = runner == RunnerKind::Docker;
    let mut args: Vec<String> = BASE_FLAGS.iter().map(|s| s.to_string()).collect();

    if ew.single_instance {
        args.push(format!("--name={}", ew.name));
    }
    if let Some(uid) = ew.user {
        args.push(format!("--user={uid}"));
    }
    if access.privileged {
        args.push("--privileged".to_string());
    }
    args.extend(access.caps_add.iter().map(|c| format!("--cap-add={c}")));
    if !access.network.is_empty() {
        args.push(format!("--network={}", access.network));
    }
    if !ew.dns.is_empty() {
        args.push(format!("--dns={}", ew.dns));
    }

    if access.local_time {
        let lt = host.localtime.display();
        volume(&mut args, format!("{lt}:{lt}:ro"));
        if let Some(target) = &facts.localtime_target {
            let t = target.display();
            volume(&mut args, format!("{t}:{t}:ro"));
        }
    } else if !ew.timezone.is_empty() {
        args.push(format!("--env=TZ={}", ew.timezone));
    }

    if let Some(gpu) = facts.gpu {
        args.push(gpu.run_flag(runner).to_string());
    }

    if access.audio() {
        volume(
            &mut args,
            format!("/run/user/{}/pipewire-0:/run/user/1000/pipewire-0", rt.uid),
        );
        args.push("--device=/dev/snd".to_string());
        if docker {
            args.push("--group-add=audio".to_string());
        }
    }

    if access.camera {
        args.extend(
            facts
                .video_devices
                .iter()
                .map(|d| format!("--device={}", d.display())),
        );
        if docker {
            args.push("--group-add=video".to_string());
        }
    }

    if access.smartcard {
        volume(&mut args, "/run/pcscd:/run/pcscd".to_string());
    }

    let machine_id = host.machine_id.display();
    let run_user_free = !claims_run_user(ew);
    if access.shares_run_user() {
        if run_user_free {
            volume(&mut args, format!("/run/user/{}:{CONTAINER_RUN_USER}", rt.uid));
        }
        volume(
            &mut args,
            "/run/dbus/system_bus_socket:/run/dbus/system_bus_socket".to_string(),
        );
        volume(&mut args, format!("{machine_id}:/etc/machine-id:ro"));
    } else {
        if run_user_free {
            volume(
                &mut args,
                format!(
                    "{}:{CONTAINER_RUN_USER}",
                    rt.runtime.isolated_run_user().display()
                ),
            );
        }
        if access.machine_id {
            volume(&mut args, format!("{machine_id}:/etc/machine-id:ro"));
        } else {
            volume(
                &mut args,
                format!("{}:/etc/machine-id:ro", rt.data.machine_id().display()),
            );
        }
    }

    for mount in &ew.extra_mounts {
        volume(&mut args, mount.clone());
    }

    if access.x11 {
        args.extend(ew.env.iter().map(|(k, v)| format!("--env={k}={v}")));
        volume(
            &mut args,
            format!("{}:/tmp/.Xauthority:ro", rt.data.client_cookie().display()),
        );
        args.push("--env=XAUTHORITY=/tmp/.Xauthority".to_string());
        let socket = format!("/tmp/.X11-unix/X{}", ew.display);
        volume(&mut args, format!("{socket}:{socket}"));
    }

    if let Some((files, home)) = &facts.mime {
        for mount in files.mounts(home) {
            volume(&mut args, mount);
        }
        volume(
            &mut args,
            format!("{}:{IN_CONTAINER_EXECUTABLE}:ro", facts.executable.display()),
        );
        volume(
            &mut args,
            format!("{}:{IN_PROFILE_SOCKET}:ro", rt.socket().display()),
        );
    }

    if !facts.usb_devices.is_empty() || !access.devices.is_empty() {
        volume(&mut args, "/dev:/dev".to_string());
        args.extend(
            facts
                .usb_devices
                .iter()
                .map(|d| format!("--device={}", d.display())),
        );
        args.extend(access.devices.iter().map(|d| format!("--device={d}")));
    }

    for drive in &ew.external_drives {
        volume(
            &mut args,
            format!("{}:{}", drive.host_path.display(), drive.mount_path.display()),
        );
    }

    for entry in &access.paths {
        let spec = match (runner, entry.strip_suffix(":ro")) {
            (RunnerKind::Podman, Some(rw)) => format!("{rw}:ro,z"),
            (RunnerKind::Podman, None) => format!("{entry}:z"),
            (RunnerKind::Docker, _) => entry.clone(),
        };
        volume(&mut args, spec);
    }

    args.push(ew.image.clone());
    if !ew.command.is_empty() {
        args.push(ew.command.clone());
    }
    args.extend(ew.args.iter().cloned());
    args.extend(extra_args.iter().cloned());
    args
}
