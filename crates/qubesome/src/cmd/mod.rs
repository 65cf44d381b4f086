mod start;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use qube_container::{Spawn, SystemSpawner};
use qube_inception::InceptionClient;
use qube_profile::RunnerChoice;
use tracing::debug;

use crate::config::{self, Config};
use crate::dispatcher::Dispatcher;
use crate::error::{QubesomeError, QubesomeResult};
use crate::logging;
use crate::mime::{self, WorkloadRequest};
use crate::paths::HostEnv;

pub use start::{StartArgs, run_start};

#[derive(Args)]
pub struct RunArgs {
    /// Profile to run the workload in (required on the host)
    #[arg(long, short)]
    profile: Option<String>,
    /// Container runner, overriding the workload's choice
    #[arg(long, short)]
    runner: Option<RunnerChoice>,
    /// Workload name
    workload: String,
    /// Extra arguments passed to the workload
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Args)]
pub struct XdgOpenArgs {
    /// Profile to open the URI in, overriding the configured handler's
    #[arg(long, short)]
    profile: Option<String>,
    uris: Vec<String>,
}

#[derive(Args)]
pub struct FlatpakArgs {
    /// Profile whose display the app is shown on (required on the host)
    #[arg(long, short)]
    profile: Option<String>,
    /// Flatpak application id
    app: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Read the environment and config for a host-side command.
async fn host_dispatcher(config_path: Option<PathBuf>) -> QubesomeResult<Dispatcher> {
    let env = HostEnv::from_process()?;
    let path = config_path.unwrap_or_else(|| env.default_config());
    let config = load_config(&env, &path).await?;
    let spawn: Arc<dyn Spawn> = Arc::new(SystemSpawner);
    Ok(Dispatcher::new(Arc::new(config), env, spawn, current_exe()?))
}

/// Load `path` and install logging as it describes.
async fn load_config(env: &HostEnv, path: &Path) -> QubesomeResult<Config> {
    let dir = path.parent().unwrap_or(Path::new("/"));
    let config = config::load(path, &env.expansions(dir)).await?;
    logging::init(&config.logging, &env.log_file())?;
    debug!(path = %path.display(), "using config");
    Ok(config)
}

fn current_exe() -> QubesomeResult<PathBuf> {
    std::env::current_exe().map_err(QubesomeError::fs("/proc/self/exe"))
}

fn required_profile(profile: Option<String>) -> QubesomeResult<String> {
    profile.ok_or_else(|| QubesomeError::InvalidArgs("--profile is required on the host".into()))
}

/// Inside a profile container: forward to the host through the profile socket.
fn inception() -> Option<InceptionClient> {
    let client = InceptionClient::detect()?;
    logging::init_default();
    debug!(socket = %client.path().display(), "running inside a profile");
    Some(client)
}

pub async fn run_workload(args: RunArgs, config: Option<PathBuf>) -> QubesomeResult<i32> {
    if let Some(client) = inception() {
        client.run_workload(&args.workload, &args.args).await?;
        return Ok(0);
    }

    let dispatcher = host_dispatcher(config).await?;
    let req = WorkloadRequest {
        workload: args.workload,
        profile: required_profile(args.profile)?,
        args: args.args,
    };
    dispatcher.run_workload(&req, args.runner).await
}

pub async fn run_xdg_open(args: XdgOpenArgs, config: Option<PathBuf>) -> QubesomeResult<i32> {
    if let Some(client) = inception() {
        let [uri] = args.uris.as_slice() else {
            return Err(QubesomeError::InvalidArgs(format!(
                "expected exactly one uri, got {}",
                args.uris.len()
            )));
        };
        client.xdg_open(uri).await?;
        return Ok(0);
    }

    let dispatcher = host_dispatcher(config).await?;
    let req = mime::resolve(dispatcher.config(), &args.uris, args.profile.as_deref())?;
    dispatcher.run_workload(&req, None).await
}

pub async fn run_flatpak(args: FlatpakArgs, config: Option<PathBuf>) -> QubesomeResult<i32> {
    if let Some(client) = inception() {
        client.flatpak_run(&args.app, &args.args).await?;
        return Ok(0);
    }

    let dispatcher = host_dispatcher(config).await?;
    let profile = required_profile(args.profile)?;
    dispatcher.run_flatpak(&profile, &args.app, &args.args).await
}
