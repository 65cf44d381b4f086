//! Runs workloads and flatpaks for the CLI and for profile sockets.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use qube_container::{FlatpakLauncher, Launcher, ProfileRuntime, Spawn};
use qube_inception::{HandlerError, InceptionHandler};
use qube_profile::{ComposeContext, EffectiveWorkload, Profile, RunnerChoice};
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::error::{QubesomeError, QubesomeResult};
use crate::mime::{self, WorkloadRequest};
use crate::paths::HostEnv;

pub struct Dispatcher {
    config: Arc<Config>,
    env: HostEnv,
    ctx: ComposeContext,
    launcher: Launcher,
    flatpak: FlatpakLauncher,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, env: HostEnv, spawn: Arc<dyn Spawn>, executable: PathBuf) -> Self {
        let ctx = env.compose_context(&config.root_dir);
        Self {
            launcher: Launcher::new(Arc::clone(&spawn), executable),
            flatpak: FlatpakLauncher::new(spawn),
            config,
            env,
            ctx,
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A configured profile whose nested server has been started.
    fn running_profile(&self, name: &str) -> QubesomeResult<(&Profile, ProfileRuntime)> {
        let profile = self.config.profile(name)?;
        let rt = self.env.runtime(&profile.name);
        if !rt.data.client_cookie().exists() {
            return Err(QubesomeError::ProfileNotRunning(profile.name.clone()));
        }
        Ok((profile, rt))
    }

    /// Compose and launch `req`. Returns the runner's exit code.
    pub async fn run_workload(
        &self,
        req: &WorkloadRequest,
        runner: Option<RunnerChoice>,
    ) -> QubesomeResult<i32> {
        let (profile, rt) = self.running_profile(&req.profile)?;
        let workload = config::load_workload(profile, &req.workload).await?;
        let mut ew = EffectiveWorkload::compose(&workload, profile, &self.ctx)?;
        if let Some(choice) = runner.filter(|c| *c != RunnerChoice::Default) {
            ew.runner = choice;
        }
        info!(workload = %req.workload, profile = %profile.name, "running workload");
        Ok(self.launcher.launch(&ew, &rt, &req.args).await?)
    }

    pub async fn run_flatpak(
        &self,
        profile: &str,
        app: &str,
        args: &[String],
    ) -> QubesomeResult<i32> {
        let (profile, rt) = self.running_profile(profile)?;
        Ok(self.flatpak.run(profile, &rt, app, args).await?)
    }
}

fn check_exit(what: &str, code: i32) -> QubesomeResult<()> {
    if code == 0 {
        return Ok(());
    }
    warn!(what = %what, code, "launch failed");
    Err(QubesomeError::RunnerFailure {
        command: what.to_string(),
        code,
    })
}

#[async_trait]
impl InceptionHandler for Dispatcher {
    async fn xdg_open(&self, profile: &str, url: &str) -> Result<(), HandlerError> {
        let req = mime::resolve(&self.config, &[url.to_string()], Some(profile))?;
        let code = self.run_workload(&req, None).await?;
        Ok(check_exit(&req.workload, code)?)
    }

    async fn run_workload(
        &self,
        profile: &str,
        workload: &str,
        args: Vec<String>,
    ) -> Result<(), HandlerError> {
        let req = WorkloadRequest {
            workload: workload.to_string(),
            profile: profile.to_string(),
            args,
        };
        let code = Dispatcher::run_workload(self, &req, None).await?;
        Ok(check_exit(workload, code)?)
    }

    async fn flatpak_run(
        &self,
        profile: &str,
        app: &str,
        args: Vec<String>,
    ) -> Result<(), HandlerError> {
        let code = self.run_flatpak(profile, app, &args).await?;
        Ok(check_exit(app, code)?)
    }
}
