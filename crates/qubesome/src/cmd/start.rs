//! `qubesome start`: bring up one profile and serve its socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use qube_container::xauth::{self, synthesize_cookies};
use qube_container::{CommandSpec, ProfileRuntime, Runner, Spawn, SystemSpawner, xephyr};
use qube_inception::{InceptionHandler, InceptionServer};
use qube_profile::{Profile, RunnerChoice};
use rand::rngs::OsRng;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{current_exe, load_config};
use crate::dispatcher::Dispatcher;
use crate::error::{QubesomeError, QubesomeResult};
use crate::git;
use crate::paths::{CONFIG_FILE, HostEnv};

const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";
/// How long to wait for the nested server's socket before starting the
/// window manager anyway.
const DISPLAY_READY_TIMEOUT: Duration = Duration::from_secs(5);
const DISPLAY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct StartArgs {
    /// Profile to start
    profile: String,
    /// Git repository holding the profile config
    #[arg(long, conflicts_with = "local")]
    git: Option<String>,
    /// Directory inside the git or local checkout that holds qubesome.config
    #[arg(long)]
    path: Option<PathBuf>,
    /// Local directory holding the profile config
    #[arg(long)]
    local: Option<PathBuf>,
    /// Container runner, overriding the profile's choice
    #[arg(long, short)]
    runner: Option<RunnerChoice>,
}

/// Resolve the config, then run the profile until its nested server exits.
pub async fn run_start(args: StartArgs, config: Option<PathBuf>) -> QubesomeResult<i32> {
    let env = HostEnv::from_process()?;
    let spawn: Arc<dyn Spawn> = Arc::new(SystemSpawner);

    let path = config_location(&args, config, &env, spawn.as_ref()).await?;
    let config = Arc::new(load_config(&env, &path).await?);

    let mut profile = config.profile(&args.profile)?.clone();
    if let Some(choice) = args.runner {
        profile.runner = choice;
    }
    let runner = Runner::resolve(profile.runner, spawn.as_ref())?;
    let rt = env.runtime(&profile.name);
    let executable = current_exe()?;

    let handler = Arc::new(Dispatcher::new(
        Arc::clone(&config),
        env.clone(),
        Arc::clone(&spawn),
        executable.clone(),
    ));
    let bootstrapper = Bootstrapper {
        spawn,
        executable,
        parent_authority: xauth::parent_authority_path(env.xauthority.as_deref(), &env.home),
        host_display: env.display.clone(),
        x11_dir: PathBuf::from(X11_SOCKET_DIR),
    };
    bootstrapper.start(&profile, &rt, &runner, handler).await?;
    Ok(0)
}

async fn config_location(
    args: &StartArgs,
    config: Option<PathBuf>,
    env: &HostEnv,
    spawn: &dyn Spawn,
) -> QubesomeResult<PathBuf> {
    let checkout = match (&args.git, &args.local) {
        (Some(url), _) => git::sync(spawn, url, &env.git_dir()).await?,
        (None, Some(local)) => local.clone(),
        (None, None) => return Ok(config.unwrap_or_else(|| env.default_config())),
    };
    let dir = match &args.path {
        Some(sub) => checkout.join(sub),
        None => checkout,
    };
    Ok(dir.join(CONFIG_FILE))
}

/// Removes the profile's runtime dir (socket, isolated run-user dirs) when
/// `start` returns, however it returns.
struct RuntimeGuard(PathBuf);

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "runtime dir removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to remove runtime dir"),
        }
    }
}

/// SIGTERM and SIGINT, registered for the whole lifetime of `start`.
struct Signals {
    term: Option<Signal>,
    int: Option<Signal>,
}

impl Signals {
    fn register() -> Self {
        Self {
            term: signal(SignalKind::terminate()).ok(),
            int: signal(SignalKind::interrupt()).ok(),
        }
    }

    /// Name of the next signal received.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            () = recv_signal(&mut self.term) => "SIGTERM",
            () = recv_signal(&mut self.int) => "SIGINT",
        }
    }
}

/// Brings up a profile: socket, cookies, nested server, window manager.
struct Bootstrapper {
    spawn: Arc<dyn Spawn>,
    executable: PathBuf,
    /// The invoking user's xauth file, used as the cookie template.
    parent_authority: PathBuf,
    /// Host `DISPLAY` the nested server window opens on.
    host_display: Option<String>,
    x11_dir: PathBuf,
}

impl Bootstrapper {
    /// Runs until the nested server exits, the listener fails or a signal
    /// arrives. The runtime dir is gone when this returns.
    async fn start(
        &self,
        profile: &Profile,
        rt: &ProfileRuntime,
        runner: &Runner,
        handler: Arc<dyn InceptionHandler>,
    ) -> QubesomeResult<()> {
        // Checked before binding so a running profile keeps its socket.
        if let Some(id) = runner
            .find_container(self.spawn.as_ref(), &profile.container_name())
            .await?
        {
            debug!(profile = %profile.name, container = %id, "nested server already exists");
            return Err(QubesomeError::ProfileAlreadyRunning(profile.name.clone()));
        }

        let mut signals = Signals::register();
        let server = InceptionServer::bind(&rt.socket(), &profile.name, handler)?;
        let _runtime = RuntimeGuard(rt.runtime.dir().to_path_buf());
        let shutdown = CancellationToken::new();
        let _stop = shutdown.clone().drop_guard();
        let mut serving = tokio::spawn(server.serve(shutdown));

        tokio::select! {
            started = self.setup(profile, rt, runner) => started?,
            name = signals.recv() => {
                info!(profile = %profile.name, signal = name, "interrupted during startup");
                return Err(QubesomeError::Interrupted(name));
            }
        }
        info!(profile = %profile.name, display = profile.display, runner = %runner.kind, "profile started");

        self.wait(profile, runner, &mut serving, &mut signals).await
    }

    async fn setup(
        &self,
        profile: &Profile,
        rt: &ProfileRuntime,
        runner: &Runner,
    ) -> QubesomeResult<()> {
        self.write_cookies(profile, rt)?;
        self.start_display(profile, rt, runner).await
    }

    fn write_cookies(&self, profile: &Profile, rt: &ProfileRuntime) -> QubesomeResult<()> {
        let parent = xauth::read_parent(&self.parent_authority)?;
        let pair = synthesize_cookies(profile.display, &parent, &mut OsRng)?;
        xauth::write_cookie_pair(&rt.data, &pair)?;
        Ok(())
    }

    async fn start_display(
        &self,
        profile: &Profile,
        rt: &ProfileRuntime,
        runner: &Runner,
    ) -> QubesomeResult<()> {
        let screen = xephyr::screen_resolution(self.spawn.as_ref()).await;
        let args = xephyr::run_args(
            profile,
            rt,
            &self.executable,
            &screen,
            self.host_display.as_deref(),
        );
        debug!(profile = %profile.name, screen = %screen, "starting nested server");
        self.run(&runner.command(args)).await?;

        self.wait_for_display(profile.display).await;
        self.run(&runner.command(xephyr::window_manager_args(profile)))
            .await
    }

    async fn run(&self, cmd: &CommandSpec) -> QubesomeResult<()> {
        let out = self.spawn.output(cmd).await?;
        debug!(command = %cmd.display(), output = %out, "done");
        Ok(())
    }

    async fn wait_for_display(&self, display: u8) {
        let socket = self.x11_dir.join(format!("X{display}"));
        let deadline = Instant::now() + DISPLAY_READY_TIMEOUT;
        while !socket.exists() {
            if Instant::now() >= deadline {
                warn!(socket = %socket.display(), "display socket did not appear");
                return;
            }
            tokio::time::sleep(DISPLAY_POLL_INTERVAL).await;
        }
    }

    async fn wait(
        &self,
        profile: &Profile,
        runner: &Runner,
        serving: &mut JoinHandle<qube_inception::Result<()>>,
        signals: &mut Signals,
    ) -> QubesomeResult<()> {
        let container = profile.container_name();
        let wait = runner.command(["wait", container.as_str()]);

        tokio::select! {
            joined = serving => match joined {
                Ok(result) => result.map_err(Into::into),
                Err(e) => Err(QubesomeError::Internal(format!("inception server task: {e}"))),
            },
            exited = self.spawn.output(&wait) => {
                match exited {
                    Ok(code) => info!(profile = %profile.name, code = %code, "nested server exited"),
                    Err(e) => warn!(profile = %profile.name, error = %e, "lost track of nested server"),
                }
                Ok(())
            }
            name = signals.recv() => {
                info!(profile = %profile.name, signal = name, "received signal, stopping");
                Err(QubesomeError::Interrupted(name))
            }
        }
    }
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use async_trait::async_trait;
    use qube_container::RunnerKind;
    use qube_container::spawn::Recorder;
    use qube_container::xauth::COOKIE_LEN;
    use qube_inception::HandlerError;
    use qube_profile::HostAccess;

    use super::*;
    use crate::paths::test_env;

    struct Noop;

    #[async_trait]
    impl InceptionHandler for Noop {
        async fn xdg_open(&self, _: &str, _: &str) -> Result<(), HandlerError> {
            Ok(())
        }
        async fn run_workload(&self, _: &str, _: &str, _: Vec<String>) -> Result<(), HandlerError> {
            Ok(())
        }
        async fn flatpak_run(&self, _: &str, _: &str, _: Vec<String>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    /// family, address, display "0", MIT-MAGIC-COOKIE-1 and an old cookie.
    fn parent_cookie() -> Vec<u8> {
        let mut p = vec![0x01, 0x00, 0x00, 0x05];
        p.extend_from_slice(b"q-pod");
        p.extend_from_slice(&[0x00, 0x01, b'0', 0x00, 0x12]);
        p.extend_from_slice(b"MIT-MAGIC-COOKIE-1");
        p.extend_from_slice(&[0x00, 0x10]);
        p.extend_from_slice(&[0xAB; 16]);
        p
    }

    struct Fixture {
        tmp: tempfile::TempDir,
        rt: ProfileRuntime,
        profile: Profile,
    }

    fn fixture(parent: &[u8]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Xauthority"), parent).unwrap();
        let x11 = tmp.path().join("x11");
        std::fs::create_dir_all(&x11).unwrap();
        std::fs::write(x11.join("X1"), b"").unwrap();
        let rt = test_env(tmp.path()).runtime("personal");
        let profile = Profile {
            name: "personal".into(),
            display: 1,
            path: tmp.path().join("cfg"),
            window_manager: "awesome".into(),
            xephyr_args: String::new(),
            timezone: String::new(),
            dns: String::new(),
            runner: Default::default(),
            host_access: HostAccess::default(),
            external_drives: Vec::new(),
            flatpaks: Vec::new(),
            image: String::new(),
        };
        Fixture { tmp, rt, profile }
    }

    fn bootstrapper(f: &Fixture, rec: &Arc<Recorder>) -> Bootstrapper {
        Bootstrapper {
            spawn: rec.clone(),
            executable: PathBuf::from("/usr/bin/qubesome"),
            parent_authority: f.tmp.path().join("Xauthority"),
            host_display: Some(":0".into()),
            x11_dir: f.tmp.path().join("x11"),
        }
    }

    fn docker() -> Runner {
        Runner {
            kind: RunnerKind::Docker,
            binary: PathBuf::from("/usr/bin/docker"),
        }
    }

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn starts_display_then_window_manager_and_cleans_up() {
        let f = fixture(&parent_cookie());
        let rec = Arc::new(Recorder::new());

        bootstrapper(&f, &rec)
            .start(&f.profile, &f.rt, &docker(), Arc::new(Noop))
            .await
            .unwrap();

        let lines = rec.lines();
        assert_eq!(lines[0], "/usr/bin/docker ps -a -q --filter name=^qubesome-personal$");
        assert_eq!(lines[1], "xrandr");
        assert!(lines[2].starts_with(
            "/usr/bin/docker run --rm -d --name=qubesome-personal --network=none --cap-drop=ALL"
        ));
        assert!(lines[2].contains("--env=DISPLAY=:0"));
        assert!(lines[2].contains("-screen 3440x1440"));
        assert_eq!(
            lines[3],
            "/usr/bin/docker exec --detach --env=DISPLAY=:1 qubesome-personal sh -c awesome"
        );
        assert_eq!(lines[4], "/usr/bin/docker wait qubesome-personal");

        let client = f.rt.data.client_cookie();
        let server = f.rt.data.server_cookie();
        assert_eq!(mode(&client), 0o600);
        assert_eq!(mode(&server), 0o600);
        assert!(!f.rt.runtime.dir().exists());
    }

    /// Records like [`Recorder`] but never returns from `runner wait`.
    struct Blocking(Arc<Recorder>);

    #[async_trait]
    impl Spawn for Blocking {
        async fn output(&self, cmd: &CommandSpec) -> Result<String, qube_container::CommandError> {
            let out = self.0.output(cmd).await;
            if cmd.args.first().is_some_and(|a| a == "wait") {
                std::future::pending::<()>().await;
            }
            out
        }
        async fn status(&self, cmd: &CommandSpec) -> Result<i32, qube_container::CommandError> {
            self.0.status(cmd).await
        }
        fn which(&self, program: &str) -> Option<PathBuf> {
            self.0.which(program)
        }
    }

    #[tokio::test]
    async fn dropped_start_leaves_no_runtime_files() {
        let f = fixture(&parent_cookie());
        let rec = Arc::new(Recorder::new());
        let b = Bootstrapper {
            spawn: Arc::new(Blocking(rec.clone())),
            ..bootstrapper(&f, &rec)
        };
        // What a workload launch leaves behind.
        let isolated = f.rt.runtime.isolated_run_user();
        std::fs::create_dir_all(&isolated).unwrap();
        std::fs::write(isolated.join("bus"), b"").unwrap();

        let res = tokio::time::timeout(
            Duration::from_millis(200),
            b.start(&f.profile, &f.rt, &docker(), Arc::new(Noop)),
        )
        .await;

        assert!(res.is_err(), "start should still be waiting");
        assert!(rec.lines().last().unwrap().ends_with("wait qubesome-personal"));
        assert!(!f.rt.runtime.dir().exists());
    }

    #[tokio::test]
    async fn refuses_to_start_twice() {
        let f = fixture(&parent_cookie());
        // Socket of the instance that is already running.
        std::fs::create_dir_all(f.rt.runtime.dir()).unwrap();
        std::fs::write(f.rt.socket(), b"").unwrap();
        let rec = Arc::new(Recorder::new().respond("/usr/bin/docker ps", "4f2a9c"));

        let err = bootstrapper(&f, &rec)
            .start(&f.profile, &f.rt, &docker(), Arc::new(Noop))
            .await
            .unwrap_err();

        assert!(matches!(err, QubesomeError::ProfileAlreadyRunning(p) if p == "personal"));
        assert_eq!(rec.lines().len(), 1);
        assert!(f.rt.socket().exists());
        assert!(!f.rt.data.client_cookie().exists());
    }

    #[tokio::test]
    async fn nested_server_failure_aborts_start() {
        let f = fixture(&parent_cookie());
        let rec = Arc::new(Recorder::new().fail("/usr/bin/docker run", 125));

        let err = bootstrapper(&f, &rec)
            .start(&f.profile, &f.rt, &docker(), Arc::new(Noop))
            .await
            .unwrap_err();

        assert!(matches!(err, QubesomeError::Command(_)), "got {err:?}");
        // Cookies must exist before the nested server is started.
        assert!(f.rt.data.server_cookie().exists());
        assert!(!rec.lines().iter().any(|l| l.contains(" exec ")));
        assert!(!f.rt.socket().exists());
    }

    #[tokio::test]
    async fn short_parent_cookie_fails_before_nested_server() {
        let mut parent = parent_cookie();
        parent.truncate(49);
        let f = fixture(&parent);
        let rec = Arc::new(Recorder::new());

        let err = bootstrapper(&f, &rec)
            .start(&f.profile, &f.rt, &docker(), Arc::new(Noop))
            .await
            .unwrap_err();

        assert!(
            matches!(err, QubesomeError::Xauth(qube_container::XauthError::InvalidAuthority(49))),
            "got {err:?}"
        );
        assert!(!rec.lines().iter().any(|l| l.contains(" run ")));
        assert!(!f.rt.socket().exists());
    }

    #[tokio::test]
    async fn restart_regenerates_cookies() {
        let f = fixture(&parent_cookie());
        let rec = Arc::new(Recorder::new());
        let b = bootstrapper(&f, &rec);

        b.start(&f.profile, &f.rt, &docker(), Arc::new(Noop)).await.unwrap();
        let first = std::fs::read(f.rt.data.client_cookie()).unwrap();
        b.start(&f.profile, &f.rt, &docker(), Arc::new(Noop)).await.unwrap();
        let second = std::fs::read(f.rt.data.client_cookie()).unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(&first[..2], &[0xFF, 0xFF]);
        assert_ne!(first[first.len() - COOKIE_LEN..], second[second.len() - COOKIE_LEN..]);
        assert!(!f.rt.socket().exists());
    }

    #[tokio::test]
    async fn local_config_location() {
        let tmp = tempfile::tempdir().unwrap();
        let env = test_env(tmp.path());
        let args = StartArgs {
            profile: "personal".into(),
            git: None,
            path: Some(PathBuf::from("profiles")),
            local: Some(PathBuf::from("/src/dotfiles")),
            runner: None,
        };
        let path = config_location(&args, None, &env, &Recorder::new()).await.unwrap();
        assert_eq!(path, PathBuf::from("/src/dotfiles/profiles/qubesome.config"));

        let args = StartArgs {
            local: None,
            path: None,
            ..args
        };
        let path = config_location(&args, None, &env, &Recorder::new()).await.unwrap();
        assert_eq!(path, env.default_config());
    }
}
