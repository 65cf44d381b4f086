use std::sync::Arc;

use qube_profile::Profile;
use tracing::info;

use crate::error::{ContainerError, Result};
use crate::paths::ProfileRuntime;
use crate::spawn::{CommandSpec, Spawn};

/// Runs flatpak apps on the host, pointed at a profile's nested display.
pub struct FlatpakLauncher {
    spawn: Arc<dyn Spawn>,
}

impl FlatpakLauncher {
    pub fn new(spawn: Arc<dyn Spawn>) -> Self {
        Self { spawn }
    }

    /// `flatpak run <app> <args...>` with the profile's `DISPLAY` and client
    /// cookie. The app must be listed in `profile.flatpaks`.
    pub async fn run(
        &self,
        profile: &Profile,
        rt: &ProfileRuntime,
        app: &str,
        args: &[String],
    ) -> Result<i32> {
        if !profile.flatpaks.iter().any(|f| f == app) {
            return Err(ContainerError::FlatpakNotAllowed {
                app: app.to_string(),
                profile: profile.name.clone(),
            });
        }
        let binary = self
            .spawn
            .which("flatpak")
            .ok_or_else(|| ContainerError::DependencyMissing("flatpak".to_string()))?;

        let cmd = CommandSpec::new(binary.to_string_lossy())
            .args(["run", app])
            .args(args.iter().cloned())
            .env("DISPLAY", format!(":{}", profile.display))
            .env("XAUTHORITY", rt.data.client_cookie().to_string_lossy());
        info!(profile = %profile.name, app = %app, "running flatpak");
        Ok(self.spawn.status(&cmd).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use qube_profile::HostAccess;

    use super::*;
    use crate::spawn::Recorder;

    fn profile() -> Profile {
        Profile {
            name: "work".into(),
            display: 2,
            path: PathBuf::from("/cfg/work"),
            window_manager: "i3".into(),
            xephyr_args: String::new(),
            timezone: String::new(),
            dns: String::new(),
            runner: Default::default(),
            host_access: HostAccess::default(),
            external_drives: Vec::new(),
            flatpaks: vec!["org.mozilla.firefox".into()],
            image: String::new(),
        }
    }

    #[tokio::test]
    async fn runs_allowed_app_on_profile_display() {
        let rec = Arc::new(Recorder::new().with_path(&["flatpak"]));
        let launcher = FlatpakLauncher::new(rec.clone());
        let rt = ProfileRuntime::new("work", 1000, Path::new("/home/alice"));
        let code = launcher
            .run(&profile(), &rt, "org.mozilla.firefox", &["--private-window".into()])
            .await
            .unwrap();
        assert_eq!(code, 0);

        let calls = rec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].display(),
            "/usr/bin/flatpak run org.mozilla.firefox --private-window"
        );
        assert!(calls[0].env.contains(&("DISPLAY".into(), ":2".into())));
        assert!(calls[0].env.contains(&(
            "XAUTHORITY".into(),
            "/home/alice/.qubesome/profiles/work/.Xclient-cookie".into()
        )));
    }

    #[tokio::test]
    async fn rejects_app_not_in_profile() {
        let rec = Arc::new(Recorder::new().with_path(&["flatpak"]));
        let launcher = FlatpakLauncher::new(rec.clone());
        let rt = ProfileRuntime::new("work", 1000, Path::new("/home/alice"));
        let err = launcher
            .run(&profile(), &rt, "com.slack.Slack", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::FlatpakNotAllowed { .. }));
        assert!(rec.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_flatpak_binary() {
        let launcher = FlatpakLauncher::new(Arc::new(Recorder::new()));
        let rt = ProfileRuntime::new("work", 1000, Path::new("/home/alice"));
        let err = launcher
            .run(&profile(), &rt, "org.mozilla.firefox", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::DependencyMissing(b) if b == "flatpak"));
    }
}
