use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use qube_profile::{Expansions, Profile, Workload, validate};
use serde::Deserialize;
use tracing::debug;

use crate::error::{QubesomeError, QubesomeResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::level_filters::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub log_to_file: bool,
    pub log_to_stdout: bool,
    pub log_to_syslog: bool,
}

/// Workload and profile that handle a URI scheme.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MimeHandler {
    pub workload: String,
    pub profile: String,
}

/// When workload images are pulled. Only `on-demand` is acted on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullMode {
    #[default]
    OnDemand,
    Background,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub profiles: BTreeMap<String, Profile>,
    pub mime_handlers: BTreeMap<String, MimeHandler>,
    pub default_mime_handler: Option<MimeHandler>,
    pub workload_pull_mode: PullMode,
    /// Directory holding the config file.
    #[serde(skip)]
    pub root_dir: PathBuf,
}

/// Load, normalise and validate a config file.
///
/// Profile names are taken from their map keys, profile paths are expanded
/// and resolved against the config's directory.
pub async fn load(path: &Path, expansions: &Expansions) -> QubesomeResult<Config> {
    let invalid = |message: String| QubesomeError::ConfigInvalid {
        path: path.to_path_buf(),
        message,
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| invalid(format!("read: {e}")))?;
    let mut config: Config =
        serde_yaml_ng::from_str(&content).map_err(|e| invalid(format!("parse: {e}")))?;
    config.root_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    config.normalise_profiles(expansions).map_err(invalid)?;
    for profile in config.profiles.values() {
        profile
            .validate(expansions)
            .map_err(|e| invalid(e.to_string()))?;
    }
    config.check_handlers().map_err(invalid)?;

    debug!(
        path = %path.display(),
        profiles = config.profiles.len(),
        handlers = config.mime_handlers.len(),
        "config loaded"
    );
    Ok(config)
}

impl Config {
    pub fn profile(&self, name: &str) -> QubesomeResult<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| QubesomeError::ProfileNotFound(name.to_string()))
    }

    fn normalise_profiles(&mut self, expansions: &Expansions) -> Result<(), String> {
        for (key, profile) in &mut self.profiles {
            if profile.name.is_empty() {
                profile.name = key.clone();
            } else if &profile.name != key {
                return Err(format!(
                    "profile {key:?} declares a different name {:?}",
                    profile.name
                ));
            }
            let expanded = PathBuf::from(expansions.expand(&profile.path.to_string_lossy()));
            profile.path = if expanded.is_relative() {
                self.root_dir.join(expanded)
            } else {
                expanded
            };
        }
        Ok(())
    }

    fn check_handlers(&self) -> Result<(), String> {
        let handlers = self
            .mime_handlers
            .iter()
            .map(|(scheme, h)| (scheme.as_str(), h))
            .chain(self.default_mime_handler.iter().map(|h| ("default", h)));
        for (scheme, handler) in handlers {
            validate::workload_name(&handler.workload)
                .map_err(|e| format!("mime handler {scheme}: {e}"))?;
            if !self.profiles.contains_key(&handler.profile) {
                return Err(format!(
                    "mime handler {scheme}: unknown profile {:?}",
                    handler.profile
                ));
            }
        }
        Ok(())
    }
}

/// `<profile.path>/workloads/<name>.yaml`
pub fn workload_path(profile: &Profile, name: &str) -> PathBuf {
    profile.path.join("workloads").join(format!("{name}.yaml"))
}

/// Load the workload `name` declared by `profile`.
pub async fn load_workload(profile: &Profile, name: &str) -> QubesomeResult<Workload> {
    let not_found = || QubesomeError::WorkloadNotFound {
        workload: name.to_string(),
        profile: profile.name.clone(),
    };
    validate::workload_name(name).map_err(|_| not_found())?;

    let path = workload_path(profile, name);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(QubesomeError::fs(&path)(e)),
    };
    let workload: Workload =
        serde_yaml_ng::from_str(&content).map_err(|e| QubesomeError::ConfigInvalid {
            path: path.clone(),
            message: format!("parse: {e}"),
        })?;
    if workload.name != name {
        return Err(QubesomeError::ConfigInvalid {
            path,
            message: format!("file declares workload {:?}", workload.name),
        });
    }
    Ok(workload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
logging:
  level: debug
  logToFile: true
profiles:
  personal:
    display: 1
    path: personal
    windowManager: awesome
    hostAccess:
      paths:
        - ${HOME}/Downloads
  work:
    name: work
    display: 2
    path: ${GITDIR}/work
    windowManager: i3
    dns: 1.1.1.1
mimeHandlers:
  https:
    workload: firefox
    profile: personal
defaultMimeHandler:
  workload: chrome
  profile: work
workloadPullMode: background
somethingElse: ignored
"#;

    fn expansions(dir: &Path) -> Expansions {
        Expansions::for_host(Path::new("/home/alice"), Some(dir))
    }

    async fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("qubesome.config");
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG).await;

        let config = load(&path, &expansions(dir.path())).await.unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.logging.log_to_file);
        assert!(!config.logging.log_to_stdout);
        assert_eq!(config.workload_pull_mode, PullMode::Background);
        assert_eq!(config.root_dir, dir.path());

        let personal = config.profile("personal").unwrap();
        assert_eq!(personal.name, "personal");
        assert_eq!(personal.path, dir.path().join("personal"));
        let work = config.profile("work").unwrap();
        assert_eq!(work.path, dir.path().join("work"));
        assert_eq!(work.dns, "1.1.1.1");

        assert_eq!(
            config.mime_handlers.get("https"),
            Some(&MimeHandler {
                workload: "firefox".into(),
                profile: "personal".into()
            })
        );
        assert_eq!(config.default_mime_handler.unwrap().workload, "chrome");
    }

    #[tokio::test]
    async fn defaults_when_sections_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "profiles: {}\n").await;
        let config = load(&path, &expansions(dir.path())).await.unwrap();
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.workload_pull_mode, PullMode::OnDemand);
        assert!(config.default_mime_handler.is_none());
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG).await;
        let config = load(&path, &expansions(dir.path())).await.unwrap();
        let err = config.profile("gaming").unwrap_err();
        assert!(matches!(err, QubesomeError::ProfileNotFound(p) if p == "gaming"));
    }

    #[tokio::test]
    async fn rejects_mismatched_profile_name() {
        let dir = tempfile::tempdir().unwrap();
        let content = "profiles:\n  a:\n    name: b\n    display: 1\n    path: /p\n    windowManager: i3\n";
        let path = write_config(dir.path(), content).await;
        let err = load(&path, &expansions(dir.path())).await.unwrap_err();
        assert!(matches!(err, QubesomeError::ConfigInvalid { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn rejects_invalid_profile_fields() {
        let dir = tempfile::tempdir().unwrap();
        let content =
            "profiles:\n  a:\n    display: 1\n    path: /p\n    windowManager: i3\n    dns: not-an-ip\n";
        let path = write_config(dir.path(), content).await;
        let err = load(&path, &expansions(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("not-an-ip"), "got {err}");
    }

    #[tokio::test]
    async fn rejects_handler_for_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        let content = "mimeHandlers:\n  https:\n    workload: firefox\n    profile: nope\n";
        let path = write_config(dir.path(), content).await;
        let err = load(&path, &expansions(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("unknown profile"), "got {err}");
    }

    #[tokio::test]
    async fn malformed_yaml_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "profiles: [unclosed").await;
        let err = load(&path, &expansions(dir.path())).await.unwrap_err();
        assert!(matches!(err, QubesomeError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn loads_workload_from_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG).await;
        let config = load(&path, &expansions(dir.path())).await.unwrap();
        let personal = config.profile("personal").unwrap();

        let workloads = dir.path().join("personal").join("workloads");
        tokio::fs::create_dir_all(&workloads).await.unwrap();
        tokio::fs::write(
            workloads.join("firefox.yaml"),
            "name: firefox\nimage: ghcr.io/qubesome/firefox:latest\ncommand: firefox\nmimeApps: [https]\nhostAccess:\n  x11: true\n",
        )
        .await
        .unwrap();

        let w = load_workload(personal, "firefox").await.unwrap();
        assert_eq!(w.image, "ghcr.io/qubesome/firefox:latest");
        assert!(w.host_access.x11);
        assert_eq!(w.mime_apps, vec!["https"]);

        let err = load_workload(personal, "slack").await.unwrap_err();
        assert!(matches!(
            err,
            QubesomeError::WorkloadNotFound { workload, profile } if workload == "slack" && profile == "personal"
        ));

        let err = load_workload(personal, "../etc/passwd").await.unwrap_err();
        assert!(matches!(err, QubesomeError::WorkloadNotFound { .. }));
    }
}
