//! Variable expansion and `host[:container[:ro]]` path entries.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{ProfileError, Result};

/// Fixed `${NAME}` substitution table.
///
/// Built once by the caller from the process environment and passed down;
/// nothing in this crate reads the environment itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansions {
    vars: BTreeMap<String, String>,
}

impl Expansions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `${HOME}` and, when known, `${GITDIR}`.
    pub fn for_host(home: &Path, gitdir: Option<&Path>) -> Self {
        let mut exp = Self::new().with("HOME", home.display().to_string());
        if let Some(dir) = gitdir {
            exp = exp.with("GITDIR", dir.display().to_string());
        }
        exp
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// Replace every known `${NAME}`. Unknown variables are left untouched.
    pub fn expand(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (name, value) in &self.vars {
            out = out.replace(&format!("${{{name}}}"), value);
        }
        out
    }
}

/// Lexically normalise a path: drop `.`, resolve `..` against preceding
/// components, collapse repeated separators. Never touches the filesystem.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` stays `/`
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Whether `path` equals `base` or lies below it (component-wise).
pub fn is_within(path: &Path, base: &Path) -> bool {
    clean(path).starts_with(clean(base))
}

/// A parsed `host_path[:container_path[:ro]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub host: PathBuf,
    pub container: PathBuf,
    pub read_only: bool,
}

impl PathSpec {
    /// Parse an entry, expanding variables in the host part.
    ///
    /// The host part must be absolute after expansion. A missing container
    /// part mounts the source at the same location.
    pub fn parse(entry: &str, expansions: &Expansions) -> Result<Self> {
        let (host_spec, rest) = entry.split_once(':').unwrap_or((entry, ""));
        let (container_spec, read_only) = match rest.rsplit_once(':') {
            Some((c, "ro")) => (c, true),
            _ if rest == "ro" => ("", true),
            _ => (rest, false),
        };

        let host = PathBuf::from(expansions.expand(host_spec));
        if !host.is_absolute() {
            return Err(ProfileError::NonAbsolutePath(entry.to_string()));
        }
        let host = clean(&host);
        let container = if container_spec.is_empty() {
            host.clone()
        } else {
            PathBuf::from(container_spec)
        };

        Ok(Self {
            host,
            container,
            read_only,
        })
    }

    /// Render back to `host:container[:ro]` with the host already expanded.
    pub fn to_entry(&self) -> String {
        let mut entry = format!("{}:{}", self.host.display(), self.container.display());
        if self.read_only {
            entry.push_str(":ro");
        }
        entry
    }
}
