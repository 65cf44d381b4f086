//! Profile configs kept in git repositories.

use std::path::{Path, PathBuf};

use qube_container::{CommandSpec, Spawn};
use tracing::info;
use url::Url;

use crate::error::{QubesomeError, QubesomeResult};

/// Checkout directory for `url` under `base`: `<base>/<host>/<path...>`
/// with a trailing `.git` dropped. Accepts URLs and scp-style
/// `user@host:owner/repo` locations.
pub fn checkout_dir(base: &Path, url: &str) -> QubesomeResult<PathBuf> {
    let invalid = || QubesomeError::InvalidArgs(format!("unsupported git location {url:?}"));

    let (host, path) = if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
    {
        (host.to_string(), parsed.path().to_string())
    } else {
        let (authority, path) = url.split_once(':').ok_or_else(invalid)?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        (host.to_string(), path.to_string())
    };

    let mut parts: Vec<String> = std::iter::once(host.as_str())
        .chain(path.split('/'))
        .filter(|p| !p.is_empty())
        .map(sanitise)
        .collect();
    if let Some(last) = parts.last_mut()
        && let Some(stripped) = last.strip_suffix(".git")
    {
        *last = stripped.to_string();
    }
    if parts.len() < 2 || parts.iter().any(|p| p.is_empty() || p == "." || p == "..") {
        return Err(invalid());
    }

    let mut dir = base.to_path_buf();
    dir.extend(parts);
    Ok(dir)
}

fn sanitise(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Clone `url` under `base`, or fast-forward an existing checkout.
/// Returns the checkout directory.
pub async fn sync(spawn: &dyn Spawn, url: &str, base: &Path) -> QubesomeResult<PathBuf> {
    let git = spawn
        .which("git")
        .ok_or_else(|| QubesomeError::DependencyMissing("git".to_string()))?;
    let git = git.to_string_lossy();
    let dir = checkout_dir(base, url)?;
    let dir_str = dir.to_string_lossy();

    if dir.join(".git").exists() {
        info!(url = %url, dir = %dir.display(), "updating profile repository");
        spawn
            .output(&CommandSpec::new(git.as_ref()).args(["-C", dir_str.as_ref(), "pull", "--ff-only"]))
            .await?;
    } else {
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(QubesomeError::fs(parent))?;
        }
        info!(url = %url, dir = %dir.display(), "cloning profile repository");
        spawn
            .output(&CommandSpec::new(git.as_ref()).args(["clone", url, dir_str.as_ref()]))
            .await?;
    }
    Ok(dir)
}
