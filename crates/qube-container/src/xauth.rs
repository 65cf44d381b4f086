//! Cookie pair synthesis for the nested X server.
//!
//! An xauth record is `family(2) | addr_len(2) addr | disp_len(2) disp |
//! name_len(2) name | data_len(2) data`, all lengths big-endian. The parent
//! record is used as a template: its address and protocol name are copied,
//! the display number and cookie are replaced.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::debug;

use crate::error::XauthError;
use crate::paths::DataPaths;

/// Smallest parent record that carries every field copied below.
pub const MIN_PARENT_LEN: usize = 50;
pub const COOKIE_LEN: usize = 16;
const FAMILY_WILD: [u8; 2] = [0xFF, 0xFF];

/// A synthesized cookie pair for one display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePair {
    /// Same family as the parent; read by the nested server.
    pub server: Vec<u8>,
    /// FamilyWild; mounted into workload containers.
    pub client: Vec<u8>,
}

/// Build the server and client records for `display` from `parent`.
///
/// Both records carry the same fresh 16-byte cookie drawn from `rng`.
pub fn synthesize_cookies<R: RngCore + ?Sized>(
    display: u8,
    parent: &[u8],
    rng: &mut R,
) -> Result<CookiePair, XauthError> {
    if parent.len() < MIN_PARENT_LEN {
        return Err(XauthError::InvalidAuthority(parent.len()));
    }
    let too_short = || XauthError::InvalidAuthority(parent.len());
    let family = parent.get(0..2).ok_or_else(too_short)?;
    // address length, address and the display length prefix
    let address = parent.get(2..11).ok_or_else(too_short)?;
    // protocol name length, MIT-MAGIC-COOKIE-1, cookie length
    let protocol = parent.get(12..34).ok_or_else(too_short)?;

    let mut cookie = [0u8; COOKIE_LEN];
    rng.try_fill_bytes(&mut cookie).map_err(XauthError::Crypto)?;

    let display = display.to_string();
    let mut body = Vec::with_capacity(parent.len());
    body.extend_from_slice(address);
    body.extend_from_slice(display.as_bytes());
    body.extend_from_slice(protocol);
    body.extend_from_slice(&cookie);

    let record = |family: &[u8]| {
        let mut out = Vec::with_capacity(family.len() + body.len());
        out.extend_from_slice(family);
        out.extend_from_slice(&body);
        out
    };

    Ok(CookiePair {
        server: record(family),
        client: record(&FAMILY_WILD),
    })
}

/// Location of the invoking user's xauth file: `$XAUTHORITY`, else
/// `~/.Xauthority`.
pub fn parent_authority_path(xauthority: Option<&str>, home: &Path) -> PathBuf {
    match xauthority {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => home.join(".Xauthority"),
    }
}

pub fn read_parent(path: &Path) -> Result<Vec<u8>, XauthError> {
    fs::read(path).map_err(|source| XauthError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write both cookies under the profile data dir (mode 0700), replacing any
/// previous files. Cookie files are 0600.
pub fn write_cookie_pair(data: &DataPaths, pair: &CookiePair) -> Result<(), XauthError> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(data.dir())
        .map_err(|source| XauthError::Io {
            path: data.dir().to_path_buf(),
            source,
        })?;

    write_private(&data.server_cookie(), &pair.server)?;
    write_private(&data.client_cookie(), &pair.client)?;
    debug!(dir = %data.dir().display(), "cookie pair written");
    Ok(())
}

fn write_private(path: &Path, content: &[u8]) -> Result<(), XauthError> {
    let io = |source| XauthError::Io {
        path: path.to_path_buf(),
        source,
    };
    // Remove first so a stale file with wider permissions is not reused.
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io(e)),
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(io)?;
    file.write_all(content).map_err(io)?;
    file.sync_all().map_err(io)
}
