//! Handler files that route every URL opened inside a workload back through
//! `qubesome xdg-open`.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::error::{ContainerError, Result};
use crate::paths::IN_CONTAINER_EXECUTABLE;

pub const MIMEAPPS_LIST: &str = "mimeapps.list";
pub const DESKTOP_FILE: &str = "qubesome-default-handler.desktop";

/// MIME types claimed by the default handler.
const HANDLED_TYPES: &[&str] = &[
    "x-scheme-handler/unknown",
    "x-scheme-handler/about",
    "x-scheme-handler/http",
    "x-scheme-handler/https",
    "x-scheme-handler/mailto",
    "text/html",
    "application/pdf",
];

fn mimeapps_list() -> String {
    let mut out = String::from("[Default Applications]\n");
    for mime in HANDLED_TYPES {
        out.push_str(&format!("{mime}={DESKTOP_FILE}\n"));
    }
    out
}

fn desktop_entry() -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=qubesome default handler\n\
         Exec={IN_CONTAINER_EXECUTABLE} xdg-open %u\n\
         StartupNotify=false\n\
         NoDisplay=true\n\
         MimeType={};\n",
        HANDLED_TYPES.join(";")
    )
}

/// Written handler files, ready to be bind-mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFiles {
    pub mimeapps: PathBuf,
    pub desktop: PathBuf,
}

impl HandlerFiles {
    /// `-v` entries mounting both files into `<home>/.local/share/applications`.
    pub fn mounts(&self, home: &str) -> Vec<String> {
        let apps = format!("{home}/.local/share/applications");
        vec![
            format!("{}:{apps}/{MIMEAPPS_LIST}:ro", self.mimeapps.display()),
            format!("{}:{apps}/{DESKTOP_FILE}:ro", self.desktop.display()),
        ]
    }
}

/// Write `mimeapps.list` and the `.desktop` handler into `dir`.
pub fn write_handler_files(dir: &Path) -> Result<HandlerFiles> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(ContainerError::fs(dir))?;

    let files = HandlerFiles {
        mimeapps: dir.join(MIMEAPPS_LIST),
        desktop: dir.join(DESKTOP_FILE),
    };
    fs::write(&files.mimeapps, mimeapps_list()).map_err(ContainerError::fs(&files.mimeapps))?;
    fs::write(&files.desktop, desktop_entry()).map_err(ContainerError::fs(&files.desktop))?;
    Ok(files)
}
