//! Map USB product names to device nodes via sysfs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ProfileError, Result};

pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Resolves product-name prefixes against a sysfs USB device tree.
#[derive(Debug, Clone)]
pub struct UsbResolver {
    root: PathBuf,
    dev: PathBuf,
}

impl Default for UsbResolver {
    fn default() -> Self {
        Self::with_root(SYSFS_USB_DEVICES)
    }
}

impl UsbResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver over a different sysfs root, device paths still under `/dev`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dev: PathBuf::from("/dev"),
        }
    }

    /// Device paths for every device whose product name starts with one of
    /// `names`, in discovery order. Callers deduplicate.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<PathBuf>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("{}/*/product", glob::Pattern::escape(&self.root.to_string_lossy()));
        let entries = glob::glob(&pattern).map_err(|e| ProfileError::UsbPattern(e.to_string()))?;

        let mut out = Vec::new();
        let mut matched = vec![false; names.len()];
        for entry in entries {
            let product_file = entry.map_err(|e| ProfileError::UsbEnumeration {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            let product = read_first_line(&product_file)?;
            let Some(idx) = names.iter().position(|n| product.starts_with(n.as_str())) else {
                continue;
            };
            if let Some(flag) = matched.get_mut(idx) {
                *flag = true;
            }

            let Some(parent) = product_file.parent() else {
                continue;
            };
            debug!(product = %product, device = %parent.display(), "usb device matched");
            out.push(self.bus_path(parent)?);
            out.extend(self.hidraw_paths(parent)?);
        }

        for (name, found) in names.iter().zip(matched) {
            if !found {
                info!(device = %name, "no usb device found");
            }
        }
        Ok(out)
    }

    fn bus_path(&self, device: &Path) -> Result<PathBuf> {
        let bus = read_number(&device.join("busnum"))?;
        let dev = read_number(&device.join("devnum"))?;
        Ok(self.dev.join(format!("bus/usb/{bus:03}/{dev:03}")))
    }

    /// `/dev/hidrawN` for every interface `<device>/<basename>:*/*/hidraw/hidraw*`.
    fn hidraw_paths(&self, device: &Path) -> Result<Vec<PathBuf>> {
        let Some(base) = device.file_name() else {
            return Ok(Vec::new());
        };
        let pattern = format!(
            "{}/{}:*/*/hidraw/hidraw*",
            glob::Pattern::escape(&device.to_string_lossy()),
            glob::Pattern::escape(&base.to_string_lossy()),
        );
        let entries = glob::glob(&pattern).map_err(|e| ProfileError::UsbPattern(e.to_string()))?;

        let mut out = Vec::new();
        for entry in entries {
            let node = entry.map_err(|e| ProfileError::UsbEnumeration {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if let Some(name) = node.file_name() {
                out.push(self.dev.join(name));
            }
        }
        Ok(out)
    }
}

fn read_first_line(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|source| ProfileError::UsbEnumeration {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.lines().next().unwrap_or_default().to_string())
}

fn read_number(path: &Path) -> Result<u32> {
    let line = read_first_line(path)?;
    line.trim().parse().map_err(|_| ProfileError::UsbEnumeration {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("not a number: {line:?}"),
        ),
    })
}

/// Drop repeated paths, keeping first occurrence.
pub fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for p in paths {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}
