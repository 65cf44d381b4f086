//! Profile and workload model, validation, and the permission intersection
//! that turns a workload into a runnable descriptor.

mod effective;
mod error;
mod expand;
mod types;
mod usb;
pub mod validate;

pub use effective::{ComposeContext, EffectiveWorkload};
pub use error::{ProfileError, Result};
pub use expand::{Expansions, PathSpec, clean, is_within};
pub use types::{ExternalDrive, HostAccess, Profile, RunnerChoice, Workload};
pub use usb::{SYSFS_USB_DEVICES, UsbResolver, dedup};
