mod command;
mod error;
pub mod flatpak;
pub mod gpu;
pub mod launcher;
pub mod mime;
pub mod paths;
pub mod runner;
pub mod spawn;
pub mod xauth;
pub mod xephyr;

pub use command::CommandError;
pub use error::{ContainerError, Result, XauthError};
pub use flatpak::FlatpakLauncher;
pub use launcher::{HostFacts, HostLayout, Launcher, build_run_args};
pub use paths::{DataPaths, IN_PROFILE_SOCKET, ProfileRuntime, RuntimePaths};
pub use runner::{Runner, RunnerKind};
pub use spawn::{CommandSpec, Spawn, SystemSpawner};
pub use xauth::{CookiePair, synthesize_cookies};
