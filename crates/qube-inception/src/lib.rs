//! Inception RPC over a profile's Unix socket.
//!
//! A workload container started inside a profile sees the profile socket at
//! [`qube_proto::IN_PROFILE_SOCKET`] and uses [`InceptionClient`] to ask the
//! host to open URLs or start more workloads. The host side runs one
//! [`InceptionServer`] per started profile; the profile a request runs in is
//! fixed when the server is bound.

mod client;
mod error;
mod server;

pub use client::{CALL_TIMEOUT, InceptionClient};
pub use error::{InceptionError, Result};
pub use server::{HandlerError, InceptionHandler, InceptionServer, split_args};
