//! Simulated remote node for skyftp.
//!
//! Answers the full protocol over any link, backed by a local directory for
//! the filesystem backends and a byte array for raw memory. Used by the
//! integration tests and by `skyftp serve`. Link loss can be injected to
//! exercise resume.

mod error;
pub mod node;
pub mod server;
pub mod storage;

pub use error::SimError;
pub use node::{RemoteNode, SimConfig};
pub use server::{serve_memory, serve_tcp, spawn_memory};
