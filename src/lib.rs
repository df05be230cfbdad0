// NETBENCH LIBRARY
// PURE MODULES SHARED BY THE BINARY AND THE INTEGRATION TESTS.

pub mod affinity;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod expr;
pub mod hdr;
pub mod layout;
pub mod orchestrator;
pub mod params;
pub mod process;
pub mod scenario;

pub use error::{Error, Result};
