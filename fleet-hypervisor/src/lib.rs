//! Hypervisor client abstraction.
//!
//! Defines the capability interface the fleet orchestrator consumes to act on
//! hypervisor pools, along with the value types exchanged through it. The
//! wire protocol of any concrete pool (XenAPI or otherwise) lives behind
//! [`HypervisorClient`]; this crate only ships a simulated in-memory backend.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::HypervisorClient;
pub use error::{HypervisorError, Result};
pub use memory::InMemoryHypervisor;
pub use types::*;
