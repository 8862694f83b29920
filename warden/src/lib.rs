//! Warden: a secure multi-tenant gateway for autonomous agents.
//!
//! This crate re-exports the component crates behind feature flags so
//! applications can depend on a single entry point.

#![warn(missing_docs)]

pub use warden_primitives as primitives;

#[cfg(feature = "a2a")]
pub use warden_a2a as a2a;
#[cfg(feature = "capability")]
pub use warden_capability as capability;
#[cfg(feature = "gateway")]
pub use warden_gateway as gateway;
#[cfg(feature = "governance")]
pub use warden_governance as governance;
#[cfg(feature = "kernel")]
pub use warden_kernel as kernel;
#[cfg(feature = "memory")]
pub use warden_memory as memory;
#[cfg(feature = "policy")]
pub use warden_policy as policy;
#[cfg(feature = "services")]
pub use warden_services as services;
#[cfg(feature = "tools")]
pub use warden_tools as tools;
