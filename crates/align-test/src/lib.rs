//! ALIGN Test Harness - protocol validation tooling
//!
//! This crate provides:
//! - In-memory connection pairs with observable wire traffic
//! - A coordinator harness that pumps events deterministically
//! - Scripted detectors, pose sources, anchor stores, and localizers
//!
//! The integration tests under `tests/` exercise the negotiation
//! protocol's properties end to end over these doubles and over real
//! localhost TCP.

pub mod memory;
pub mod scripted;

pub use memory::*;
pub use scripted::*;
