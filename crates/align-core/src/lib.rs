//! ALIGN Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the ALIGN protocol:
//! - Identifiers (LocalizerId, ConnectionId)
//! - Pose math (Vec3, Quat, Pose)
//! - Tracking and location state enums
//! - Cooperative cancellation
//! - Protocol errors

pub mod cancel;
pub mod error;
pub mod id;
pub mod math;
pub mod state;

pub use cancel::*;
pub use error::*;
pub use id::*;
pub use math::*;
pub use state::*;
