//! ALIGN Transport Layer - TCP message transport
//!
//! This crate provides:
//! - Length-delimited message framing over byte streams
//! - `NetworkConnection`: one peer endpoint with idempotent disconnect,
//!   activity timeout, and non-throwing send
//! - `ConnectionManager`: listener/client ownership with a queue-fed,
//!   single-threaded event pump

pub mod connection;
pub mod framing;
pub mod manager;

pub use connection::*;
pub use framing::*;
pub use manager::*;
