//! ALIGN Wire Protocol - Binary message format
//!
//! This crate implements the wire format for ALIGN messages:
//! - Little-endian primitive codec (writer/reader)
//! - Command envelope: length-prefixed UTF-8 header string + payload
//! - Typed payloads for the negotiation commands

pub mod command;
pub mod messages;
pub mod reader;
pub mod writer;

pub use command::*;
pub use messages::*;
pub use reader::*;
pub use writer::*;
