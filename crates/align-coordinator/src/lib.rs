//! ALIGN Coordinator - Localization negotiation core
//!
//! The coordinator multiplexes one physical connection across the
//! negotiation commands, tracks one participant per connected peer,
//! owns the localizer registry, and arbitrates localization sessions:
//! - `CommandRouter`: one handler per command header
//! - `SpatialCoordinator`: the negotiation state machine
//! - `Participant`: per-peer state with delta-suppressed broadcast
//! - localizer/session traits that algorithm implementations plug into

pub mod coordinate;
pub mod coordinator;
pub mod participant;
pub mod router;
pub mod session;
pub mod ticket;
pub mod tracking;

pub use coordinate::*;
pub use coordinator::*;
pub use participant::*;
pub use router::*;
pub use session::*;
pub use ticket::*;
pub use tracking::*;
