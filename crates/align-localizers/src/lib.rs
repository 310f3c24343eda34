//! ALIGN Localizers - Concrete localization algorithms
//!
//! Pluggable localizer implementations and the collaborator contracts they
//! consume:
//! - `MarkerLocalizer`: discover one physical marker
//! - `ThreeMarkerLocalizer`: derive a frame geometrically from three markers
//! - `SharedAnchorLocalizer`: create/discover a persisted anchor, handing
//!   the anchor id across the wire in-session
//!
//! Marker pixel processing, anchor persistence, and device pose tracking
//! stay behind the `MarkerDetector`, `AnchorStore`, and `PoseSource`
//! traits; this crate only orchestrates them.

pub mod anchor;
pub mod detector;
pub mod marker;
pub mod three_marker;

pub use anchor::*;
pub use detector::*;
pub use marker::*;
pub use three_marker::*;
