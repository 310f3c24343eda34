//! Error types for the ALIGN protocol

use thiserror::Error;

use crate::LocalizerId;

/// Core ALIGN errors
#[derive(Error, Debug)]
pub enum AlignError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown command header: {0}")]
    UnknownCommand(String),

    // Registry errors
    #[error("Localizer already registered: {0}")]
    DuplicateLocalizer(LocalizerId),

    #[error("Unknown localizer: {0}")]
    UnknownLocalizer(LocalizerId),

    #[error("Localizer not supported on this platform: {0}")]
    UnsupportedLocalizer(LocalizerId),

    // Session errors
    #[error("A localization session is already running for another participant")]
    SessionConflict,

    #[error("Localization session cancelled")]
    SessionCancelled,

    #[error("Invalid localization settings: {0}")]
    InvalidSettings(String),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection is not connected")]
    NotConnected,

    #[error("Message exceeds maximum size: {0} bytes")]
    MessageTooLarge(usize),
}

/// Result type for ALIGN operations
pub type AlignResult<T> = Result<T, AlignError>;
