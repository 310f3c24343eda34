//! Command router
//!
//! Splits an incoming message into its command header and payload and
//! dispatches to the one handler registered for that header. Unknown
//! headers and malformed envelopes are logged and dropped; a bad peer
//! message never tears down the connection.

use std::collections::HashMap;

use align_core::{AlignError, AlignResult};
use align_transport::{IncomingMessage, NetworkConnection};
use align_wire::{read_command_header, MessageReader};

/// Handler for one command header. Receives the connection the message
/// arrived on, the header itself, and a reader positioned at the payload.
pub type CommandHandler =
    Box<dyn Fn(&NetworkConnection, &str, &mut MessageReader<'_>) + Send + Sync>;

/// One-handler-per-header dispatch table.
#[derive(Default)]
pub struct CommandRouter {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a command header. Registering a second
    /// handler for the same header is an error; the existing handler stays.
    pub fn register(&mut self, command: &str, handler: CommandHandler) -> AlignResult<()> {
        if self.handlers.contains_key(command) {
            tracing::error!("command handler already registered for {}", command);
            return Err(AlignError::InvalidWireFormat(format!(
                "duplicate handler for {command}"
            )));
        }
        self.handlers.insert(command.to_string(), handler);
        Ok(())
    }

    /// Remove the handler for a command header. Unregistering a header that
    /// was never registered is logged, not fatal.
    pub fn unregister(&mut self, command: &str) {
        if self.handlers.remove(command).is_none() {
            tracing::error!(
                "attempted to unregister command handler for {} that was not registered",
                command
            );
        }
    }

    pub fn is_registered(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Parse the header off a received message and invoke its handler.
    pub fn dispatch(&self, message: &IncomingMessage) {
        let mut reader = MessageReader::new(&message.payload);
        let command = match read_command_header(&mut reader) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(
                    "dropping malformed message from {}: {}",
                    message.connection,
                    e
                );
                return;
            }
        };

        match self.handlers.get(&command) {
            Some(handler) => handler(&message.connection, &command, &mut reader),
            None => {
                tracing::warn!(
                    "no handler registered for command {} from {}, dropping",
                    command,
                    message.connection
                );
            }
        }
    }
}
