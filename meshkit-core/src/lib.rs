//! Core library for meshkit
//!
//! Opens sessions with Meshtastic radios over serial, TCP or Bluetooth,
//! provisions them from `MESHTASTIC_*` settings and exchanges text messages.

pub mod admin;
pub mod channel;
pub mod connection;
pub mod error;
pub mod message;
pub mod provision;
pub mod psk;
pub mod region;
pub mod settings;
pub mod state;
pub mod target;

// Re-export commonly used types
pub use anyhow::Result;
pub use connection::{DeviceSession, run_session};
pub use error::SessionError;
pub use target::ConnectionTarget;

// Re-export meshtastic types for convenience
pub use meshtastic::{Message, protobufs};

#[cfg(test)]
mod tests;
