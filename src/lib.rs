pub mod client;
pub mod commands;
pub mod connection;
pub mod datatypes;
pub mod files;
pub mod frame;
pub mod screen;
pub mod server;
pub mod verse;

#[cfg(test)]
mod tests;

// Re-export the wire layer for direct access
pub use connection::{Connection, FrameReader, FrameWriter};
pub use datatypes::{Attr, Token, Username};
pub use frame::Frame;

// Re-export the main entry points for easy access
pub use client::{Client, ClientConfig};
pub use screen::{LineScreen, ResponseOptions, Screen};
pub use server::{Server, ServerConfig};

/// The name the server itself speaks as. Seeded into the reserved-name set
/// so no user can claim it.
pub const SERVER_NAME: &str = "SYSTEM";

/// Default TCP port for the data socket (chat broadcasts).
pub const DEFAULT_PORT: u16 = 50150;

/// Default TCP port for the command socket.
pub const DEFAULT_CPORT: u16 = 50151;

/// Advertised user capacity. Display figure only; the roster is not capped.
pub const MAX_USERS: usize = 10;

/// Prefix a message with the speaker's name, the way every chat line and
/// direct message is rendered on the wire.
pub fn announce(name: &str, msg: &str) -> String {
    format!("[{name}]: {msg}")
}

/// Error returned by most functions.
///
/// Boxing is avoided in the frame parser, where a custom error `enum` is
/// defined because partial frames are hit during normal execution on a
/// socket. `std::error::Error` is implemented for `frame::Error` which
/// allows it to be converted to `Box<dyn std::error::Error>`.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for courier operations.
///
/// This is defined as a convenience.
pub type Result<T> = std::result::Result<T, Error>;
