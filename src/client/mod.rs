// ABOUTME: Client module: connection lifecycle, command processing, input handling
// ABOUTME: Exports the Client entry point and its configuration

//! The client half of the protocol.
//!
//! A client keeps two connections to the same host: the data socket, which
//! carries chat broadcasts, and the command socket, which carries command
//! exchanges and file bytes. Three concerns run concurrently per session:
//!
//! * the data receive loop, rendering chat as it arrives,
//! * the command processor, answering the server's echoes and running the
//!   client half of every exchange,
//! * the input loop, validating typed commands before anything is sent.
//!
//! A dropped connection reconnects automatically unless the disconnect was
//! deliberate (`/DC`, a kick, or quitting the interface).

pub mod dispatcher;
pub mod input;
pub mod session;

pub use session::{Client, ClientConfig, ClientError};
