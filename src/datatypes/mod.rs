// ABOUTME: Small validated wire types shared by both halves of the protocol
// ABOUTME: Attribute pairs, PASS/FAIL tokens, usernames and the roster snapshot

pub mod attr;
pub mod roster;
pub mod token;
pub mod username;

pub use attr::{Attr, Color, Property};
pub use token::{Token, TokenError};
pub use username::{NameError, Username};
