//! Message types, topic rules and reminder payloads
//!
//! This module holds the broker-agnostic vocabulary of the client: the values a
//! session publishes and receives, and the application payloads carried inside.

pub mod messages;
pub mod reminder;
pub mod topics;

pub use messages::*;
pub use reminder::*;
pub use topics::*;
