//! Domain models for archived messages

mod message;

pub use message::{Message, MessageId};
