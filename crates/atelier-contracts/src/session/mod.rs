mod message;

pub use message::{ChatMessage, MessageMeta, Role};
