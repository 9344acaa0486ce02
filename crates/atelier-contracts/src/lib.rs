pub mod chat;
pub mod events;
pub mod images;
pub mod session;
pub mod styles;
