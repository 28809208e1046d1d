mod api;
mod chat;

pub use api::*;
pub use chat::{ChatMessage, Role};
