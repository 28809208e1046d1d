pub mod chat;
pub mod transcript;

pub use chat::ChatHistory;
pub use transcript::{Transcript, TranscriptEntry};
