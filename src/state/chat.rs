use crate::types::{ChatMessage, Role};

/// Session chat log. Every call to the model replays it in full.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Records a completed exchange. The user turn always precedes the reply.
    pub fn push_exchange(&mut self, user: impl Into<String>, reply: impl Into<String>) {
        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::model(reply));
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Model)
            .map(|message| message.content.as_str())
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_exchange_keeps_order() {
        let mut history = ChatHistory::new();
        history.push_exchange("hi", "hello");
        history.push_exchange("and?", "done");

        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);
        assert_eq!(history.last_reply(), Some("done"));
    }
}
