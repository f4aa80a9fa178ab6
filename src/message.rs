use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation: role, text content, and the time it arrived.
///
/// Messages form the session's append-only history. Each message carries a
/// role (typically "user", "assistant", or "system") alongside its content
/// and timestamp.
///
/// # Examples
///
/// ```
/// use careloom::message::Message;
///
/// let user_msg = Message::user("I have a headache");
/// let assistant_msg = Message::assistant("When did it start?");
///
/// assert!(user_msg.has_role(Message::USER));
/// assert!(!user_msg.has_role(Message::ASSISTANT));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    ///
    /// Use the constants on [`Message`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
    /// When the message was recorded.
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System notice message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content, stamped now.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            when: Utc::now(),
        }
    }

    /// Creates a user message.
    ///
    /// ```
    /// use careloom::message::Message;
    /// let msg = Message::user("hello");
    /// assert_eq!(msg.role, "user");
    /// ```
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::user("a").role, Message::USER);
        assert_eq!(Message::assistant("b").role, Message::ASSISTANT);
        assert_eq!(Message::system("c").role, Message::SYSTEM);
    }

    #[test]
    fn serde_round_trip() {
        let msg = Message::user("check");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
