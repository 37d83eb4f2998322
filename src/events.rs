use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Terminal events delivered to the application loop
#[derive(Debug, Clone)]
pub enum TuiEvent {
    /// Key press event
    Key(crossterm::event::KeyEvent),

    /// Bracketed paste
    Paste(String),

    /// Terminal resize; the next draw picks up the new size
    Resize,

    /// Periodic tick, used to pump streamed fragments and animate the cursor
    Tick,
}

/// Author of a transcript message
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Prefix shown before the message body in the history view
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User: ",
            Role::Assistant => "AI: ",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_wire_names_are_lowercase() {
        assert_eq!(Role::User.as_ref(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::from_str("assistant").unwrap(), Role::Assistant);
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }

    #[test]
    fn role_labels() {
        assert_eq!(Role::User.label(), "User: ");
        assert_eq!(Role::Assistant.label(), "AI: ");
    }
}
