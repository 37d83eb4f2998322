//! Conversation UI components for chat interface

pub mod composer;
pub mod history;
pub mod view;

pub use composer::{ComposerResult, ConversationComposer};
pub use history::ConversationHistory;
pub use view::{ConversationView, StatusInfo};
