//! Token estimation for previews and debug logs.
//!
//! Uses a character-based heuristic: ~4 bytes per token. Nothing is trimmed
//! on these numbers; bounding the prompt is the history depth's job.

use rustedtavern_core::message::Message;

/// Per-message overhead for the role tag and delimiters.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("tests"), 2);
    }

    #[test]
    fn messages_include_overhead() {
        let messages = vec![Message::system("abcd"), Message::user("")];
        assert_eq!(estimate_messages_tokens(&messages), 5 + 4);
    }
}
