//! Message-trimming policy for LLM context control.
//!
//! Oldest non-system messages go first until the estimated conversation
//! fits the token budget. System messages and the most recent user turn
//! are always preserved. Estimation uses a 4-chars-per-token heuristic
//! unless a model-aware tokenizer is plugged in.

use crate::core::{ChatMessage, MessageRole};

/// Token counting seam.
pub trait Tokenizer: Send + Sync {
    /// Estimated token count for the text.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Default heuristic: roughly 4 characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4).max(1)
    }
}

/// Trim a conversation to fit a token budget.
///
/// Keeps at least `min_messages` messages. When a single message alone
/// exceeds the budget and `min_messages` is 1, that message is returned
/// anyway - the caller asked for a floor, not an empty conversation.
pub fn trim_messages(
    messages: &[ChatMessage],
    budget_tokens: usize,
    min_messages: usize,
    tokenizer: &dyn Tokenizer,
) -> Vec<ChatMessage> {
    let counts: Vec<usize> = messages
        .iter()
        .map(|m| tokenizer.count_tokens(&m.content))
        .collect();
    let mut total: usize = counts.iter().sum();

    if total <= budget_tokens {
        return messages.to_vec();
    }

    let last_user = messages
        .iter()
        .rposition(|m| m.role == MessageRole::User);

    let mut keep = vec![true; messages.len()];
    let mut kept = messages.len();

    for index in 0..messages.len() {
        if total <= budget_tokens || kept <= min_messages.max(1) {
            break;
        }
        if messages[index].role == MessageRole::System {
            continue;
        }
        if Some(index) == last_user {
            continue;
        }
        keep[index] = false;
        total -= counts[index];
        kept -= 1;
    }

    messages
        .iter()
        .zip(keep)
        .filter_map(|(message, kept)| kept.then(|| message.clone()))
        .collect()
}
