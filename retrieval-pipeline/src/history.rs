use common::storage::types::conversation::{ConversationTurn, TurnRole};

pub use common::storage::types::conversation::format_history;

/// Keeps the last `max_pairs` exchanges, starting on a user turn.
pub fn trim_history(mut history: Vec<ConversationTurn>, max_pairs: usize) -> Vec<ConversationTurn> {
    let limit = max_pairs.saturating_mul(2);
    if history.len() > limit {
        history.drain(..history.len().saturating_sub(limit));
    }
    if history
        .first()
        .is_some_and(|turn| turn.role == TurnRole::Assistant)
    {
        history.remove(0);
    }
    history
}

pub fn append_exchange(
    mut history: Vec<ConversationTurn>,
    query: &str,
    answer: &str,
    max_pairs: usize,
) -> Vec<ConversationTurn> {
    history.push(ConversationTurn::user(query));
    history.push(ConversationTurn::assistant(answer));
    trim_history(history, max_pairs)
}
