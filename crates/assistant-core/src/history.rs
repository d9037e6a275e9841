use voice_local::ConversationTurn;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Ordered conversation turns, oldest first.
///
/// `append` never trims, so the history can hold one turn over the limit
/// between a user turn being recorded and the reply that follows it.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            turns: Vec::with_capacity(limit + 1),
            limit,
        }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Drop the oldest turns until at most `limit` remain. Returns how many were dropped.
    pub fn trim(&mut self) -> usize {
        let excess = self.turns.len().saturating_sub(self.limit);
        self.turns.drain(..excess);
        excess
    }

    /// The turns in order, for handing to a reply generator.
    pub fn as_context(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
