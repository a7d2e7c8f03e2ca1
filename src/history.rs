use serde::{Deserialize, Serialize};

use crate::game::Board;

/// Snapshots kept for undo: enough for both sides to spend their whole quota.
pub const HISTORY_CAPACITY: usize = 6;

/// Fixed-size ring of board snapshots taken before each applied move.
///
/// Once full, a push overwrites the oldest snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    slots: [Option<Board>; HISTORY_CAPACITY],
    /// Slot the next push writes to.
    cursor: usize,
    len: usize,
}

impl History {
    pub fn new() -> Self {
        History {
            slots: [None; HISTORY_CAPACITY],
            cursor: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, board: Board) {
        self.slots[self.cursor] = Some(board);
        self.cursor = (self.cursor + 1) % HISTORY_CAPACITY;
        self.len = (self.len + 1).min(HISTORY_CAPACITY);
    }

    /// Remove and return the most recent snapshot.
    pub fn pop(&mut self) -> Option<Board> {
        if self.len == 0 {
            return None;
        }
        self.cursor = (self.cursor + HISTORY_CAPACITY - 1) % HISTORY_CAPACITY;
        self.len -= 1;
        self.slots[self.cursor].take()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
