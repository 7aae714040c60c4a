use heapless::Deque;

use crate::{CommandLine, BUFSIZE};

/// Complete lines waiting for the dispatcher, oldest first.
#[derive(Debug, Default)]
pub struct CommandQueue {
    lines: Deque<CommandLine, BUFSIZE>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands the line back if the queue is full.
    pub fn push(&mut self, line: CommandLine) -> Result<(), CommandLine> {
        self.lines.push_back(line)
    }

    pub fn pop(&mut self) -> Option<CommandLine> {
        self.lines.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lines.is_full()
    }

    /// Should the reader start pulling in another line? We keep one slot spare so
    /// that a line finished mid-read always has somewhere to go.
    pub fn wants_input(&self) -> bool {
        self.lines.len() < BUFSIZE - 1
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
