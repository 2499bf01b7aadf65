//! Counted completion barrier for fan-in
//!
//! A barrier starts with the number of predecessors still outstanding. Each
//! success decrements it; the completion that reaches zero is told to dispatch
//! the successor. The first failure abandons the barrier. Exactly one
//! completion ever sees `Ready` or `Abandoned`.

/// What a predecessor completion did to the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinProgress {
    /// Still waiting on this many predecessors
    Waiting { remaining: usize },
    /// Last predecessor succeeded; dispatch the successor
    Ready,
    /// A predecessor failed; the successor will never run
    Abandoned,
    /// The barrier was already resolved; nothing to do
    Resolved,
}

#[derive(Debug, Clone)]
pub struct JoinBarrier {
    remaining: usize,
    resolved: bool,
}

impl JoinBarrier {
    pub fn new(predecessors: usize) -> Self {
        Self {
            remaining: predecessors,
            resolved: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Record one predecessor reaching a final status
    pub fn complete_one(&mut self, success: bool) -> JoinProgress {
        if self.resolved {
            return JoinProgress::Resolved;
        }

        if !success {
            self.resolved = true;
            return JoinProgress::Abandoned;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.resolved = true;
            JoinProgress::Ready
        } else {
            JoinProgress::Waiting {
                remaining: self.remaining,
            }
        }
    }
}
