//! Pending-request ordering.
//!
//! Two deques instead of one list with front/back tricks:
//!
//! | Priority | Discipline | Served |
//! |---|---|---|
//! | Top | stack (newest first) | always before any Normal request |
//! | Normal | queue (oldest first) | only when Top is empty |
//!
//! Top is a stack so that during rapid navigation the thumbnail the user is
//! looking at right now jumps ahead of the ones scrolled past a moment ago.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Top,
    Normal,
}

/// Pending items ordered by [`Priority`].
#[derive(Debug)]
pub struct RequestQueue<T> {
    top: VecDeque<T>,
    normal: VecDeque<T>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self {
            top: VecDeque::new(),
            normal: VecDeque::new(),
        }
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        match priority {
            Priority::Top => self.top.push_back(item),
            Priority::Normal => self.normal.push_back(item),
        }
    }

    /// Next item to serve: newest Top, else oldest Normal.
    pub fn pop(&mut self) -> Option<T> {
        self.top.pop_back().or_else(|| self.normal.pop_front())
    }

    /// Remove and return every item matching `predicate`, preserving the
    /// order of the rest.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        for deque in [&mut self.top, &mut self.normal] {
            let mut kept = VecDeque::with_capacity(deque.len());
            for item in deque.drain(..) {
                if predicate(&item) {
                    removed.push(item);
                } else {
                    kept.push_back(item);
                }
            }
            *deque = kept;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.top.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.normal.is_empty()
    }
}
