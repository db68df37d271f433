use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::RouteEntry;

/// A route installed from the update feed, kept for diagnostics
#[derive(Clone, Debug)]
pub struct LearnedRoute {
    pub learned_at: DateTime<Utc>,
    pub entry: RouteEntry,
}

/// Bounded history of learned routes, oldest entries are dropped first
#[derive(Debug)]
pub struct History {
    capacity: usize,
    routes: VecDeque<LearnedRoute>,
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            routes: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: RouteEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.routes.len() >= self.capacity {
            self.routes.pop_front();
        }
        self.routes.push_back(LearnedRoute {
            learned_at: Utc::now(),
            entry,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LearnedRoute> {
        self.routes.iter()
    }
}
