//! Bounded, newest-first notification log.

use std::collections::VecDeque;

use tracing::{debug, instrument};

use crate::models::Notification;

#[derive(Debug)]
pub struct NotificationStore {
    entries: VecDeque<Notification>,
    capacity: usize,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend and drop whatever falls past the capacity.
    #[instrument(skip_all, fields(id = %notification.id, len = self.entries.len()))]
    pub fn ingest(&mut self, notification: Notification) {
        self.entries.push_front(notification);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(id = %evicted.id, "evicted oldest notification");
            }
        }
    }

    /// Returns false when no entry has that id.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
