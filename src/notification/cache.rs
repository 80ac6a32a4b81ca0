//! Notification cache
//!
//! Unread counter plus a most-recent-first item list. Only the manager
//! mutates it (socket callbacks and `mark_read`); readers get snapshots
//! through a `watch` receiver.

use std::collections::VecDeque;

use super::messages::{NotificationItem, ServerMessage};
use crate::core_types::SubjectId;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationCache {
    unread: u64,
    items: VecDeque<NotificationItem>,
    capacity: usize,
}

impl Default for NotificationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl NotificationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            unread: 0,
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn unread(&self) -> u64 {
        self.unread
    }

    /// Most recent first
    pub fn items(&self) -> impl Iterator<Item = &NotificationItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply a server message; `Ping` is not a cache event
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::NewItem(item) => self.new_item(item.clone()),
            ServerMessage::ItemRead { id } => self.item_read(id),
            ServerMessage::CountSync { unread } => self.count_sync(*unread),
            ServerMessage::Ping => {}
        }
    }

    pub fn new_item(&mut self, item: NotificationItem) {
        // Redelivered item: keep the existing entry and counter
        if self.items.iter().any(|existing| existing.id == item.id) {
            return;
        }
        if !item.read {
            self.unread = self.unread.saturating_add(1);
        }
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn item_read(&mut self, id: &str) {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) if item.read => {}
            Some(item) => {
                item.read = true;
                self.unread = self.unread.saturating_sub(1);
            }
            // Item fell off the list (or predates it); the counter still moves
            None => self.unread = self.unread.saturating_sub(1),
        }
    }

    /// Authoritative counter from the server
    pub fn count_sync(&mut self, unread: u64) {
        self.unread = unread;
    }

    /// Local effect of `mark_read(subject)`: every unread item about `subject`
    pub fn mark_subject_read(&mut self, subject: &SubjectId) -> usize {
        let mut marked = 0;
        for item in self.items.iter_mut() {
            if !item.read && item.subject_id.as_ref() == Some(subject) {
                item.read = true;
                marked += 1;
            }
        }
        self.unread = self.unread.saturating_sub(marked as u64);
        marked
    }
}
