use std::{collections::VecDeque, sync::Mutex};

use tokio::time::Instant;

use crate::protocol::MessageId;

use super::envelope::QueueMessage;

/// Dual FIFO message shelves, one priority and one regular. Every mutating
/// operation is linearised by the store's own lock; the queue lock is never
/// required to touch the store.
#[derive(Debug, Default)]
pub struct MessageStore {
    shelves: Mutex<Shelves>,
}

#[derive(Debug, Default)]
struct Shelves {
    priority: VecDeque<QueueMessage>,
    regular: VecDeque<QueueMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the class the message's priority flag selects.
    pub fn put(&self, message: QueueMessage) {
        message.mark_in_queue();
        let mut shelves = self.shelves.lock().unwrap();
        if message.is_high_priority() {
            shelves.priority.push_back(message);
        } else {
            shelves.regular.push_back(message);
        }
    }

    /// Put-back insertion: the message re-enters at the head of the chosen
    /// class and its priority flag is rewritten to match.
    pub fn put_front(&self, message: QueueMessage, priority: bool) {
        message.update_message(|m| m.high_priority = priority);
        message.mark_in_queue();
        let mut shelves = self.shelves.lock().unwrap();
        if priority {
            shelves.priority.push_front(message);
        } else {
            shelves.regular.push_front(message);
        }
    }

    /// Next deliverable message: priority class first, then regular.
    /// `from_end` reads the tail of the class instead of the head.
    pub fn get_next(&self, remove: bool, from_end: bool) -> Option<QueueMessage> {
        let mut shelves = self.shelves.lock().unwrap();
        let shelf = if !shelves.priority.is_empty() {
            &mut shelves.priority
        } else {
            &mut shelves.regular
        };
        Self::take(shelf, remove, from_end)
    }

    pub fn get_priority_next(&self, remove: bool) -> Option<QueueMessage> {
        Self::take(&mut self.shelves.lock().unwrap().priority, remove, false)
    }

    pub fn get_regular_next(&self, remove: bool) -> Option<QueueMessage> {
        Self::take(&mut self.shelves.lock().unwrap().regular, remove, false)
    }

    fn take(shelf: &mut VecDeque<QueueMessage>, remove: bool, from_end: bool) -> Option<QueueMessage> {
        if remove {
            let message = if from_end {
                shelf.pop_back()
            } else {
                shelf.pop_front()
            }?;
            message.leave_queue();
            Some(message)
        } else if from_end {
            shelf.back().cloned()
        } else {
            shelf.front().cloned()
        }
    }

    /// Remove and return the first match, scanning priority then regular.
    pub fn find_and_remove(
        &self,
        mut predicate: impl FnMut(&QueueMessage) -> bool,
    ) -> Option<QueueMessage> {
        let mut shelves = self.shelves.lock().unwrap();
        let Shelves { priority, regular } = &mut *shelves;
        for shelf in [priority, regular] {
            if let Some(at) = shelf.iter().position(&mut predicate) {
                let message = shelf.remove(at)?;
                message.leave_queue();
                return Some(message);
            }
        }
        None
    }

    pub fn find_all(&self, mut predicate: impl FnMut(&QueueMessage) -> bool) -> Vec<QueueMessage> {
        let shelves = self.shelves.lock().unwrap();
        shelves
            .priority
            .iter()
            .chain(shelves.regular.iter())
            .filter(|m| predicate(m))
            .cloned()
            .collect()
    }

    /// Drain every message whose deadline has passed.
    pub fn remove_expired(&self, now: Instant) -> Vec<QueueMessage> {
        let mut shelves = self.shelves.lock().unwrap();
        let mut expired = Vec::new();
        let Shelves { priority, regular } = &mut *shelves;
        for shelf in [priority, regular] {
            let mut index = 0;
            while index < shelf.len() {
                if shelf[index].is_expired(now) {
                    if let Some(message) = shelf.remove(index) {
                        message.leave_queue();
                        expired.push(message);
                    }
                } else {
                    index += 1;
                }
            }
        }
        expired
    }

    pub fn count_all(&self) -> usize {
        let shelves = self.shelves.lock().unwrap();
        shelves.priority.len() + shelves.regular.len()
    }
    pub fn count_priority(&self) -> usize {
        self.shelves.lock().unwrap().priority.len()
    }
    pub fn count_regular(&self) -> usize {
        self.shelves.lock().unwrap().regular.len()
    }
    pub fn is_empty(&self) -> bool {
        self.count_all() == 0
    }

    pub fn clear_priority(&self) -> usize {
        Self::clear(&mut self.shelves.lock().unwrap().priority)
    }
    pub fn clear_regular(&self) -> usize {
        Self::clear(&mut self.shelves.lock().unwrap().regular)
    }
    pub fn clear_all(&self) -> usize {
        let mut shelves = self.shelves.lock().unwrap();
        Self::clear(&mut shelves.priority) + Self::clear(&mut shelves.regular)
    }

    fn clear(shelf: &mut VecDeque<QueueMessage>) -> usize {
        let cleared = shelf.len();
        for message in shelf.drain(..) {
            message.leave_queue();
        }
        cleared
    }

    /// Racy read-only snapshot for sync paths; callers must not treat the
    /// result as current.
    pub fn get_unsafe(&self) -> Vec<QueueMessage> {
        let shelves = self.shelves.lock().unwrap();
        shelves
            .priority
            .iter()
            .chain(shelves.regular.iter())
            .cloned()
            .collect()
    }

    pub fn get_unsafe_priority(&self) -> Vec<QueueMessage> {
        self.shelves.lock().unwrap().priority.iter().cloned().collect()
    }

    /// Ordered id snapshot of one class.
    pub fn get_message_id_list(&self, priority: bool) -> Vec<MessageId> {
        let shelves = self.shelves.lock().unwrap();
        let shelf = if priority {
            &shelves.priority
        } else {
            &shelves.regular
        };
        shelf.iter().filter_map(|m| m.id()).collect()
    }
}
