//! Pending-ack queue.
//!
//! Packets whose type awaits an acknowledgment are mirrored here when first
//! sent. Each loop iteration retransmits the head of the queue and rotates it
//! to the back, so every pending packet is retried in turn. A head sent less
//! than `retry_interval` ago is left alone, so a busy loop does not burn the
//! retry budget. An entry leaves the queue when a matching ack arrives, when
//! `timeout` has passed since the first send, or after `max_retries`
//! retransmissions.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use udp2p_core::{Address, Tag};

use crate::message::Message;

#[derive(Debug, Clone)]
struct PendingAck {
    message: Message,
    ack_tag: Tag,
    first_sent: Instant,
    last_sent: Instant,
    retries: u32,
}

#[derive(Debug)]
pub struct AckQueue {
    entries: VecDeque<PendingAck>,
    timeout: Duration,
    max_retries: u32,
    retry_interval: Duration,
}

impl AckQueue {
    pub fn new(timeout: Duration, max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            timeout,
            max_retries,
            retry_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track a message that was just sent. Re-pushing a tracked message is a
    /// no-op.
    pub fn push(&mut self, message: Message, now: Instant) {
        if self.entries.iter().any(|e| e.message == message) {
            return;
        }
        self.entries.push_back(PendingAck {
            ack_tag: message.packet.ack_tag(),
            message,
            first_sent: now,
            last_sent: now,
            retries: 0,
        });
    }

    /// Whether a packet with `ack_tag` is pending for `peer`.
    pub fn contains(&self, peer: &Address, ack_tag: &Tag) -> bool {
        self.position(peer, ack_tag).is_some()
    }

    /// Clear the entry acknowledged by `peer` with `ack_tag`. Returns false if
    /// nothing matched.
    pub fn acknowledge(&mut self, peer: &Address, ack_tag: &Tag) -> bool {
        match self.position(peer, ack_tag) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    fn position(&self, peer: &Address, ack_tag: &Tag) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.ack_tag == ack_tag && e.message.peer.address() == peer)
    }

    /// Drop every entry past its deadline or retry budget.
    pub fn expire(&mut self, now: Instant) -> Vec<Message> {
        let (timeout, max_retries) = (self.timeout, self.max_retries);
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            let dead = now.saturating_duration_since(e.first_sent) >= timeout || e.retries >= max_retries;
            if dead {
                expired.push(e.message.clone());
            }
            !dead
        });
        expired
    }

    /// The head of the queue, if it was last sent at least `retry_interval`
    /// before `now`. The entry is counted as retried and moved to the back.
    pub fn retransmit(&mut self, now: Instant) -> Option<Message> {
        // Entries are appended in send order, so the head is the oldest.
        let head = self.entries.front()?;
        if head.last_sent >= now || now - head.last_sent < self.retry_interval {
            return None;
        }
        let mut entry = self.entries.pop_front()?;
        entry.retries += 1;
        entry.last_sent = now;
        let message = entry.message.clone();
        self.entries.push_back(entry);
        Some(message)
    }
}
