//! Per-message retransmit deadline (§3 "implicit deadline").

use std::time::{Duration, Instant};

use crate::message::Message;

/// Every outstanding message gets a one-second retransmit deadline.
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// A message paired with the deadline at which it should be re-sent.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message: Message,
    deadline: Instant,
}

impl PendingMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            deadline: Instant::now() + RETRANSMIT_TIMEOUT,
        }
    }

    pub fn is_timeout(&self) -> bool {
        Instant::now() > self.deadline
    }

    /// Reset the deadline relative to now, as happens on every re-send.
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + RETRANSMIT_TIMEOUT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_message_is_not_timed_out() {
        let pm = PendingMessage::new(Message::end());
        assert!(!pm.is_timeout());
    }

    #[test]
    fn reset_pushes_deadline_into_the_future() {
        let mut pm = PendingMessage::new(Message::end());
        std::thread::sleep(Duration::from_millis(5));
        pm.reset();
        assert!(!pm.is_timeout());
    }
}
