//! Session mailbox: a bounded, thread-safe FIFO of inbound messages
//! delivered by the demultiplexer (or the client socket pump) to exactly
//! one session worker (§4.2).

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::message::Message;

/// Mailboxes hold at most this many undelivered messages. The engine is
/// tolerant of drops (the peer will retransmit), so a full mailbox sheds
/// the newest message rather than blocking the producer.
const MAILBOX_CAPACITY: usize = 256;

/// The producer half, held by the demultiplexer or the client pump loop.
#[derive(Clone)]
pub struct MailboxSender {
    tx: Sender<Message>,
}

impl MailboxSender {
    /// Push a message into the mailbox. Never blocks; a full mailbox drops
    /// the message and reports `false` so the caller can log it.
    pub fn push(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// The consumer half, held by the session worker / transfer engine.
pub struct Mailbox {
    rx: Receiver<Message>,
}

impl Mailbox {
    pub fn new() -> (MailboxSender, Mailbox) {
        let (tx, rx) = bounded(MAILBOX_CAPACITY);
        (MailboxSender { tx }, Mailbox { rx })
    }

    /// Non-blocking pop; returns `None` if the mailbox is currently empty.
    pub fn try_pop(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_arrival_order() {
        let (tx, rx) = Mailbox::new();
        tx.push(Message::ack(1));
        tx.push(Message::ack(2));
        assert_eq!(rx.try_pop(), Some(Message::ack(1)));
        assert_eq!(rx.try_pop(), Some(Message::ack(2)));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn full_mailbox_reports_drop_instead_of_blocking() {
        let (tx, _rx) = Mailbox::new();
        for i in 0..MAILBOX_CAPACITY as u32 {
            assert!(tx.push(Message::ack(i)));
        }
        assert!(!tx.push(Message::ack(9999)));
    }
}
