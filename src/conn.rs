//! Per-session view of the network: where inbound messages for this
//! session come from (the mailbox) and how outbound messages leave
//! (a shared, destination-addressed UDP socket).
//!
//! The server multiplexes every session over one listening socket (§4.6,
//! §5 "Shared-resource policy": each `sendto` is atomic and
//! destination-addressed, so no per-session socket or lock is needed).
//! The client driver's socket only ever talks to one peer, so the same
//! type serves both.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::fault::FaultInjector;
use crate::mailbox::Mailbox;
use crate::message::Message;

pub struct Connection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    fault: Option<Arc<FaultInjector>>,
    mailbox: Mailbox,
    stop: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        mailbox: Mailbox,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket,
            peer,
            fault: None,
            mailbox,
            stop,
        }
    }

    pub fn with_fault_injector(mut self, fault: Arc<FaultInjector>) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send a message to the session's peer. Honors the fault injector
    /// when present; a "dropped" send still reports success to the caller
    /// since on real UDP the sender cannot observe the loss either.
    pub fn send(&self, message: &Message) -> std::io::Result<()> {
        if let Some(fault) = &self.fault
            && fault.should_drop()
        {
            trace!(?self.peer, msg_type = ?message.msg_type(), "fault injector dropped outbound datagram");
            return Ok(());
        }
        let bytes = message.encode();
        self.socket.send_to(&bytes, self.peer)?;
        Ok(())
    }

    /// Non-blocking pop of the next inbound message for this session.
    pub fn try_recv(&self) -> Option<Message> {
        self.mailbox.try_pop()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}
