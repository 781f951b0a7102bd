//! Handshake and teardown logic shared by both ARQ strategies (§4.3, §4.5).
//!
//! Every function here is a small retry-until-condition loop driven by a
//! [`PendingMessage`] deadline and the session [`Mailbox`][crate::mailbox::Mailbox],
//! matching the shape of the original `send_message_and_wait` /
//! `send_message_and_retry` helpers (`original_source/src/utils/protocol_utils.py`).

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::conn::Connection;
use crate::error::SessionError;
use crate::message::Message;
use crate::timer::PendingMessage;

/// How often the engine polls the mailbox between retransmit checks (§5).
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `receiver_teardown` waits for further activity before assuming
/// the peer is satisfied and moving on (§4.5 "non-END quiet period").
const TEARDOWN_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Fills `buf` from `reader`, stopping short only at EOF. Shared by both ARQ
/// strategies since chunks are always generated in increasing seq order.
pub(crate) fn read_chunk(
    reader: &mut impl std::io::Read,
    buf: &mut [u8],
) -> Result<usize, SessionError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(SessionError::from_io(e)),
        }
    }
    Ok(filled)
}

fn check_stop(conn: &Connection) -> Result<(), SessionError> {
    if conn.is_stopped() {
        Err(SessionError::StopRequested)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Sender-side initial handshake (upload client / download server)
// ---------------------------------------------------------------------

/// Send `initial` repeatedly until the peer's ACK(0) arrives (handshake
/// complete) or an unsolicited DATA arrives (proof the peer already moved
/// past its own handshake step, §4.3/§9 "SaW seq 0 vs 1"), or an ERROR aborts
/// the session.
pub fn sender_handshake(conn: &Connection, initial: Message) -> Result<(), SessionError> {
    let mut pending = PendingMessage::new(initial);
    conn.send(&pending.message)?;

    loop {
        check_stop(conn)?;
        if pending.is_timeout() {
            debug!(peer = %conn.peer(), "handshake: retransmitting initial request");
            let _ = conn.send(&pending.message);
            pending.reset();
        }
        match conn.try_recv() {
            Some(Message::Ack { seq: 0, .. }) => return Ok(()),
            Some(Message::Data { .. }) => return Ok(()),
            Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
            _ => {}
        }
        thread::sleep(POLL_INTERVAL);
    }
}

// ---------------------------------------------------------------------
// Receiver-side initial handshake (upload server / download client)
// ---------------------------------------------------------------------

/// Send `ack` repeatedly until the peer's first DATA packet proves they
/// received it, or an ERROR aborts the session. Returns the DATA message so
/// the caller can feed it straight into its normal receive loop instead of
/// discarding it.
pub fn accept_initial_and_await_data(conn: &Connection, ack: Message) -> Result<Message, SessionError> {
    let mut pending = PendingMessage::new(ack);
    conn.send(&pending.message)?;

    loop {
        check_stop(conn)?;
        if pending.is_timeout() {
            debug!(peer = %conn.peer(), "handshake: re-acking, awaiting first DATA");
            let _ = conn.send(&pending.message);
            pending.reset();
        }
        match conn.try_recv() {
            Some(msg @ Message::Data { .. }) => return Ok(msg),
            Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
            _ => {}
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Download client's first hop: send DOWNLOAD, wait for ACK_DOWNLOAD (return
/// its file size) or ERROR.
pub fn request_download(conn: &Connection, filename: &str) -> Result<u64, SessionError> {
    let mut pending = PendingMessage::new(Message::download(filename));
    conn.send(&pending.message)?;

    loop {
        check_stop(conn)?;
        if pending.is_timeout() {
            let _ = conn.send(&pending.message);
            pending.reset();
        }
        match conn.try_recv() {
            Some(Message::AckDownload { file_size }) => return Ok(file_size),
            Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
            _ => {}
        }
        thread::sleep(POLL_INTERVAL);
    }
}

// ---------------------------------------------------------------------
// Teardown (§4.5)
// ---------------------------------------------------------------------

/// The peer's reply to our closing `ACK_END`, handed back to the caller so
/// strategy-specific code can inspect `seq`/`digest` for the upload/download
/// integrity signalling described in §4.5.
pub struct TeardownAck {
    pub seq: u32,
    pub digest: Option<String>,
}

/// Sender-driven teardown. Sends `end_message` (plain or digest-carrying,
/// per the caller's choice) until `ACK_END` arrives, then replies with an ACK
/// — optionally carrying `final_ack_digest` (the SaW download-integrity
/// variant embeds the file digest here instead of in `END`).
pub fn sender_teardown(
    conn: &Connection,
    end_message: Message,
    final_ack_digest: Option<String>,
) -> Result<TeardownAck, SessionError> {
    let mut pending = PendingMessage::new(end_message);
    conn.send(&pending.message)?;

    loop {
        check_stop(conn)?;
        if pending.is_timeout() {
            let _ = conn.send(&pending.message);
            pending.reset();
        }
        match conn.try_recv() {
            Some(Message::AckEnd { seq }) => {
                let reply = match &final_ack_digest {
                    Some(digest) => Message::ack_with_digest(seq, digest.clone()),
                    None => Message::ack(seq),
                };
                let _ = conn.send(&reply);
                debug!(peer = %conn.peer(), "teardown: closed cleanly");
                return Ok(TeardownAck {
                    seq,
                    digest: final_ack_digest,
                });
            }
            Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
            _ => {}
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Receiver-driven teardown. Upon reading `first_end`, responds with
/// `ACK_END(ack_end_seq)` — the caller picks `ack_end_seq` (the echoed END
/// seq normally, or the upload-integrity 0/1 bit, §4.5). Keeps re-sending on
/// duplicate `END`s, and exits either on an explicit `ACK` from the peer
/// (returned to the caller, who may need its `digest`) or a quiet period.
pub fn receiver_teardown(
    conn: &Connection,
    ack_end_seq: u32,
) -> Result<TeardownAck, SessionError> {
    let ack_end = Message::ack_end(ack_end_seq);
    conn.send(&ack_end)?;
    let mut last_activity = Instant::now();

    loop {
        check_stop(conn)?;
        match conn.try_recv() {
            Some(Message::Ack { seq, digest }) => {
                debug!(peer = %conn.peer(), "teardown: received closing ack");
                return Ok(TeardownAck { seq, digest });
            }
            Some(Message::End { .. }) => {
                let _ = conn.send(&ack_end);
                last_activity = Instant::now();
            }
            Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
            Some(_) => {}
            None => {
                if last_activity.elapsed() > TEARDOWN_QUIET_PERIOD {
                    warn!(peer = %conn.peer(), "teardown: quiet period elapsed, assuming closed");
                    return Ok(TeardownAck {
                        seq: ack_end_seq,
                        digest: None,
                    });
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use std::net::UdpSocket;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn loopback_conn() -> (Connection, crate::mailbox::MailboxSender, UdpSocket) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let (tx, rx) = Mailbox::new();
        let stop = Arc::new(AtomicBool::new(false));
        let conn = Connection::new(Arc::new(socket), peer_addr, rx, stop);
        (conn, tx, peer)
    }

    #[test]
    fn sender_handshake_completes_on_ack_zero() {
        let (conn, tx, _peer) = loopback_conn();
        tx.push(Message::ack(0));
        sender_handshake(&conn, Message::download("f.bin")).unwrap();
    }

    #[test]
    fn sender_handshake_aborts_on_error() {
        let (conn, tx, _peer) = loopback_conn();
        tx.push(Message::error(crate::message::WireErrorCode::FileNotFound));
        let err = sender_handshake(&conn, Message::download("f.bin")).unwrap_err();
        assert!(matches!(err, SessionError::PeerError(_)));
    }

    #[test]
    fn accept_initial_returns_first_data() {
        let (conn, tx, _peer) = loopback_conn();
        tx.push(Message::data(1, vec![1, 2, 3]));
        let msg = accept_initial_and_await_data(&conn, Message::ack(0)).unwrap();
        assert_eq!(msg, Message::data(1, vec![1, 2, 3]));
    }

    #[test]
    fn receiver_teardown_returns_closing_ack() {
        let (conn, tx, _peer) = loopback_conn();
        tx.push(Message::ack(0));
        let ack = receiver_teardown(&conn, 0).unwrap();
        assert_eq!(ack.seq, 0);
    }
}
