//! Stop-and-Wait strategy (§4.3): one outstanding DATA packet at a time,
//! 1-based sequence numbers, no window.

use std::io::{Read, Write};

use tracing::debug;

use crate::conn::Connection;
use crate::error::SessionError;
use crate::message::{DATA_MAX_SIZE, Message};
use crate::progress::ProgressReporter;
use crate::timer::PendingMessage;
use crate::transfer::common::{POLL_INTERVAL, read_chunk};

/// Sends `reader`'s contents as a sequence of DATA packets, one at a time,
/// retransmitting on the shared 1-second deadline until each is ACKed.
/// Returns once the last chunk (including the zero-length chunk for an
/// empty file) has been acknowledged; the caller drives teardown afterward.
pub fn send_data_loop(
    conn: &Connection,
    reader: &mut impl Read,
    total_bytes: u64,
    progress: &mut ProgressReporter,
) -> Result<(), SessionError> {
    let mut seq: u32 = 1;
    let mut sent: u64 = 0;
    let mut buf = vec![0u8; DATA_MAX_SIZE];

    loop {
        let n = read_chunk(reader, &mut buf)?;
        let payload = buf[..n].to_vec();
        let is_last = n < DATA_MAX_SIZE;

        let mut pending = PendingMessage::new(Message::data(seq, payload));
        conn.send(&pending.message)?;

        loop {
            if conn.is_stopped() {
                return Err(SessionError::StopRequested);
            }
            if pending.is_timeout() {
                debug!(peer = %conn.peer(), seq, "saw: retransmitting data");
                let _ = conn.send(&pending.message);
                pending.reset();
            }
            match conn.try_recv() {
                Some(Message::Ack { seq: acked, .. }) if acked == seq => break,
                Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
                _ => {}
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        sent += n as u64;
        progress.report(sent, total_bytes);
        seq += 1;

        if is_last {
            progress.finish(sent);
            return Ok(());
        }
    }
}

/// Receives DATA packets in strict sequence order starting from
/// `first_data` (already popped during the handshake), ACKing each and
/// writing its payload to `writer`. Returns once an `END` arrives, leaving
/// teardown to the caller.
pub fn recv_data_loop(
    conn: &Connection,
    writer: &mut impl Write,
    first_data: Message,
    total_bytes: u64,
    progress: &mut ProgressReporter,
) -> Result<(u64, Option<String>), SessionError> {
    let mut expected: u32 = 1;
    let mut written: u64 = 0;

    let mut next = Some(first_data);
    loop {
        let data = match next.take() {
            Some(msg) => msg,
            None => {
                if conn.is_stopped() {
                    return Err(SessionError::StopRequested);
                }
                match conn.try_recv() {
                    Some(msg) => msg,
                    None => {
                        std::thread::sleep(POLL_INTERVAL);
                        continue;
                    }
                }
            }
        };

        match data {
            Message::Data { seq, payload } if seq == expected => {
                writer
                    .write_all(&payload)
                    .map_err(SessionError::from_io)?;
                written += payload.len() as u64;
                let _ = conn.send(&Message::ack(seq));
                progress.report(written, total_bytes);
                expected += 1;
            }
            Message::Data { seq, .. } if seq < expected => {
                // Already-written duplicate; re-ack so the sender can advance.
                let _ = conn.send(&Message::ack(seq));
            }
            Message::Data { .. } => {
                // Out-of-order DATA has no home under Stop-and-Wait; ignore it.
            }
            Message::End { digest } => {
                progress.finish(written);
                return Ok((written, digest));
            }
            Message::Error { code } => return Err(SessionError::PeerError(code)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use std::io::Cursor;
    use std::net::UdpSocket;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn loopback_conn() -> (Connection, crate::mailbox::MailboxSender) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let (tx, rx) = Mailbox::new();
        let conn = Connection::new(Arc::new(socket), peer_addr, rx, Arc::new(AtomicBool::new(false)));
        std::mem::forget(peer);
        (conn, tx)
    }

    #[test]
    fn send_data_loop_drains_small_file() {
        let (conn, tx) = loopback_conn();
        tx.push(Message::ack(1));
        let mut reader = Cursor::new(b"hello".to_vec());
        let mut progress = ProgressReporter::new("test");
        send_data_loop(&conn, &mut reader, 5, &mut progress).unwrap();
    }

    #[test]
    fn recv_data_loop_writes_and_stops_on_end() {
        let (conn, tx) = loopback_conn();
        tx.push(Message::end());
        let first = Message::data(1, b"hi".to_vec());
        let mut out = Vec::new();
        let mut progress = ProgressReporter::new("test");
        let (written, digest) = recv_data_loop(&conn, &mut out, first, 2, &mut progress).unwrap();
        assert_eq!(written, 2);
        assert_eq!(out, b"hi");
        assert_eq!(digest, None);
    }

    #[test]
    fn recv_data_loop_reacks_duplicate_without_rewriting() {
        let (conn, tx) = loopback_conn();
        tx.push(Message::data(1, b"dup".to_vec()));
        tx.push(Message::end());
        let first = Message::data(1, b"hi".to_vec());
        let mut out = Vec::new();
        let mut progress = ProgressReporter::new("test");
        let (written, _digest) = recv_data_loop(&conn, &mut out, first, 2, &mut progress).unwrap();
        assert_eq!(out, b"hi");
        assert_eq!(written, 2);
    }
}
