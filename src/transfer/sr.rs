//! Selective Repeat strategy (§4.4): a window of outstanding DATA packets
//! in flight at once, 0-based sequence numbers, independently ACKed and
//! independently retransmitted.

use std::collections::HashMap;
use std::io::{Read, Write};

use tracing::debug;

use crate::conn::Connection;
use crate::error::SessionError;
use crate::message::{DATA_MAX_SIZE, Message};
use crate::progress::ProgressReporter;
use crate::timer::PendingMessage;
use crate::transfer::common::{POLL_INTERVAL, read_chunk};

/// Sender-side window width: a quarter of the packet count, never below 1.
pub fn sender_window(packet_count: u32) -> usize {
    (packet_count / 4).max(1) as usize
}

/// Receiver-side window width: half the packet count, never below 1.
///
/// Wider than the sender's window by construction (§9 Open Question): since
/// sequence numbers are absolute rather than modular, the asymmetry cannot
/// cause the receiver to buffer anything the sender isn't entitled to send.
pub fn receiver_window(packet_count: u32) -> usize {
    (packet_count / 2).max(1) as usize
}

/// Sends `reader` as a sliding window of independently-acked DATA packets,
/// `packet_count` total, numbered `0..packet_count`. `window_base` is the
/// lowest unacked sequence number and `window_top` the exclusive bound of
/// sequence numbers currently allowed in flight; both advance in lockstep
/// only as `window_base` gets acknowledged, so the window never lets
/// `next_to_send` race past what the receiver's own window can buffer.
/// Returns once every packet has been ACKed; the caller drives teardown
/// afterward.
pub fn send_data_loop(
    conn: &Connection,
    reader: &mut impl Read,
    packet_count: u32,
    total_bytes: u64,
    progress: &mut ProgressReporter,
) -> Result<(), SessionError> {
    let window = sender_window(packet_count) as u32;
    let mut window_base: u32 = 0;
    let mut window_top: u32 = window.min(packet_count);
    let mut sent_messages: Vec<Option<PendingMessage>> = vec![None; packet_count as usize];
    let mut acknowledged: Vec<bool> = vec![false; packet_count as usize];
    let mut received_acks: u32 = 0;
    let mut sent_bytes: u64 = 0;
    let mut buf = vec![0u8; DATA_MAX_SIZE];

    while received_acks < packet_count {
        if conn.is_stopped() {
            return Err(SessionError::StopRequested);
        }

        for seq in window_base..window_top {
            let idx = seq as usize;
            if acknowledged[idx] {
                continue;
            }
            match &mut sent_messages[idx] {
                None => {
                    let n = read_chunk(reader, &mut buf)?;
                    let msg = Message::data(seq, buf[..n].to_vec());
                    conn.send(&msg)?;
                    sent_messages[idx] = Some(PendingMessage::new(msg));
                }
                Some(pending) if pending.is_timeout() => {
                    debug!(peer = %conn.peer(), seq, "sr: retransmitting data");
                    let _ = conn.send(&pending.message);
                    pending.reset();
                }
                Some(_) => {}
            }
        }

        match conn.try_recv() {
            Some(Message::Ack { seq: acked, .. }) => {
                let idx = acked as usize;
                if idx < acknowledged.len() && !acknowledged[idx] {
                    acknowledged[idx] = true;
                    received_acks += 1;
                    if let Some(pending) = sent_messages[idx].take()
                        && let Message::Data { payload, .. } = pending.message
                    {
                        sent_bytes += payload.len() as u64;
                        progress.report(sent_bytes, total_bytes);
                    }
                    while window_base < packet_count && acknowledged[window_base as usize] {
                        window_base += 1;
                        if window_top < packet_count {
                            window_top += 1;
                        }
                    }
                }
            }
            Some(Message::Error { code }) => return Err(SessionError::PeerError(code)),
            _ => {}
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    progress.finish(sent_bytes);
    Ok(())
}

/// Receives a window's worth of out-of-order DATA packets, buffering and
/// individually ACKing each, and writes contiguous runs to `writer` as they
/// complete. Returns once an `END` arrives.
pub fn recv_data_loop(
    conn: &Connection,
    writer: &mut impl Write,
    first_data: Message,
    packet_count: u32,
    total_bytes: u64,
    progress: &mut ProgressReporter,
) -> Result<(u64, Option<String>), SessionError> {
    let window = receiver_window(packet_count);
    let mut expected: u32 = 0;
    let mut written: u64 = 0;
    let mut buffered: HashMap<u32, Vec<u8>> = HashMap::new();

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
            Message::Data { seq, .. } if seq < expected => {
                let _ = conn.send(&Message::ack(seq));
            }
            Message::Data { seq, payload } if seq < expected + window as u32 => {
                let _ = conn.send(&Message::ack(seq));
                buffered.insert(seq, payload);
                while let Some(chunk) = buffered.remove(&expected) {
                    writer.write_all(&chunk).map_err(SessionError::from_io)?;
                    written += chunk.len() as u64;
                    progress.report(written, total_bytes);
                    expected += 1;
                }
            }
            Message::Data { .. } => {
                // Beyond the receive window; the sender will retransmit once
                // the window slides, so silently drop it now.
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
