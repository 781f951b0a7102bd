//! Ties the wire handshake, the chosen ARQ strategy, and teardown together
//! into the four roles a session can play: uploading or downloading, as
//! either the local disk's reader or its writer (§2 "Transfer engine").

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::conn::Connection;
use crate::digest;
use crate::error::SessionError;
use crate::message::{Message, WireErrorCode};
use crate::progress::ProgressReporter;
use crate::session::{Strategy, TransferOutcome, packet_count};
use crate::transfer::{common, saw, sr};

/// Best-effort error notification (§4.4 "send ACK of its seq (best-effort)
/// and abort"): neither side blocks waiting for the other to acknowledge an
/// ERROR, so this is a short burst rather than a full retry-until-ACK loop.
pub fn send_error_and_close(conn: &Connection, code: WireErrorCode) {
    let message = Message::error(code);
    for _ in 0..3 {
        if conn.send(&message).is_err() {
            return;
        }
        thread::sleep(Duration::from_millis(200));
    }
}

/// Server-side: receive an uploaded file. `upload` has already passed
/// demultiplexer validation (§4.6); `path` is the sanitized destination.
pub fn run_upload_receiver(
    conn: &Connection,
    strategy: Strategy,
    path: &Path,
    file_size: u64,
    filename: &str,
    client_digest: &str,
) -> Result<TransferOutcome, SessionError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let first_data = common::accept_initial_and_await_data(conn, Message::ack(0))?;
    let mut progress = ProgressReporter::new(format!("upload {filename}"));

    let (written, _) = match strategy {
        Strategy::StopAndWait => saw::recv_data_loop(conn, &mut writer, first_data, file_size, &mut progress)?,
        Strategy::SelectiveRepeat => {
            let n = packet_count(file_size);
            sr::recv_data_loop(conn, &mut writer, first_data, n, file_size, &mut progress)?
        }
    };
    writer.flush()?;
    drop(writer);

    let actual_digest = digest::hex_digest_of_file(path)?;
    let matches = actual_digest.eq_ignore_ascii_case(client_digest);
    let ack_end_seq = if matches { 0 } else { 1 };
    let teardown_result = common::receiver_teardown(conn, ack_end_seq);

    if matches {
        info!(%filename, written, "upload complete, digest verified");
        teardown_result?;
        Ok(TransferOutcome::Success)
    } else {
        warn!(%filename, "upload digest mismatch, unlinking file");
        let _ = std::fs::remove_file(path);
        teardown_result?;
        Ok(TransferOutcome::IntegrityMismatch)
    }
}

/// Server-side: send a file out in response to a DOWNLOAD request.
pub fn run_download_sender(
    conn: &Connection,
    strategy: Strategy,
    path: &Path,
    file_size: u64,
) -> Result<(), SessionError> {
    common::sender_handshake(conn, Message::ack_download(file_size))?;

    let mut reader = BufReader::new(File::open(path)?);
    let mut progress = ProgressReporter::new(format!("download {}", path.display()));
    match strategy {
        Strategy::StopAndWait => saw::send_data_loop(conn, &mut reader, file_size, &mut progress)?,
        Strategy::SelectiveRepeat => {
            let n = packet_count(file_size);
            sr::send_data_loop(conn, &mut reader, n, file_size, &mut progress)?
        }
    }

    let file_digest = digest::hex_digest_of_file(path)?;
    let (end_message, final_ack_digest) = match strategy {
        // SaW embeds the digest in the closing ACK (§4.5 "or in the closing
        // ACK of the SaW variant"); SR embeds it directly in END.
        Strategy::StopAndWait => (Message::end(), Some(file_digest)),
        Strategy::SelectiveRepeat => (Message::end_with_digest(file_digest), None),
    };
    common::sender_teardown(conn, end_message, final_ack_digest)?;
    Ok(())
}

/// Client-side: upload a local file to the server.
pub fn run_upload_sender(
    conn: &Connection,
    strategy: Strategy,
    path: &Path,
    filename: &str,
) -> Result<TransferOutcome, SessionError> {
    let file_size = std::fs::metadata(path)?.len();
    let md5_hex = digest::hex_digest_of_file(path)?;

    common::sender_handshake(conn, Message::upload(file_size, filename, md5_hex))?;

    let mut reader = BufReader::new(File::open(path)?);
    let mut progress = ProgressReporter::new(format!("upload {filename}"));
    match strategy {
        Strategy::StopAndWait => saw::send_data_loop(conn, &mut reader, file_size, &mut progress)?,
        Strategy::SelectiveRepeat => {
            let n = packet_count(file_size);
            sr::send_data_loop(conn, &mut reader, n, file_size, &mut progress)?
        }
    }

    let ack = common::sender_teardown(conn, Message::end(), None)?;
    if ack.seq == 0 {
        Ok(TransferOutcome::Success)
    } else {
        Ok(TransferOutcome::IntegrityMismatch)
    }
}

/// Client-side: download a remote file to local disk. Creates `dest_path`
/// up front so a FILE_NOT_FOUND error still leaves (and then removes) an
/// on-disk artifact, matching the reference behavior.
pub fn run_download_receiver(
    conn: &Connection,
    strategy: Strategy,
    filename: &str,
    dest_path: &Path,
) -> Result<TransferOutcome, SessionError> {
    let file = File::create(dest_path)?;

    let file_size = match common::request_download(conn, filename) {
        Ok(size) => size,
        Err(e) => {
            drop(file);
            let _ = std::fs::remove_file(dest_path);
            return Err(e);
        }
    };

    let mut writer = BufWriter::new(file);
    let first_data = common::accept_initial_and_await_data(conn, Message::ack(0))?;
    let mut progress = ProgressReporter::new(format!("download {filename}"));

    let (written, end_digest) = match strategy {
        Strategy::StopAndWait => saw::recv_data_loop(conn, &mut writer, first_data, file_size, &mut progress)?,
        Strategy::SelectiveRepeat => {
            let n = packet_count(file_size);
            sr::recv_data_loop(conn, &mut writer, first_data, n, file_size, &mut progress)?
        }
    };
    writer.flush()?;
    drop(writer);

    let ack = common::receiver_teardown(conn, 0)?;
    let expected_digest = end_digest.or(ack.digest);

    match expected_digest {
        Some(expected) => {
            let actual = digest::hex_digest_of_file(dest_path)?;
            if actual.eq_ignore_ascii_case(&expected) {
                info!(%filename, written, "download complete, digest verified");
                Ok(TransferOutcome::Success)
            } else {
                warn!(%filename, "download digest mismatch, unlinking file");
                let _ = std::fs::remove_file(dest_path);
                Ok(TransferOutcome::IntegrityMismatch)
            }
        }
        None => Ok(TransferOutcome::Success),
    }
}
