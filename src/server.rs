//! Server demultiplexer (§4.6): a single listening UDP socket, routing
//! inbound datagrams by source address to per-session mailboxes and
//! spawning one worker thread per session.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::conn::Connection;
use crate::engine;
use crate::fault::FaultInjector;
use crate::mailbox::{Mailbox, MailboxSender};
use crate::message::{Message, WireErrorCode};
use crate::session::Strategy;

/// Largest file the server will accept on UPLOAD (§4.6).
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// How long a session may sit idle before the demultiplexer evicts it.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard cap on a session's lifetime regardless of activity (§3 "lifecycle").
const HARD_CAP: Duration = Duration::from_secs(30 * 60);

/// Grace period given to an evicted worker to notice its stop flag and exit.
const EVICT_GRACE: Duration = Duration::from_secs(2);

/// How long a single `recv_from` blocks before the listener re-checks the
/// session table and the shutdown flag (§5 "receive_with_timeout").
const LISTENER_POLL: Duration = Duration::from_secs(1);

/// Largest possible datagram on the wire (§6.1).
const MAX_DATAGRAM: usize = crate::message::MAX_FRAME_SIZE;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub strategy: Strategy,
    pub fault_injector: Option<Arc<FaultInjector>>,
}

struct SessionEntry {
    mailbox: MailboxSender,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    last_activity: Instant,
    started: Instant,
    evict_deadline: Option<Instant>,
}

/// Runs the demultiplexer loop until `stop` is set. Blocks the calling
/// thread — callers typically run this on its own OS thread.
pub fn run(config: ServerConfig, stop: Arc<AtomicBool>) -> Result<()> {
    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating storage directory {}", config.storage_dir.display()))?;
    let storage_dir = config
        .storage_dir
        .canonicalize()
        .with_context(|| format!("canonicalizing storage directory {}", config.storage_dir.display()))?;

    let bind_addr = resolve(&config.host, config.port)?;
    let raw = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    let _ = raw.set_recv_buffer_size(1 << 20);
    let _ = raw.set_send_buffer_size(1 << 20);
    raw.bind(&bind_addr.into())?;
    raw.set_read_timeout(Some(LISTENER_POLL))?;
    let socket: Arc<UdpSocket> = Arc::new(raw.into());

    info!(%bind_addr, storage = %storage_dir.display(), "server listening");

    let mut sessions: HashMap<SocketAddr, SessionEntry> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                handle_datagram(
                    &socket,
                    &storage_dir,
                    config.strategy,
                    config.fault_injector.as_ref(),
                    &mut sessions,
                    peer,
                    &buf[..n],
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(anyhow!("listener recv_from failed: {e}")),
        }
        sweep_sessions(&mut sessions);
    }

    for (_, entry) in sessions.into_iter() {
        entry.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = entry.handle {
            let _ = handle.join();
        }
    }
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no addresses found for {host}:{port}"))
}

fn handle_datagram(
    socket: &Arc<UdpSocket>,
    storage_dir: &Path,
    strategy: Strategy,
    fault_injector: Option<&Arc<FaultInjector>>,
    sessions: &mut HashMap<SocketAddr, SessionEntry>,
    peer: SocketAddr,
    bytes: &[u8],
) {
    let message = match Message::decode(bytes) {
        Ok(m) => m,
        Err(e) => {
            debug!(%peer, error = %e, "dropping malformed datagram");
            return;
        }
    };

    if let Some(entry) = sessions.get_mut(&peer) {
        entry.last_activity = Instant::now();
        if !entry.mailbox.push(message) {
            warn!(%peer, "session mailbox full, dropping datagram");
        }
        return;
    }

    match message {
        Message::Upload {
            file_size,
            filename,
            md5_hex,
        } => match validate_upload(storage_dir, &filename, file_size) {
            Ok(path) => spawn_upload_session(
                socket, strategy, fault_injector, sessions, peer, path, file_size, filename, md5_hex,
            ),
            Err(code) => {
                warn!(%peer, %filename, ?code, "rejecting upload");
                let _ = socket.send_to(&Message::error(code).encode(), peer);
            }
        },
        Message::Download { filename } => match validate_download(storage_dir, &filename) {
            Ok((path, file_size)) => {
                spawn_download_session(socket, strategy, fault_injector, sessions, peer, path, file_size)
            }
            Err(code) => {
                warn!(%peer, %filename, ?code, "rejecting download");
                let _ = socket.send_to(&Message::error(code).encode(), peer);
            }
        },
        other => {
            debug!(%peer, msg_type = ?other.msg_type(), "unexpected first message, dropping");
        }
    }
}

fn spawn_upload_session(
    socket: &Arc<UdpSocket>,
    strategy: Strategy,
    fault_injector: Option<&Arc<FaultInjector>>,
    sessions: &mut HashMap<SocketAddr, SessionEntry>,
    peer: SocketAddr,
    path: PathBuf,
    file_size: u64,
    filename: String,
    md5_hex: String,
) {
    let (mailbox_tx, mailbox) = Mailbox::new();
    let stop = Arc::new(AtomicBool::new(false));
    let mut conn = Connection::new(Arc::clone(socket), peer, mailbox, Arc::clone(&stop));
    if let Some(fault) = fault_injector {
        conn = conn.with_fault_injector(Arc::clone(fault));
    }

    let handle = thread::spawn(move || {
        match engine::run_upload_receiver(&conn, strategy, &path, file_size, &filename, &md5_hex) {
            Ok(outcome) => info!(%peer, %filename, ?outcome, "upload session finished"),
            Err(e) => warn!(%peer, %filename, error = %e, "upload session aborted"),
        }
    });

    sessions.insert(
        peer,
        SessionEntry {
            mailbox: mailbox_tx,
            stop,
            handle: Some(handle),
            last_activity: Instant::now(),
            started: Instant::now(),
            evict_deadline: None,
        },
    );
}

fn spawn_download_session(
    socket: &Arc<UdpSocket>,
    strategy: Strategy,
    fault_injector: Option<&Arc<FaultInjector>>,
    sessions: &mut HashMap<SocketAddr, SessionEntry>,
    peer: SocketAddr,
    path: PathBuf,
    file_size: u64,
) {
    let (mailbox_tx, mailbox) = Mailbox::new();
    let stop = Arc::new(AtomicBool::new(false));
    let mut conn = Connection::new(Arc::clone(socket), peer, mailbox, Arc::clone(&stop));
    if let Some(fault) = fault_injector {
        conn = conn.with_fault_injector(Arc::clone(fault));
    }

    let handle = thread::spawn(move || match engine::run_download_sender(&conn, strategy, &path, file_size) {
        Ok(()) => info!(%peer, path = %path.display(), "download session finished"),
        Err(e) => warn!(%peer, path = %path.display(), error = %e, "download session aborted"),
    });

    sessions.insert(
        peer,
        SessionEntry {
            mailbox: mailbox_tx,
            stop,
            handle: Some(handle),
            last_activity: Instant::now(),
            started: Instant::now(),
            evict_deadline: None,
        },
    );
}

fn sweep_sessions(sessions: &mut HashMap<SocketAddr, SessionEntry>) {
    let now = Instant::now();
    let mut remove = Vec::new();

    for (addr, entry) in sessions.iter_mut() {
        let finished = match &entry.handle {
            Some(handle) => handle.is_finished(),
            None => true,
        };
        if finished {
            remove.push(*addr);
            continue;
        }

        let idle = now.duration_since(entry.last_activity) > IDLE_TIMEOUT;
        let hard_capped = now.duration_since(entry.started) > HARD_CAP;
        if idle || hard_capped {
            entry.stop.store(true, Ordering::Relaxed);
            match entry.evict_deadline {
                None => entry.evict_deadline = Some(now + EVICT_GRACE),
                Some(deadline) if now > deadline => {
                    warn!(peer = %addr, "worker missed eviction grace, abandoning");
                    remove.push(*addr);
                }
                Some(_) => {}
            }
        }
    }

    for addr in remove {
        if let Some(entry) = sessions.remove(&addr) {
            if let Some(handle) = entry.handle {
                if handle.is_finished() {
                    let _ = handle.join();
                }
            }
        }
    }
}

fn validate_upload(dir: &Path, filename: &str, file_size: u64) -> std::result::Result<PathBuf, WireErrorCode> {
    let path = sanitize_path(dir, filename).map_err(|_| WireErrorCode::FileWriteError)?;
    if path.exists() {
        return Err(WireErrorCode::FileAlreadyExists);
    }
    if file_size > MAX_FILE_SIZE {
        return Err(WireErrorCode::FileTooBig);
    }
    if let Some(parent) = path.parent()
        && std::fs::create_dir_all(parent).is_err()
    {
        return Err(WireErrorCode::FileWriteError);
    }
    Ok(path)
}

fn validate_download(dir: &Path, filename: &str) -> std::result::Result<(PathBuf, u64), WireErrorCode> {
    let path = sanitize_path(dir, filename).map_err(|_| WireErrorCode::FileNotFound)?;
    let metadata = std::fs::metadata(&path).map_err(|_| WireErrorCode::FileNotFound)?;
    Ok((path, metadata.len()))
}

/// Ensure the requested filename stays inside the served directory.
/// Supports subdirectory paths while rejecting traversal (`..`) or
/// absolute paths.
pub(crate) fn sanitize_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let normalized = filename.replace('\\', "/");

    if normalized.starts_with('/') {
        return Err(anyhow!("absolute paths are not allowed"));
    }
    for component in normalized.split('/') {
        if component == ".." {
            return Err(anyhow!("path traversal is not allowed"));
        }
    }

    let clean: PathBuf = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    if clean.as_os_str().is_empty() {
        return Err(anyhow!("invalid filename"));
    }

    let candidate = dir.join(&clean);
    let canonical_dir = dir
        .canonicalize()
        .map_err(|e| anyhow!("cannot canonicalize served directory: {e}"))?;

    if candidate.exists() {
        let canonical = candidate
            .canonicalize()
            .map_err(|e| anyhow!("cannot canonicalize path: {e}"))?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(anyhow!("path escapes served directory"));
        }
        Ok(canonical)
    } else {
        let mut ancestor = candidate.parent();
        while let Some(a) = ancestor {
            if a.exists() {
                let canonical_ancestor = a
                    .canonicalize()
                    .map_err(|e| anyhow!("cannot canonicalize ancestor: {e}"))?;
                if !canonical_ancestor.starts_with(&canonical_dir) {
                    return Err(anyhow!("path escapes served directory"));
                }
                return Ok(candidate);
            }
            ancestor = a.parent();
        }
        Err(anyhow!("path escapes served directory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_simple_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"test").unwrap();
        let result = sanitize_path(dir.path(), "hello.txt").unwrap();
        assert!(result.ends_with("hello.txt"));
    }

    #[test]
    fn sanitize_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        std::fs::write(dir.path().join("sub/deep/file.cfg"), b"data").unwrap();
        let result = sanitize_path(dir.path(), "sub/deep/file.cfg").unwrap();
        assert!(result.ends_with("sub/deep/file.cfg"));
    }

    #[test]
    fn sanitize_rejects_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sanitize_path(dir.path(), "../etc/passwd").is_err());
        assert!(sanitize_path(dir.path(), "sub/../../etc/passwd").is_err());
    }

    #[test]
    fn sanitize_rejects_absolute() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sanitize_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn sanitize_normalizes_backslashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.cfg"), b"data").unwrap();
        let result = sanitize_path(dir.path(), "sub\\file.cfg").unwrap();
        assert!(result.ends_with("sub/file.cfg"));
    }

    #[test]
    fn sanitize_nonexistent_path_within_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = sanitize_path(dir.path(), "not-yet-uploaded.bin").unwrap();
        assert!(result.ends_with("not-yet-uploaded.bin"));
    }

    #[test]
    fn sanitize_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sanitize_path(dir.path(), "").is_err());
        assert!(sanitize_path(dir.path(), ".").is_err());
        assert!(sanitize_path(dir.path(), "..").is_err());
    }

    #[test]
    fn validate_upload_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x"), b"data").unwrap();
        let err = validate_upload(dir.path(), "x", 10).unwrap_err();
        assert_eq!(err, WireErrorCode::FileAlreadyExists);
    }

    #[test]
    fn validate_upload_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_upload(dir.path(), "big.bin", MAX_FILE_SIZE + 1).unwrap_err();
        assert_eq!(err, WireErrorCode::FileTooBig);
    }

    #[test]
    fn validate_download_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_download(dir.path(), "missing").unwrap_err();
        assert_eq!(err, WireErrorCode::FileNotFound);
    }
}
