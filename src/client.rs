//! Client driver (§4.7): opens a UDP socket, spawns the session worker,
//! and pumps inbound datagrams into its mailbox while watching for
//! inactivity and `SIGINT`.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::conn::Connection;
use crate::engine;
use crate::error::SessionError;
use crate::fault::FaultInjector;
use crate::mailbox::Mailbox;
use crate::message::{MAX_FRAME_SIZE, Message};
use crate::session::{Strategy, TransferOutcome};

/// No inbound activity for this long aborts the session (§4.7).
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a single `recv_from` blocks before the pump loop re-checks the
/// inactivity clock and the worker's status.
const PUMP_POLL: Duration = Duration::from_millis(200);

pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub strategy: Strategy,
    pub fault_injector: Option<Arc<FaultInjector>>,
}

pub enum ClientJob {
    Upload { src_path: PathBuf, filename: String },
    Download { filename: String, dest_path: PathBuf },
}

pub fn run(config: ClientConfig, job: ClientJob) -> Result<TransferOutcome> {
    let server_addr = resolve(&config.host, config.port)?;
    let socket = UdpSocket::bind(("0.0.0.0", 0)).context("binding client socket")?;
    socket.set_read_timeout(Some(PUMP_POLL))?;
    let socket = Arc::new(socket);

    let (mailbox_tx, mailbox) = Mailbox::new();
    let stop = Arc::new(AtomicBool::new(false));
    let mut conn = Connection::new(Arc::clone(&socket), server_addr, mailbox, Arc::clone(&stop));
    if let Some(fault) = &config.fault_injector {
        conn = conn.with_fault_injector(Arc::clone(fault));
    }

    let partial_download_path = match &job {
        ClientJob::Download { dest_path, .. } => Some(dest_path.clone()),
        ClientJob::Upload { .. } => None,
    };

    let sigint_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("interrupt received, stopping session");
        sigint_stop.store(true, Ordering::Relaxed);
    }) {
        warn!("failed to install SIGINT handler: {e}");
    }

    let strategy = config.strategy;
    let worker = thread::spawn(move || -> Result<TransferOutcome, SessionError> {
        match job {
            ClientJob::Upload { src_path, filename } => {
                engine::run_upload_sender(&conn, strategy, &src_path, &filename)
            }
            ClientJob::Download { filename, dest_path } => {
                engine::run_download_receiver(&conn, strategy, &filename, &dest_path)
            }
        }
    });

    let outcome = pump_until_done(&socket, server_addr, &mailbox_tx, &stop, worker);

    if outcome.is_err() {
        stop.store(true, Ordering::Relaxed);
        if let Some(path) = partial_download_path {
            let _ = std::fs::remove_file(path);
        }
    }

    outcome.map_err(|e| anyhow!(e))
}

fn pump_until_done(
    socket: &Arc<UdpSocket>,
    server_addr: SocketAddr,
    mailbox_tx: &crate::mailbox::MailboxSender,
    stop: &Arc<AtomicBool>,
    worker: thread::JoinHandle<Result<TransferOutcome, SessionError>>,
) -> Result<TransferOutcome, SessionError> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let mut last_activity = Instant::now();

    loop {
        if worker.is_finished() {
            return join_worker(worker);
        }
        if stop.load(Ordering::Relaxed) {
            let _ = worker.join();
            return Err(SessionError::StopRequested);
        }

        match socket.recv_from(&mut buf) {
            Ok((n, from)) if from == server_addr => {
                if let Ok(msg) = Message::decode(&buf[..n]) {
                    mailbox_tx.push(msg);
                }
                last_activity = Instant::now();
            }
            Ok(_) => {} // stray datagram from an unrelated source
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => {}
        }

        if last_activity.elapsed() > INACTIVITY_TIMEOUT {
            stop.store(true, Ordering::Relaxed);
            let _ = worker.join();
            return Err(SessionError::Inactivity);
        }
    }
}

fn join_worker(
    worker: thread::JoinHandle<Result<TransferOutcome, SessionError>>,
) -> Result<TransferOutcome, SessionError> {
    match worker.join() {
        Ok(result) => result,
        Err(_) => Err(SessionError::StopRequested),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no addresses found for {host}:{port}"))
}

pub fn report_outcome(label: &str, outcome: TransferOutcome) {
    match outcome {
        TransferOutcome::Success => info!("{label}: transfer complete"),
        TransferOutcome::IntegrityMismatch => {
            warn!("{label}: integrity check failed, please retry")
        }
    }
}
