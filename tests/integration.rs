//! End-to-end scenarios driven entirely through the public `client`/`server`
//! entry points over real loopback UDP sockets (§8 seed scenarios).

use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use udpft::client::{self, ClientConfig, ClientJob};
use udpft::fault::FaultInjector;
use udpft::server::{self, ServerConfig};
use udpft::session::{Strategy, TransferOutcome};

struct TestServer {
    host: String,
    port: u16,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    storage: tempfile::TempDir,
}

impl TestServer {
    fn spawn(strategy: Strategy, fault_injector: Option<Arc<FaultInjector>>) -> Self {
        let storage = tempfile::tempdir().unwrap();
        let port = free_udp_port();
        let stop = Arc::new(AtomicBool::new(false));
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            storage_dir: storage.path().to_path_buf(),
            strategy,
            fault_injector,
        };
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            server::run(config, stop_clone).unwrap();
        });
        // Give the listener a moment to bind before the first datagram lands.
        thread::sleep(Duration::from_millis(100));
        TestServer {
            host: "127.0.0.1".to_string(),
            port,
            stop,
            handle: Some(handle),
            storage,
        }
    }

    fn storage_path(&self, name: &str) -> PathBuf {
        self.storage.path().join(name)
    }

    fn client_config(&self, strategy: Strategy, fault_injector: Option<Arc<FaultInjector>>) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            strategy,
            fault_injector,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[test]
fn upload_and_download_round_trip_stop_and_wait() {
    let server = TestServer::spawn(Strategy::StopAndWait, None);
    let srcdir = tempfile::tempdir().unwrap();
    let content = b"the quick brown fox jumps over the lazy dog".repeat(100);
    std::fs::write(srcdir.path().join("fox.txt"), &content).unwrap();

    let outcome = client::run(
        server.client_config(Strategy::StopAndWait, None),
        ClientJob::Upload {
            src_path: srcdir.path().join("fox.txt"),
            filename: "fox.txt".to_string(),
        },
    )
    .unwrap();
    assert_eq!(outcome, TransferOutcome::Success);
    assert_eq!(std::fs::read(server.storage_path("fox.txt")).unwrap(), content);

    let dstdir = tempfile::tempdir().unwrap();
    let outcome = client::run(
        server.client_config(Strategy::StopAndWait, None),
        ClientJob::Download {
            filename: "fox.txt".to_string(),
            dest_path: dstdir.path().join("fox.txt"),
        },
    )
    .unwrap();
    assert_eq!(outcome, TransferOutcome::Success);
    assert_eq!(std::fs::read(dstdir.path().join("fox.txt")).unwrap(), content);
}

#[test]
fn upload_survives_loss_under_selective_repeat() {
    let server = TestServer::spawn(
        Strategy::SelectiveRepeat,
        Some(Arc::new(FaultInjector::new(0.1))),
    );
    let srcdir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0u32..600_000).map(|i| (i % 251) as u8).collect();
    std::fs::write(srcdir.path().join("lossy.bin"), &content).unwrap();

    let outcome = client::run(
        server.client_config(Strategy::SelectiveRepeat, Some(Arc::new(FaultInjector::new(0.1)))),
        ClientJob::Upload {
            src_path: srcdir.path().join("lossy.bin"),
            filename: "lossy.bin".to_string(),
        },
    )
    .unwrap();

    assert_eq!(outcome, TransferOutcome::Success);
    assert_eq!(std::fs::read(server.storage_path("lossy.bin")).unwrap(), content);
}

#[test]
fn download_of_empty_file_under_stop_and_wait() {
    let server = TestServer::spawn(Strategy::StopAndWait, None);
    std::fs::write(server.storage_path("empty.bin"), b"").unwrap();

    let dstdir = tempfile::tempdir().unwrap();
    let outcome = client::run(
        server.client_config(Strategy::StopAndWait, None),
        ClientJob::Download {
            filename: "empty.bin".to_string(),
            dest_path: dstdir.path().join("empty.bin"),
        },
    )
    .unwrap();

    assert_eq!(outcome, TransferOutcome::Success);
    assert_eq!(std::fs::read(dstdir.path().join("empty.bin")).unwrap(), b"");
}

#[test]
fn upload_of_duplicate_filename_is_rejected_and_leaves_server_file_untouched() {
    let server = TestServer::spawn(Strategy::StopAndWait, None);
    std::fs::write(server.storage_path("taken.txt"), b"original").unwrap();

    let srcdir = tempfile::tempdir().unwrap();
    std::fs::write(srcdir.path().join("taken.txt"), b"overwrite attempt").unwrap();

    let result = client::run(
        server.client_config(Strategy::StopAndWait, None),
        ClientJob::Upload {
            src_path: srcdir.path().join("taken.txt"),
            filename: "taken.txt".to_string(),
        },
    );

    assert!(result.is_err());
    assert_eq!(std::fs::read(server.storage_path("taken.txt")).unwrap(), b"original");
}

#[test]
fn download_of_missing_file_cleans_up_local_placeholder() {
    let server = TestServer::spawn(Strategy::StopAndWait, None);
    let dstdir = tempfile::tempdir().unwrap();
    let dest_path = dstdir.path().join("ghost.bin");

    let result = client::run(
        server.client_config(Strategy::StopAndWait, None),
        ClientJob::Download {
            filename: "ghost.bin".to_string(),
            dest_path: dest_path.clone(),
        },
    );

    assert!(result.is_err());
    assert!(!dest_path.exists());
}
