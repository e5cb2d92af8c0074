use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;

use super::{pick_server, Supervisor};
use crate::config::Config;
use crate::error::ClientError;
use crate::executor::SerialExecutor;
use crate::listener::{ConnectionEventListener, ConnectionListeners};
use crate::types::{CoinType, ServerAddress};

fn addr(port: u16) -> ServerAddress {
    ServerAddress::new("127.0.0.1", port)
}

#[test]
fn selection_skips_failed_servers() {
    let servers = vec![addr(1), addr(2), addr(3)];
    let mut failed: HashSet<_> = [addr(1), addr(3)].into_iter().collect();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        assert_eq!(pick_server(&servers, &mut failed, &mut rng), addr(2));
    }
}

#[test]
fn selection_clears_an_exhausted_blacklist() {
    let servers = vec![addr(1), addr(2)];
    let mut failed: HashSet<_> = servers.iter().cloned().collect();
    let mut rng = StdRng::seed_from_u64(7);

    let picked = pick_server(&servers, &mut failed, &mut rng);
    assert!(servers.contains(&picked));
    assert!(failed.is_empty());
}

#[test]
fn single_server_is_retried_after_blacklisting() {
    let servers = vec![addr(1)];
    let mut failed: HashSet<_> = servers.iter().cloned().collect();
    let mut rng = StdRng::seed_from_u64(7);

    assert_eq!(pick_server(&servers, &mut failed, &mut rng), addr(1));
}

// ---------------------------------------------------------------------
// Integration tests against loopback listeners, with a compressed retry
// timescale.
// ---------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    connections: AtomicUsize,
    disconnects: AtomicUsize,
}

impl ConnectionEventListener for Recorder {
    fn on_connection(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }
    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_config() -> Config {
    Config {
        call_timeout: None,
        initial_retry: Duration::from_millis(10),
        max_retry: Duration::from_millis(40),
    }
}

fn supervisor_with_recorder(servers: Vec<ServerAddress>) -> (Supervisor, Arc<Recorder>) {
    let listeners = Arc::new(ConnectionListeners::new());
    let recorder = Arc::new(Recorder::default());
    listeners.add(recorder.clone(), SerialExecutor::new());
    let supervisor = Supervisor::new(CoinType::new("testcoin"), servers, fast_config(), listeners);
    (supervisor, recorder)
}

/// A port that refuses connections: bind, read the port, drop the listener.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} did not happen within 2s", what);
}

#[tokio::test]
async fn fails_over_to_the_healthy_server() {
    let dead = dead_port().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = listener.local_addr().unwrap().port();

    // Park accepted sockets so the run stays up.
    let parked = tokio::spawn(async move {
        let mut sockets = Vec::new();
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            sockets.push(socket);
        }
    });

    let (supervisor, recorder) = supervisor_with_recorder(vec![addr(dead), addr(live)]);
    supervisor.start().unwrap();

    wait_until("connection", || recorder.connections.load(Ordering::SeqCst) >= 1).await;
    assert_eq!(supervisor.last_server(), Some(addr(live)));

    supervisor.stop();
    parked.abort();
}

#[tokio::test]
async fn reconnects_after_the_server_drops_the_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));

    let accept_counter = accepts.clone();
    let server = tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            accept_counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let (supervisor, recorder) = supervisor_with_recorder(vec![addr(live)]);
    supervisor.start().unwrap();

    wait_until("second run", || accepts.load(Ordering::SeqCst) >= 2).await;
    wait_until("disconnect broadcast", || {
        recorder.disconnects.load(Ordering::SeqCst) >= 1
    })
    .await;
    wait_until("reconnect broadcast", || {
        recorder.connections.load(Ordering::SeqCst) >= 2
    })
    .await;

    supervisor.stop();
    server.abort();
}

#[tokio::test]
async fn stop_cancels_the_pending_reconnect_and_rejects_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));

    let accept_counter = accepts.clone();
    let server = tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            accept_counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let (supervisor, _recorder) = supervisor_with_recorder(vec![addr(live)]);
    supervisor.start().unwrap();

    wait_until("first run", || accepts.load(Ordering::SeqCst) >= 1).await;
    supervisor.stop();
    supervisor.stop();

    // Let in-flight work settle, then confirm the reconnect loop is gone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = accepts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), settled);

    assert!(matches!(supervisor.start(), Err(ClientError::Stopped)));
    assert!(supervisor.current_transport().is_none());
    server.abort();
}
