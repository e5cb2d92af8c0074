//! Connection supervisor.
//!
//! Owns the lifecycle of connection runs: pick a server, start a transport,
//! consume its state transitions, and on termination blacklist the server and
//! schedule a reconnect with doubling delay (capped). One supervisor task
//! exists per client; runs are strictly sequential.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::ClientError;
use crate::listener::ConnectionListeners;
use crate::transport::{Transport, TransportEvent};
use crate::types::{CoinType, ServerAddress};

pub(crate) struct Supervisor {
    coin: CoinType,
    servers: Vec<ServerAddress>,
    config: Config,
    shared: Arc<Shared>,
    listeners: Arc<ConnectionListeners>,
}

struct Shared {
    inner: Mutex<Inner>,
    stop: watch::Sender<bool>,
}

struct Inner {
    failed: HashSet<ServerAddress>,
    last_server: Option<ServerAddress>,
    retry: Duration,
    started: bool,
    current: Option<Transport>,
}

impl Supervisor {
    pub(crate) fn new(
        coin: CoinType,
        servers: Vec<ServerAddress>,
        config: Config,
        listeners: Arc<ConnectionListeners>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let inner = Inner {
            failed: HashSet::new(),
            last_server: None,
            retry: config.initial_retry,
            started: false,
            current: None,
        };
        Self {
            coin,
            servers,
            config,
            shared: Arc::new(Shared { inner: Mutex::new(inner), stop }),
            listeners,
        }
    }

    /// Spawns the reconnect loop. Idempotent while running; rejected for good
    /// once the supervisor has been stopped.
    pub(crate) fn start(&self) -> Result<(), ClientError> {
        if *self.shared.stop.borrow() {
            return Err(ClientError::Stopped);
        }
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.started {
                return Ok(());
            }
            inner.started = true;
        }

        let task = RunLoop {
            coin: self.coin.clone(),
            servers: self.servers.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
            listeners: self.listeners.clone(),
        };
        tokio::spawn(task.run());
        Ok(())
    }

    /// Stops the current run and cancels any pending reconnect. Idempotent;
    /// tolerated from any state.
    pub(crate) fn stop(&self) {
        if self.shared.stop.send_replace(true) {
            return;
        }
        let current = self.shared.inner.lock().unwrap().current.take();
        if let Some(transport) = current {
            transport.stop();
        }
        log::info!("[SUPERVISOR] {}: stopped", self.coin);
    }

    pub(crate) fn current_transport(&self) -> Option<Transport> {
        self.shared.inner.lock().unwrap().current.clone()
    }

    #[cfg(test)]
    pub(crate) fn inject_current(&self, transport: Transport) {
        self.shared.inner.lock().unwrap().current = Some(transport);
    }

    #[cfg(test)]
    pub(crate) fn last_server(&self) -> Option<ServerAddress> {
        self.shared.inner.lock().unwrap().last_server.clone()
    }
}

struct RunLoop {
    coin: CoinType,
    servers: Vec<ServerAddress>,
    config: Config,
    shared: Arc<Shared>,
    listeners: Arc<ConnectionListeners>,
}

impl RunLoop {
    async fn run(self) {
        let mut stop_rx = self.shared.stop.subscribe();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let server = self.select_server();
            log::info!("[SUPERVISOR] {}: connecting to {}", self.coin, server);

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let transport = Transport::new(server.clone(), events_tx, self.config.call_timeout);
            {
                let mut inner = self.shared.inner.lock().unwrap();
                inner.last_server = Some(server.clone());
                inner.current = Some(transport.clone());
            }
            transport.start();

            loop {
                tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(TransportEvent::Running) => {
                            self.shared.inner.lock().unwrap().retry = self.config.initial_retry;
                            log::info!("[SUPERVISOR] {}: run established on {}", self.coin, server);
                            self.listeners.broadcast_connected();
                        }
                        Some(TransportEvent::Terminated(previous)) => {
                            log::info!("[SUPERVISOR] {}: run on {} ended (was {:?})",
                                self.coin, server, previous);
                            break;
                        }
                        None => break,
                    },
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            // Keep draining events until the transport confirms
                            // termination.
                            transport.stop();
                        }
                    }
                }
            }

            self.shared.inner.lock().unwrap().current = None;

            if *stop_rx.borrow() {
                break;
            }

            let delay = {
                let mut inner = self.shared.inner.lock().unwrap();
                inner.failed.insert(server.clone());
                inner.retry = (inner.retry * 2).min(self.config.max_retry);
                inner.retry
            };
            self.listeners.broadcast_disconnected();
            log::warn!("[SUPERVISOR] {}: reconnecting in {:?}", self.coin, delay);

            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::debug!("[SUPERVISOR] {}: loop exited", self.coin);
    }

    fn select_server(&self) -> ServerAddress {
        let mut inner = self.shared.inner.lock().unwrap();
        pick_server(&self.servers, &mut inner.failed, &mut rand::thread_rng())
    }
}

/// Uniform draw from `servers`, skipping blacklisted entries. When every
/// server has failed, the blacklist is cleared first so selection can never
/// deadlock.
pub(crate) fn pick_server(
    servers: &[ServerAddress],
    failed: &mut HashSet<ServerAddress>,
    rng: &mut impl Rng,
) -> ServerAddress {
    if failed.len() >= servers.len() {
        failed.clear();
    }
    loop {
        let candidate = servers.choose(rng).expect("server list is never empty");
        if !failed.contains(candidate) {
            return candidate.clone();
        }
    }
}
