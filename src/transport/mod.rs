//! Transport client for one connection run.
//!
//! One worker task exclusively owns the socket, the pending-call table and
//! the subscription registry. The cloneable [`Transport`] handle only
//! enqueues commands; replies come back over per-call oneshot channels and
//! lifecycle transitions over the event channel handed in at construction.

mod subscriptions;


use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;
use crate::types::ServerAddress;
use crate::wire::{self, Incoming};

pub(crate) use subscriptions::NotificationHandler;
use subscriptions::SubscriptionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportState {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// Lifecycle transitions reported to whoever owns the run (the supervisor).
/// `Running` is emitted at most once, `Terminated` exactly once.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Running,
    Terminated(TransportState),
}

type PendingReply = oneshot::Sender<Result<Value, TransportError>>;

enum Command {
    Call {
        method: String,
        params: Vec<Value>,
        reply: PendingReply,
    },
    Subscribe {
        method: String,
        params: Vec<Value>,
        handler: NotificationHandler,
        reply: PendingReply,
    },
    Unsubscribe {
        method: String,
        key: String,
    },
    Stop,
}

#[derive(Clone)]
pub(crate) struct Transport {
    server: ServerAddress,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Command>>>>,
    state: Arc<Mutex<TransportState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    call_timeout: Option<Duration>,
}

impl Transport {
    pub(crate) fn new(
        server: ServerAddress,
        events: mpsc::UnboundedSender<TransportEvent>,
        call_timeout: Option<Duration>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            server,
            cmd_tx,
            cmd_rx: Arc::new(Mutex::new(Some(cmd_rx))),
            state: Arc::new(Mutex::new(TransportState::New)),
            events,
            call_timeout,
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn server(&self) -> &ServerAddress {
        &self.server
    }

    /// Connects and spawns the worker. Calling it again is a no-op.
    pub(crate) fn start(&self) {
        let Some(cmd_rx) = self.take_receiver() else { return };
        let worker = self.worker();
        let server = self.server.clone();
        tokio::spawn(async move {
            match TcpStream::connect((server.host(), server.port())).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    worker.run(stream, cmd_rx).await;
                }
                Err(e) => {
                    log::warn!("[TRANSPORT] {}: connect failed: {}", server, e);
                    worker.abandon();
                }
            }
        });
    }

    /// Test entry: run the worker over an in-memory stream instead of TCP.
    #[cfg(test)]
    pub(crate) fn start_with_stream<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(cmd_rx) = self.take_receiver() else { return };
        let worker = self.worker();
        tokio::spawn(worker.run(stream, cmd_rx));
    }

    /// Idempotent; tolerated from any state, including before `start`.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                TransportState::Stopping | TransportState::Terminated => return,
                TransportState::New => {
                    *state = TransportState::Terminated;
                    drop(state);
                    let _ = self.events.send(TransportEvent::Terminated(TransportState::New));
                    return;
                }
                _ => *state = TransportState::Stopping,
            }
        }
        let _ = self.cmd_tx.send(Command::Stop);
    }

    pub(crate) async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Call {
            method: method.to_string(),
            params,
            reply: reply_tx,
        };
        if self.cmd_tx.send(command).is_err() {
            return Err(TransportError::Disconnected);
        }
        self.await_reply(reply_rx).await
    }

    /// Installs `handler` for notifications matching `(method, params[0])`
    /// before the request is written, so no notification can slip past
    /// between the reply and the registration.
    pub(crate) async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        handler: NotificationHandler,
    ) -> Result<Value, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Subscribe {
            method: method.to_string(),
            params,
            handler,
            reply: reply_tx,
        };
        if self.cmd_tx.send(command).is_err() {
            return Err(TransportError::Disconnected);
        }
        self.await_reply(reply_rx).await
    }

    pub(crate) fn unsubscribe(&self, method: &str, key: &str) {
        let _ = self.cmd_tx.send(Command::Unsubscribe {
            method: method.to_string(),
            key: key.to_string(),
        });
    }

    async fn await_reply(
        &self,
        reply_rx: oneshot::Receiver<Result<Value, TransportError>>,
    ) -> Result<Value, TransportError> {
        match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply.unwrap_or(Err(TransportError::Disconnected)),
                Err(_) => Err(TransportError::Timeout),
            },
            None => reply_rx.await.unwrap_or(Err(TransportError::Disconnected)),
        }
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        let mut state = self.state.lock().unwrap();
        if *state != TransportState::New {
            return None;
        }
        *state = TransportState::Starting;
        self.cmd_rx.lock().unwrap().take()
    }

    fn worker(&self) -> Worker {
        Worker {
            server: self.server.clone(),
            pending: HashMap::new(),
            subs: SubscriptionRegistry::default(),
            next_id: 0,
            state: self.state.clone(),
            events: self.events.clone(),
            malformed_lines: 0,
        }
    }
}

struct Worker {
    server: ServerAddress,
    pending: HashMap<u64, PendingReply>,
    subs: SubscriptionRegistry,
    next_id: u64,
    state: Arc<Mutex<TransportState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    malformed_lines: u64,
}

impl Worker {
    async fn run<S>(mut self, stream: S, mut cmd_rx: mpsc::UnboundedReceiver<Command>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.enter_running() {
            self.finish();
            return;
        }

        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                command = cmd_rx.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command, &mut writer).await {
                        break;
                    }
                }
                read = reader.read_line(&mut line) => match read {
                    Ok(0) => {
                        log::info!("[TRANSPORT] {}: server closed the connection", self.server);
                        break;
                    }
                    Ok(_) => self.handle_line(line.trim_end()),
                    Err(e) => {
                        log::warn!("[TRANSPORT] {}: read failed: {}", self.server, e);
                        break;
                    }
                }
            }
        }

        self.finish();
    }

    /// Terminal path for a worker whose socket never came up.
    fn abandon(mut self) {
        self.finish();
    }

    async fn handle_command<W>(&mut self, command: Command, writer: &mut W) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        match command {
            Command::Call { method, params, reply } => {
                self.send_request(method, params, reply, writer).await
            }
            Command::Subscribe { method, params, handler, reply } => {
                let key = params
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.subs.insert(&method, key, handler);
                self.send_request(method, params, reply, writer).await
            }
            Command::Unsubscribe { method, key } => {
                if !self.subs.remove(&method, &key) {
                    log::debug!("[TRANSPORT] {}: unsubscribe without subscription: {} {}",
                        self.server, method, key);
                }
                true
            }
            Command::Stop => false,
        }
    }

    async fn send_request<W>(
        &mut self,
        method: String,
        params: Vec<Value>,
        reply: PendingReply,
        writer: &mut W,
    ) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        self.next_id += 1;
        let request = wire::Request { id: self.next_id, method, params };
        let line = request.to_line();
        log::trace!("[TRANSPORT] {}: >>> {}", self.server, line.trim_end());

        // Registered before the write so a terminating run fails it too.
        self.pending.insert(request.id, reply);

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[TRANSPORT] {}: write failed: {}", self.server, e);
                false
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        log::trace!("[TRANSPORT] {}: <<< {}", self.server, line);

        match wire::parse_line(line) {
            Ok(Incoming::Reply { id, result }) => match self.pending.remove(&id) {
                Some(reply) => {
                    let outcome = result.map_err(TransportError::Rpc);
                    if reply.send(outcome).is_err() {
                        log::debug!("[TRANSPORT] {}: caller gone for reply id {}", self.server, id);
                    }
                }
                None => {
                    log::debug!("[TRANSPORT] {}: dropping reply with unknown id {}", self.server, id);
                }
            },
            Ok(Incoming::Notification { method, params }) => {
                if !self.subs.dispatch(&method, &params) {
                    log::warn!("[TRANSPORT] {}: no subscription matches notification {}",
                        self.server, method);
                }
            }
            Err(e) => {
                self.malformed_lines += 1;
                log::warn!("[TRANSPORT] {}: {} ({} malformed lines this run)",
                    self.server, e, self.malformed_lines);
            }
        }
    }

    fn enter_running(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != TransportState::Starting {
            // stop() won the race during connect
            return false;
        }
        *state = TransportState::Running;
        drop(state);
        log::info!("[TRANSPORT] {}: connected", self.server);
        let _ = self.events.send(TransportEvent::Running);
        true
    }

    fn finish(&mut self) {
        let previous = {
            let mut state = self.state.lock().unwrap();
            if *state == TransportState::Terminated {
                return;
            }
            let previous = *state;
            *state = TransportState::Terminated;
            previous
        };

        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(TransportError::Disconnected));
        }
        self.subs.clear();

        log::info!("[TRANSPORT] {}: terminated (was {:?})", self.server, previous);
        let _ = self.events.send(TransportEvent::Terminated(previous));
    }
}
