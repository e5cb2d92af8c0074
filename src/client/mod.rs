//! Blockchain API facade.
//!
//! Translates domain operations into Electrum RPC calls against the current
//! connection run and adapts the replies into listener events. Reply-shape
//! problems are logged and dropped; they never touch the connection
//! lifecycle.


use std::sync::Arc;

use bitcoin::Txid;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::ClientError;
use crate::executor::SerialExecutor;
use crate::listener::{ConnectionEventListener, ConnectionListeners, TxEventSink};
use crate::supervisor::Supervisor;
use crate::transport::{Transport, TransportState};
use crate::types::{Address, AddressStatus, CoinAddress, CoinType, HistoryTx, RawTransaction, UnspentTx};

const METHOD_SUBSCRIBE: &str = "blockchain.address.subscribe";
const METHOD_LISTUNSPENT: &str = "blockchain.address.listunspent";
const METHOD_GET_HISTORY: &str = "blockchain.address.get_history";
const METHOD_GET_TX: &str = "blockchain.transaction.get";
const METHOD_BROADCAST: &str = "blockchain.transaction.broadcast";
const METHOD_VERSION: &str = "server.version";

/// The light-wallet connection core: a supervised Electrum connection plus
/// the blockchain operations a wallet issues against it.
///
/// Subscriptions live for one run only; callers re-subscribe from their
/// `on_connection` callback.
pub struct ChainClient {
    coin: CoinType,
    listeners: Arc<ConnectionListeners>,
    supervisor: Supervisor,
}

impl ChainClient {
    pub fn new(coin_address: CoinAddress) -> Self {
        Self::with_config(coin_address, Config::default())
    }

    pub fn with_config(coin_address: CoinAddress, config: Config) -> Self {
        let listeners = Arc::new(ConnectionListeners::new());
        let supervisor = Supervisor::new(
            coin_address.coin().clone(),
            coin_address.servers().to_vec(),
            config,
            listeners.clone(),
        );
        Self {
            coin: coin_address.coin().clone(),
            listeners,
            supervisor,
        }
    }

    pub fn coin(&self) -> &CoinType {
        &self.coin
    }

    /// Begins connecting. Rejected once the client has been stopped.
    pub fn start(&self) -> Result<(), ClientError> {
        self.supervisor.start()
    }

    /// Triggers shutdown without waiting for it: the current run terminates,
    /// in-flight calls fail with `Disconnected`, no reconnect is scheduled.
    pub fn stop(&self) {
        self.supervisor.stop();
    }

    pub fn add_event_listener(
        &self,
        listener: Arc<dyn ConnectionEventListener>,
        executor: SerialExecutor,
    ) {
        self.listeners.add(listener, executor);
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.listeners.remove(listener);
    }

    /// Subscribes to status updates for every address, one subscribe per
    /// address. The initial reply and every later server notification both
    /// arrive as `on_address_status_update`; status handling must be
    /// idempotent on the listener side.
    pub async fn subscribe_to_addresses(
        &self,
        addresses: &[Address],
        sink: &TxEventSink,
    ) -> Result<(), ClientError> {
        let transport = self.transport()?;

        for address in addresses {
            // Each subscription closes over its own copy of the address and
            // sink; nothing is shared across loop iterations.
            let bound_address = address.clone();
            let bound_sink = sink.clone();
            let handler = move |params: &[Value]| {
                match notification_status(&bound_address, params) {
                    Ok(status) => bound_sink.address_status(status),
                    Err(e) => log::warn!("[CHAIN] dropping notification for {}: {}", bound_address, e),
                }
            };

            let reply = transport
                .subscribe(METHOD_SUBSCRIBE, vec![json!(address.as_str())], Box::new(handler))
                .await?;

            match status_from_value(&reply) {
                Ok(status) => sink.address_status(AddressStatus::new(address.clone(), status)),
                Err(e) => log::warn!("[CHAIN] dropping subscribe reply for {}: {}", address, e),
            }
        }
        Ok(())
    }

    /// Drops the server-push subscription for one address. Pending statuses
    /// already queued on the sink's executor still get delivered.
    pub fn unsubscribe_address(&self, address: &Address) -> Result<(), ClientError> {
        let transport = self.transport()?;
        transport.unsubscribe(METHOD_SUBSCRIBE, address.as_str());
        Ok(())
    }

    pub async fn get_unspent(
        &self,
        status: AddressStatus,
        sink: &TxEventSink,
    ) -> Result<(), ClientError> {
        let transport = self.transport()?;
        let reply = transport
            .call(METHOD_LISTUNSPENT, vec![json!(status.address().as_str())])
            .await?;

        match serde_json::from_value::<Vec<UnspentTx>>(reply) {
            Ok(unspent) => sink.unspent(status, unspent),
            Err(e) => log::warn!("[CHAIN] dropping listunspent reply for {}: {}", status.address(), e),
        }
        Ok(())
    }

    pub async fn get_history(
        &self,
        status: AddressStatus,
        sink: &TxEventSink,
    ) -> Result<(), ClientError> {
        let transport = self.transport()?;
        let reply = transport
            .call(METHOD_GET_HISTORY, vec![json!(status.address().as_str())])
            .await?;

        match serde_json::from_value::<Vec<HistoryTx>>(reply) {
            Ok(history) => sink.history(status, history),
            Err(e) => log::warn!("[CHAIN] dropping history reply for {}: {}", status.address(), e),
        }
        Ok(())
    }

    pub async fn get_transaction(
        &self,
        txid: Txid,
        sink: &TxEventSink,
    ) -> Result<(), ClientError> {
        let transport = self.transport()?;
        let reply = transport
            .call(METHOD_GET_TX, vec![json!(txid.to_string())])
            .await?;

        match decode_raw_transaction(&reply) {
            Ok(tx) => sink.transaction(tx),
            Err(e) => log::warn!("[CHAIN] dropping transaction reply for {}: {}", txid, e),
        }
        Ok(())
    }

    /// Submits raw transaction bytes. The acknowledgement is accepted only
    /// when the returned txid equals the hash of what was submitted; any
    /// other outcome arrives as `on_transaction_broadcast_error`.
    pub async fn broadcast_transaction(
        &self,
        tx: RawTransaction,
        sink: &TxEventSink,
    ) -> Result<(), ClientError> {
        let transport = self.transport()?;
        let reply = transport
            .call(METHOD_BROADCAST, vec![json!(tx.to_hex())])
            .await;

        match reply {
            Ok(reply) => match decode_broadcast_txid(&reply) {
                Ok(returned) if returned == tx.txid() => sink.broadcast(tx),
                Ok(returned) => {
                    let sent = tx.txid();
                    log::warn!("[CHAIN] broadcast acknowledged {} but {} was submitted", returned, sent);
                    sink.broadcast_error(tx, ClientError::BroadcastMismatch { sent, returned });
                }
                Err(e) => sink.broadcast_error(tx, e),
            },
            Err(e) => sink.broadcast_error(tx, e.into()),
        }
        Ok(())
    }

    /// Liveness check against the current run; the answer is only logged.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let transport = self.transport()?;
        let reply = transport.call(METHOD_VERSION, vec![]).await?;

        match first_string(&reply) {
            Ok(version) => log::info!("[CHAIN] {} server {} is alive: {}",
                self.coin, transport.server(), version),
            Err(e) => log::warn!("[CHAIN] unreadable server.version reply: {}", e),
        }
        Ok(())
    }

    fn transport(&self) -> Result<Transport, ClientError> {
        let transport = self
            .supervisor
            .current_transport()
            .ok_or(ClientError::NotConnected)?;
        if transport.state() != TransportState::Running {
            return Err(ClientError::NotConnected);
        }
        Ok(transport)
    }

    #[cfg(test)]
    pub(crate) fn inject_transport_for_test(&self, transport: Transport) {
        self.supervisor.inject_current(transport);
    }
}

fn status_from_value(value: &Value) -> Result<Option<String>, ClientError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(ClientError::Decode(format!(
            "status is neither string nor null: {other}"
        ))),
    }
}

fn notification_status(address: &Address, params: &[Value]) -> Result<AddressStatus, ClientError> {
    let wire_address = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::AddressFormat("notification without address".into()))?;
    if wire_address.is_empty() {
        return Err(ClientError::AddressFormat("empty address".into()));
    }

    let status = params
        .get(1)
        .ok_or_else(|| ClientError::Decode("notification without status".into()))?;
    let status = status_from_value(status)?;
    Ok(AddressStatus::new(address.clone(), status))
}

fn first_string(reply: &Value) -> Result<&str, ClientError> {
    reply
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Decode(format!("expected array with leading string, got {reply}")))
}

fn decode_raw_transaction(reply: &Value) -> Result<RawTransaction, ClientError> {
    let raw_hex = first_string(reply)?;
    let raw = hex::decode(raw_hex)
        .map_err(|e| ClientError::Decode(format!("transaction hex: {e}")))?;
    Ok(RawTransaction::new(raw))
}

fn decode_broadcast_txid(reply: &Value) -> Result<Txid, ClientError> {
    let txid_hex = first_string(reply)?;
    txid_hex
        .parse::<Txid>()
        .map_err(|e| ClientError::Decode(format!("broadcast txid: {e}")))
}
