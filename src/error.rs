use bitcoin::Txid;
use serde_json::Value;
use thiserror::Error;

/// A server string that does not look like `host:port`.
#[derive(Debug, Error)]
#[error("invalid server address: {0}")]
pub struct InvalidServerAddress(pub String);

/// Wire input that does not parse into a reply or a notification.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Outcome of a single RPC call against one transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with an `error` payload.
    #[error("server error: {0}")]
    Rpc(Value),

    /// The connection run terminated before the reply arrived.
    #[error("connection terminated")]
    Disconnected,

    /// The configured per-call deadline elapsed. The run itself keeps going.
    #[error("call timed out")]
    Timeout,
}

/// Errors surfaced by the blockchain API facade.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to any server")]
    NotConnected,

    #[error("client is stopped")]
    Stopped,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected reply shape: {0}")]
    Decode(String),

    #[error("invalid address in notification: {0}")]
    AddressFormat(String),

    #[error("broadcast returned txid {returned}, expected {sent}")]
    BroadcastMismatch { sent: Txid, returned: Txid },
}
