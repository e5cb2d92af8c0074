//! Durable light-wallet connection core for Electrum-style backends.
//!
//! A [`ChainClient`] keeps one supervised TCP connection to a set of
//! interchangeable servers, multiplexes wallet queries and address
//! subscriptions over newline-delimited JSON-RPC, and fans blockchain events
//! out to registered listeners. Servers that fail are blacklisted and
//! reconnects back off exponentially (capped); subscriptions are lost on
//! reconnect, so callers re-subscribe from `on_connection`.

pub mod config;
pub mod error;
pub mod executor;
pub mod listener;
pub mod types;
pub mod wire;

mod client;
mod supervisor;
mod transport;

pub use client::ChainClient;
pub use config::Config;
pub use error::{ClientError, TransportError, WireError};
pub use executor::SerialExecutor;
pub use listener::{ConnectionEventListener, TransactionEventListener, TxEventSink};
pub use types::{
    Address, AddressStatus, CoinAddress, CoinType, HistoryTx, RawTransaction, ServerAddress,
    UnspentTx,
};
