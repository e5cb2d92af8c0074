use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use bitcoin::hashes::sha256d;
use bitcoin::Txid;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::InvalidServerAddress;

/// Identifier of the target chain. The connection core only reads its name
/// (for logs); interpreting addresses and transaction bytes under a coin type
/// is the wallet layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoinType {
    name: String,
}

impl CoinType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Host and port of one backend server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = InvalidServerAddress;

    /// Accepts `host:port`, with an optional `tcp://` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);

        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| InvalidServerAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(InvalidServerAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| InvalidServerAddress(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

/// Construction input for the client: a coin plus the fixed set of servers
/// that may answer for it.
#[derive(Debug, Clone)]
pub struct CoinAddress {
    coin: CoinType,
    servers: Vec<ServerAddress>,
}

impl CoinAddress {
    /// The server list must be non-empty.
    pub fn new(coin: CoinType, servers: Vec<ServerAddress>) -> Self {
        assert!(!servers.is_empty(), "CoinAddress requires at least one server");
        Self { coin, servers }
    }

    pub fn coin(&self) -> &CoinType {
        &self.coin
    }

    pub fn servers(&self) -> &[ServerAddress] {
        &self.servers
    }
}

/// An opaque printable address string minted under a coin type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    coin: CoinType,
    text: String,
}

impl Address {
    pub fn new(coin: CoinType, text: impl Into<String>) -> Self {
        Self { coin, text: text.into() }
    }

    pub fn coin(&self) -> &CoinType {
        &self.coin
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An address paired with the server-computed fingerprint of its history.
/// A `None` status means the address has no history yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressStatus {
    address: Address,
    status: Option<String>,
}

impl AddressStatus {
    pub fn new(address: Address, status: Option<String>) -> Self {
        Self { address, status }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

/// One entry of an address's confirmed/unconfirmed history.
///
/// Height follows the backend convention: 0 for mempool transactions,
/// negative when unconfirmed parents are involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTx {
    #[serde(rename = "tx_hash")]
    pub txid: Txid,
    pub height: i64,
}

/// An unspent output as reported by `blockchain.address.listunspent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnspentTx {
    #[serde(rename = "tx_hash")]
    pub txid: Txid,
    pub tx_pos: u32,
    pub value: u64,
    pub height: i64,
}

// Identity of an unspent output is (txid, tx_pos, value); height changes as
// the chain grows and must not split the identity.
impl PartialEq for UnspentTx {
    fn eq(&self, other: &Self) -> bool {
        self.txid == other.txid && self.tx_pos == other.tx_pos && self.value == other.value
    }
}

impl Eq for UnspentTx {}

impl Hash for UnspentTx {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.txid.hash(state);
        self.tx_pos.hash(state);
        self.value.hash(state);
    }
}

/// Raw serialized transaction bytes. The core never parses them; it only
/// hashes them to confirm broadcast acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    raw: Bytes,
}

impl RawTransaction {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn txid(&self) -> Txid {
        Txid::from_raw_hash(<sha256d::Hash as bitcoin::hashes::Hash>::hash(&self.raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_address_parses_with_and_without_scheme() {
        let plain: ServerAddress = "electrum.example.org:50001".parse().unwrap();
        assert_eq!(plain, ServerAddress::new("electrum.example.org", 50001));

        let prefixed: ServerAddress = "tcp://10.0.0.1:50001".parse().unwrap();
        assert_eq!(prefixed, ServerAddress::new("10.0.0.1", 50001));

        assert!("no-port".parse::<ServerAddress>().is_err());
        assert!(":50001".parse::<ServerAddress>().is_err());
        assert!("host:notaport".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn address_status_equality_is_null_aware() {
        let coin = CoinType::new("testcoin");
        let addr = Address::new(coin, "mxyz123");

        let none_a = AddressStatus::new(addr.clone(), None);
        let none_b = AddressStatus::new(addr.clone(), None);
        let some_a = AddressStatus::new(addr.clone(), Some("deadbeef".into()));
        let some_b = AddressStatus::new(addr.clone(), Some("deadbeef".into()));
        let some_c = AddressStatus::new(addr, Some("cafebabe".into()));

        assert_eq!(none_a, none_b);
        assert_eq!(some_a, some_b);
        assert_ne!(none_a, some_a);
        assert_ne!(some_a, some_c);
    }

    #[test]
    fn unspent_round_trips_through_json() {
        let json = json!({
            "tx_hash": "aa00000000000000000000000000000000000000000000000000000000000000",
            "tx_pos": 1,
            "value": 1000,
            "height": 100,
        });

        let utxo: UnspentTx = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(utxo.tx_pos, 1);
        assert_eq!(utxo.value, 1000);
        assert_eq!(utxo.height, 100);

        let back = serde_json::to_value(&utxo).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn unspent_identity_ignores_height() {
        let base = json!({
            "tx_hash": "aa00000000000000000000000000000000000000000000000000000000000000",
            "tx_pos": 1,
            "value": 1000,
            "height": 100,
        });
        let a: UnspentTx = serde_json::from_value(base.clone()).unwrap();
        let mut b: UnspentTx = serde_json::from_value(base).unwrap();
        b.height = 105;

        assert_eq!(a, b);
    }

    #[test]
    fn raw_transaction_txid_is_double_sha256() {
        let raw = hex::decode("0100000001abcdef").unwrap();
        let tx = RawTransaction::new(raw.clone());

        let expected = Txid::from_raw_hash(<sha256d::Hash as bitcoin::hashes::Hash>::hash(&raw));
        assert_eq!(tx.txid(), expected);
        assert_eq!(tx.to_hex(), "0100000001abcdef");
    }
}
