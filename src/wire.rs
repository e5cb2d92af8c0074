//! Line codec for the Electrum JSON-RPC dialect.
//!
//! Every message is one JSON object on one newline-terminated line. Outbound
//! requests carry `{id, method, params}`; inbound lines are either replies
//! (`id` with `result` or `error`) or server notifications (`method` with no
//! `id`). Anything else is a malformed frame.

use serde_json::{json, Value};

use crate::error::WireError;

/// An outbound request. Ids are allocated by the transport worker,
/// monotonically increasing per connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    pub fn to_line(&self) -> String {
        let mut line = json!({
            "jsonrpc": "2.0",
            "id": self.id,
            "method": self.method,
            "params": self.params,
        })
        .to_string();
        line.push('\n');
        line
    }
}

/// A parsed inbound line.
#[derive(Debug)]
pub enum Incoming {
    Reply {
        id: u64,
        result: Result<Value, Value>,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

pub fn parse_line(line: &str) -> Result<Incoming, WireError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| WireError::MalformedFrame(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| malformed("not a JSON object"))?;

    if let Some(id) = object.get("id") {
        let id = id.as_u64().ok_or_else(|| malformed("non-integer id"))?;
        if let Some(error) = object.get("error") {
            return Ok(Incoming::Reply { id, result: Err(error.clone()) });
        }
        if let Some(result) = object.get("result") {
            return Ok(Incoming::Reply { id, result: Ok(result.clone()) });
        }
        return Err(malformed("reply carries neither result nor error"));
    }

    let method = object
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("notification without method"))?
        .to_string();
    let params = match object.get("params") {
        None => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(malformed("params is not an array")),
    };

    Ok(Incoming::Notification { method, params })
}

fn malformed(reason: &str) -> WireError {
    WireError::MalformedFrame(reason.to_string())
}
