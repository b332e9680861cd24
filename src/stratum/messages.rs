//! Stratum message vocabulary
//!
//! Inbound objects are classified by trying a fixed sequence of shapes:
//! acknowledgement, method notification, then subscription result. The first
//! shape that fits wins; an object that fits none is a [`Error::Parse`].

use crate::record::TargetRecord;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Request id used for `mining.subscribe`
pub const SUBSCRIBE_ID: u64 = 1;
/// Request id used for `mining.authorize`
pub const AUTHORIZE_ID: u64 = 2;
/// Request id used for `mining.submit`
pub const SUBMIT_ID: u64 = 3;
/// Id the pool uses when acknowledging a submission
pub const SUBMIT_ACK_ID: u64 = 4;

/// Ids classified as acknowledgements when no method is present
pub const ACK_IDS: [u64; 2] = [AUTHORIZE_ID, SUBMIT_ACK_ID];

/// Known Stratum methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StratumMethod {
    /// Client subscribes to mining notifications
    Subscribe,
    /// Client authorizes with credentials
    Authorize,
    /// Server changes the share difficulty
    SetDifficulty,
    /// Server announces a new job
    Notify,
    /// Client submits a share
    Submit,
}

impl StratumMethod {
    /// Parse a wire method name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mining.subscribe" => Some(Self::Subscribe),
            "mining.authorize" => Some(Self::Authorize),
            "mining.set_difficulty" => Some(Self::SetDifficulty),
            "mining.notify" => Some(Self::Notify),
            "mining.submit" => Some(Self::Submit),
            _ => None,
        }
    }

    /// Wire method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "mining.subscribe",
            Self::Authorize => "mining.authorize",
            Self::SetDifficulty => "mining.set_difficulty",
            Self::Notify => "mining.notify",
            Self::Submit => "mining.submit",
        }
    }
}

impl fmt::Display for StratumMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorize or submit acknowledgement
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ack {
    pub id: u64,
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl Ack {
    /// Whether the pool accepted the request
    pub fn accepted(&self) -> bool {
        self.result == Some(true) && self.error.as_ref().map_or(true, Value::is_null)
    }

    /// Human-readable rejection reason
    pub fn reason(&self) -> String {
        match &self.error {
            Some(Value::Null) | None => "result=false".to_string(),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(Value::Array(items)) => items
                .get(1)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Array(items.clone()).to_string()),
            Some(other) => other.to_string(),
        }
    }
}

/// A method-bearing message: server notification or echoed request
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: Option<u64>,
    pub method: StratumMethod,
    pub params: Vec<Value>,
}

impl Notification {
    /// Job id of a `mining.notify`
    pub fn job_id(&self) -> Option<String> {
        if self.method != StratumMethod::Notify {
            return None;
        }
        match self.params.first()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Decode the target record carried by a `mining.notify`
    pub fn target(&self) -> Result<TargetRecord> {
        if self.method != StratumMethod::Notify {
            return Err(Error::parse(format!("{} carries no target", self.method)));
        }
        let payload = self
            .params
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("mining.notify params[1] must be a payload string"))?;
        TargetRecord::from_payload(payload)
    }

    /// New difficulty of a `mining.set_difficulty`
    ///
    /// Fractional values are rounded up, so `0.5` asks for one leading zero.
    pub fn difficulty(&self) -> Option<u64> {
        if self.method != StratumMethod::SetDifficulty {
            return None;
        }
        let value = self.params.first()?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|d| d.is_finite() && *d >= 0.0).map(|d| d.ceil() as u64))
    }

    /// Whether the pool sent a non-integer difficulty
    pub fn has_fractional_difficulty(&self) -> bool {
        self.method == StratumMethod::SetDifficulty
            && self
                .params
                .first()
                .and_then(Value::as_f64)
                .is_some_and(|d| d.fract() != 0.0)
    }
}

/// Reply to `mining.subscribe`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionResult {
    pub id: u64,
    pub result: Vec<Value>,
}

impl SubscriptionResult {
    /// Extra-nonce-1 from `result[1]`
    pub fn extra_nonce_1(&self) -> Result<Vec<u8>> {
        let hex_str = self
            .result
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("subscription result[1] must be a hex string"))?;
        hex::decode(hex_str)
            .map_err(|e| Error::parse(format!("invalid extra-nonce-1 {:?}: {}", hex_str, e)))
    }

    /// Extra-nonce-2 byte length from `result[2]`
    pub fn extra_nonce_2_len(&self) -> Result<usize> {
        self.result
            .get(2)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| Error::parse("subscription result[2] must be a byte length"))
    }
}

/// Classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ack(Ack),
    Notification(Notification),
    Subscribed(SubscriptionResult),
}

#[derive(Deserialize)]
struct RawNotification {
    #[serde(default)]
    id: Option<u64>,
    method: String,
    params: Vec<Value>,
}

impl Message {
    /// Parse one line of pool output
    pub fn from_json(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::parse(value)
    }

    /// Classify a JSON value
    pub fn parse(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::parse(format!("expected JSON object, got {}", value)));
        }

        if let Some(ack) = Self::try_ack(&value) {
            return Ok(Message::Ack(ack));
        }

        let notification_err = match Self::try_notification(&value) {
            Ok(notification) => return Ok(Message::Notification(notification)),
            Err(e) => e,
        };

        if let Ok(subscribed) = serde_json::from_value::<SubscriptionResult>(value.clone()) {
            return Ok(Message::Subscribed(subscribed));
        }

        Err(Error::parse(format!("{} in {}", notification_err, value)))
    }

    fn try_ack(value: &Value) -> Option<Ack> {
        if value.get("method").is_some() {
            return None;
        }
        let id = value.get("id")?.as_u64()?;
        if !ACK_IDS.contains(&id) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    fn try_notification(value: &Value) -> std::result::Result<Notification, String> {
        let raw: RawNotification =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        let method = StratumMethod::parse(&raw.method)
            .ok_or_else(|| format!("unknown method {:?}", raw.method))?;
        Ok(Notification {
            id: raw.id,
            method,
            params: raw.params,
        })
    }
}

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumRequest {
    pub id: u64,
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl StratumRequest {
    pub fn new(id: u64, method: StratumMethod, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.as_str(),
            params,
        }
    }

    pub fn subscribe() -> Self {
        Self::new(SUBSCRIBE_ID, StratumMethod::Subscribe, vec![Value::from("")])
    }

    pub fn authorize(identity: &str, password: &str) -> Self {
        Self::new(
            AUTHORIZE_ID,
            StratumMethod::Authorize,
            vec![Value::from(identity), Value::from(password)],
        )
    }

    pub fn submit(identity: &str, job_id: &str, nonce_hex: &str) -> Self {
        Self::new(
            SUBMIT_ID,
            StratumMethod::Submit,
            vec![Value::from(identity), Value::from(job_id), Value::from(nonce_hex)],
        )
    }

    /// Serialized form without the trailing newline
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
