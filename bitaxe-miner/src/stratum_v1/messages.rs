//! Stratum v1 message types and JSON-RPC serialization.
//!
//! Outbound requests are serialized from [`JsonRpcMessage`]. Inbound lines
//! are classified by [`classify`] straight from the parsed JSON value,
//! because responses carry no method echo and the shape of `result` and
//! `error` decides what a message means.

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, TxMerkleNode};
use serde::Serialize;
use serde_json::Value;

use super::error::{StratumError, StratumResult};
use crate::job_builder::Extranonce2;

/// Request ids below this belong to the setup sequence.
pub const FIRST_SUBMIT_ID: u64 = 5;

/// Request id of `mining.subscribe` in the setup sequence.
pub const SUBSCRIBE_ID: u64 = 1;

/// Request id of `mining.configure` in the setup sequence.
pub const CONFIGURE_ID: u64 = 2;

/// Templates with more branches than this are refused.
pub const MAX_MERKLE_BRANCHES: usize = 32;

/// Widest extranonce2 field a subscription may assign.
pub const MAX_EXTRANONCE2_LEN: usize = 16;

/// One inbound line, normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum StratumEvent {
    Notify(MiningTemplate),
    SetDifficulty(f64),
    SetVersionMask(u32),
    Reconnect,
    /// Response to one of the setup requests.
    SetupResult {
        id: u64,
        success: bool,
        /// Present only for the `mining.subscribe` response.
        subscription: Option<Subscription>,
        reason: Option<String>,
    },
    /// Response to a `mining.submit`.
    SubmitResult {
        id: u64,
        success: bool,
        reason: Option<String>,
    },
    /// Mask granted in the `mining.configure` response.
    VersionMaskResult(u32),
    Unknown,
}

/// What the pool assigned us in the `mining.subscribe` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub extranonce1: Vec<u8>,
    pub extranonce2_len: usize,
}

/// Mining job notification from pool (mining.notify).
#[derive(Debug, Clone, PartialEq)]
pub struct MiningTemplate {
    pub job_id: String,

    /// Previous block hash, internal byte order
    pub prev_block_hash: BlockHash,

    /// Coinbase transaction up to extranonce1
    pub coinbase1: Vec<u8>,

    /// Coinbase transaction after extranonce2
    pub coinbase2: Vec<u8>,

    /// Merkle branch hashes, in the order they are folded in
    pub merkle_branches: Vec<TxMerkleNode>,

    pub version: u32,

    /// Encoded network target (nbits)
    pub nbits: u32,

    /// Block timestamp (Unix epoch seconds)
    pub ntime: u32,

    /// If true, abandon all previous jobs
    pub clean_jobs: bool,
}

impl MiningTemplate {
    /// Parse from Stratum JSON array parameters.
    ///
    /// The clean-jobs flag is taken from the last parameter, since some pools
    /// append extra fields after it.
    pub fn from_stratum_params(params: &[Value]) -> StratumResult<Self> {
        if params.len() < 9 {
            return Err(invalid("mining.notify params too short"));
        }

        let job_id = str_param(&params[0], "job_id")?.to_string();
        let prev_block_hash = parse_block_hash(str_param(&params[1], "prev_hash")?)?;
        let coinbase1 = hex_param(&params[2], "coinbase1")?;
        let coinbase2 = hex_param(&params[3], "coinbase2")?;

        let branches = params[4]
            .as_array()
            .ok_or_else(|| invalid("merkle_branches not an array"))?;
        if branches.len() > MAX_MERKLE_BRANCHES {
            return Err(invalid(format!(
                "{} merkle branches, at most {MAX_MERKLE_BRANCHES} supported",
                branches.len()
            )));
        }
        let merkle_branches = branches
            .iter()
            .map(|branch| parse_merkle_node(str_param(branch, "merkle branch")?))
            .collect::<StratumResult<Vec<_>>>()?;

        let version = u32_hex_param(&params[5], "version")?;
        let nbits = u32_hex_param(&params[6], "nbits")?;
        let ntime = u32_hex_param(&params[7], "ntime")?;

        let clean_jobs = params
            .last()
            .and_then(Value::as_bool)
            .ok_or_else(|| invalid("clean_jobs not a bool"))?;

        Ok(Self {
            job_id,
            prev_block_hash,
            coinbase1,
            coinbase2,
            merkle_branches,
            version,
            nbits,
            ntime,
            clean_jobs,
        })
    }
}

fn invalid(msg: impl Into<String>) -> StratumError {
    StratumError::InvalidMessage(msg.into())
}

fn str_param<'a>(value: &'a Value, name: &str) -> StratumResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("{name} not a string")))
}

fn hex_param(value: &Value, name: &str) -> StratumResult<Vec<u8>> {
    hex::decode(str_param(value, name)?).map_err(|e| invalid(format!("{name} hex: {e}")))
}

fn u32_hex_param(value: &Value, name: &str) -> StratumResult<u32> {
    parse_u32_hex(str_param(value, name)?).ok_or_else(|| invalid(format!("{name} not hex")))
}

fn parse_u32_hex(s: &str) -> Option<u32> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Parse a block hash from Stratum hex string.
///
/// Stratum sends the hash as eight 4-byte words, each printed with its bytes
/// reversed relative to the internal order:
///
/// ```text
/// Stratum:  6b6455fd 6db962c1 01f2d4fc 0d67f4a3 bc96391d 00015296 00000000 00000000
/// Internal: [fd 55 64 6b] [c1 62 b9 6d] [fc d4 f2 01] [a3 f4 67 0d] ...
/// ```
fn parse_block_hash(hex: &str) -> StratumResult<BlockHash> {
    let mut bytes = hex::decode(hex).map_err(|e| invalid(format!("block hash hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(invalid(format!("block hash wrong length: {}", bytes.len())));
    }

    for chunk in bytes.chunks_mut(4) {
        chunk.reverse();
    }

    BlockHash::from_slice(&bytes).map_err(|e| invalid(format!("block hash parse: {e}")))
}

fn parse_merkle_node(hex: &str) -> StratumResult<TxMerkleNode> {
    let bytes = hex::decode(hex).map_err(|e| invalid(format!("merkle node hex: {e}")))?;
    TxMerkleNode::from_slice(&bytes)
        .map_err(|_| invalid(format!("merkle node wrong length: {}", bytes.len())))
}

/// Parameters for submitting a share to the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitParams {
    pub username: String,
    pub job_id: String,
    pub extranonce2: Extranonce2,
    pub ntime: u32,
    pub nonce: u32,

    /// Rolled bits only: the mined version XOR the job's base version
    pub version_bits: u32,
}

impl SubmitParams {
    /// Convert to Stratum hex string format for transmission.
    pub fn to_stratum_json(&self) -> Value {
        Value::Array(vec![
            Value::String(self.username.clone()),
            Value::String(self.job_id.clone()),
            Value::String(self.extranonce2.to_string()),
            Value::String(format!("{:08x}", self.ntime)),
            Value::String(format!("{:08x}", self.nonce)),
            Value::String(format!("{:08x}", self.version_bits)),
        ])
    }
}

/// Outbound JSON-RPC request.
///
/// Stratum v1 predates JSON-RPC 2.0: there is no version field and
/// notifications carry `id: null`. Only requests are ever sent, so only
/// requests are modeled.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcMessage {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Classify one line from the pool.
///
/// Errors mean the line is unusable: malformed JSON, or a notification
/// whose params don't parse. The connection itself is still fine.
pub fn classify(line: &str) -> StratumResult<StratumEvent> {
    let message: Value = serde_json::from_str(line)?;

    if let Some(method) = message.get("method").and_then(Value::as_str) {
        return classify_notification(method, message.get("params").unwrap_or(&Value::Null));
    }

    let id = message.get("id").and_then(Value::as_u64);
    let Some(result) = message.get("result") else {
        return Ok(StratumEvent::Unknown);
    };
    let error = message.get("error").unwrap_or(&Value::Null);
    let setup = id.is_none_or(|id| id < FIRST_SUBMIT_ID);

    let outcome = |success: bool, reason: Option<String>| {
        let id = id.unwrap_or(0);
        if setup {
            StratumEvent::SetupResult {
                id,
                success,
                subscription: None,
                reason,
            }
        } else {
            StratumEvent::SubmitResult {
                id,
                success,
                reason,
            }
        }
    };

    if !error.is_null() {
        let reason = error.get(1).and_then(Value::as_str).map(str::to_string);
        return Ok(outcome(false, reason));
    }

    if let Some(success) = result.as_bool() {
        let reason = if success {
            None
        } else {
            message
                .get("reject-reason")
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        return Ok(outcome(success, reason));
    }

    match id {
        Some(SUBSCRIBE_ID) => Ok(match parse_subscription(result) {
            Ok(subscription) => StratumEvent::SetupResult {
                id: SUBSCRIBE_ID,
                success: true,
                subscription: Some(subscription),
                reason: None,
            },
            Err(reason) => StratumEvent::SetupResult {
                id: SUBSCRIBE_ID,
                success: false,
                subscription: None,
                reason: Some(reason),
            },
        }),
        Some(CONFIGURE_ID) => Ok(result
            .get("version-rolling.mask")
            .and_then(Value::as_str)
            .and_then(parse_u32_hex)
            .map_or(StratumEvent::Unknown, StratumEvent::VersionMaskResult)),
        _ => Ok(StratumEvent::Unknown),
    }
}

fn parse_subscription(result: &Value) -> Result<Subscription, String> {
    let extranonce1 = result
        .get(1)
        .and_then(Value::as_str)
        .and_then(|h| hex::decode(h).ok())
        .ok_or("extranonce1 missing or not hex")?;
    let extranonce2_len = result
        .get(2)
        .and_then(Value::as_u64)
        .ok_or("extranonce2 size missing")?;
    if extranonce2_len > MAX_EXTRANONCE2_LEN as u64 {
        return Err(format!(
            "extranonce2 size {extranonce2_len}, at most {MAX_EXTRANONCE2_LEN} supported"
        ));
    }
    Ok(Subscription {
        extranonce1,
        extranonce2_len: extranonce2_len as usize,
    })
}

fn classify_notification(method: &str, params: &Value) -> StratumResult<StratumEvent> {
    let first = || {
        params
            .get(0)
            .ok_or_else(|| invalid(format!("{method} params empty")))
    };

    match method {
        "mining.notify" => {
            let params = params
                .as_array()
                .ok_or_else(|| invalid("mining.notify params not an array"))?;
            Ok(StratumEvent::Notify(MiningTemplate::from_stratum_params(
                params,
            )?))
        }
        "mining.set_difficulty" => first()?
            .as_f64()
            .map(StratumEvent::SetDifficulty)
            .ok_or_else(|| invalid("difficulty not a number")),
        "mining.set_version_mask" => first()?
            .as_str()
            .and_then(parse_u32_hex)
            .map(StratumEvent::SetVersionMask)
            .ok_or_else(|| invalid("version_mask not valid hex")),
        "client.reconnect" => Ok(StratumEvent::Reconnect),
        _ => Ok(StratumEvent::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_builder::test_blocks::esp_miner_capture;
    use serde_json::json;
    use test_case::test_case;

    fn minimal_notify(branches: usize) -> String {
        let branch = "00".repeat(32);
        json!({
            "id": null,
            "method": "mining.notify",
            "params": [
                "job1",
                "0".repeat(64),
                "aa",
                "bb",
                vec![branch; branches],
                "20000000",
                "1d00ffff",
                "5a5a5a5a",
                true
            ]
        })
        .to_string()
    }

    #[test]
    fn notify_from_capture() {
        let event = classify(esp_miner_capture::NOTIFY).unwrap();
        let StratumEvent::Notify(template) = event else {
            panic!("expected notify, got {event:?}");
        };

        assert_eq!(template.job_id, "875b4b7");
        assert_eq!(template.merkle_branches.len(), 12);
        assert_eq!(template.version, 0x20000000);
        assert_eq!(template.nbits, 0x17023a04);
        assert_eq!(template.ntime, 0x685468d7);
        assert!(!template.clean_jobs);
        assert_eq!(
            &template.prev_block_hash.as_byte_array()[..4],
            &[0xfd, 0x55, 0x64, 0x6b]
        );
    }

    #[test]
    fn notify_at_branch_cap() {
        let event = classify(&minimal_notify(MAX_MERKLE_BRANCHES)).unwrap();
        assert!(matches!(event, StratumEvent::Notify(t) if t.clean_jobs));
    }

    #[test]
    fn notify_over_branch_cap_is_rejected() {
        let err = classify(&minimal_notify(MAX_MERKLE_BRANCHES + 1)).unwrap_err();
        assert!(matches!(err, StratumError::InvalidMessage(_)));
        assert!(!err.is_fatal());
    }

    #[test_case(r#"{"id":null,"method":"mining.set_difficulty","params":[8192]}"#, StratumEvent::SetDifficulty(8192.0); "difficulty")]
    #[test_case(r#"{"id":null,"method":"mining.set_difficulty","params":[0.5]}"#, StratumEvent::SetDifficulty(0.5); "fractional_difficulty")]
    #[test_case(r#"{"id":null,"method":"mining.set_version_mask","params":["1fffe000"]}"#, StratumEvent::SetVersionMask(0x1fffe000); "version_mask")]
    #[test_case(r#"{"id":null,"method":"client.reconnect","params":[]}"#, StratumEvent::Reconnect; "reconnect")]
    #[test_case(r#"{"id":null,"method":"client.show_message","params":["hi"]}"#, StratumEvent::Unknown; "unhandled_method")]
    #[test_case(r#"{"id":7,"error":null}"#, StratumEvent::Unknown; "no_result")]
    #[test_case(r#"{"id":3,"result":true,"error":null}"#, StratumEvent::SetupResult { id: 3, success: true, subscription: None, reason: None }; "authorized")]
    #[test_case(r#"{"id":4,"result":null,"error":[-3,"Method not found",null]}"#, StratumEvent::SetupResult { id: 4, success: false, subscription: None, reason: Some("Method not found".into()) }; "setup_error")]
    #[test_case(r#"{"id":12,"result":true,"error":null}"#, StratumEvent::SubmitResult { id: 12, success: true, reason: None }; "accepted")]
    #[test_case(r#"{"id":12,"result":null,"error":[23,"Low difficulty share",null]}"#, StratumEvent::SubmitResult { id: 12, success: false, reason: Some("Low difficulty share".into()) }; "rejected_error")]
    #[test_case(r#"{"id":13,"result":false,"error":null,"reject-reason":"Stale"}"#, StratumEvent::SubmitResult { id: 13, success: false, reason: Some("Stale".into()) }; "rejected_false")]
    #[test_case(r#"{"id":2,"result":{"version-rolling":true,"version-rolling.mask":"1fffe000"},"error":null}"#, StratumEvent::VersionMaskResult(0x1fffe000); "configure")]
    #[test_case(r#"{"id":2,"result":{"version-rolling":false},"error":null}"#, StratumEvent::Unknown; "configure_declined")]
    fn classifies(line: &str, expect: StratumEvent) {
        assert_eq!(classify(line).unwrap(), expect);
    }

    #[test]
    fn subscribe_result_carries_extranonce() {
        let line = r#"{"id":1,"result":[[["mining.notify","ae6812eb4cd7735a302a8a9dd95cf71f"]],"4128064f",4],"error":null}"#;
        assert_eq!(
            classify(line).unwrap(),
            StratumEvent::SetupResult {
                id: 1,
                success: true,
                subscription: Some(Subscription {
                    extranonce1: vec![0x41, 0x28, 0x06, 0x4f],
                    extranonce2_len: 4,
                }),
                reason: None,
            }
        );
    }

    #[test]
    fn subscribe_result_without_extranonce_fails() {
        let line = r#"{"id":1,"result":[[]],"error":null}"#;
        assert!(matches!(
            classify(line).unwrap(),
            StratumEvent::SetupResult {
                id: 1,
                success: false,
                subscription: None,
                ..
            }
        ));
    }

    #[test]
    fn oversized_extranonce2_is_refused() {
        let line = r#"{"id":1,"result":[[],"4128064f",18446744073709551615],"error":null}"#;
        let StratumEvent::SetupResult {
            success,
            subscription,
            reason,
            ..
        } = classify(line).unwrap()
        else {
            panic!("expected a setup result");
        };

        assert!(!success);
        assert_eq!(subscription, None);
        assert!(reason.unwrap().contains("extranonce2"));
    }

    #[test]
    fn widest_allowed_extranonce2_is_accepted() {
        let line = r#"{"id":1,"result":[[],"4128064f",16],"error":null}"#;
        assert!(matches!(
            classify(line).unwrap(),
            StratumEvent::SetupResult {
                success: true,
                subscription: Some(Subscription { extranonce2_len: 16, .. }),
                ..
            }
        ));
    }

    #[test]
    fn missing_error_key_counts_as_null() {
        let line = r#"{"id":9,"result":true}"#;
        assert!(matches!(
            classify(line).unwrap(),
            StratumEvent::SubmitResult { success: true, .. }
        ));
    }

    #[test_case("{\"id\":1,"; "truncated")]
    #[test_case("not json"; "garbage")]
    fn malformed_json_is_an_error(line: &str) {
        let err = classify(line).unwrap_err();
        assert!(matches!(err, StratumError::Json(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn bad_difficulty_is_an_error() {
        let line = r#"{"id":null,"method":"mining.set_difficulty","params":["high"]}"#;
        assert!(matches!(
            classify(line),
            Err(StratumError::InvalidMessage(_))
        ));
    }

    #[test]
    fn parse_invalid_block_hash() {
        assert!(parse_block_hash("deadbeef").is_err());
        assert!(parse_block_hash(&"z".repeat(64)).is_err());
    }

    #[test]
    fn submit_params_match_capture() {
        let params = SubmitParams {
            username: "bc1q...bitaxe".to_string(),
            job_id: "875b4b7".to_string(),
            extranonce2: Extranonce2::new(
                esp_miner_capture::EXTRANONCE2_COUNTER,
                esp_miner_capture::EXTRANONCE2_LEN,
            ),
            ntime: 0x685468d7,
            nonce: esp_miner_capture::NONCE,
            version_bits: esp_miner_capture::ROLLED_VERSION ^ 0x20000000,
        };

        let expect: Value = serde_json::from_str(esp_miner_capture::SUBMIT_PARAMS).unwrap();
        assert_eq!(params.to_stratum_json(), expect);
    }

    #[test]
    fn request_serialization() {
        let msg = JsonRpcMessage::request(1, "mining.subscribe", json!(["bitaxe/BM1366/0.1.0"]));
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"id": 1, "method": "mining.subscribe", "params": ["bitaxe/BM1366/0.1.0"]})
        );
    }
}
