use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies the HMAC-SHA256 signature the payment gateway attaches to webhook
/// deliveries, and mints the order codes we hand the gateway.
///
/// The signed string is the payload's `data` object serialized as
/// `key=value&key=value` with keys in ascending order; nested values are
/// serialized as JSON with their own keys sorted, so both sides agree on one
/// byte sequence regardless of map iteration order.
#[derive(Clone)]
pub struct WebhookVerifier {
    checksum_key: String,
    allow_unsigned: bool,
}

impl WebhookVerifier {
    pub fn new(checksum_key: impl Into<String>, allow_unsigned: bool) -> Self {
        Self {
            checksum_key: checksum_key.into(),
            allow_unsigned,
        }
    }

    /// Check the payload's `signature` (or `sig`) field against the recomputed
    /// digest of its `data` object. Unsigned payloads pass only when the
    /// deployment explicitly opts in.
    pub fn verify(&self, payload: &Value) -> bool {
        let provided = payload
            .get("signature")
            .or_else(|| payload.get("sig"))
            .and_then(Value::as_str);

        let Some(provided) = provided else {
            return self.allow_unsigned;
        };

        let data = match payload.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let expected = self.sign(&data);
        let Ok(provided_bytes) = hex::decode(provided) else {
            return false;
        };
        let Ok(expected_bytes) = hex::decode(&expected) else {
            return false;
        };
        constant_time_eq::constant_time_eq(&provided_bytes, &expected_bytes)
    }

    /// Hex HMAC over the canonical form of `data`. Exposed so tests can forge
    /// valid deliveries.
    pub fn sign(&self, data: &Map<String, Value>) -> String {
        let mut mac = HmacSha256::new_from_slice(self.checksum_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(canonical_string(data).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Timestamp-prefixed numeric order code, unique enough for the gateway's
    /// per-merchant namespace.
    pub fn new_order_code(&self) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(100..1000);
        format!("{}{}", Utc::now().format("%y%m%d%H%M%S"), suffix)
    }
}

fn canonical_string(data: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{}={}", k, canonical_value(&data[k])))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(sorted_json).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(_) => sorted_json(value),
    }
}

/// JSON text with object keys in ascending order at every level.
fn sorted_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        sorted_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(sorted_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("test-checksum-key", false)
    }

    #[test]
    fn signed_payload_verifies() {
        let v = verifier();
        let data = json!({ "orderCode": 123456, "amount": 90000, "code": "00" });
        let sig = v.sign(data.as_object().unwrap());
        let payload = json!({ "data": data, "signature": sig });
        assert!(v.verify(&payload));
    }

    #[test]
    fn tampered_amount_fails() {
        let v = verifier();
        let data = json!({ "orderCode": 123456, "amount": 90000 });
        let sig = v.sign(data.as_object().unwrap());
        let payload = json!({
            "data": { "orderCode": 123456, "amount": 1 },
            "signature": sig
        });
        assert!(!v.verify(&payload));
    }

    #[test]
    fn signature_is_insertion_order_independent() {
        let v = verifier();
        let a: Map<String, Value> = serde_json::from_str(r#"{"b":"2","a":"1"}"#).unwrap();
        let b: Map<String, Value> = serde_json::from_str(r#"{"a":"1","b":"2"}"#).unwrap();
        assert_eq!(v.sign(&a), v.sign(&b));
    }

    #[test]
    fn unsigned_payload_rejected_unless_opted_in() {
        let payload = json!({ "data": { "orderCode": 1 } });
        assert!(!verifier().verify(&payload));
        assert!(WebhookVerifier::new("k", true).verify(&payload));
    }

    #[test]
    fn garbage_signature_fails_cleanly() {
        let payload = json!({ "data": { "orderCode": 1 }, "signature": "zz-not-hex" });
        assert!(!verifier().verify(&payload));
    }

    #[test]
    fn order_codes_are_numeric() {
        let code = verifier().new_order_code();
        assert!(code.len() >= 15);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
