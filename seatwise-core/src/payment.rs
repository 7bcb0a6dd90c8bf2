use serde::Serialize;
use serde_json::Value;

/// Canonical internal payment event. Provider payloads are loosely typed and
/// vary in field naming and placement; the adapter below flattens them into
/// this one shape before any business logic sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentEvent {
    /// Provider order identifier, normalized to a string. Matched against the
    /// draft's stored payment_intent_id.
    pub order_code: String,
    pub kind: PaymentEventKind,
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Cancelled,
    Expired,
}

impl PaymentEventKind {
    pub fn is_terminal_failure(self) -> bool {
        !matches!(self, Self::Succeeded)
    }
}

/// Map a raw provider payload to the canonical event. Returns None when no
/// order identifier can be found; the handler acknowledges such payloads
/// without mutation to avoid retry storms.
pub fn normalize(payload: &Value) -> Option<PaymentEvent> {
    let data = payload.get("data").filter(|d| d.is_object()).unwrap_or(payload);

    let order_code = extract_order_code(data).or_else(|| extract_order_code(payload))?;

    let kind = classify(payload, data);
    let amount = data.get("amount").and_then(Value::as_i64);
    let currency = data
        .get("currency")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Some(PaymentEvent {
        order_code,
        kind,
        amount,
        currency,
    })
}

fn extract_order_code(obj: &Value) -> Option<String> {
    for field in ["orderCode", "order_code", "orderId", "order_id"] {
        match obj.get(field) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn classify(payload: &Value, data: &Value) -> PaymentEventKind {
    // Explicit status strings win over the success flag.
    if let Some(status) = data
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
    {
        match status.as_str() {
            "paid" | "succeeded" | "success" | "completed" => {
                return PaymentEventKind::Succeeded
            }
            "cancelled" | "canceled" => return PaymentEventKind::Cancelled,
            "expired" => return PaymentEventKind::Expired,
            "failed" | "error" => return PaymentEventKind::Failed,
            _ => {}
        }
    }

    let success_flag = payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let code_ok = data
        .get("code")
        .map(|c| match c {
            Value::String(s) => s == "00",
            Value::Number(n) => n.as_i64() == Some(0),
            _ => false,
        })
        // Some providers omit the result code entirely on success payloads.
        .unwrap_or(true);

    if success_flag && code_ok {
        PaymentEventKind::Succeeded
    } else {
        PaymentEventKind::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_nested_numeric_order_code() {
        let payload = json!({
            "success": true,
            "data": { "orderCode": 240915123456u64, "code": "00", "amount": 150000 }
        });
        let event = normalize(&payload).unwrap();
        assert_eq!(event.order_code, "240915123456");
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(event.amount, Some(150000));
    }

    #[test]
    fn accepts_string_order_code_at_top_level() {
        let payload = json!({ "success": true, "order_code": "abc-123" });
        let event = normalize(&payload).unwrap();
        assert_eq!(event.order_code, "abc-123");
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
    }

    #[test]
    fn status_string_overrides_success_flag() {
        let payload = json!({
            "success": true,
            "data": { "orderCode": 7, "status": "CANCELLED" }
        });
        assert_eq!(
            normalize(&payload).unwrap().kind,
            PaymentEventKind::Cancelled
        );
    }

    #[test]
    fn non_success_code_is_a_failure() {
        let payload = json!({
            "success": true,
            "data": { "orderCode": 7, "code": "01" }
        });
        assert_eq!(normalize(&payload).unwrap().kind, PaymentEventKind::Failed);
    }

    #[test]
    fn missing_order_code_yields_none() {
        let payload = json!({ "success": true, "data": { "code": "00" } });
        assert!(normalize(&payload).is_none());
    }

    #[test]
    fn expired_status_maps_to_expired() {
        let payload = json!({ "data": { "orderId": "55", "status": "expired" } });
        assert_eq!(normalize(&payload).unwrap().kind, PaymentEventKind::Expired);
    }
}
