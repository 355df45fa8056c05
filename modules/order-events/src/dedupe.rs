use sha2::{Digest, Sha256};

/// Compute the dedupe key for an inbound event (§4.1).
///
/// Preferred path: `source` plus an upstream-assigned id produce a stable,
/// human-readable key. Fallback path: hash the canonical `(source, order_id,
/// event_type)` tuple together with a stable hash of the payload, so two
/// deliveries of the same logical event collide even without an upstream id.
pub fn dedupe_key(
    source: &str,
    upstream_id: Option<&str>,
    order_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> String {
    match upstream_id {
        Some(id) if !id.is_empty() => format!("{source}:{id}"),
        _ => {
            let canonical = format!("{source}:{order_id}:{event_type}:{}", stable_hash(payload));
            let mut hasher = Sha256::new();
            hasher.update(canonical.as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

/// Hash a JSON value with object keys sorted, so semantically identical
/// payloads serialized in a different key order hash the same.
pub fn stable_hash(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_source_and_upstream_id() {
        let key = dedupe_key(
            "shopify",
            Some("12345"),
            "o1",
            "orders/create",
            &json!({}),
        );
        assert_eq!(key, "shopify:12345");
    }

    #[test]
    fn falls_back_to_payload_hash_without_upstream_id() {
        let payload = json!({"status": "in_transit", "tracking": "1Z"});
        let key = dedupe_key("courier", None, "o1", "status_update", &payload);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stable_hash_ignores_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn stable_hash_distinguishes_different_payloads() {
        let a = json!({"status": "in_transit"});
        let b = json!({"status": "delivered"});
        assert_ne!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn fallback_key_differs_by_order_and_event_type() {
        let payload = json!({"status": "in_transit"});
        let k1 = dedupe_key("courier", None, "o1", "status_update", &payload);
        let k2 = dedupe_key("courier", None, "o2", "status_update", &payload);
        let k3 = dedupe_key("courier", None, "o1", "cancelled", &payload);
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }
}
