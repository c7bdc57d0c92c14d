//! Hash computation and replay for the tamper-evident audit logs.
//!
//! Every chained entry stores the previous tail hash and its own hash:
//!
//! ```text
//! hash = hex(HMAC-SHA256(secret, prev_hash_or_empty || 0x00 || canonical_json(fields)))
//! ```
//!
//! where the fields are `action`, `actor`, `subject`, `payload` and `created_at` (RFC 3339, millisecond precision).
//! Canonical JSON sorts object keys at every depth and carries no whitespace, so a logical entry always hashes to the
//! same value no matter how its payload was assembled.
//!
//! Appending is done by [`crate::spe_api::AuditApi`]; this module only holds the pure parts.
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::{
    db_types::{AuditChain, AuditEntry},
    spe_api::AuditError,
};

type HmacSha256 = Hmac<Sha256>;

/// Serializes `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// The timestamp format that goes into the hash. Entries are stored truncated to the same precision.
pub fn hash_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The canonical serialization of an entry's business fields.
pub fn canonical_fields(action: &str, actor: &str, subject: &str, payload: &Value, created_at: &DateTime<Utc>) -> String {
    canonical_json(&json!({
        "action": action,
        "actor": actor,
        "subject": subject,
        "payload": payload,
        "created_at": hash_timestamp(created_at),
    }))
}

pub fn compute_entry_hash(secret: &[u8], prev_hash: Option<&str>, canonical: &str) -> Result<String, AuditError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| AuditError::InvalidSecret(e.to_string()))?;
    mac.update(prev_hash.unwrap_or_default().as_bytes());
    mac.update(b"\x00");
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The result of a clean replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub chain: AuditChain,
    /// Total entries in the log
    pub entries: usize,
    /// Entries whose hash was recomputed and matched
    pub verified: usize,
    /// Entries written while chaining was switched off
    pub unchained: usize,
    /// The hash of the last chained entry
    pub tail_hash: Option<String>,
}

/// Replays `entries` (in insertion order) and recomputes every hash.
///
/// Stops at the first entry that does not line up and reports its position. Nothing is ever repaired.
pub fn verify_entries(chain: AuditChain, entries: &[AuditEntry], secret: &[u8]) -> Result<ChainReport, AuditError> {
    let mut report =
        ChainReport { chain, entries: entries.len(), verified: 0, unchained: 0, tail_hash: None };
    for (index, entry) in entries.iter().enumerate() {
        let mismatch = |reason: &str| AuditError::ChainMismatch {
            chain,
            index,
            entry_id: entry.id,
            reason: reason.to_string(),
        };
        let stored_hash = match (&entry.prev_hash, &entry.hash) {
            (None, None) => {
                report.unchained += 1;
                continue;
            },
            (_, None) => return Err(mismatch("entry has a previous hash but no hash of its own")),
            (_, Some(hash)) => hash,
        };
        if entry.prev_hash != report.tail_hash {
            return Err(mismatch("previous hash does not match the preceding chained entry"));
        }
        let payload = serde_json::from_str::<Value>(&entry.payload).map_err(|_| mismatch("payload is not valid JSON"))?;
        let canonical = canonical_fields(&entry.action, &entry.actor, &entry.subject, &payload, &entry.created_at);
        let expected = compute_entry_hash(secret, entry.prev_hash.as_deref(), &canonical)?;
        if &expected != stored_hash {
            return Err(mismatch("stored hash does not match the entry contents"));
        }
        report.verified += 1;
        report.tail_hash = Some(expected);
    }
    Ok(report)
}

/// Checks that the replayed entries reach the tail recorded in the chain state.
///
/// Removing the newest entries leaves a chain that replays cleanly, so the recorded tail is the only witness. The
/// state must be read before the entries: an append racing with verification then only adds entries after the
/// recorded tail, which still passes.
pub fn verify_tail(chain: AuditChain, entries: &[AuditEntry], recorded_tail: Option<&str>) -> Result<(), AuditError> {
    let Some(tail) = recorded_tail else {
        return Ok(());
    };
    if entries.iter().any(|e| e.hash.as_deref() == Some(tail)) {
        return Ok(());
    }
    Err(AuditError::ChainMismatch {
        chain,
        index: entries.len(),
        entry_id: entries.last().map(|e| e.id).unwrap_or_default(),
        reason: format!("the recorded chain tail {tail} is missing from the log"),
    })
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    const SECRET: &[u8] = b"audit-secret";

    fn chained(id: i64, prev: Option<String>, action: &str, payload: Value, secs: i64) -> AuditEntry {
        let created_at = Utc.timestamp_opt(1_772_366_400 + secs, 0).unwrap();
        let canonical = canonical_fields(action, "admin:7", "order:1", &payload, &created_at);
        let hash = compute_entry_hash(SECRET, prev.as_deref(), &canonical).unwrap();
        AuditEntry {
            id,
            action: action.into(),
            actor: "admin:7".into(),
            subject: "order:1".into(),
            payload: canonical_json(&payload),
            created_at,
            prev_hash: prev,
            hash: Some(hash),
        }
    }

    fn three_entries() -> Vec<AuditEntry> {
        let a = chained(1, None, "price_changed", json!({"from": "9.99", "to": "12.50"}), 0);
        let b = chained(2, a.hash.clone(), "stock_adjusted", json!({"delta": -3}), 1);
        let c = chained(3, b.hash.clone(), "product_hidden", json!({"reason": null}), 2);
        vec![a, b, c]
    }

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let a = json!({"b": 1, "a": {"z": [3, {"y": true, "x": "s"}], "c": null}});
        assert_eq!(canonical_json(&a), r#"{"a":{"c":null,"z":[3,{"x":"s","y":true}]},"b":1}"#);
        let b: Value = serde_json::from_str(r#"{ "a" : { "z":[3,{"x":"s","y":true}], "c":null }, "b":1 }"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn hash_depends_on_previous_hash_and_secret() {
        let canonical = canonical_fields("a", "b", "c", &json!({}), &Utc.timestamp_opt(0, 0).unwrap());
        let first = compute_entry_hash(SECRET, None, &canonical).unwrap();
        assert_eq!(first, compute_entry_hash(SECRET, Some(""), &canonical).unwrap());
        assert_eq!(first.len(), 64);
        assert_ne!(first, compute_entry_hash(SECRET, Some(&first), &canonical).unwrap());
        assert_ne!(first, compute_entry_hash(b"other", None, &canonical).unwrap());
    }

    #[test]
    fn replay_reproduces_every_hash() {
        let entries = three_entries();
        let report = verify_entries(AuditChain::Product, &entries, SECRET).unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.verified, 3);
        assert_eq!(report.tail_hash, entries[2].hash);
    }

    #[test]
    fn tampered_field_is_reported_at_its_index() {
        let mut entries = three_entries();
        entries[1].payload = r#"{"delta":-30}"#.into();
        let err = verify_entries(AuditChain::Product, &entries, SECRET).unwrap_err();
        assert!(matches!(err, AuditError::ChainMismatch { index: 1, entry_id: 2, .. }), "{err}");
    }

    #[test]
    fn removed_entry_breaks_the_link() {
        let mut entries = three_entries();
        entries.remove(1);
        let err = verify_entries(AuditChain::Product, &entries, SECRET).unwrap_err();
        assert!(matches!(err, AuditError::ChainMismatch { index: 1, entry_id: 3, .. }));
    }

    #[test]
    fn truncated_tail_is_reported_past_the_last_entry() {
        let mut entries = three_entries();
        let tail = entries[2].hash.clone();
        verify_tail(AuditChain::Product, &entries, tail.as_deref()).unwrap();
        // A tail recorded before a later append is still reachable
        verify_tail(AuditChain::Product, &entries, entries[1].hash.as_deref()).unwrap();
        verify_tail(AuditChain::Product, &[], None).unwrap();

        entries.pop();
        verify_entries(AuditChain::Product, &entries, SECRET).unwrap();
        let err = verify_tail(AuditChain::Product, &entries, tail.as_deref()).unwrap_err();
        assert!(matches!(err, AuditError::ChainMismatch { index: 2, entry_id: 2, .. }), "{err}");
        let err = verify_tail(AuditChain::Product, &[], tail.as_deref()).unwrap_err();
        assert!(matches!(err, AuditError::ChainMismatch { index: 0, entry_id: 0, .. }), "{err}");
    }

    #[test]
    fn wrong_secret_fails_at_the_first_entry() {
        let err = verify_entries(AuditChain::Product, &three_entries(), b"guess").unwrap_err();
        assert!(matches!(err, AuditError::ChainMismatch { index: 0, .. }));
    }

    #[test]
    fn unchained_entries_are_skipped() {
        let mut entries = three_entries();
        let plain = AuditEntry { id: 99, prev_hash: None, hash: None, ..entries[0].clone() };
        entries.insert(1, plain);
        let report = verify_entries(AuditChain::Product, &entries, SECRET).unwrap();
        assert_eq!(report.unchained, 1);
        assert_eq!(report.verified, 3);
    }
}
