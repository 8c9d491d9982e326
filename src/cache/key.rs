//! Deterministic cache keys.
//!
//! Keys are `"{operation}:{sha256}"` where the digest covers the operation
//! name, the positional arguments and the options bag rendered as canonical
//! JSON (object keys sorted at every depth). The rendering does not depend
//! on serde_json's map ordering, so permuting option keys never changes the
//! key, and the digest is stable across processes.

use std::fmt::Write as _;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute the cache key for an operation call.
pub fn cache_key(operation: &str, args: &[Value], options: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);

    let mut buf = String::new();
    buf.push('[');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        write_canonical(arg, &mut buf);
    }
    buf.push(']');
    hasher.update(buf.as_bytes());
    hasher.update([0u8]);

    buf.clear();
    write_canonical_map(options, &mut buf);
    hasher.update(buf.as_bytes());

    format!("{operation}:{:x}", hasher.finalize())
}

/// Render `value` as JSON with object keys sorted.
pub fn canonical_json(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &Value, buf: &mut String) {
    match value {
        Value::Object(map) => write_canonical_map(map, buf),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf);
            }
            buf.push(']');
        }
        scalar => {
            // Scalars serialise infallibly; Display on Value is compact JSON.
            let _ = write!(buf, "{scalar}");
        }
    }
}

fn write_canonical_map(map: &Map<String, Value>, buf: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    buf.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        let _ = write!(buf, "{}:", Value::String(key.clone()));
        write_canonical(&map[key], buf);
    }
    buf.push('}');
}
