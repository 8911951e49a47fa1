//! Canonical JSON encoding used for webhook signatures

use serde_json::Value;

use crate::error::Result;

/// Serialize a JSON value into its canonical signing form.
///
/// Object keys are sorted lexicographically (by UTF-8 bytes) at every
/// nesting level and no whitespace is emitted. Strings and numbers use
/// `serde_json`'s compact encoding. Both the issuer and this receiver must
/// sign exactly these bytes.
///
/// Keys are sorted here rather than relying on the map type, so the output
/// does not change if some dependency turns on `serde_json/preserve_order`.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

/// Parse raw bytes and return the value together with its canonical form
pub fn canonicalize_bytes(raw: &[u8]) -> Result<(Value, Vec<u8>)> {
    let value: Value = serde_json::from_slice(raw)?;
    let canonical = canonical_json(&value)?;
    Ok((value, canonical))
}
