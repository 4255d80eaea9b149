//! BSON document encoding.
//!
//! JSON trees are converted to [`Document`]s with integers narrowed to
//! int32 when they fit, else int64, else double, and serialized by the
//! `bson` crate. Arrays are written as documents keyed "0", "1", ...

use super::{classify_number, Numeric};
use crate::error::ProtocolError;
use ::bson::{Bson, Document};
use serde_json::{Map, Value};

/// Encodes a JSON object as a BSON document.
pub fn to_bson(value: &Value) -> Result<Vec<u8>, ProtocolError> {
    let map = match value {
        Value::Object(map) => map,
        _ => {
            return Err(ProtocolError::Encoding(
                "top-level BSON value must be a document".to_string(),
            ))
        }
    };

    let doc = to_document(map)?;
    let mut out = Vec::with_capacity(64);
    doc.to_writer(&mut out)
        .map_err(|e| ProtocolError::Encoding(format!("BSON serialization failed: {}", e)))?;
    Ok(out)
}

fn to_document(map: &Map<String, Value>) -> Result<Document, ProtocolError> {
    let mut doc = Document::new();
    for (key, value) in map {
        if key.contains('\0') {
            return Err(ProtocolError::Encoding(format!(
                "BSON key contains NUL: {:?}",
                key
            )));
        }
        doc.insert(key.clone(), to_bson_value(value)?);
    }
    Ok(doc)
}

fn to_bson_value(value: &Value) -> Result<Bson, ProtocolError> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match classify_number(n) {
            Numeric::Integer(i) => {
                if let Ok(v) = i32::try_from(i) {
                    Bson::Int32(v)
                } else if let Ok(v) = i64::try_from(i) {
                    Bson::Int64(v)
                } else {
                    Bson::Double(i as f64)
                }
            }
            Numeric::Float(f) => Bson::Double(f),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .map(to_bson_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => Bson::Document(to_document(map)?),
    })
}
