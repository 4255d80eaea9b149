//! External term format encoder.
//!
//! ```text
//! object  -> LIST_EXT [SMALL_TUPLE_EXT(2) BINARY_EXT(key) term]* NIL_EXT
//! array   -> LIST_EXT term* NIL_EXT, or NIL_EXT when empty
//! string  -> BINARY_EXT
//! bool    -> ATOM_EXT "true" | "false"
//! null    -> ATOM_EXT "none"
//! integer -> SMALL_INTEGER_EXT | INTEGER_EXT | SMALL_BIG_EXT | LARGE_BIG_EXT
//! double  -> FLOAT_EXT, 31-byte zero-padded "%.20e"
//! ```
//!
//! Every term starts with the version byte. A compressed term is
//! `131, 80, u32 uncompressed_len, zlib(term)`.

use super::{classify_number, deflate, normalize_level, Numeric};
use crate::error::ProtocolError;
use serde_json::{Map, Value};

pub const FORMAT_VERSION: u8 = 131;
pub const COMPRESSED: u8 = 80;
pub const SMALL_INTEGER_EXT: u8 = 97;
pub const INTEGER_EXT: u8 = 98;
pub const FLOAT_EXT: u8 = 99;
pub const ATOM_EXT: u8 = 100;
pub const SMALL_TUPLE_EXT: u8 = 104;
pub const NIL_EXT: u8 = 106;
pub const LIST_EXT: u8 = 108;
pub const BINARY_EXT: u8 = 109;
pub const SMALL_BIG_EXT: u8 = 110;
pub const LARGE_BIG_EXT: u8 = 111;

const FLOAT_TEXT_LEN: usize = 31;

/// Encodes a value as an external term.
///
/// With `compression_level` set (negative disables it, above 9 means the
/// default), the term is compressed when that makes it strictly smaller.
pub fn term_to_binary(
    value: &Value,
    compression_level: Option<i64>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut term = Vec::with_capacity(64);
    write_term(&mut term, value)?;

    if let Some(level) = compression_level.filter(|l| *l >= 0) {
        let compressed = deflate(&term, normalize_level(level))?;
        if compressed.len() < term.len() {
            let mut out = Vec::with_capacity(compressed.len() + 6);
            out.push(FORMAT_VERSION);
            out.push(COMPRESSED);
            out.extend_from_slice(&len_u32(term.len())?.to_be_bytes());
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }

    let mut out = Vec::with_capacity(term.len() + 1);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&term);
    Ok(out)
}

fn len_u32(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::Encoding("term too large".to_string()))
}

fn write_term(out: &mut Vec<u8>, value: &Value) -> Result<(), ProtocolError> {
    match value {
        Value::Null => write_atom(out, "none"),
        Value::Bool(true) => write_atom(out, "true"),
        Value::Bool(false) => write_atom(out, "false"),
        Value::Number(n) => match classify_number(n) {
            Numeric::Integer(i) => write_integer(out, i),
            Numeric::Float(f) => write_float(out, f),
        },
        Value::String(s) => write_binary(out, s)?,
        Value::Array(items) => write_list(out, items)?,
        Value::Object(map) => write_proplist(out, map)?,
    }
    Ok(())
}

fn write_atom(out: &mut Vec<u8>, name: &str) {
    out.push(ATOM_EXT);
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
}

fn write_binary(out: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    out.push(BINARY_EXT);
    out.extend_from_slice(&len_u32(s.len())?.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_list(out: &mut Vec<u8>, items: &[Value]) -> Result<(), ProtocolError> {
    if items.is_empty() {
        out.push(NIL_EXT);
        return Ok(());
    }
    out.push(LIST_EXT);
    out.extend_from_slice(&len_u32(items.len())?.to_be_bytes());
    for item in items {
        write_term(out, item)?;
    }
    out.push(NIL_EXT);
    Ok(())
}

// Objects always carry the LIST_EXT header, even when empty.
fn write_proplist(out: &mut Vec<u8>, map: &Map<String, Value>) -> Result<(), ProtocolError> {
    out.push(LIST_EXT);
    out.extend_from_slice(&len_u32(map.len())?.to_be_bytes());
    for (key, value) in map {
        out.push(SMALL_TUPLE_EXT);
        out.push(2);
        write_binary(out, key)?;
        write_term(out, value)?;
    }
    out.push(NIL_EXT);
    Ok(())
}

fn write_integer(out: &mut Vec<u8>, value: i128) {
    if (0..=255).contains(&value) {
        out.push(SMALL_INTEGER_EXT);
        out.push(value as u8);
    } else if let Ok(v) = i32::try_from(value) {
        out.push(INTEGER_EXT);
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        let magnitude = value.unsigned_abs().to_le_bytes();
        let digits = magnitude.len() - magnitude.iter().rev().take_while(|b| **b == 0).count();
        let sign = u8::from(value < 0);
        if digits < 256 {
            out.push(SMALL_BIG_EXT);
            out.push(digits as u8);
        } else {
            out.push(LARGE_BIG_EXT);
            out.extend_from_slice(&(digits as u32).to_be_bytes());
        }
        out.push(sign);
        out.extend_from_slice(&magnitude[..digits]);
    }
}

fn write_float(out: &mut Vec<u8>, value: f64) {
    let text = format_scientific(value);
    out.push(FLOAT_EXT);
    let bytes = text.as_bytes();
    let len = bytes.len().min(FLOAT_TEXT_LEN);
    out.extend_from_slice(&bytes[..len]);
    out.extend(std::iter::repeat(0u8).take(FLOAT_TEXT_LEN - len));
}

/// Formats like C's `%.20e`: signed exponent with at least two digits.
fn format_scientific(value: f64) -> String {
    let text = format!("{:.20e}", value);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.unsigned_abs())
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn test_format_scientific_matches_c() {
        assert_eq!(format_scientific(3.14), "3.14000000000000012434e+00");
        assert_eq!(format_scientific(-1.5), "-1.50000000000000000000e+00");
        assert_eq!(format_scientific(0.0), "0.00000000000000000000e+00");
        assert_eq!(format_scientific(1e-300), "1.00000000000000002506e-300");
    }

    #[test]
    fn test_map_golden() {
        assert_eq!(
            term_to_binary(&json!({"a": 1}), None).unwrap(),
            vec![131, 108, 0, 0, 0, 1, 104, 2, 109, 0, 0, 0, 1, 97, 97, 1, 106]
        );
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(term_to_binary(&json!([]), None).unwrap(), vec![131, 106]);
        assert_eq!(
            term_to_binary(&json!({}), None).unwrap(),
            vec![131, 108, 0, 0, 0, 0, 106]
        );
    }

    #[test]
    fn test_integers_golden() {
        assert_eq!(
            term_to_binary(&json!([300, -1, 2147483648i64]), None).unwrap(),
            vec![
                131, 108, 0, 0, 0, 3, 98, 0, 0, 1, 44, 98, 255, 255, 255, 255, 110, 4, 0, 0, 0,
                0, 128, 106
            ]
        );
        assert_eq!(term_to_binary(&json!(255), None).unwrap(), vec![131, 97, 255]);
    }

    #[test]
    fn test_negative_big_integer_sets_sign() {
        assert_eq!(
            term_to_binary(&json!(-1099511627776i64), None).unwrap(),
            vec![131, 110, 6, 1, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_atoms() {
        assert_eq!(
            term_to_binary(&json!(true), None).unwrap(),
            vec![131, 100, 0, 4, b't', b'r', b'u', b'e']
        );
        assert_eq!(
            term_to_binary(&json!(null), None).unwrap(),
            vec![131, 100, 0, 4, b'n', b'o', b'n', b'e']
        );
    }

    #[test]
    fn test_float_golden() {
        let bytes = term_to_binary(&json!(1.5), None).unwrap();
        assert_eq!(bytes.len(), 1 + 1 + 31);
        assert_eq!(bytes[1], FLOAT_EXT);
        assert_eq!(&bytes[2..28], b"1.50000000000000000000e+00");
        assert!(bytes[28..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_compression_used_when_smaller() {
        let value = json!({"payload": "x".repeat(1000)});
        let plain = term_to_binary(&value, None).unwrap();
        let packed = term_to_binary(&value, Some(6)).unwrap();
        assert_eq!(&packed[..2], &[FORMAT_VERSION, COMPRESSED]);
        let len = u32::from_be_bytes([packed[2], packed[3], packed[4], packed[5]]) as usize;
        assert_eq!(len, plain.len() - 1);

        let mut inflated = Vec::new();
        ZlibDecoder::new(&packed[6..])
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, plain[1..].to_vec());
    }

    #[test]
    fn test_compression_skipped_when_not_smaller() {
        let value = json!(7);
        assert_eq!(term_to_binary(&value, Some(9)).unwrap(), vec![131, 97, 7]);
        assert_eq!(term_to_binary(&value, Some(-1)).unwrap(), vec![131, 97, 7]);
    }

    #[test]
    fn test_encoding_is_byte_stable() {
        let value = json!({"q": "select", "opts": {"async": 1}, "list": [1.25, false]});
        assert_eq!(
            term_to_binary(&value, Some(6)).unwrap(),
            term_to_binary(&value, Some(6)).unwrap()
        );
    }
}
