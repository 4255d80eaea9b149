//! Response envelope parsing.
//!
//! ```json
//! {"result": ...}
//! {"error": {"code": 4000, "message": "...", "details": ...}}
//! {"error": {"message": "the job is postponed", "details": {"uuid": "..."}}}
//! ```

use crate::error::{ErrorCode, ProtocolError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Message marking a job whose result will be stored for later retrieval.
pub const POSTPONED_MESSAGE: &str = "the job is postponed";

/// Message of the auth-expired error.
pub const AUTH_ERROR_MESSAGE: &str = "authorization error";

/// Classified response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Postponed {
        uuid: String,
    },
    ServerError {
        code: i64,
        message: String,
        details: Option<Value>,
    },
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// Known error code, if this is a server error with a listed code.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::ServerError { code, .. } => ErrorCode::from_code(*code),
            _ => None,
        }
    }
}

/// A decoded response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    body: Map<String, Value>,
}

impl Response {
    /// Parses JSON text. The top-level value must be an object.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_value(serde_json::from_str(text.trim())?)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Object(body) => Ok(Self { body }),
            _ => Err(ProtocolError::NotAnObject),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// True iff the envelope has no `error` field.
    pub fn is_ok(&self) -> bool {
        !self.body.contains_key("error")
    }

    fn error(&self) -> Option<&Map<String, Value>> {
        self.body.get("error").and_then(Value::as_object)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
    }

    /// Error code, defaulting to 9000 when the error carries none.
    pub fn error_code(&self) -> Option<i64> {
        if self.is_ok() {
            return None;
        }
        Some(
            self.error()
                .and_then(|e| e.get("code"))
                .and_then(Value::as_i64)
                .unwrap_or(ErrorCode::DEFAULT),
        )
    }

    fn postponed_uuid(&self) -> Option<String> {
        let error = self.error()?;
        if error.get("message").and_then(Value::as_str) != Some(POSTPONED_MESSAGE) {
            return None;
        }
        error
            .get("details")
            .and_then(|d| d.get("uuid"))
            .and_then(value_to_string)
    }

    pub fn outcome(&self) -> Outcome {
        if let Some(uuid) = self.postponed_uuid() {
            return Outcome::Postponed { uuid };
        }
        if !self.is_ok() {
            let error = self.error();
            return Outcome::ServerError {
                code: self.error_code().unwrap_or(ErrorCode::DEFAULT),
                message: self.error_message().unwrap_or_default().to_string(),
                details: error.and_then(|e| e.get("details")).cloned(),
            };
        }
        Outcome::Ok(self.body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Whether this is the auth-expired error that triggers a token refresh.
    pub fn is_auth_error(&self) -> bool {
        self.error_code() == Some(ErrorCode::AuthPerm.code())
            && self
                .error_message()
                .map(|m| m.eq_ignore_ascii_case(AUTH_ERROR_MESSAGE))
                .unwrap_or(false)
    }

    /// Postponed job uuid, or `result.uuid` on success.
    pub fn uuid(&self) -> Option<String> {
        if !self.is_ok() {
            return self.postponed_uuid();
        }
        self.body
            .get("result")
            .and_then(|r| r.get("uuid"))
            .and_then(value_to_string)
    }

    pub fn result(&self) -> Option<&Value> {
        self.body.get("result")
    }

    fn result_object(&self) -> Result<&Map<String, Value>, ProtocolError> {
        self.result()
            .ok_or(ProtocolError::MissingResult)?
            .as_object()
            .ok_or_else(|| ProtocolError::field_type("result", "an object"))
    }

    fn field(&self, name: &str) -> Result<&Value, ProtocolError> {
        self.result_object()?
            .get(name)
            .ok_or_else(|| ProtocolError::MissingField(name.to_string()))
    }

    pub fn string_field(&self, name: &str) -> Result<&str, ProtocolError> {
        self.field(name)?
            .as_str()
            .ok_or_else(|| ProtocolError::field_type(name, "a string"))
    }

    pub fn int_field(&self, name: &str) -> Result<i64, ProtocolError> {
        self.field(name)?
            .as_i64()
            .ok_or_else(|| ProtocolError::field_type(name, "an integer"))
    }

    pub fn double_field(&self, name: &str) -> Result<f64, ProtocolError> {
        self.field(name)?
            .as_f64()
            .ok_or_else(|| ProtocolError::field_type(name, "a number"))
    }

    pub fn list_field(&self, name: &str) -> Result<Vec<String>, ProtocolError> {
        self.field(name)?
            .as_array()
            .ok_or_else(|| ProtocolError::field_type(name, "an array"))?
            .iter()
            .map(|v| value_to_string(v).ok_or_else(|| ProtocolError::field_type(name, "a list of strings")))
            .collect()
    }

    // Admin responses

    pub fn key(&self) -> Result<&str, ProtocolError> {
        self.string_field("key")
    }

    pub fn secret_key(&self) -> Result<&str, ProtocolError> {
        self.string_field("secret_key")
    }

    pub fn user(&self) -> Result<&str, ProtocolError> {
        self.string_field("user")
    }

    pub fn app_keys(&self) -> Result<Vec<String>, ProtocolError> {
        self.list_field("app_keys")
    }

    pub fn status(&self) -> Result<i64, ProtocolError> {
        self.int_field("status")
    }

    /// Decodes `result.data` into time-series blocks.
    pub fn events_data(&self) -> Result<Vec<EventsData>, ProtocolError> {
        let data = self
            .field("data")?
            .as_array()
            .ok_or_else(|| ProtocolError::field_type("data", "an array"))?;
        data.iter().map(EventsData::from_value).collect()
    }
}

/// Strings are returned as-is; numbers are rendered.
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One block of `result.data`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsData {
    pub unit: String,
    pub unit_step: i64,
    /// sensor id -> timestamp -> value
    pub sensors: BTreeMap<String, BTreeMap<i64, Value>>,
}

impl EventsData {
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let block = value
            .as_object()
            .ok_or_else(|| ProtocolError::field_type("data[]", "an object"))?;

        let unit = block
            .get("unit")
            .ok_or_else(|| ProtocolError::MissingField("unit".to_string()))?
            .as_str()
            .ok_or_else(|| ProtocolError::field_type("unit", "a string"))?
            .to_string();
        let unit_step = block
            .get("unit_step")
            .ok_or_else(|| ProtocolError::MissingField("unit_step".to_string()))?
            .as_i64()
            .ok_or_else(|| ProtocolError::field_type("unit_step", "an integer"))?;
        let values = block
            .get("values")
            .ok_or_else(|| ProtocolError::MissingField("values".to_string()))?
            .as_object()
            .ok_or_else(|| ProtocolError::field_type("values", "an object"))?;

        let mut sensors = BTreeMap::new();
        for (sensor, points) in values {
            let points = points
                .as_object()
                .ok_or_else(|| ProtocolError::field_type(sensor.as_str(), "an object"))?;
            let mut series = BTreeMap::new();
            for (ts, v) in points {
                let ts: i64 = ts
                    .parse()
                    .map_err(|_| ProtocolError::field_type(ts.as_str(), "an integer timestamp"))?;
                series.insert(ts, v.clone());
            }
            sensors.insert(sensor.clone(), series);
        }

        Ok(Self {
            unit,
            unit_step,
            sensors,
        })
    }
}
