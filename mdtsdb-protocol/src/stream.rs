//! Multi-frame (streamed) response parsing.
//!
//! A streamed body is a sequence of JSON envelopes separated by
//! [`FRAME_DELIMITER`]. Each frame is parsed as a [`Response`]; the frames
//! can be classified as a whole and their time-series values merged.

use crate::error::ProtocolError;
use crate::response::{Outcome, Response};
use crate::FRAME_DELIMITER;
use serde_json::{Map, Value};

/// Combined classification of a stream.
///
/// Errors take precedence over postponed jobs, which take precedence over
/// successful frames.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Errors(Vec<String>),
    Postponed(Vec<String>),
    Ok(Vec<Response>),
}

/// Parsed frames of a streamed response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamResponse {
    frames: Vec<Response>,
}

impl StreamResponse {
    /// Splits on [`FRAME_DELIMITER`] and parses each non-empty frame.
    ///
    /// A body without any frame is a [`ProtocolError::EmptyStream`] error.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        Self::parse_with_delimiter(body, FRAME_DELIMITER)
    }

    pub fn parse_with_delimiter(body: &str, delimiter: &str) -> Result<Self, ProtocolError> {
        let frames = body
            .split(delimiter)
            .map(str::trim)
            .filter(|frame| !frame.is_empty())
            .map(Response::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if frames.is_empty() {
            return Err(ProtocolError::EmptyStream);
        }
        tracing::debug!("parsed stream body: {} frames", frames.len());
        Ok(Self { frames })
    }

    pub fn from_frames(frames: Vec<Response>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Response] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&Response> {
        self.frames.get(index)
    }

    /// Error messages in frame order.
    pub fn errors(&self) -> impl Iterator<Item = &str> + '_ {
        self.frames.iter().filter_map(Response::error_message)
    }

    pub fn classify_all(&self) -> StreamOutcome {
        let mut errors = Vec::new();
        let mut postponed = Vec::new();
        let mut ok = Vec::new();

        for frame in &self.frames {
            match frame.outcome() {
                Outcome::Postponed { uuid } => postponed.push(uuid),
                Outcome::ServerError { message, .. } => errors.push(message),
                Outcome::Ok(_) => ok.push(frame.clone()),
            }
        }

        if !errors.is_empty() {
            StreamOutcome::Errors(errors)
        } else if !postponed.is_empty() {
            StreamOutcome::Postponed(postponed)
        } else {
            StreamOutcome::Ok(ok)
        }
    }

    /// Merges the first data block's `values` of every successful frame.
    ///
    /// Objects are merged recursively with later scalars winning, arrays
    /// are concatenated. Returns an empty object when the stream is not
    /// entirely successful or carries no values.
    pub fn merge_values(&self) -> Map<String, Value> {
        if self.frames.len() == 1 {
            return first_values(&self.frames[0]).cloned().unwrap_or_default();
        }

        let ok = match self.classify_all() {
            StreamOutcome::Ok(frames) => frames,
            _ => return Map::new(),
        };

        let mut merged = Map::new();
        for frame in &ok {
            if let Some(values) = first_values(frame) {
                merge_object(&mut merged, values);
            }
        }
        merged
    }
}

/// `values` of the first data block, read from `result.data` or `data`.
fn first_values(frame: &Response) -> Option<&Map<String, Value>> {
    let body = frame.as_map();
    let data = body
        .get("result")
        .and_then(|r| r.get("data"))
        .or_else(|| body.get("data"))?;
    data.get(0)?.get("values")?.as_object()
}

fn merge_object(into: &mut Map<String, Value>, from: &Map<String, Value>) {
    for (key, value) in from {
        match into.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                into.insert(key.clone(), value.clone());
            }
        }
    }
}

fn merge_value(into: &mut Value, from: &Value) {
    match (into, from) {
        (Value::Object(a), Value::Object(b)) => merge_object(a, b),
        (Value::Array(a), Value::Array(b)) => a.extend(b.iter().cloned()),
        (slot, v) => *slot = v.clone(),
    }
}
