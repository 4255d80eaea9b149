//! Request envelopes and routing.
//!
//! An outbound JSON envelope looks like:
//!
//! ```json
//! {"method": "setData", "context": "events", "key": "<app key>", "params": [...], "opts": {"async": 1}}
//! ```
//!
//! The method name decides the URL path, content type, api method used in
//! the signature and which key signs the request. Query-style calls do not
//! send an envelope; their body is a form-encoded string.

use crate::codec::{CONTENT_TYPE_FORM, CONTENT_TYPE_JSON};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use url::form_urlencoded;

pub const METHOD_SET_DATA: &str = "setData";
pub const METHOD_PING: &str = "ping";
pub const METHOD_QL: &str = "ql";
pub const METHOD_QL2: &str = "ql2";
pub const METHOD_RESULTS: &str = "results";
pub const METHOD_WS: &str = "ws";
pub const METHOD_GET_RESULTS: &str = "getResults";
pub const METHOD_QUERY_FRAME: &str = "q";

/// Methods routed to the admin endpoint and signed with the admin key.
pub const ADMIN_METHODS: &[&str] = &[
    "newApiKey",
    "assureApiKey",
    "deleteApiKey",
    "newAdminKey",
    "assureAdminKey",
    "deleteAdminKey",
];

/// Methods routed to the ingestion endpoints.
pub const DATA_METHODS: &[&str] = &[METHOD_SET_DATA, METHOD_PING];

/// Optional KML upload parameters, in the order they are sent.
pub const KML_PARAMS: &[&str] = &[
    "id", "alias_tag", "ns", "val", "base64", "ms_attr", "ms_tag", "val_tag",
];

pub const PATH_INGEST: &str = "api/v1/ingest";
pub const PATH_INGEST_KML: &str = "api/v1/ingest/kml";
pub const PATH_ADMIN: &str = "api/v1/admin";
pub const PATH_QL: &str = "api/v1/ql";
pub const PATH_QL2: &str = "api/v1/ql?v=2";
pub const PATH_RESULT: &str = "api/v1/result";
pub const PATH_WS: &str = "api/v1/ws";

/// Wire "context" tag of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    #[default]
    Events,
    #[serde(rename = "result")]
    Results,
    Kml,
    GeoEvents,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Events => "events",
            Context::Results => "result",
            Context::Kml => "kml",
            Context::GeoEvents => "geo_events",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adminkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Value>,
}

impl Envelope {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            context: None,
            key: None,
            params: None,
            adminkey: None,
            opts: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_admin_key(mut self, key: impl Into<String>) -> Self {
        self.adminkey = Some(key.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_opts(mut self, opts: Map<String, Value>) -> Self {
        self.opts = Some(Value::Object(opts));
        self
    }

    /// Sets `opts.async` to 1 or 0, creating `opts` if needed.
    pub fn with_async(mut self, async_mode: Option<bool>) -> Self {
        if let Some(flag) = async_mode {
            let mut opts = match self.opts.take() {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            opts.insert("async".to_string(), Value::from(u8::from(flag)));
            self.opts = Some(Value::Object(opts));
        }
        self
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Which credential signs a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKey {
    /// The application key, or the admin key when no application key is set.
    AppOrAdmin,
    /// Always the admin key.
    Admin,
}

/// Endpoint parameters for one api method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub content_type: &'static str,
    /// Api method bound into the signature.
    pub api_method: String,
    pub signing_key: SigningKey,
}

impl Route {
    /// Resolves method and context to an endpoint.
    pub fn resolve(method: &str, context: Context, app_key: &str) -> Self {
        if DATA_METHODS.contains(&method) {
            let path = match context {
                Context::Kml => PATH_INGEST_KML.to_string(),
                Context::GeoEvents => format!("{}/{}", PATH_INGEST, form_encode(app_key)),
                _ => PATH_INGEST.to_string(),
            };
            return Self {
                path,
                content_type: CONTENT_TYPE_JSON,
                api_method: method.to_string(),
                signing_key: SigningKey::AppOrAdmin,
            };
        }

        if ADMIN_METHODS.contains(&method) {
            return Self {
                path: PATH_ADMIN.to_string(),
                content_type: CONTENT_TYPE_JSON,
                api_method: method.to_string(),
                signing_key: SigningKey::Admin,
            };
        }

        let (path, api_method) = match method {
            METHOD_RESULTS => (PATH_RESULT, METHOD_QL),
            METHOD_QL2 => (PATH_QL2, METHOD_QL),
            other => (PATH_QL, other),
        };
        Self {
            path: path.to_string(),
            content_type: CONTENT_TYPE_FORM,
            api_method: api_method.to_string(),
            signing_key: SigningKey::AppOrAdmin,
        }
    }

    /// Whether the payload codec applies to this route.
    pub fn is_ingestion(&self) -> bool {
        self.path == PATH_INGEST
    }
}

fn form_encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Builds `name=value&...` with form-encoded values, keeping field order.
#[derive(Debug, Default, Clone)]
pub struct FormBody {
    fields: Vec<(String, String)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.fields
            .push((name.to_string(), form_encode(value.as_ref())));
        self
    }

    pub fn finish(self) -> String {
        self.fields
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Query language request body.
pub fn query_form(script: &str, app_key: &str, admin_key: &str, stream: bool, async_mode: bool) -> String {
    let mut form = FormBody::new()
        .field("q", script)
        .field("key", app_key)
        .field("adm", admin_key)
        .field("stream", if stream { "1" } else { "0" });
    if async_mode {
        form = form.field("async", "1");
    }
    form.finish()
}

/// Stored-result retrieval body. An empty uuid asks for diagnostic messages.
pub fn stored_form(uuid: &str, key: &str) -> String {
    FormBody::new().field("uuid", uuid).field("key", key).finish()
}

/// KML upload body: known default parameters first, then content and key.
pub fn kml_form<'a, I>(defaults: I, content: &str, app_key: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let defaults: Vec<(&str, &str)> = defaults.into_iter().collect();
    let mut form = FormBody::new();
    for name in KML_PARAMS {
        if let Some((_, value)) = defaults.iter().find(|(k, _)| k == name) {
            form = form.field(name, value);
        }
    }
    form.field("q", content).field("key", app_key).finish()
}
