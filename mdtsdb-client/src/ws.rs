//! WebSocket helpers.
//!
//! The client does not own a WebSocket connection. These helpers produce the
//! pieces a caller needs to drive one with any WebSocket library: the target
//! URL, the signed `Authorization` header for the upgrade request, and the
//! JSON (or external term) frames.

use crate::config::EndpointConfig;
use crate::credentials::Credentials;
use crate::error::ClientError;
use mdtsdb_protocol::codec::term::term_to_binary;
use mdtsdb_protocol::envelope::{
    KML_PARAMS, METHOD_GET_RESULTS, METHOD_PING, METHOD_QUERY_FRAME, METHOD_SET_DATA, METHOD_WS,
    PATH_WS,
};
use mdtsdb_protocol::{Context, Envelope, SigningKey, StreamResponse};
use serde_json::{json, Map, Value};
use url::form_urlencoded;

fn form_encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn async_suffix(separator: char, async_mode: Option<bool>) -> String {
    match async_mode {
        Some(flag) => format!("{}async={}", separator, flag),
        None => String::new(),
    }
}

/// WebSocket targets and frames for one set of credentials.
#[derive(Debug, Clone)]
pub struct WebSocketApi {
    endpoint: EndpointConfig,
    credentials: Credentials,
}

impl WebSocketApi {
    pub fn new(endpoint: EndpointConfig, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
        }
    }

    /// Resource path (with query) of the WebSocket endpoint.
    ///
    /// `default_app_key` selects an application key on an admin connection
    /// and is ignored when the client holds an application key.
    pub fn target_path(
        &self,
        async_mode: Option<bool>,
        default_app_key: Option<&str>,
    ) -> Result<String, ClientError> {
        let app_key = self.credentials.app_key();
        let admin_key = self.credentials.admin_key();

        if !app_key.is_empty() {
            return Ok(format!(
                "{}/{}{}",
                PATH_WS,
                app_key,
                async_suffix('?', async_mode)
            ));
        }
        if admin_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "no key available for the WebSocket target".to_string(),
            ));
        }
        Ok(match default_app_key {
            Some(key) => format!(
                "{}/{}?key={}{}",
                PATH_WS,
                admin_key,
                key,
                async_suffix('&', async_mode)
            ),
            None => format!(
                "{}/{}{}",
                PATH_WS,
                admin_key,
                async_suffix('?', async_mode)
            ),
        })
    }

    /// Full `ws://` or `wss://` URL.
    pub fn target_url(
        &self,
        async_mode: Option<bool>,
        default_app_key: Option<&str>,
    ) -> Result<String, ClientError> {
        let scheme = if self.endpoint.use_ssl { "wss" } else { "ws" };
        Ok(format!(
            "{}://{}:{}/{}",
            scheme,
            self.endpoint.host,
            self.endpoint.port,
            self.target_path(async_mode, default_app_key)?
        ))
    }

    /// Authorization header value for the upgrade request.
    pub fn authorization_header(
        &self,
        async_mode: Option<bool>,
        default_app_key: Option<&str>,
    ) -> Result<String, ClientError> {
        let path = self.target_path(async_mode, default_app_key)?;
        let auth = self
            .credentials
            .authorize_empty(SigningKey::AppOrAdmin, METHOD_WS, &path)?;
        Ok(auth.to_string())
    }

    fn frame(
        &self,
        method: &str,
        context: Context,
        params: Value,
        opts: Option<Map<String, Value>>,
        async_mode: Option<bool>,
    ) -> Envelope {
        let mut frame = Envelope::new(method)
            .with_context(context)
            .with_key(self.credentials.app_key())
            .with_params(params);
        if let Some(opts) = opts {
            frame = frame.with_opts(opts);
        }
        frame.with_async(async_mode)
    }

    /// Query frame (query language v2).
    pub fn query_frame(&self, query: &str, async_mode: Option<bool>, stream: bool) -> Envelope {
        self.frame(
            METHOD_QUERY_FRAME,
            Context::Events,
            json!({"q": query, "v": "2", "stream": u8::from(stream)}),
            None,
            async_mode,
        )
    }

    /// Sensor data frame.
    pub fn send_data_frame(&self, sensor_data: &Value, async_mode: Option<bool>) -> Envelope {
        self.frame(
            METHOD_SET_DATA,
            Context::Events,
            sensor_data.clone(),
            None,
            async_mode,
        )
    }

    /// KML upload frame. Known defaults travel form-encoded in `opts`.
    pub fn upload_kml_frame(
        &self,
        kml_content: &str,
        defaults: &[(&str, &str)],
        async_mode: Option<bool>,
    ) -> Envelope {
        let mut opts = Map::new();
        for name in KML_PARAMS {
            if let Some((_, value)) = defaults.iter().find(|(k, _)| k == name) {
                opts.insert(name.to_string(), Value::String(form_encode(value)));
            }
        }
        self.frame(
            METHOD_SET_DATA,
            Context::Events,
            json!({"q": form_encode(kml_content)}),
            Some(opts),
            async_mode,
        )
    }

    /// Ping frame; `None` waits forever.
    pub fn ping_frame(&self, timeout_ms: Option<u64>, async_mode: Option<bool>) -> Envelope {
        let timeout = match timeout_ms {
            Some(ms) => Value::from(ms),
            None => Value::from("infinity"),
        };
        self.frame(
            METHOD_PING,
            Context::Events,
            json!({ "timeout": timeout }),
            None,
            async_mode,
        )
    }

    /// Frame asking for the results of a postponed job.
    pub fn get_stored_frame(
        &self,
        uuid: &str,
        async_mode: Option<bool>,
    ) -> Result<Envelope, ClientError> {
        if uuid.is_empty() {
            return Err(ClientError::InvalidArgument("expect uuid".to_string()));
        }
        Ok(self.frame(
            METHOD_GET_RESULTS,
            Context::Results,
            json!({ "uuid": uuid }),
            None,
            async_mode,
        ))
    }

    /// Frame asking for diagnostic messages.
    pub fn get_messages_frame(&self, async_mode: Option<bool>) -> Envelope {
        self.frame(
            METHOD_GET_RESULTS,
            Context::Events,
            json!({ "uuid": "" }),
            None,
            async_mode,
        )
    }
}

/// Encodes a frame as an external term for a binary WebSocket message.
pub fn binary_frame(frame: &Envelope, compression_level: Option<i64>) -> Result<Vec<u8>, ClientError> {
    Ok(term_to_binary(&frame.to_value()?, compression_level)?)
}

/// Splits an inbound text message into response frames.
pub fn parse_message(text: &str) -> Result<StreamResponse, ClientError> {
    Ok(StreamResponse::parse(text)?)
}
