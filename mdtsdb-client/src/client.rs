//! High-level client API.

use crate::config::{ClientConfig, CredentialsConfig};
use crate::credentials::{CredentialState, Credentials};
use crate::error::ClientError;
use crate::token::{AccessToken, TokenFlow};
use crate::transport::{BodyStrategy, HttpExchange, ReqwestExchange, SignedRequest, Transport};
use crate::ws::WebSocketApi;
use mdtsdb_protocol::envelope::{
    kml_form, query_form, stored_form, METHOD_PING, METHOD_QL, METHOD_QL2, METHOD_RESULTS,
    METHOD_SET_DATA,
};
use mdtsdb_protocol::{
    AuthScheme, Context, EncodedPayload, Envelope, PayloadCodec, Response, Route, StreamResponse,
};
use serde_json::{json, Map, Value};
use std::path::Path;

/// Request body before encoding.
enum Body {
    /// JSON tree; encoded by the payload codec on the ingestion route.
    Json(Value),
    /// Text sent as-is.
    Text(String),
}

/// Query language options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Query language version, 1 or 2.
    pub version: u8,
    /// Ask the server to stream the response body.
    pub stream: bool,
    /// Postpone execution; the response carries a job uuid.
    pub async_mode: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            version: 2,
            stream: false,
            async_mode: false,
        }
    }
}

impl QueryOptions {
    pub fn v1() -> Self {
        Self {
            version: 1,
            ..Self::default()
        }
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.async_mode = true;
        self
    }
}

/// Swimlane options of a new application key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppKeyOptions {
    pub buffer_off: Option<bool>,
    pub autoclean_off: Option<bool>,
    /// Requested key name; required by `get_or_create_app_key`.
    pub suggest: Option<String>,
    /// Expiration, must be positive.
    pub expire: Option<u64>,
}

impl AppKeyOptions {
    pub fn suggest(name: impl Into<String>) -> Self {
        Self {
            suggest: Some(name.into()),
            ..Self::default()
        }
    }

    fn to_opts(&self) -> Result<Option<Map<String, Value>>, ClientError> {
        if self.expire == Some(0) {
            return Err(ClientError::InvalidArgument(
                "expect a positive expire value".to_string(),
            ));
        }
        let mut opts = Map::new();
        if let Some(v) = self.buffer_off {
            opts.insert("buffer_off".to_string(), Value::Bool(v));
        }
        if let Some(v) = self.autoclean_off {
            opts.insert("autoclean_off".to_string(), Value::Bool(v));
        }
        if let Some(v) = &self.suggest {
            opts.insert("suggest".to_string(), Value::String(v.clone()));
        }
        if let Some(v) = self.expire {
            opts.insert("expire".to_string(), Value::from(v));
        }
        Ok(if opts.is_empty() { None } else { Some(opts) })
    }
}

/// High-level client for mdtsdb.
pub struct Client<E: HttpExchange + Clone = ReqwestExchange> {
    config: ClientConfig,
    transport: Transport<E>,
    codec: PayloadCodec,
    scheme: AuthScheme,
    state: CredentialState,
}

impl Client<ReqwestExchange> {
    /// Creates a client backed by reqwest.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let strategy = if config.transport.streamed_body {
            BodyStrategy::Streamed
        } else {
            BodyStrategy::Buffered
        };
        let exchange = ReqwestExchange::new()
            .with_connect_timeout(config.transport.connect_timeout())
            .with_read_timeout(config.transport.read_timeout())
            .with_body_strategy(strategy);
        Self::with_exchange(config, exchange)
    }
}

impl<E: HttpExchange + Clone> Client<E> {
    /// Creates a client over a custom HTTP exchange.
    ///
    /// No network call is made; a configured token flow fetches its first
    /// token on the first request.
    pub fn with_exchange(config: ClientConfig, exchange: E) -> Result<Self, ClientError> {
        config.validate()?;

        let transport = Transport::new(&config.endpoint.base_url(), exchange)?
            .with_debug(config.transport.debug);
        let codec = PayloadCodec::new(
            config.transport.compression()?,
            config.transport.compression_level,
        );
        let scheme = if config.transport.streaming_auth {
            AuthScheme::Streaming
        } else {
            AuthScheme::Standard
        };

        let creds = &config.credentials;
        let state = CredentialState::new(Credentials::new(
            creds.app_key.clone(),
            creds.admin_key.clone(),
            creds.secret_key.clone(),
        ));
        if let (Some(url), Some(id), Some(secret)) =
            (&creds.auth_url, &creds.client_id, &creds.client_secret)
        {
            state.set_flow(TokenFlow::new(url.clone(), id.clone(), secret.clone()));
        }

        Ok(Self {
            config,
            transport,
            codec,
            scheme,
            state,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current credentials.
    pub fn credentials(&self) -> Credentials {
        self.state.snapshot()
    }

    // =========================================================================
    // Factories
    // =========================================================================

    fn sibling(&self, credentials: CredentialsConfig) -> Result<Self, ClientError> {
        let mut config = self.config.clone();
        config.credentials = credentials;
        Self::with_exchange(config, self.transport.exchange().clone())
    }

    /// Client for data and queries on the same endpoint and options.
    pub fn new_client(&self, app_key: &str, secret_key: &str) -> Result<Self, ClientError> {
        if app_key.is_empty() || secret_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "expect valid API keys".to_string(),
            ));
        }
        self.sibling(CredentialsConfig {
            app_key: app_key.to_string(),
            secret_key: secret_key.to_string(),
            ..CredentialsConfig::default()
        })
    }

    /// Client for administrative tasks on the same endpoint and options.
    pub fn new_admin_client(&self, admin_key: &str, secret_key: &str) -> Result<Self, ClientError> {
        if admin_key.is_empty() || secret_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "expect valid API keys".to_string(),
            ));
        }
        self.sibling(CredentialsConfig {
            admin_key: admin_key.to_string(),
            secret_key: secret_key.to_string(),
            ..CredentialsConfig::default()
        })
    }

    // =========================================================================
    // Access tokens
    // =========================================================================

    /// Configures the client-credentials flow and fetches a token.
    pub fn set_access_credentials(
        &self,
        auth_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(), ClientError> {
        self.state
            .set_flow(TokenFlow::new(auth_url, client_id, client_secret));
        self.refresh_token()
    }

    /// Installs a bearer token. The secret key is dropped.
    pub fn set_access_token(&self, token: &str, token_type: Option<&str>) -> Result<(), ClientError> {
        self.state
            .set_access_token(AccessToken::new(token, token_type))
    }

    /// Fetches a fresh token through the configured flow.
    pub fn refresh_token(&self) -> Result<(), ClientError> {
        let flow = self
            .state
            .flow()
            .ok_or_else(|| ClientError::Token("no token flow configured".to_string()))?;
        let token = flow.fetch(self.transport.exchange())?;
        self.state.set_access_token(token)?;
        tracing::debug!("Access token refreshed");
        Ok(())
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn call_once<F>(&self, method: &str, context: Context, build: &F) -> Result<String, ClientError>
    where
        F: Fn(&Credentials) -> Result<Body, ClientError>,
    {
        let creds = self.state.snapshot();
        let route = Route::resolve(method, context, creds.app_key());

        let payload = match build(&creds)? {
            Body::Json(value) if route.is_ingestion() => self.codec.encode(&value)?,
            Body::Json(value) => {
                EncodedPayload::text(serde_json::to_string(&value)?, route.content_type)
            }
            Body::Text(text) => EncodedPayload::text(text, route.content_type),
        };

        let authorization = creds.authorize(
            route.signing_key,
            self.scheme,
            &route.api_method,
            &route.path,
            payload.content_type,
            &payload.digest,
        )?;

        let request = SignedRequest {
            path: route.path,
            content_type: payload.content_type.to_string(),
            content_encoding: payload.content_encoding.map(str::to_string),
            body: payload.body,
            authorization: Some(authorization),
        };
        self.transport.send(&request)
    }

    /// Sends a request, refreshing the token once on an auth-expired error.
    ///
    /// When the refresh itself fails the original response is returned.
    fn call<F>(&self, method: &str, context: Context, build: F) -> Result<String, ClientError>
    where
        F: Fn(&Credentials) -> Result<Body, ClientError>,
    {
        if self.state.has_flow() && !self.state.has_access_token() {
            self.refresh_token()?;
        }

        let text = self.call_once(method, context, &build)?;
        if !self.state.has_flow() || !has_auth_error(&text) {
            return Ok(text);
        }

        tracing::warn!("Authorization expired on '{}', refreshing access token", method);
        match self.refresh_token() {
            Ok(()) => self.call_once(method, context, &build),
            Err(e) => {
                tracing::warn!("Access token refresh failed: {}", e);
                Ok(text)
            }
        }
    }

    fn request<F>(&self, method: &str, context: Context, build: F) -> Result<Response, ClientError>
    where
        F: Fn(&Credentials) -> Result<Body, ClientError>,
    {
        let text = self.call(method, context, build)?;
        Ok(Response::parse(&text)?)
    }

    /// Sends `{method, params}` to the admin endpoint. `params` receives the
    /// current admin key, which may change after a token refresh.
    fn admin_request<P>(&self, method: &str, params: P) -> Result<Response, ClientError>
    where
        P: Fn(&str) -> Map<String, Value>,
    {
        self.request(method, Context::Events, |creds| {
            let params = Value::Object(params(creds.admin_key()));
            Ok(Body::Json(
                Envelope::new(method).with_params(params).to_value()?,
            ))
        })
    }

    // =========================================================================
    // Data operations
    // =========================================================================

    /// Uploads sensor data: an object mapping sensor ids to values (plus
    /// `ns`), or an array of such objects.
    pub fn send_events_data(&self, sensor_data: &Value) -> Result<Response, ClientError> {
        self.request(METHOD_SET_DATA, Context::Events, |creds| {
            let mut envelope = Envelope::new(METHOD_SET_DATA)
                .with_context(Context::Events)
                .with_key(creds.app_key())
                .with_params(sensor_data.clone());
            if creds.app_key().is_empty() {
                envelope = envelope.with_admin_key(creds.admin_key());
            }
            Ok(Body::Json(envelope.to_value()?))
        })
    }

    /// Uploads a batch of sensor data records.
    pub fn insert(&self, records: &[Value]) -> Result<Response, ClientError> {
        self.send_events_data(&Value::Array(records.to_vec()))
    }

    /// Uploads GeoJSON, TopoJSON or KML text.
    pub fn send_geo_data(&self, geo_data: &str) -> Result<Response, ClientError> {
        self.request(METHOD_SET_DATA, Context::GeoEvents, |_| {
            Ok(Body::Text(geo_data.to_string()))
        })
    }

    /// Uploads KML content. `defaults` fill gaps the server cannot derive
    /// (`id`, `ns`, `val` and similar).
    pub fn upload_kml(&self, kml_content: &str, defaults: &[(&str, &str)]) -> Result<Response, ClientError> {
        self.request(METHOD_QL, Context::Kml, |creds| {
            Ok(Body::Text(kml_form(
                defaults.iter().copied(),
                kml_content,
                creds.app_key(),
            )))
        })
    }

    /// Uploads a KML file.
    pub fn upload_kml_file(
        &self,
        path: impl AsRef<Path>,
        defaults: &[(&str, &str)],
    ) -> Result<Response, ClientError> {
        let content = std::fs::read_to_string(path)?;
        self.upload_kml(&content, defaults)
    }

    /// Pings the service. `None` waits without a timeout.
    pub fn ping(&self, timeout_ms: Option<u64>) -> Result<Response, ClientError> {
        let timeout = match timeout_ms {
            Some(ms) => Value::from(ms),
            None => Value::from("infinity"),
        };
        self.request(METHOD_PING, Context::Events, |creds| {
            Ok(Body::Json(
                Envelope::new(METHOD_PING)
                    .with_context(Context::Events)
                    .with_key(creds.app_key())
                    .with_params(json!({ "timeout": timeout }))
                    .to_value()?,
            ))
        })
    }

    // =========================================================================
    // Query operations
    // =========================================================================

    fn query_text(&self, script: &str, options: QueryOptions) -> Result<String, ClientError> {
        if script.is_empty() {
            return Err(ClientError::InvalidArgument(
                "expect a query to execute".to_string(),
            ));
        }
        let method = if options.version == 1 {
            METHOD_QL
        } else {
            METHOD_QL2
        };
        self.call(method, Context::Events, |creds| {
            Ok(Body::Text(query_form(
                script,
                creds.app_key(),
                creds.admin_key(),
                options.stream,
                options.async_mode,
            )))
        })
    }

    /// Executes a query language v2 script.
    pub fn query(&self, script: &str) -> Result<Response, ClientError> {
        self.events_query(script, QueryOptions::default())
    }

    /// Executes a script with explicit version, streaming and async options.
    pub fn events_query(&self, script: &str, options: QueryOptions) -> Result<Response, ClientError> {
        let text = self.query_text(script, options)?;
        Ok(Response::parse(&text)?)
    }

    /// Executes a streamed query and splits the body into frames.
    pub fn query_stream(&self, script: &str, options: QueryOptions) -> Result<StreamResponse, ClientError> {
        let text = self.query_text(script, options.streamed())?;
        Ok(StreamResponse::parse(&text)?)
    }

    // =========================================================================
    // Stored results
    // =========================================================================

    /// Raw result of a postponed job.
    pub fn get_stored(&self, uuid: &str) -> Result<String, ClientError> {
        if uuid.is_empty() {
            return Err(ClientError::InvalidArgument("expect uuid".to_string()));
        }
        self.call(METHOD_RESULTS, Context::Results, |creds| {
            Ok(Body::Text(stored_form(uuid, creds.user_key())))
        })
    }

    /// Diagnostic messages about data storing and indexing.
    pub fn get_messages(&self) -> Result<Response, ClientError> {
        let text = self.call(METHOD_RESULTS, Context::Events, |creds| {
            Ok(Body::Text(stored_form("", creds.user_key())))
        })?;
        Ok(Response::parse(&text)?)
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    fn app_key_request(
        &self,
        method: &str,
        user: &str,
        options: &AppKeyOptions,
    ) -> Result<Response, ClientError> {
        let opts = options.to_opts()?;
        self.admin_request(method, |admin_key| {
            let mut params = Map::new();
            params.insert("adminkey".to_string(), Value::from(admin_key));
            params.insert("user".to_string(), Value::from(user));
            if let Some(opts) = &opts {
                params.insert("opts".to_string(), Value::Object(opts.clone()));
            }
            params
        })
    }

    /// Creates an application key.
    pub fn new_app_key(&self, user: &str, options: &AppKeyOptions) -> Result<Response, ClientError> {
        self.app_key_request("newApiKey", user, options)
    }

    /// Returns the secret of an existing application key, or creates it.
    pub fn get_or_create_app_key(
        &self,
        user: &str,
        options: &AppKeyOptions,
    ) -> Result<Response, ClientError> {
        if options.suggest.is_none() {
            return Err(ClientError::InvalidArgument(
                "expect valid app key in 'suggest' field".to_string(),
            ));
        }
        self.app_key_request("assureApiKey", user, options)
    }

    /// Deletes an application key owned by this admin key.
    pub fn delete_app_key(&self, app_key: &str, keep_data: Option<bool>) -> Result<Response, ClientError> {
        if app_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "expect valid application key".to_string(),
            ));
        }
        self.admin_request("deleteApiKey", |admin_key| {
            let mut params = Map::new();
            params.insert("key".to_string(), Value::from(app_key));
            params.insert("adminkey".to_string(), Value::from(admin_key));
            if let Some(keep) = keep_data {
                params.insert("keep_data".to_string(), Value::Bool(keep));
            }
            params
        })
    }

    /// Creates an admin key. Requires super-user rights.
    pub fn new_admin_key(&self, user: &str) -> Result<Response, ClientError> {
        self.admin_request("newAdminKey", |admin_key| {
            let mut params = Map::new();
            params.insert("adminkey".to_string(), Value::from(admin_key));
            params.insert("user".to_string(), Value::from(user));
            params
        })
    }

    /// Returns the secret of an existing admin key, or creates it.
    pub fn get_or_create_admin_key(&self, admin_key: &str, user: &str) -> Result<Response, ClientError> {
        if admin_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "expect valid admin key to get or create".to_string(),
            ));
        }
        self.admin_request("assureAdminKey", |own_key| {
            let mut params = Map::new();
            params.insert("adminkey".to_string(), Value::from(own_key));
            params.insert("suggest".to_string(), Value::from(admin_key));
            params.insert("user".to_string(), Value::from(user));
            params
        })
    }

    /// Deletes an admin key. Requires super-user rights.
    pub fn delete_admin_key(&self, admin_key: &str) -> Result<Response, ClientError> {
        if admin_key.is_empty() {
            return Err(ClientError::InvalidArgument(
                "expect valid administrative key".to_string(),
            ));
        }
        self.admin_request("deleteAdminKey", |own_key| {
            let mut params = Map::new();
            params.insert("key".to_string(), Value::from(admin_key));
            params.insert("adminkey".to_string(), Value::from(own_key));
            params
        })
    }

    // =========================================================================
    // WebSocket
    // =========================================================================

    /// WebSocket targets and frames for the current credentials.
    pub fn ws(&self) -> Result<WebSocketApi, ClientError> {
        if self.state.has_flow() && !self.state.has_access_token() {
            self.refresh_token()?;
        }
        Ok(WebSocketApi::new(
            self.config.endpoint.clone(),
            self.state.snapshot(),
        ))
    }
}

fn has_auth_error(text: &str) -> bool {
    StreamResponse::parse(text)
        .map(|stream| stream.frames().iter().any(Response::is_auth_error))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::jwt;
    use crate::transport::tests::ScriptedExchange;
    use chrono::Utc;
    use mdtsdb_protocol::signature::{coarse_timestamp, payload_digest, sign_at};
    use mdtsdb_protocol::Outcome;

    const AUTH_ERROR: &str = r#"{"error":{"code":1001,"message":"Authorization Error"}}"#;

    fn app_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.credentials.app_key = "app".to_string();
        config.credentials.secret_key = "secret".to_string();
        config
    }

    fn admin_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.credentials.admin_key = "adm".to_string();
        config.credentials.secret_key = "secret".to_string();
        config
    }

    fn token_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.credentials.auth_url = Some("http://auth.local/token".to_string());
        config.credentials.client_id = Some("cid".to_string());
        config.credentials.client_secret = Some("csecret".to_string());
        config
    }

    fn client(config: ClientConfig) -> (Client<ScriptedExchange>, ScriptedExchange) {
        let exchange = ScriptedExchange::default();
        let client = Client::with_exchange(config, exchange.clone()).unwrap();
        (client, exchange)
    }

    fn token_reply(admin_key: &str) -> String {
        json!({
            "access_token": jwt(&json!({ "clientId": admin_key })),
            "token_type": "Bearer"
        })
        .to_string()
    }

    fn sent_body(exchange: &ScriptedExchange, index: usize) -> String {
        String::from_utf8(exchange.requests.lock()[index].body.to_vec()).unwrap()
    }

    fn sent_header(exchange: &ScriptedExchange, index: usize, name: &str) -> Option<String> {
        exchange.requests.lock()[index]
            .header(name)
            .map(str::to_string)
    }

    #[test]
    fn test_send_events_data() {
        let (client, exchange) = client(app_config());
        exchange.push(200, r#"{"result":1}"#);

        let response = client
            .send_events_data(&json!({"ns": 1421507439, "0": 0}))
            .unwrap();
        assert!(response.is_ok());

        let request = exchange.requests.lock()[0].clone();
        assert_eq!(request.url.as_str(), "http://127.0.0.1:8080/api/v1/ingest");
        assert_eq!(
            sent_body(&exchange, 0),
            r#"{"method":"setData","context":"events","key":"app","params":{"ns":1421507439,"0":0}}"#
        );
        let auth = request.header("Authorization").unwrap();
        assert!(auth.starts_with("MDTSDB-HMAC-SHA256 app "));
        assert!(auth.ends_with(" s,setData"));
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.header("Content-Encoding"), None);
    }

    #[test]
    fn test_admin_key_ingestion_adds_adminkey() {
        let (client, exchange) = client(admin_config());
        exchange.push(200, r#"{"result":1}"#);
        client.insert(&[json!({"ns": 1, "0": 1})]).unwrap();

        let body: Value = serde_json::from_str(&sent_body(&exchange, 0)).unwrap();
        assert_eq!(body["key"], "");
        assert_eq!(body["adminkey"], "adm");
        assert!(body["params"].is_array());
        let auth = sent_header(&exchange, 0, "Authorization").unwrap();
        assert!(auth.starts_with("MDTSDB-HMAC-SHA256 adm "));
        assert!(auth.ends_with(" a,setData"));
    }

    #[test]
    fn test_compressed_ingestion_signs_canonical_bytes() {
        let mut config = app_config();
        config.transport.compression = "gzip".to_string();
        let (client, exchange) = client(config);
        exchange.push(200, r#"{"result":1}"#);

        let ts = coarse_timestamp(Utc::now());
        client.send_events_data(&json!([{"ns": 1, "0": 2}])).unwrap();

        let canonical =
            r#"{"method":"setData","context":"events","key":"app","params":[{"ns":1,"0":2}]}"#;
        assert_ne!(&exchange.requests.lock()[0].body[..], canonical.as_bytes());
        assert_eq!(
            sent_header(&exchange, 0, "Content-Encoding").as_deref(),
            Some("gzip")
        );

        let auth = sent_header(&exchange, 0, "Authorization").unwrap();
        let signature = auth.split(' ').nth(2).unwrap().to_string();
        let digest = payload_digest(canonical.as_bytes());
        let expected = |t| {
            sign_at(t, "setData", "app", "secret", "api/v1/ingest", &digest, "application/json")
        };
        assert!(signature == expected(ts) || signature == expected(ts + 1));
    }

    #[test]
    fn test_bson_ingestion_headers() {
        let mut config = app_config();
        config.transport.compression = "bson".to_string();
        let (client, exchange) = client(config);
        exchange.push(200, r#"{"result":1}"#);
        client.send_events_data(&json!({"ns": 1})).unwrap();

        assert_eq!(
            sent_header(&exchange, 0, "Content-Type").as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(
            sent_header(&exchange, 0, "Content-Encoding").as_deref(),
            Some("bson")
        );
    }

    #[test]
    fn test_compression_skipped_outside_ingestion() {
        let mut config = admin_config();
        config.transport.compression = "gzip".to_string();
        let (client, exchange) = client(config);
        exchange.push(200, r#"{"result":{"key":"k","secret_key":"s"}}"#);
        client.new_app_key("bob", &AppKeyOptions::default()).unwrap();

        assert_eq!(sent_header(&exchange, 0, "Content-Encoding"), None);
        assert_eq!(
            sent_body(&exchange, 0),
            r#"{"method":"newApiKey","params":{"adminkey":"adm","user":"bob"}}"#
        );
    }

    #[test]
    fn test_admin_methods() {
        let (client, exchange) = client(admin_config());
        for _ in 0..5 {
            exchange.push(200, r#"{"result":{"key":"k","secret_key":"s","user":"u"}}"#);
        }

        let options = AppKeyOptions {
            buffer_off: Some(true),
            expire: Some(30),
            ..AppKeyOptions::suggest("lane")
        };
        let response = client.get_or_create_app_key("alice", &options).unwrap();
        assert_eq!(response.key().unwrap(), "k");
        assert_eq!(response.secret_key().unwrap(), "s");

        client.delete_app_key("lane", Some(true)).unwrap();
        client.new_admin_key("carol").unwrap();
        client.get_or_create_admin_key("adm2", "dave").unwrap();
        client.delete_admin_key("adm2").unwrap();

        let bodies: Vec<Value> = (0..5)
            .map(|i| serde_json::from_str(&sent_body(&exchange, i)).unwrap())
            .collect();
        assert_eq!(
            bodies[0],
            json!({"method": "assureApiKey", "params": {"user": "alice", "adminkey": "adm",
                   "opts": {"buffer_off": true, "suggest": "lane", "expire": 30}}})
        );
        assert_eq!(
            bodies[1],
            json!({"method": "deleteApiKey", "params": {"key": "lane", "adminkey": "adm", "keep_data": true}})
        );
        assert_eq!(
            bodies[2],
            json!({"method": "newAdminKey", "params": {"adminkey": "adm", "user": "carol"}})
        );
        assert_eq!(
            bodies[3],
            json!({"method": "assureAdminKey", "params": {"adminkey": "adm", "suggest": "adm2", "user": "dave"}})
        );
        assert_eq!(
            bodies[4],
            json!({"method": "deleteAdminKey", "params": {"key": "adm2", "adminkey": "adm"}})
        );

        let requests = exchange.requests.lock();
        assert!(requests
            .iter()
            .all(|r| r.url.path() == "/api/v1/admin"));
        assert!(requests[4]
            .header("Authorization")
            .unwrap()
            .ends_with(" a,deleteAdminKey"));
    }

    #[test]
    fn test_admin_argument_checks() {
        let (client, exchange) = client(admin_config());
        assert!(matches!(
            client.get_or_create_app_key("u", &AppKeyOptions::default()),
            Err(ClientError::InvalidArgument(_))
        ));
        let expired = AppKeyOptions {
            expire: Some(0),
            ..AppKeyOptions::default()
        };
        assert!(client.new_app_key("u", &expired).is_err());
        assert!(client.delete_app_key("", None).is_err());
        assert!(client.delete_admin_key("").is_err());
        assert_eq!(exchange.count(), 0);
    }

    #[test]
    fn test_query_forms() {
        let (client, exchange) = client(app_config());
        exchange
            .push(200, r#"{"result":[]}"#)
            .push(200, r#"{"error":{"message":"the job is postponed","details":{"uuid":"j1"}}}"#);

        client.query("select * from x").unwrap();
        let response = client
            .events_query("q1", QueryOptions::v1().asynchronous())
            .unwrap();
        assert_eq!(
            response.outcome(),
            Outcome::Postponed {
                uuid: "j1".to_string()
            }
        );

        let requests = exchange.requests.lock();
        assert_eq!(requests[0].url.as_str(), "http://127.0.0.1:8080/api/v1/ql?v=2");
        assert_eq!(
            String::from_utf8(requests[0].body.to_vec()).unwrap(),
            "q=select+*+from+x&key=app&adm=&stream=0"
        );
        assert!(requests[0]
            .header("Authorization")
            .unwrap()
            .ends_with(" s,ql"));
        assert_eq!(requests[1].url.as_str(), "http://127.0.0.1:8080/api/v1/ql");
        assert_eq!(
            String::from_utf8(requests[1].body.to_vec()).unwrap(),
            "q=q1&key=app&adm=&stream=0&async=1"
        );
        assert_eq!(
            requests[1].header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_query_stream() {
        let (client, exchange) = client(app_config());
        exchange.push(
            200,
            "\u{1e}{\"result\":{\"data\":[{\"values\":{\"0\":{\"10\":\"a\"}}}]}}\u{0}11110{\"result\":{\"data\":[{\"values\":{\"0\":{\"20\":\"b\"}}}]}}",
        );
        let stream = client.query_stream("q", QueryOptions::default()).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(
            Value::Object(stream.merge_values()),
            json!({"0": {"10": "a", "20": "b"}})
        );
        assert!(sent_body(&exchange, 0).ends_with("&stream=1"));
    }

    #[test]
    fn test_empty_query_rejected() {
        let (client, exchange) = client(app_config());
        assert!(matches!(
            client.query(""),
            Err(ClientError::InvalidArgument(_))
        ));
        assert_eq!(exchange.count(), 0);
    }

    #[test]
    fn test_stored_results() {
        let (client, exchange) = client(admin_config());
        exchange
            .push(200, "\u{1e}{\"result\":{\"rows\":[1,2]}}")
            .push(200, r#"{"result":{"messages":[]}}"#);

        let raw = client.get_stored("job-1").unwrap();
        assert_eq!(raw, r#"{"result":{"rows":[1,2]}}"#);
        let messages = client.get_messages().unwrap();
        assert!(messages.is_ok());

        assert_eq!(sent_body(&exchange, 0), "uuid=job-1&key=adm");
        assert_eq!(sent_body(&exchange, 1), "uuid=&key=adm");
        let requests = exchange.requests.lock();
        assert_eq!(requests[0].url.path(), "/api/v1/result");
        assert!(requests[0]
            .header("Authorization")
            .unwrap()
            .ends_with(" a,ql"));
        drop(requests);

        assert!(client.get_stored("").is_err());
    }

    #[test]
    fn test_ping_envelope() {
        let (client, exchange) = client(app_config());
        exchange
            .push(200, r#"{"result":1}"#)
            .push(200, r#"{"result":1}"#);
        client.ping(None).unwrap();
        client.ping(Some(250)).unwrap();

        assert_eq!(
            sent_body(&exchange, 0),
            r#"{"method":"ping","context":"events","key":"app","params":{"timeout":"infinity"}}"#
        );
        assert!(sent_body(&exchange, 1).contains(r#""params":{"timeout":250}"#));
    }

    #[test]
    fn test_geo_and_kml_routes() {
        let mut config = app_config();
        config.credentials.app_key = "app+1".to_string();
        let (client, exchange) = client(config);
        exchange
            .push(200, r#"{"result":1}"#)
            .push(200, r#"{"result":1}"#);

        client.send_geo_data(r#"{"type":"FeatureCollection"}"#).unwrap();
        client
            .upload_kml("<kml/>", &[("ns", "100"), ("id", "s1")])
            .unwrap();

        let requests = exchange.requests.lock();
        assert_eq!(requests[0].url.path(), "/api/v1/ingest/app%2B1");
        assert_eq!(&requests[0].body[..], br#"{"type":"FeatureCollection"}"#);
        assert_eq!(requests[0].header("Content-Type"), Some("application/json"));

        assert_eq!(requests[1].url.path(), "/api/v1/ql");
        assert_eq!(
            String::from_utf8(requests[1].body.to_vec()).unwrap(),
            "id=s1&ns=100&q=%3Ckml%2F%3E&key=app%2B1"
        );
    }

    #[test]
    fn test_server_errors_are_responses() {
        let (client, exchange) = client(app_config());
        exchange.push(200, AUTH_ERROR);
        let response = client.query("q").unwrap();
        assert!(response.is_auth_error());
        // no token flow, so no refresh attempt
        assert_eq!(exchange.count(), 1);
    }

    #[test]
    fn test_token_fetched_lazily() {
        let (client, exchange) = client(token_config());
        exchange
            .push(200, &token_reply("adm-t"))
            .push(200, r#"{"result":1}"#);

        client.new_admin_key("u").unwrap();

        let requests = exchange.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url.as_str(), "http://auth.local/token");
        assert_eq!(
            String::from_utf8(requests[0].body.to_vec()).unwrap(),
            "client_id=cid&client_secret=csecret&grant_type=client_credentials"
        );
        assert!(requests[1]
            .header("Authorization")
            .unwrap()
            .starts_with("Bearer "));
        let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(body["params"]["adminkey"], "adm-t");
    }

    #[test]
    fn test_auth_error_refreshes_once() {
        let (client, exchange) = client(token_config());
        exchange
            .push(200, &token_reply("adm-1"))
            .push(200, AUTH_ERROR)
            .push(200, &token_reply("adm-2"))
            .push(200, r#"{"result":{"key":"k"}}"#);

        let response = client.new_admin_key("u").unwrap();
        assert!(response.is_ok());
        assert_eq!(exchange.count(), 4);
        assert_eq!(client.credentials().admin_key(), "adm-2");

        let retried: Value = serde_json::from_str(&sent_body(&exchange, 3)).unwrap();
        assert_eq!(retried["params"]["adminkey"], "adm-2");
    }

    #[test]
    fn test_failed_refresh_returns_original_response() {
        let (client, exchange) = client(token_config());
        exchange
            .push(200, &token_reply("adm-1"))
            .push(200, AUTH_ERROR)
            .push(500, "");

        let response = client.new_admin_key("u").unwrap();
        assert!(response.is_auth_error());
        assert_eq!(exchange.count(), 3);
    }

    #[test]
    fn test_second_auth_error_is_not_retried() {
        let (client, exchange) = client(token_config());
        exchange
            .push(200, &token_reply("adm-1"))
            .push(200, AUTH_ERROR)
            .push(200, &token_reply("adm-2"))
            .push(200, AUTH_ERROR);

        let response = client.query("q").unwrap();
        assert!(response.is_auth_error());
        assert_eq!(exchange.count(), 4);
    }

    #[test]
    fn test_set_access_token() {
        let (client, exchange) = client(admin_config());
        client
            .set_access_token(&jwt(&json!({"clientId": "adm9"})), Some("Token"))
            .unwrap();
        let creds = client.credentials();
        assert_eq!(creds.admin_key(), "adm9");
        assert_eq!(creds.secret_key(), "");

        exchange.push(200, r#"{"result":1}"#);
        client.delete_admin_key("x").unwrap();
        assert!(sent_header(&exchange, 0, "Authorization")
            .unwrap()
            .starts_with("Token "));

        assert!(client.set_access_token("bad", None).is_err());
        assert!(matches!(client.refresh_token(), Err(ClientError::Token(_))));
    }

    #[test]
    fn test_set_access_credentials() {
        let (client, exchange) = client(admin_config());
        exchange.push(200, &token_reply("adm-x"));
        client
            .set_access_credentials("http://auth.local/token", "id", "s")
            .unwrap();
        assert_eq!(client.credentials().admin_key(), "adm-x");
        assert_eq!(exchange.count(), 1);

        exchange.push(401, "");
        assert!(client.refresh_token().is_err());
    }

    #[test]
    fn test_factories() {
        let (admin, exchange) = client(admin_config());
        let app = admin.new_client("app2", "s2").unwrap();
        assert_eq!(app.credentials().app_key(), "app2");
        assert_eq!(app.credentials().admin_key(), "");
        assert_eq!(app.config().endpoint.port, admin.config().endpoint.port);

        let adm = app.new_admin_client("adm3", "s3").unwrap();
        assert_eq!(adm.credentials().admin_key(), "adm3");

        assert!(admin.new_client("", "s").is_err());
        assert!(admin.new_admin_client("a", "").is_err());

        exchange.push(200, r#"{"result":1}"#);
        app.ping(None).unwrap();
        assert_eq!(exchange.count(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let exchange = ScriptedExchange::default();
        let mut config = app_config();
        config.credentials.secret_key.clear();
        assert!(matches!(
            Client::with_exchange(config, exchange),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_streaming_auth_scheme() {
        let mut config = app_config();
        config.transport.streaming_auth = true;
        let (client, exchange) = client(config);
        exchange.push(200, r#"{"result":1}"#);
        client.ping(Some(1)).unwrap();
        assert!(sent_header(&exchange, 0, "Authorization")
            .unwrap()
            .starts_with("MDTSDB-STREAMING-HMAC-SHA256 app "));
    }

    #[test]
    fn test_ws_api_uses_credentials() {
        let (client, _) = client(app_config());
        let ws = client.ws().unwrap();
        assert_eq!(
            ws.target_url(None, None).unwrap(),
            "ws://127.0.0.1:8080/api/v1/ws/app"
        );
    }
}
