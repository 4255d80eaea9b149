//! Signed HTTP transport.
//!
//! Every call builds its own blocking HTTP client. The body is held in a
//! [`Bytes`] buffer so that the exact bytes that were digested are replayed
//! on every attempt. A 307 response is followed manually, up to
//! [`MAX_ATTEMPTS`] attempts in total.

use crate::error::ClientError;
use bytes::Bytes;
use chrono::Utc;
use mdtsdb_protocol::{Authorization, ProtocolError, MAX_ATTEMPTS, RECORD_SEPARATOR};
use std::io::Cursor;
use std::time::Duration;
use url::Url;

const STATUS_TEMPORARY_REDIRECT: u16 = 307;

/// One outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpReply {
    pub status: u16,
    pub location: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Performs a single POST without following redirects.
pub trait HttpExchange: Send + Sync {
    fn exchange(&self, request: &HttpRequest) -> Result<HttpReply, ClientError>;
}

/// How the request body is handed to the HTTP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyStrategy {
    /// Whole body in memory.
    #[default]
    Buffered,
    /// Sized reader over the same bytes.
    Streamed,
}

/// [`HttpExchange`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    strategy: BodyStrategy,
}

impl Default for ReqwestExchange {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(300)),
            strategy: BodyStrategy::Buffered,
        }
    }
}

impl ReqwestExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_body_strategy(mut self, strategy: BodyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn body(&self, bytes: &Bytes) -> reqwest::blocking::Body {
        match self.strategy {
            BodyStrategy::Buffered => reqwest::blocking::Body::from(bytes.to_vec()),
            BodyStrategy::Streamed => {
                reqwest::blocking::Body::sized(Cursor::new(bytes.clone()), bytes.len() as u64)
            }
        }
    }
}

impl HttpExchange for ReqwestExchange {
    fn exchange(&self, request: &HttpRequest) -> Result<HttpReply, ClientError> {
        let mut builder = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .connect_timeout(self.connect_timeout);
        if let Some(timeout) = self.read_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let mut call = client.post(request.url.clone());
        for (name, value) in &request.headers {
            call = call.header(name.as_str(), value.as_str());
        }
        let response = call.body(self.body(&request.body)).send()?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes()?;

        Ok(HttpReply {
            status,
            location,
            headers,
            body,
        })
    }
}

/// A request ready to be sent.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// Path relative to the service root, possibly with a query.
    pub path: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub body: Bytes,
    /// `None` sends the request unsigned.
    pub authorization: Option<Authorization>,
}

/// RFC 1123 date in GMT.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Decodes a response body and drops one leading record separator.
pub fn decode_body(body: &[u8]) -> Result<String, ClientError> {
    let body = match body.first() {
        Some(&b) if b == RECORD_SEPARATOR => &body[1..],
        _ => body,
    };
    let text = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(text.to_string())
}

/// Sends signed requests with bounded redirect handling.
#[derive(Debug, Clone)]
pub struct Transport<E: HttpExchange = ReqwestExchange> {
    base: Url,
    exchange: E,
    debug: bool,
}

impl<E: HttpExchange> Transport<E> {
    pub fn new(base_url: &str, exchange: E) -> Result<Self, ClientError> {
        Ok(Self {
            base: Url::parse(base_url)?,
            exchange,
            debug: false,
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    fn headers(&self, request: &SignedRequest) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Date".to_string(), http_date()),
            ("Content-Type".to_string(), request.content_type.clone()),
        ];
        if let Some(encoding) = &request.content_encoding {
            headers.push(("Content-Encoding".to_string(), encoding.clone()));
        }
        if let Some(auth) = &request.authorization {
            headers.push(("Authorization".to_string(), auth.to_string()));
        }
        headers
    }

    /// Sends a request and returns the response text.
    pub fn send(&self, request: &SignedRequest) -> Result<String, ClientError> {
        let headers = self.headers(request);
        let mut url = self.base.join(&request.path)?;

        for attempt in 1..=MAX_ATTEMPTS {
            let http = HttpRequest {
                url: url.clone(),
                headers: headers.clone(),
                body: request.body.clone(),
            };

            tracing::debug!("POST {} (attempt {}/{})", url, attempt, MAX_ATTEMPTS);
            if self.debug {
                tracing::debug!("Request headers: {:?}", http.headers);
                tracing::debug!("Request body: {}", String::from_utf8_lossy(&http.body));
            }

            let reply = self.exchange.exchange(&http)?;

            if self.debug {
                tracing::debug!("Response status: {}", reply.status);
                tracing::debug!("Response headers: {:?}", reply.headers);
            }

            match reply.status {
                STATUS_TEMPORARY_REDIRECT => {
                    let location = match reply.location.as_deref() {
                        Some(loc) if !loc.is_empty() => loc,
                        _ => {
                            tracing::warn!("Redirect from {} without Location header", url);
                            return Err(ClientError::InvalidRedirect);
                        }
                    };
                    let next = url.join(location).map_err(|e| {
                        tracing::warn!("Unusable redirect target '{}': {}", location, e);
                        ClientError::InvalidRedirect
                    })?;
                    tracing::debug!("Redirected to {}", next);
                    url = next;
                }
                200..=299 => {
                    let text = decode_body(&reply.body)?;
                    if self.debug {
                        tracing::debug!("Response body: {}", text);
                    }
                    return Ok(text);
                }
                status => return Err(ClientError::HttpStatus(status)),
            }
        }

        Err(ClientError::TooManyRedirects(MAX_ATTEMPTS))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays canned replies and records every request.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedExchange {
        pub replies: Arc<Mutex<VecDeque<HttpReply>>>,
        pub requests: Arc<Mutex<Vec<HttpRequest>>>,
    }

    impl ScriptedExchange {
        pub fn push(&self, status: u16, body: &str) -> &Self {
            self.replies.lock().push_back(HttpReply {
                status,
                body: Bytes::from(body.to_string()),
                ..Default::default()
            });
            self
        }

        pub fn push_redirect(&self, location: &str) -> &Self {
            self.replies.lock().push_back(HttpReply {
                status: 307,
                location: Some(location.to_string()),
                ..Default::default()
            });
            self
        }

        pub fn count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl HttpExchange for ScriptedExchange {
        fn exchange(&self, request: &HttpRequest) -> Result<HttpReply, ClientError> {
            self.requests.lock().push(request.clone());
            Ok(self.replies.lock().pop_front().unwrap_or(HttpReply {
                status: 500,
                ..Default::default()
            }))
        }
    }

    fn request(body: &str) -> SignedRequest {
        SignedRequest {
            path: "api/v1/ql?v=2".to_string(),
            content_type: "application/x-www-form-urlencoded".to_string(),
            content_encoding: None,
            body: Bytes::from(body.to_string()),
            authorization: Some(Authorization::bearer(None, "tok")),
        }
    }

    fn transport(exchange: &ScriptedExchange) -> Transport<ScriptedExchange> {
        Transport::new("http://127.0.0.1:8080/", exchange.clone()).unwrap()
    }

    #[test]
    fn test_decode_body_strips_one_marker() {
        assert_eq!(decode_body(b"\x1e{\"result\":1}").unwrap(), "{\"result\":1}");
        assert_eq!(decode_body(b"{\"result\":1}").unwrap(), "{\"result\":1}");
        assert_eq!(decode_body(b"\x1e\x1e{}").unwrap(), "\u{1e}{}");
        assert_eq!(decode_body(b"").unwrap(), "");
        assert!(decode_body(&[0x1e, 0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_http_date_format() {
        let date = http_date();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.len(), "Thu, 01 Jan 1970 00:00:00 GMT".len());
    }

    #[test]
    fn test_send_sets_headers() {
        let exchange = ScriptedExchange::default();
        exchange.push(200, "{\"result\":1}");
        let mut req = request("q=1");
        req.content_encoding = Some("gzip".to_string());
        let text = transport(&exchange).send(&req).unwrap();
        assert_eq!(text, "{\"result\":1}");

        let sent = exchange.requests.lock()[0].clone();
        assert_eq!(sent.url.as_str(), "http://127.0.0.1:8080/api/v1/ql?v=2");
        assert_eq!(sent.header("authorization"), Some("Bearer tok"));
        assert_eq!(sent.header("Content-Encoding"), Some("gzip"));
        assert_eq!(
            sent.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        assert!(sent.header("Date").is_some());
    }

    #[test]
    fn test_unsigned_request_has_no_authorization() {
        let exchange = ScriptedExchange::default();
        exchange.push(200, "{}");
        let mut req = request("");
        req.authorization = None;
        transport(&exchange).send(&req).unwrap();
        assert_eq!(exchange.requests.lock()[0].header("Authorization"), None);
    }

    #[test]
    fn test_redirect_replays_body() {
        let exchange = ScriptedExchange::default();
        exchange
            .push_redirect("/other/path")
            .push_redirect("http://10.0.0.2:9000/final")
            .push(200, "\u{1e}{\"result\":2}");
        let text = transport(&exchange).send(&request("q=x")).unwrap();
        assert_eq!(text, "{\"result\":2}");

        let requests = exchange.requests.lock();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].url.as_str(), "http://127.0.0.1:8080/other/path");
        assert_eq!(requests[2].url.as_str(), "http://10.0.0.2:9000/final");
        assert!(requests.iter().all(|r| &r.body[..] == b"q=x"));
    }

    #[test]
    fn test_redirect_bound() {
        let exchange = ScriptedExchange::default();
        for _ in 0..5 {
            exchange.push_redirect("/again");
        }
        let err = transport(&exchange).send(&request("")).unwrap_err();
        assert!(matches!(err, ClientError::TooManyRedirects(4)));
        assert_eq!(exchange.count(), 4);
    }

    #[test]
    fn test_redirect_without_location() {
        let exchange = ScriptedExchange::default();
        exchange.push(307, "");
        let err = transport(&exchange).send(&request("")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidRedirect));
    }

    #[test]
    fn test_error_status() {
        let exchange = ScriptedExchange::default();
        exchange.push(403, "forbidden");
        let err = transport(&exchange).send(&request("")).unwrap_err();
        assert!(matches!(err, ClientError::HttpStatus(403)));
        assert_eq!(exchange.count(), 1);

        let exchange = ScriptedExchange::default();
        exchange.push(302, "");
        let err = transport(&exchange).send(&request("")).unwrap_err();
        assert!(matches!(err, ClientError::HttpStatus(302)));
    }
}
