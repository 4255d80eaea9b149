//! Access tokens.
//!
//! Tokens are JWTs obtained through the OAuth2 client-credentials grant. The
//! `clientId` claim of the payload names the admin key the token acts for.

use crate::error::ClientError;
use crate::transport::{HttpExchange, HttpRequest};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use mdtsdb_protocol::codec::CONTENT_TYPE_FORM;
use mdtsdb_protocol::signature::DEFAULT_TOKEN_TYPE;
use mdtsdb_protocol::FormBody;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Claim holding the admin key.
pub const CLIENT_ID_CLAIM: &str = "clientId";

/// A bearer token and its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub token_type: String,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, token_type: Option<&str>) -> Self {
        let token_type = match token_type {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_TOKEN_TYPE.to_string(),
        };
        Self {
            token: token.into(),
            token_type,
        }
    }

    /// Decodes the JWT payload.
    pub fn claims(&self) -> Result<Value, ClientError> {
        decode_claims(&self.token)
    }

    /// Admin key carried in the `clientId` claim.
    pub fn admin_key(&self) -> Result<String, ClientError> {
        let claims = self.claims()?;
        match claims.get(CLIENT_ID_CLAIM) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(ClientError::Token(format!(
                "unexpected access token: '{}' should be specified",
                CLIENT_ID_CLAIM
            ))),
        }
    }
}

/// Decodes the payload (second part) of a JWT.
pub fn decode_claims(token: &str) -> Result<Value, ClientError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 3 {
        return Err(ClientError::Token("invalid access token".to_string()));
    }
    let payload = parts[1];
    let raw = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(payload))
        .map_err(|e| ClientError::Token(format!("invalid access token payload: {}", e)))?;
    let claims: Value = serde_json::from_slice(&raw)
        .map_err(|e| ClientError::Token(format!("invalid access token claims: {}", e)))?;
    if !claims.is_object() {
        return Err(ClientError::Token("invalid access token claims".to_string()));
    }
    Ok(claims)
}

/// OAuth2 client-credentials settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFlow {
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct TokenReply {
    access_token: Option<String>,
    token_type: Option<String>,
}

impl TokenFlow {
    pub fn new(
        auth_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn request(&self) -> Result<HttpRequest, ClientError> {
        let body = FormBody::new()
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("grant_type", "client_credentials")
            .finish();
        Ok(HttpRequest {
            url: Url::parse(&self.auth_url)?,
            headers: vec![
                ("Content-Type".to_string(), CONTENT_TYPE_FORM.to_string()),
                (
                    "Cache-Control".to_string(),
                    "no-cache, no-store, must-revalidate".to_string(),
                ),
                ("Pragma".to_string(), "no-cache".to_string()),
                ("Expires".to_string(), "0".to_string()),
            ],
            body: Bytes::from(body),
        })
    }

    /// Requests a fresh token from the authorization server.
    pub fn fetch(&self, exchange: &dyn HttpExchange) -> Result<AccessToken, ClientError> {
        tracing::debug!("Requesting access token from {}", self.auth_url);
        let reply = exchange.exchange(&self.request()?)?;
        if reply.status != 200 {
            return Err(ClientError::Token(format!(
                "invalid auth server response: {}",
                reply.status
            )));
        }
        let parsed: TokenReply = serde_json::from_slice(&reply.body)
            .map_err(|e| ClientError::Token(format!("invalid auth server response: {}", e)))?;
        let token = parsed
            .access_token
            .ok_or_else(|| ClientError::Token("undefined access token".to_string()))?;
        tracing::debug!("Access token received");
        Ok(AccessToken::new(token, parsed.token_type.as_deref()))
    }
}
