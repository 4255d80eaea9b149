//! Credential state.
//!
//! A client signs either with its secret key (HMAC) or with a bearer access
//! token, never both. Installing a token clears the secret key and adopts
//! the admin key named by the token.

use crate::config::ConfigError;
use crate::error::ClientError;
use crate::token::{AccessToken, TokenFlow};
use mdtsdb_protocol::signature::{payload_digest, sign};
use mdtsdb_protocol::{AuthScheme, Authorization, Role, SigningKey};
use parking_lot::RwLock;

/// Keys and token of one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    app_key: String,
    admin_key: String,
    secret_key: String,
    access_token: Option<AccessToken>,
}

impl Credentials {
    pub fn new(
        app_key: impl Into<String>,
        admin_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            admin_key: admin_key.into(),
            secret_key: secret_key.into(),
            access_token: None,
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn admin_key(&self) -> &str {
        &self.admin_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    /// The application key, or the admin key when no application key is set.
    pub fn user_key(&self) -> &str {
        if self.app_key.is_empty() {
            &self.admin_key
        } else {
            &self.app_key
        }
    }

    /// Installs a bearer token.
    ///
    /// The token must be a JWT whose `clientId` claim becomes the admin key.
    pub fn set_access_token(&mut self, token: AccessToken) -> Result<(), ClientError> {
        let admin_key = token.admin_key()?;
        self.admin_key = admin_key;
        self.secret_key.clear();
        self.access_token = Some(token);
        Ok(())
    }

    /// Resolves the signing key and role for a route.
    pub fn signing_key(&self, which: SigningKey) -> (&str, Role) {
        match which {
            SigningKey::Admin => (&self.admin_key, Role::Admin),
            SigningKey::AppOrAdmin if self.app_key.is_empty() => (&self.admin_key, Role::Admin),
            SigningKey::AppOrAdmin => (&self.app_key, Role::Service),
        }
    }

    /// Builds the Authorization value for a request.
    pub fn authorize(
        &self,
        which: SigningKey,
        scheme: AuthScheme,
        api_method: &str,
        path: &str,
        content_type: &str,
        payload_digest_hex: &str,
    ) -> Result<Authorization, ClientError> {
        if let Some(token) = &self.access_token {
            return Ok(Authorization::bearer(Some(&token.token_type), token.token.clone()));
        }

        let (key, role) = self.signing_key(which);
        if key.is_empty() {
            return Err(ConfigError::ValidationError(
                "no key available to sign the request".to_string(),
            )
            .into());
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::ValidationError("secret key is not set".to_string()).into());
        }

        Ok(Authorization::Signed {
            scheme,
            signing_key: key.to_string(),
            signature: sign(
                api_method,
                key,
                &self.secret_key,
                path,
                payload_digest_hex,
                content_type,
            ),
            role,
            api_method: api_method.to_string(),
        })
    }

    /// Authorization for a body-less exchange (WebSocket upgrade).
    pub fn authorize_empty(
        &self,
        which: SigningKey,
        api_method: &str,
        path: &str,
    ) -> Result<Authorization, ClientError> {
        self.authorize(
            which,
            AuthScheme::Standard,
            api_method,
            path,
            "",
            &payload_digest(b""),
        )
    }
}

/// Credentials shared behind a lock, plus the optional token flow.
#[derive(Debug, Default)]
pub struct CredentialState {
    credentials: RwLock<Credentials>,
    flow: RwLock<Option<TokenFlow>>,
}

impl CredentialState {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            flow: RwLock::new(None),
        }
    }

    /// Snapshot of the current credentials.
    pub fn snapshot(&self) -> Credentials {
        self.credentials.read().clone()
    }

    pub fn set_flow(&self, flow: TokenFlow) {
        *self.flow.write() = Some(flow);
    }

    pub fn flow(&self) -> Option<TokenFlow> {
        self.flow.read().clone()
    }

    pub fn has_flow(&self) -> bool {
        self.flow.read().is_some()
    }

    pub fn set_access_token(&self, token: AccessToken) -> Result<(), ClientError> {
        self.credentials.write().set_access_token(token)
    }

    pub fn has_access_token(&self) -> bool {
        self.credentials.read().access_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::jwt;
    use mdtsdb_protocol::signature::{coarse_timestamp, sign_at};
    use chrono::Utc;

    #[test]
    fn test_signing_key_selection() {
        let creds = Credentials::new("app", "", "secret");
        assert_eq!(creds.signing_key(SigningKey::AppOrAdmin), ("app", Role::Service));
        assert_eq!(creds.user_key(), "app");

        let creds = Credentials::new("", "adm", "secret");
        assert_eq!(creds.signing_key(SigningKey::AppOrAdmin), ("adm", Role::Admin));
        assert_eq!(creds.signing_key(SigningKey::Admin), ("adm", Role::Admin));
        assert_eq!(creds.user_key(), "adm");
    }

    #[test]
    fn test_authorize_signed() {
        let creds = Credentials::new("app", "", "secret");
        let digest = payload_digest(b"q=1");
        let ts = coarse_timestamp(Utc::now());
        let auth = creds
            .authorize(
                SigningKey::AppOrAdmin,
                AuthScheme::Standard,
                "ql",
                "api/v1/ql",
                "application/x-www-form-urlencoded",
                &digest,
            )
            .unwrap();
        match auth {
            Authorization::Signed {
                signing_key,
                signature,
                role,
                ..
            } => {
                assert_eq!(signing_key, "app");
                assert_eq!(role, Role::Service);
                let expected = |t| {
                    sign_at(t, "ql", "app", "secret", "api/v1/ql", "application/x-www-form-urlencoded", &digest)
                };
                // the minute may roll over between the two clock reads
                assert!(signature == expected(ts) || signature == expected(ts + 1));
            }
            other => panic!("unexpected authorization: {:?}", other),
        }
    }

    #[test]
    fn test_authorize_requires_keys() {
        let creds = Credentials::new("app", "", "");
        let err = creds
            .authorize(SigningKey::AppOrAdmin, AuthScheme::Standard, "ql", "p", "", "d")
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Config(ConfigError::ValidationError(_))
        ));

        let creds = Credentials::new("app", "", "secret");
        let err = creds
            .authorize(SigningKey::Admin, AuthScheme::Standard, "newApiKey", "p", "", "d")
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Config(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_access_token_replaces_secret() {
        let mut creds = Credentials::new("", "old", "secret");
        let token = AccessToken::new(jwt(&serde_json::json!({"clientId": "adm2"})), None);
        creds.set_access_token(token.clone()).unwrap();

        assert_eq!(creds.admin_key(), "adm2");
        assert_eq!(creds.secret_key(), "");
        let auth = creds
            .authorize(SigningKey::Admin, AuthScheme::Standard, "newApiKey", "p", "", "d")
            .unwrap();
        assert_eq!(auth.to_string(), format!("Bearer {}", token.token));
    }

    #[test]
    fn test_invalid_token_leaves_state() {
        let mut creds = Credentials::new("", "old", "secret");
        let token = AccessToken::new("not-a-jwt", None);
        assert!(creds.set_access_token(token).is_err());
        assert_eq!(creds.admin_key(), "old");
        assert_eq!(creds.secret_key(), "secret");
    }

    #[test]
    fn test_credential_state() {
        let state = CredentialState::new(Credentials::new("app", "", "s"));
        assert!(!state.has_flow());
        state.set_flow(TokenFlow::new("http://auth", "id", "secret"));
        assert!(state.has_flow());
        assert!(!state.has_access_token());
        assert_eq!(state.snapshot().app_key(), "app");
    }
}
