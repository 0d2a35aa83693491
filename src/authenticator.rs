//! A generalized authenticator which keeps tokens valid and stores them.

use std::time::Duration;

use serde_json::Value;

use crate::error::Error;
use crate::installed::{ConsentDelegate, ConsentFlow, DefaultConsentDelegate, ReturnMethod};
use crate::refresh::RefreshFlow;
use crate::storage::{MemoryStorage, TokenStorage};
use crate::types::{ApplicationSecret, Token};

/// The go-to helper for obtaining authorized access to an OAuth2-protected
/// API, while keeping interactive consent prompts to a minimum.
///
/// For every requested scope set the authenticator first consults its
/// token storage; a stored token is used as long as it is not expired and
/// its scope set covers the requested one. An expired token is silently
/// refreshed when possible. Only when no usable token can be produced
/// without the user does the interactive consent flow run.
pub struct Authenticator<S> {
    secret: ApplicationSecret,
    storage: S,
    client: reqwest::blocking::Client,
    consent: ConsentFlow,
}

/// Configures an [`Authenticator`]. Created through
/// [`Authenticator::builder`].
pub struct AuthenticatorBuilder<S> {
    secret: ApplicationSecret,
    storage: S,
    delegate: Box<dyn ConsentDelegate>,
    method: ReturnMethod,
    consent_timeout: Option<Duration>,
    client: Option<reqwest::blocking::Client>,
}

impl Authenticator<MemoryStorage> {
    /// Starts building an authenticator for the given client application
    /// identity. Unless configured otherwise, tokens are cached in memory
    /// for the duration of the process and the consent flow presents its
    /// URL on stdout, reading the code from stdin.
    pub fn builder(secret: ApplicationSecret) -> AuthenticatorBuilder<MemoryStorage> {
        AuthenticatorBuilder {
            secret,
            storage: MemoryStorage::new(),
            delegate: Box::new(DefaultConsentDelegate),
            method: ReturnMethod::Interactive,
            consent_timeout: None,
            client: None,
        }
    }
}

impl<S> AuthenticatorBuilder<S> {
    /// Uses `storage` to persist tokens across runs.
    pub fn storage<S2: TokenStorage>(self, storage: S2) -> AuthenticatorBuilder<S2> {
        AuthenticatorBuilder {
            secret: self.secret,
            storage,
            delegate: self.delegate,
            method: self.method,
            consent_timeout: self.consent_timeout,
            client: self.client,
        }
    }

    /// Customizes how the authorization URL is presented to the user.
    pub fn consent_delegate(mut self, delegate: Box<dyn ConsentDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    /// Selects how the authorization code finds its way back to us.
    pub fn return_method(mut self, method: ReturnMethod) -> Self {
        self.method = method;
        self
    }

    /// Bounds how long the consent flow waits for the user. Without a
    /// timeout the flow blocks until the user acts or input ends.
    pub fn consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = Some(timeout);
        self
    }

    /// Uses an existing HTTP client instead of constructing one.
    pub fn http_client(mut self, client: reqwest::blocking::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Finishes the builder. Fails with [`Error::Configuration`] if the
    /// client identity lacks the fields the flows depend on.
    pub fn build(self) -> Result<Authenticator<S>, Error>
    where
        S: TokenStorage,
    {
        self.secret.validate()?;
        let client = match self.client {
            Some(client) => client,
            None => reqwest::blocking::Client::builder().build()?,
        };
        Ok(Authenticator {
            secret: self.secret,
            storage: self.storage,
            client,
            consent: ConsentFlow {
                method: self.method,
                delegate: self.delegate,
                timeout: self.consent_timeout,
            },
        })
    }
}

impl<S: TokenStorage> Authenticator<S> {
    /// Produces a transport authorized for the given scopes, engaging the
    /// interactive consent flow only if the store holds no usable token
    /// under `storage_key`.
    ///
    /// Blocks until a token was retrieved from storage, refreshed, or
    /// granted by the user. Re-consent requests exactly the scopes given
    /// here; previously granted scopes not in the set are dropped from the
    /// stored credential rather than unioned in.
    pub fn authorize<T>(&self, scopes: &[T], storage_key: &str) -> Result<AuthorizedTransport, Error>
    where
        T: AsRef<str>,
    {
        let token = self.token(scopes, storage_key)?;
        Ok(AuthorizedTransport {
            client: self.client.clone(),
            token,
        })
    }

    /// The token-producing core of [`Self::authorize`]. Guaranteed to
    /// return a token valid for the given scopes.
    pub fn token<T>(&self, scopes: &[T], storage_key: &str) -> Result<Token, Error>
    where
        T: AsRef<str>,
    {
        if scopes.is_empty() {
            return Err(Error::UserError(
                "at least one scope is required".to_string(),
            ));
        }

        // An unreadable store must not block authorization; a fresh
        // consent flow can still produce a credential.
        let cached = match self.storage.get(storage_key) {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("token store unreadable ({}); running consent flow", e);
                None
            }
        };

        if let Some(token) = cached {
            if !token.covers(scopes) {
                log::debug!("cached token does not cover the requested scopes");
            } else if !token.expired() {
                log::debug!("using cached token for {}", storage_key);
                return Ok(token);
            } else if let Some(refresh_token) = token.refresh_token.clone() {
                match RefreshFlow::refresh_token(&self.client, &self.secret, &token, &refresh_token)
                {
                    Ok(fresh) => {
                        self.storage.set(storage_key, &fresh)?;
                        return Ok(fresh);
                    }
                    Err(Error::Auth(e)) => {
                        // Refresh token revoked or expired; only a new
                        // consent can help. The stored record is left in
                        // place until the new one replaces it.
                        log::warn!("token refresh refused ({}); running consent flow", e);
                    }
                    Err(e) => return Err(e),
                }
            } else {
                log::debug!("cached token is expired and has no refresh token");
            }
        }

        let token = self
            .consent
            .obtain_token(&self.client, &self.secret, scopes)?;
        self.storage.set(storage_key, &token)?;
        Ok(token)
    }

    /// Drops the credential cached under `storage_key`, forcing the next
    /// `authorize` to run the consent flow.
    pub fn forget(&self, storage_key: &str) -> Result<(), Error> {
        Ok(self.storage.delete(storage_key)?)
    }
}

/// An HTTP handle bound to an authorized token. Requests issued through it
/// carry the token as a Bearer authorization header; the raw token itself
/// is not exposed.
pub struct AuthorizedTransport {
    client: reqwest::blocking::Client,
    token: Token,
}

impl AuthorizedTransport {
    /// Issues a request against the remote API, returning the decoded JSON
    /// body. Any non-success status is surfaced as
    /// [`Error::Remote`] carrying the server's message verbatim; no retry
    /// is attempted.
    pub fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        log::debug!("{} {}", method, url);
        let mut req = self
            .client
            .request(method, url)
            .query(params)
            .bearer_auth(&self.token.access_token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send()?;
        let status = resp.status();
        let bytes = resp.bytes()?;
        if !status.is_success() {
            return Err(Error::Remote {
                status: status.as_u16(),
                message: remote_message(&bytes),
            });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `GET` convenience wrapper around [`Self::request`].
    pub fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, Error> {
        self.request(reqwest::Method::GET, url, params, None)
    }

    /// `POST` convenience wrapper around [`Self::request`].
    pub fn post(&self, url: &str, params: &[(&str, &str)], body: &Value) -> Result<Value, Error> {
        self.request(reqwest::Method::POST, url, params, Some(body))
    }

    /// `PUT` convenience wrapper around [`Self::request`].
    pub fn put(&self, url: &str, params: &[(&str, &str)], body: &Value) -> Result<Value, Error> {
        self.request(reqwest::Method::PUT, url, params, Some(body))
    }

    /// The scopes the underlying token was issued for.
    pub fn scopes(&self) -> &[String] {
        &self.token.scopes
    }
}

/// Extracts a human-readable message from an API error body. The Google
/// APIs answer with `{"error": {"code": ..., "message": ...}}`; plain
/// OAuth endpoints answer with `{"error": "..."}`. Anything else is
/// surfaced as-is.
fn remote_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = value["error"]["message"].as_str() {
            return message.to_string();
        }
        if let Some(error) = value["error"].as_str() {
            return error.to_string();
        }
    }
    String::from_utf8_lossy(body).into_owned()
}
