use std::io;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthErrorOr;

/// Leeway subtracted from the expiry timestamp so a token is not used
/// moments before the server would reject it.
const EXPIRY_LEEWAY_SECONDS: i64 = 60;

/// An OAuth 2 access scope. See
/// <https://developers.google.com/identity/protocols/oauth2/scopes#youtube>.
pub mod scopes {
    /// Full read/write access to the authenticated user's account.
    pub const YOUTUBE: &str = "https://www.googleapis.com/auth/youtube";
    /// Read-only access, e.g. for listing a channel's uploads.
    pub const YOUTUBE_READONLY: &str = "https://www.googleapis.com/auth/youtube.readonly";
    /// A limited scope that allows for uploading files, but not other types
    /// of account access.
    pub const YOUTUBE_UPLOAD: &str = "https://www.googleapis.com/auth/youtube.upload";
    /// Read access to YouTube Analytics reports.
    pub const YT_ANALYTICS_READONLY: &str =
        "https://www.googleapis.com/auth/yt-analytics.readonly";
}

/// Represents a token as returned by OAuth2 servers, together with the
/// scopes it was issued for.
///
/// It is produced by the consent and refresh flows. It authorizes certain
/// operations, and must be refreshed once it reached its expiry date.
///
/// The type is suitable for serialization into a token store and reuse
/// across runs; expiry is recorded in absolute terms for that reason.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Token {
    /// Used when authorizing calls to oauth2 enabled services.
    pub access_token: String,
    /// Used to refresh an expired access_token.
    pub refresh_token: Option<String>,
    /// The time when the token expires. A token without a recorded expiry
    /// is treated as non-expiring.
    pub expires_at: Option<DateTime<Utc>>,
    /// The scopes the token was issued for, sorted.
    pub scopes: Vec<String>,
}

impl Token {
    /// Returns true if the token is expired or about to expire.
    ///
    /// A token whose expiry equals the current instant counts as expired.
    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                expires_at - Duration::seconds(EXPIRY_LEEWAY_SECONDS) <= Utc::now()
            }
            None => false,
        }
    }

    /// Returns true if the token's scope set covers every requested scope.
    pub fn covers<T>(&self, scopes: &[T]) -> bool
    where
        T: AsRef<str>,
    {
        scopes
            .iter()
            .all(|s| self.scopes.iter().any(|have| have == s.as_ref()))
    }
}

/// The wire shape of a successful token endpoint response.
#[derive(Deserialize, Debug)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Relative expiry in seconds, converted to an absolute timestamp on
    /// receipt.
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    pub(crate) fn from_json(body: &[u8]) -> Result<TokenResponse, crate::error::Error> {
        let resp: AuthErrorOr<TokenResponse> = serde_json::from_slice(body)?;
        Ok(resp.into_result()?)
    }

    /// Converts the server reply into a storable token for the given scopes.
    pub(crate) fn into_token<T>(self, scopes: &[T]) -> Token
    where
        T: AsRef<str>,
    {
        let mut scopes: Vec<String> = scopes.iter().map(|s| s.as_ref().to_string()).collect();
        scopes.sort();
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes,
        }
    }
}

/// Represents either 'installed' or 'web' applications in a json secrets
/// file. See `ConsoleApplicationSecret` for more information.
#[derive(Deserialize, Serialize, Clone, Default, Debug)]
pub struct ApplicationSecret {
    /// The client ID.
    pub client_id: String,
    /// The client secret.
    pub client_secret: String,
    /// The token server endpoint URI.
    pub token_uri: String,
    /// The authorization server endpoint URI.
    pub auth_uri: String,
    /// The redirect uris registered for the application.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Name of the project the credentials are associated with.
    pub project_id: Option<String>,
    /// The service account email associated with the client.
    pub client_email: Option<String>,
    /// The URL of the public x509 certificate, used to verify the signature
    /// on JWTs, such as ID tokens, signed by the authentication provider.
    pub auth_provider_x509_cert_url: Option<String>,
    /// The URL of the public x509 certificate, used to verify JWTs signed
    /// by the client.
    pub client_x509_cert_url: Option<String>,
}

impl ApplicationSecret {
    /// Checks that the fields every flow depends on are populated.
    pub(crate) fn validate(&self) -> Result<(), crate::error::Error> {
        if self.client_id.is_empty()
            || self.client_secret.is_empty()
            || self.token_uri.is_empty()
            || self.auth_uri.is_empty()
        {
            return Err(crate::error::Error::Configuration(
                "client secret is missing client_id, client_secret, token_uri or auth_uri; \
                 populate your client_secrets.json from the API console \
                 (https://console.developers.google.com)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// A type to facilitate reading and writing the json secret file as
/// returned by the [google developer console](https://console.developers.google.com).
#[derive(Deserialize, Serialize, Default, Debug)]
pub struct ConsoleApplicationSecret {
    /// The secret of a 'web' application.
    pub web: Option<ApplicationSecret>,
    /// The secret of an 'installed' application.
    pub installed: Option<ApplicationSecret>,
}

pub(crate) fn json_io_error(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}
