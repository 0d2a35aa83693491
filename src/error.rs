//! Module containing various error types.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use serde::Deserialize;

/// The error body OAuth2 servers answer with when a token request is
/// refused, e.g. `{"error": "invalid_grant"}`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AuthError {
    /// Error code, e.g. `invalid_grant`.
    pub error: String,
    /// More detailed description of the error.
    pub error_description: Option<String>,
    /// URL identifying a human-readable web page with information about the error.
    pub error_uri: Option<String>,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        self.error.fmt(f)?;
        if let Some(ref desc) = self.error_description {
            write!(f, ": {}", desc)?;
        }
        Ok(())
    }
}

impl StdError for AuthError {}

/// A helper type to deserialize either an AuthError or another piece of data.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub(crate) enum AuthErrorOr<T> {
    Err(AuthError),
    Data(T),
}

impl<T> AuthErrorOr<T> {
    pub(crate) fn into_result(self) -> Result<T, AuthError> {
        match self {
            AuthErrorOr::Err(err) => Result::Err(err),
            AuthErrorOr::Data(value) => Result::Ok(value),
        }
    }
}

/// Encapsulates all possible results of the `authorize(...)` operation and
/// of requests issued through an authorized transport.
#[derive(Debug)]
pub enum Error {
    /// No usable client application identity was configured.
    Configuration(String),
    /// Error within user input, e.g. an empty scope set or an out-of-range
    /// page size.
    UserError(String),
    /// The user declined consent, or the consent flow timed out or could
    /// not complete.
    AuthorizationDenied(String),
    /// The token store could not be read or written.
    Persistence(io::Error),
    /// Non-success response from the remote API, surfaced verbatim.
    Remote {
        /// The HTTP status code of the response.
        status: u16,
        /// The server's error message, or the raw body if no message could
        /// be extracted.
        message: String,
    },
    /// Connection-level failure.
    Connection(reqwest::Error),
    /// Error while decoding a JSON response.
    Json(serde_json::Error),
    /// The authorization server rejected a token request.
    Auth(AuthError),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Error {
        Error::Connection(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Error {
        Error::Json(value)
    }
}

impl From<AuthError> for Error {
    fn from(value: AuthError) -> Error {
        Error::Auth(value)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Error {
        Error::Persistence(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            Error::Configuration(ref s) => write!(f, "Configuration error: {}", s),
            Error::UserError(ref s) => s.fmt(f),
            Error::AuthorizationDenied(ref s) => write!(f, "Authorization denied: {}", s),
            Error::Persistence(ref e) => write!(f, "Token storage error: {}", e),
            Error::Remote {
                status,
                ref message,
            } => write!(f, "Remote request failed with status {}: {}", status, message),
            Error::Connection(ref e) => e.fmt(f),
            Error::Json(ref e) => write!(
                f,
                "JSON Error; this might be a bug with unexpected server responses! {}",
                e
            ),
            Error::Auth(ref e) => write!(f, "Authorization server error: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Persistence(ref err) => Some(err),
            Error::Connection(ref err) => Some(err),
            Error::Json(ref err) => Some(err),
            Error::Auth(ref err) => Some(err),
            _ => None,
        }
    }
}
