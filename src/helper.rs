//! Helper functions for reading the client application identity from disk.

use std::io;
use std::path::Path;

use crate::types::{ApplicationSecret, ConsoleApplicationSecret};

/// Read an application secret from a file, e.g. the `client_secrets.json`
/// produced by the [google developer console](https://console.developers.google.com).
pub fn read_application_secret<P: AsRef<Path>>(path: P) -> io::Result<ApplicationSecret> {
    parse_application_secret(std::fs::read_to_string(path)?)
}

/// Parse an application secret from a JSON string.
pub fn parse_application_secret<S: AsRef<str>>(secret: S) -> io::Result<ApplicationSecret> {
    let decoded: ConsoleApplicationSecret = serde_json::from_str(secret.as_ref())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if let Some(installed) = decoded.installed {
        Ok(installed)
    } else if let Some(web) = decoded.web {
        Ok(web)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client secret contains neither an `installed` nor a `web` section",
        ))
    }
}

/// Joins the stringy items with the given separator.
pub(crate) fn join<T>(pieces: &[T], separator: &str) -> String
where
    T: AsRef<str>,
{
    let mut iter = pieces.iter();
    let first = match iter.next() {
        Some(p) => p,
        None => return String::new(),
    };
    let size = pieces.iter().map(|p| p.as_ref().len()).sum::<usize>()
        + separator.len() * (pieces.len() - 1);
    let mut result = String::with_capacity(size);
    result.push_str(first.as_ref());
    for p in iter {
        result.push_str(separator);
        result.push_str(p.as_ref());
    }
    result
}
