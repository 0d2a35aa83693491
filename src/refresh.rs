use url::form_urlencoded;

use crate::error::Error;
use crate::types::{ApplicationSecret, Token, TokenResponse};

/// Implements the [OAuth2 Refresh Token Flow](https://developers.google.com/identity/protocols/oauth2/web-server#offline).
///
/// Refreshes an expired access token, as obtained by the consent flow.
/// Useful whenever a stored `Token` is expired: it produces a new, valid
/// one without user interaction.
pub(crate) struct RefreshFlow;

impl RefreshFlow {
    /// Attempt to refresh the given token, and obtain a new, valid one.
    ///
    /// An `Error::Auth` result means the refresh token is invalid or the
    /// authorization was revoked; no further attempt shall be made, and the
    /// caller will have to re-run the consent flow. A connection-level
    /// error may be retried at the caller's discretion.
    pub(crate) fn refresh_token(
        http: &reqwest::blocking::Client,
        secret: &ApplicationSecret,
        token: &Token,
        refresh_token: &str,
    ) -> Result<Token, Error> {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&[
                ("client_id", secret.client_id.as_str()),
                ("client_secret", secret.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .finish();
        log::debug!("Refreshing token at {}", secret.token_uri);
        let resp = http
            .post(&secret.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()?;
        let body = resp.bytes()?;
        let mut refreshed = TokenResponse::from_json(&body)?.into_token(&token.scopes);
        // If the refresh result contains a refresh_token use it, otherwise
        // continue using our previous refresh_token.
        refreshed
            .refresh_token
            .get_or_insert_with(|| refresh_token.to_owned());
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper;

    fn app_secret(token_uri: String) -> ApplicationSecret {
        let mut secret = helper::parse_application_secret(crate::types::tests::SECRET).unwrap();
        secret.token_uri = token_uri;
        secret
    }

    fn stale_token() -> Token {
        Token {
            access_token: "stale-access-token".to_string(),
            refresh_token: Some("my-refresh-token".to_string()),
            expires_at: Some(chrono::Utc::now()),
            scopes: vec!["https://www.googleapis.com/auth/youtube.readonly".to_string()],
        }
    }

    #[test]
    fn test_refresh_end2end() {
        let mut server = mockito::Server::new();
        let secret = app_secret(format!("{}/token", server.url()));
        let http = reqwest::blocking::Client::new();
        let token = stale_token();

        // Success; the reply carries no refresh_token, so the old one is kept.
        {
            let m = server
                .mock("POST", "/token")
                .match_body(mockito::Matcher::AllOf(vec![
                    mockito::Matcher::Regex(".*grant_type=refresh_token.*".to_string()),
                    mockito::Matcher::Regex(".*refresh_token=my-refresh-token.*".to_string()),
                ]))
                .with_status(200)
                .with_body(
                    r#"{"access_token": "new-access-token", "token_type": "Bearer", "expires_in": 3600}"#,
                )
                .create();
            let refreshed =
                RefreshFlow::refresh_token(&http, &secret, &token, "my-refresh-token")
                    .expect("refresh failed");
            assert_eq!("new-access-token", refreshed.access_token);
            assert_eq!(Some("my-refresh-token".to_string()), refreshed.refresh_token);
            assert_eq!(token.scopes, refreshed.scopes);
            assert!(!refreshed.expired());
            m.assert();
        }

        // Refresh refused by the server.
        {
            let m = server
                .mock("POST", "/token")
                .with_status(400)
                .with_body(r#"{"error": "invalid_grant"}"#)
                .create();
            let rr = RefreshFlow::refresh_token(&http, &secret, &token, "my-refresh-token");
            match rr {
                Err(Error::Auth(auth_error)) => assert_eq!(auth_error.error, "invalid_grant"),
                other => panic!("unexpected refresh result {:?}", other.map(|t| t.access_token)),
            }
            m.assert();
        }
    }
}
