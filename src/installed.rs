//! The "installed application" consent flow: present an authorization URL
//! to the user, capture the authorization code they grant, and exchange it
//! for a token. (See <https://www.oauth.com/oauth2-servers/authorization/>,
//! <https://developers.google.com/identity/protocols/OAuth2InstalledApp>).

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use url::form_urlencoded;
use url::Url;

use crate::error::Error;
use crate::types::{ApplicationSecret, Token, TokenResponse};

const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Interval at which the redirect listener checks for cancellation and
/// timeout between connection attempts.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Assembles a URL to request an authorization code (with user interaction).
///
/// `access_type=offline` and `prompt=consent` ensure the provider issues a
/// refresh token, so the credential can be renewed without further
/// interaction. Note that the redirect_uri has to be either the OOB URI or
/// some variation of http://localhost:{port}, or the authorization won't
/// work (error "redirect_uri_mismatch").
fn build_authentication_request_url<T>(
    auth_uri: &str,
    client_id: &str,
    scopes: &[T],
    redirect_uri: &str,
) -> Result<String, Error>
where
    T: AsRef<str>,
{
    let scopes_string = crate::helper::join(scopes, " ");
    let mut url = Url::parse(auth_uri)
        .map_err(|e| Error::Configuration(format!("invalid auth_uri '{}': {}", auth_uri, e)))?;
    url.query_pairs_mut()
        .append_pair("scope", &scopes_string)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id);
    Ok(url.into())
}

/// Method by which the user agent returns the authorization code to this
/// application.
///
/// cf. <https://developers.google.com/identity/protocols/OAuth2InstalledApp#choosingredirecturi>
pub enum ReturnMethod {
    /// Involves showing a URL to the user and asking to copy a code from
    /// their browser (default).
    Interactive,
    /// Involves spinning up a local HTTP server on a random port and the
    /// provider redirecting the browser to it with a URL containing the
    /// code (preferred, but not as reliable).
    HttpRedirect,
    /// Identical to [Self::HttpRedirect], but allows a port to be specified
    /// for the server, instead of choosing a port randomly.
    HttpPortRedirect(u16),
}

/// How a consent attempt concluded from the delegate's point of view.
pub enum ConsentOutcome {
    /// The user granted access; carries the authorization code.
    Granted(String),
    /// The user declined, or gave up before granting access.
    Cancelled,
}

/// ConsentDelegate methods are called when the consent flow needs to ask
/// the application what to do, most importantly to present the
/// authorization URL to the user. Implement it to customize how the URL is
/// shown and how the code comes back.
pub trait ConsentDelegate: Send {
    /// Configure a custom redirect uri if needed.
    fn redirect_uri(&self) -> Option<&str> {
        None
    }

    /// We need the user to navigate to `url` using their browser and
    /// potentially paste back a code (or maybe not). Whether they have to
    /// enter a code depends on the `ReturnMethod` used; with a redirect
    /// listener the return value other than `Cancelled` is ignored.
    ///
    /// `timeout` bounds how long the implementation should wait for the
    /// user; `None` means wait indefinitely.
    fn present_user_url(
        &self,
        url: &str,
        need_code: bool,
        timeout: Option<Duration>,
    ) -> io::Result<ConsentOutcome>;
}

/// Presents the URL on stdout and reads the code from stdin. An empty line
/// or end-of-input counts as cancellation.
pub struct DefaultConsentDelegate;

impl ConsentDelegate for DefaultConsentDelegate {
    fn present_user_url(
        &self,
        url: &str,
        need_code: bool,
        timeout: Option<Duration>,
    ) -> io::Result<ConsentOutcome> {
        if !need_code {
            println!(
                "Please direct your browser to {} and follow the instructions displayed there.",
                url
            );
            return Ok(ConsentOutcome::Granted(String::new()));
        }
        println!(
            "Please direct your browser to {}, follow the instructions and enter the code \
             displayed here: ",
            url
        );
        let line = match timeout {
            None => {
                let mut line = String::new();
                io::stdin().lock().read_line(&mut line)?;
                line
            }
            Some(timeout) => {
                // Reading stdin is not interruptible; take the line on a
                // helper thread and give up if it does not arrive in time.
                let (tx, rx) = mpsc::channel();
                thread::spawn(move || {
                    let mut line = String::new();
                    let res = io::stdin().lock().read_line(&mut line).map(|_| line);
                    let _ = tx.send(res);
                });
                match rx.recv_timeout(timeout) {
                    Ok(res) => res?,
                    Err(_) => return Ok(ConsentOutcome::Cancelled),
                }
            }
        };
        let code = line.trim();
        if code.is_empty() {
            Ok(ConsentOutcome::Cancelled)
        } else {
            Ok(ConsentOutcome::Granted(code.to_string()))
        }
    }
}

/// Runs the consent flow for a scope set: obtain an authorization code with
/// user cooperation or a local redirect, then exchange it for a token.
pub(crate) struct ConsentFlow {
    pub(crate) method: ReturnMethod,
    pub(crate) delegate: Box<dyn ConsentDelegate>,
    pub(crate) timeout: Option<Duration>,
}

impl ConsentFlow {
    pub(crate) fn obtain_token<T>(
        &self,
        http: &reqwest::blocking::Client,
        secret: &ApplicationSecret,
        scopes: &[T],
    ) -> Result<Token, Error>
    where
        T: AsRef<str>,
    {
        match self.method {
            ReturnMethod::Interactive => self.ask_auth_code_interactively(http, secret, scopes),
            ReturnMethod::HttpRedirect => self.ask_auth_code_via_http(http, None, secret, scopes),
            ReturnMethod::HttpPortRedirect(port) => {
                self.ask_auth_code_via_http(http, Some(port), secret, scopes)
            }
        }
    }

    fn ask_auth_code_interactively<T>(
        &self,
        http: &reqwest::blocking::Client,
        secret: &ApplicationSecret,
        scopes: &[T],
    ) -> Result<Token, Error>
    where
        T: AsRef<str>,
    {
        let redirect_uri = self.delegate.redirect_uri().unwrap_or(OOB_REDIRECT_URI);
        let url = build_authentication_request_url(
            &secret.auth_uri,
            &secret.client_id,
            scopes,
            redirect_uri,
        )?;
        log::debug!("Presenting auth url to user: {}", url);
        let outcome = self
            .delegate
            .present_user_url(&url, true /* need code */, self.timeout)
            .map_err(|e| Error::AuthorizationDenied(format!("could not read consent: {}", e)))?;
        let auth_code = match outcome {
            ConsentOutcome::Granted(code) => code,
            ConsentOutcome::Cancelled => {
                return Err(Error::AuthorizationDenied(
                    "user cancelled the consent flow".to_string(),
                ))
            }
        };
        log::debug!("Received auth code: {}", auth_code);
        exchange_auth_code(http, secret, &auth_code, redirect_uri, scopes)
    }

    fn ask_auth_code_via_http<T>(
        &self,
        http: &reqwest::blocking::Client,
        port: Option<u16>,
        secret: &ApplicationSecret,
        scopes: &[T],
    ) -> Result<Token, Error>
    where
        T: AsRef<str>,
    {
        let server = RedirectServer::bind(port).map_err(|e| {
            Error::AuthorizationDenied(format!("could not start the redirect listener: {}", e))
        })?;
        // The redirect URI must be this very localhost URL, otherwise
        // authorization is refused by certain providers.
        let redirect_uri = match self.delegate.redirect_uri() {
            Some(uri) => uri.to_string(),
            None => format!("http://{}", server.local_addr()),
        };
        let url = build_authentication_request_url(
            &secret.auth_uri,
            &secret.client_id,
            scopes,
            &redirect_uri,
        )?;
        log::debug!("Presenting auth url to user: {}", url);
        match self
            .delegate
            .present_user_url(&url, false /* need code */, self.timeout)
        {
            Ok(ConsentOutcome::Granted(_)) => {}
            Ok(ConsentOutcome::Cancelled) => {
                return Err(Error::AuthorizationDenied(
                    "user cancelled the consent flow".to_string(),
                ))
            }
            Err(e) => {
                return Err(Error::AuthorizationDenied(format!(
                    "could not present the authorization url: {}",
                    e
                )))
            }
        }
        let auth_code = match server.wait_for_auth_code(self.timeout) {
            Ok(ConsentOutcome::Granted(code)) => code,
            Ok(ConsentOutcome::Cancelled) => {
                return Err(Error::AuthorizationDenied(
                    "user declined access or the consent flow timed out".to_string(),
                ))
            }
            Err(e) => {
                return Err(Error::AuthorizationDenied(format!(
                    "consent flow could not complete: {}",
                    e
                )))
            }
        };
        log::debug!("Redirect listener received auth code: {}", auth_code);
        exchange_auth_code(http, secret, &auth_code, &redirect_uri, scopes)
    }
}

/// Sends the authorization code to the provider in order to obtain access
/// and refresh tokens. Only a fully successful exchange produces a token;
/// nothing is persisted here.
fn exchange_auth_code<T>(
    http: &reqwest::blocking::Client,
    secret: &ApplicationSecret,
    auth_code: &str,
    redirect_uri: &str,
    scopes: &[T],
) -> Result<Token, Error>
where
    T: AsRef<str>,
{
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&[
            ("code", auth_code),
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .finish();
    log::debug!("Exchanging auth code at {}", secret.token_uri);
    let resp = http
        .post(&secret.token_uri)
        .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .send()?;
    let body = resp.bytes()?;
    log::debug!("Token endpoint answered with {} bytes", body.len());
    let token = TokenResponse::from_json(&body)?.into_token(scopes);
    Ok(token)
}

/// A minimal single-use HTTP listener for the localhost redirect. It
/// answers exactly one redirect request carrying a `code` or `error`
/// parameter, tells the user to close the window, and shuts down.
struct RedirectServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl RedirectServer {
    fn bind(port: Option<u16>) -> io::Result<RedirectServer> {
        let addr: SocketAddr = ([127, 0, 0, 1], port.unwrap_or(0)).into();
        let listener = TcpListener::bind(addr)?;
        // Non-blocking accept so the wait loop can observe the deadline.
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        log::debug!("redirect listener bound to {}", addr);
        Ok(RedirectServer { listener, addr })
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn wait_for_auth_code(&self, timeout: Option<Duration>) -> io::Result<ConsentOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Some(outcome) = Self::handle_connection(stream)? {
                        return Ok(outcome);
                    }
                    // Unrelated request (e.g. favicon probe); keep waiting.
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            log::warn!("timed out waiting for the consent redirect");
                            return Ok(ConsentOutcome::Cancelled);
                        }
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads one request line and answers it. Returns `None` if the request
    /// carried neither a code nor an error and the wait should continue.
    fn handle_connection(stream: TcpStream) -> io::Result<Option<ConsentOutcome>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;
        let outcome = parse_redirect_request(&request_line);
        let mut stream = reader.into_inner();
        let (status, page) = match outcome {
            Some(ConsentOutcome::Granted(_)) => (
                "200 OK",
                "<html><head><title>Success</title></head><body>You may now close this \
                 window.</body></html>",
            ),
            Some(ConsentOutcome::Cancelled) => (
                "200 OK",
                "<html><head><title>Declined</title></head><body>Access was not granted. You \
                 may close this window.</body></html>",
            ),
            None => ("404 Not Found", "No `code` in URL"),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            page.len(),
            page
        );
        let _ = stream.write_all(response.as_bytes());
        Ok(outcome)
    }
}

/// Extracts the authorization code (or the user's refusal) from the request
/// line of the provider's redirect, e.g.
/// `GET /?code=4/731fJ3Bhey HTTP/1.1`.
fn parse_redirect_request(request_line: &str) -> Option<ConsentOutcome> {
    let path = request_line.split_whitespace().nth(1)?;
    let query = path.splitn(2, '?').nth(1).unwrap_or("");
    let mut denied = false;
    for (param, value) in form_urlencoded::parse(query.as_bytes()) {
        if param == "code" {
            return Some(ConsentOutcome::Granted(value.into_owned()));
        }
        if param == "error" {
            log::debug!("provider reported consent error: {}", value);
            denied = true;
        }
    }
    if denied {
        Some(ConsentOutcome::Cancelled)
    } else {
        None
    }
}
