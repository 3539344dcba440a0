//! Browser consent flow with a local callback listener
//!
//! ```text
//! Idle -> AwaitingUserConsent -> AwaitingCallback -> Authorized | TimedOut | Denied
//! ```
//!
//! The listener is bound before the consent page is opened, accepts exactly one callback,
//! and is dropped on every exit path so the port is free as soon as [`Handshake::run`]
//! returns. Both token requests draw from the same [`RateLimiter`] as the fetch loop.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{AuthError, AuthResult, AuthorizationApi, Credential, SecretStore};
use crate::exporter::retry::{RetryError, RetryExecutor};
use crate::exporter::{ExportConfig, RateLimiter};
use crate::shutdown::SharedShutdown;
use crate::Fingerprint;

/// Longest time a single connection may take to send its request line
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = "<html><head><title>Authorization Successful</title>\
<style>body{font-family:sans-serif;text-align:center;margin:50px;color:#333;}</style></head>\
<body><h1>Authorization Successful</h1>\
<p>You can safely close this window and return to the terminal.</p></body></html>";

const DENIED_PAGE: &str = "<html><head><title>Authorization Denied</title></head>\
<body><h1>Authorization Denied</h1>\
<p>Access was not granted. Close this window and re-run the export to try again.</p></body></html>";

const NOT_FOUND_PAGE: &str = "<html><body><h1>Not Found</h1></body></html>";

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing started
    Idle,
    /// Request token obtained, consent page not yet shown
    AwaitingUserConsent,
    /// Consent page shown, waiting for the redirect
    AwaitingCallback,
    /// Access token obtained
    Authorized,
    /// No callback before the timeout
    TimedOut,
    /// The user declined
    Denied,
}

/// Result of the consent redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The user approved access
    Approved,
    /// The user declined, with the reported reason if any
    Denied(Option<String>),
}

/// Shows the consent page to the user
pub trait ConsentPrompt: Send + Sync {
    /// Present `url`; failures must not abort the handshake
    fn present(&self, url: &str);
}

/// Opens the consent page in the default browser and prints it as a fallback
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserPrompt;

impl ConsentPrompt for BrowserPrompt {
    fn present(&self, url: &str) {
        eprintln!("Opening browser for authorization...");
        eprintln!("If the browser does not open, visit:\n\n  {url}\n");
        if let Err(e) = open::that(url) {
            warn!(error = %e, "Failed to open browser");
        }
    }
}

/// Loopback listener for the consent redirect
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    path: String,
    local_addr: SocketAddr,
}

impl CallbackListener {
    /// Bind the listener; port 0 picks a free port
    pub async fn bind(addr: SocketAddr, path: &str) -> AuthResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| AuthError::Listener {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| AuthError::Listener {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        debug!(addr = %local_addr, path, "Callback listener bound");
        Ok(Self {
            listener,
            path: path.to_string(),
            local_addr,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL the consent page should redirect to
    pub fn redirect_uri(&self) -> String {
        format!("http://{}{}", self.local_addr, self.path)
    }

    /// Wait for the callback, the timeout, or shutdown, whichever comes first
    ///
    /// Consumes the listener; the port is released when this returns.
    pub async fn wait(
        self,
        timeout: Duration,
        shutdown: Option<&SharedShutdown>,
    ) -> AuthResult<CallbackOutcome> {
        let accept = self.accept_callback();
        tokio::pin!(accept);

        let outcome = match shutdown {
            Some(shutdown) => {
                tokio::select! {
                    result = tokio::time::timeout(timeout, &mut accept) => result,
                    _ = shutdown.wait_for_shutdown() => return Err(AuthError::Cancelled),
                }
            }
            None => tokio::time::timeout(timeout, &mut accept).await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(AuthError::TimedOut { timeout }),
        }
    }

    /// Serve connections until one hits the callback path
    async fn accept_callback(&self) -> AuthResult<CallbackOutcome> {
        loop {
            let (stream, peer) = self.listener.accept().await.map_err(|e| AuthError::Listener {
                addr: self.local_addr.to_string(),
                message: e.to_string(),
            })?;
            debug!(peer = %peer, "Callback connection accepted");

            match self.handle_connection(stream).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "Ignoring malformed callback connection");
                    continue;
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<Option<CallbackOutcome>> {
        let mut request_line = String::new();
        {
            let mut reader = BufReader::new(&mut stream);
            match tokio::time::timeout(REQUEST_READ_TIMEOUT, reader.read_line(&mut request_line)).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => return Ok(None),
            }
        }

        let outcome = parse_callback(&request_line, &self.path);
        let (status, page) = match &outcome {
            Some(CallbackOutcome::Approved) => ("200 OK", SUCCESS_PAGE),
            Some(CallbackOutcome::Denied(_)) => ("200 OK", DENIED_PAGE),
            None => ("404 Not Found", NOT_FOUND_PAGE),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n\
             Content-Security-Policy: default-src 'none'; style-src 'unsafe-inline'\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{page}",
            page.len()
        );
        // The browser may already have gone away; the outcome still stands.
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
        Ok(outcome)
    }
}

/// Interpret an HTTP request line against the callback path
///
/// Any request to the callback path is consent unless it carries an `error` or `denied`
/// query parameter; the remote redirects without parameters on approval.
pub fn parse_callback(request_line: &str, callback_path: &str) -> Option<CallbackOutcome> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    if method != "GET" {
        return None;
    }

    let url = url::Url::parse(&format!("http://localhost{target}")).ok()?;
    if url.path() != callback_path {
        return None;
    }

    let mut denied = false;
    let mut reason = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => {
                denied = true;
                reason = Some(value.into_owned());
            }
            "denied" => denied = true,
            _ => {}
        }
    }

    if denied {
        Some(CallbackOutcome::Denied(reason))
    } else {
        Some(CallbackOutcome::Approved)
    }
}

/// Build the consent page URL
pub fn consent_url(auth_url: &str, request_token: &str, redirect_uri: &str) -> AuthResult<String> {
    let url = url::Url::parse_with_params(
        auth_url,
        &[("request_token", request_token), ("redirect_uri", redirect_uri)],
    )
    .map_err(|e| AuthError::Configuration(format!("invalid auth_url {auth_url:?}: {e}")))?;
    Ok(url.into())
}

/// One run of the consent flow
#[derive(Debug)]
pub struct Handshake {
    callback_addr: SocketAddr,
    callback_path: String,
    auth_url: String,
    timeout: Duration,
    retry: RetryExecutor,
    limiter: RateLimiter,
    shutdown: Option<SharedShutdown>,
    state: HandshakeState,
}

impl Handshake {
    /// Create a handshake from the export configuration
    pub fn new(config: &ExportConfig, retry: RetryExecutor) -> AuthResult<Self> {
        let callback_addr = config
            .callback_socket_addr()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        let limiter = RateLimiter::from_config(config)?;
        Ok(Self {
            callback_addr,
            callback_path: config.callback_path.clone(),
            auth_url: config.auth_url.clone(),
            timeout: config.oauth_timeout(),
            retry,
            limiter,
            shutdown: None,
            state: HandshakeState::Idle,
        })
    }

    /// Abort the wait when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.limiter = self.limiter.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Gate token requests with `limiter`, typically a clone of the export's limiter
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = match &self.shutdown {
            Some(shutdown) => limiter.with_shutdown(shutdown.clone()),
            None => limiter,
        };
        self
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the flow and return a fresh credential
    pub async fn run(
        &mut self,
        api: &dyn AuthorizationApi,
        prompt: &dyn ConsentPrompt,
        fingerprint: &Fingerprint,
    ) -> AuthResult<Credential> {
        self.state = HandshakeState::Idle;
        let listener = CallbackListener::bind(self.callback_addr, &self.callback_path).await?;
        let redirect_uri = listener.redirect_uri();
        let redirect = redirect_uri.as_str();

        info!(redirect_uri = %redirect_uri, "Starting authorization");
        let limiter = &self.limiter;
        let request_token = self
            .retry
            .execute("oauth/request", |_| async move {
                limiter.acquire().await?;
                Ok::<_, AuthError>(report(limiter, api.request_token(redirect).await)?)
            })
            .await
            .map_err(auth_error)?;
        self.state = HandshakeState::AwaitingUserConsent;

        let url = consent_url(&self.auth_url, &request_token, &redirect_uri)?;
        prompt.present(&url);
        self.state = HandshakeState::AwaitingCallback;

        info!(timeout_secs = self.timeout.as_secs(), "Waiting for authorization...");
        let outcome = match listener.wait(self.timeout, self.shutdown.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, AuthError::TimedOut { .. }) {
                    self.state = HandshakeState::TimedOut;
                }
                return Err(e);
            }
        };

        if let CallbackOutcome::Denied(reason) = outcome {
            self.state = HandshakeState::Denied;
            return Err(AuthError::Denied { reason });
        }

        let token = request_token.as_str();
        let limiter = &self.limiter;
        let grant = self
            .retry
            .execute("oauth/authorize", |_| async move {
                limiter.acquire().await?;
                Ok::<_, AuthError>(report(limiter, api.exchange_token(token).await)?)
            })
            .await
            .map_err(auth_error)?;
        self.state = HandshakeState::Authorized;
        info!(username = grant.username.as_deref().unwrap_or("unknown"), "Authorization successful");
        Ok(Credential::from_grant(grant, fingerprint.clone()))
    }
}

/// Feed the outcome of a token request back into the limiter's pacing
fn report<T, E>(limiter: &RateLimiter, result: Result<T, E>) -> Result<T, E> {
    match &result {
        Ok(_) => limiter.record_success(),
        Err(_) => limiter.record_failure(),
    }
    result
}

fn auth_error(error: RetryError<AuthError>) -> AuthError {
    match error {
        RetryError::Fatal(e) => e,
        RetryError::Exhausted {
            attempts,
            last_error: AuthError::Remote(last_error),
        } => AuthError::RetryExhausted {
            attempts,
            last_error,
        },
        RetryError::Exhausted { last_error, .. } => last_error,
        RetryError::Cancelled => AuthError::Cancelled,
    }
}

/// Return the stored credential, or run the handshake and store the result
pub async fn ensure_credential(
    store: &dyn SecretStore,
    handshake: &mut Handshake,
    api: &dyn AuthorizationApi,
    prompt: &dyn ConsentPrompt,
    fingerprint: &Fingerprint,
) -> AuthResult<Credential> {
    if let Some(credential) = store.get(fingerprint)? {
        info!(fingerprint = %fingerprint, "Loaded saved credential");
        return Ok(credential);
    }

    let credential = handshake.run(api, prompt, fingerprint).await?;
    if let Err(e) = store.put(&credential) {
        // The export can still proceed with the fresh credential.
        warn!(error = %e, "Authorization succeeded but the credential could not be saved");
    }
    Ok(credential)
}
