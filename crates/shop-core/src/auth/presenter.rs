use std::future::Future;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::{Host, Url};

use super::AuthError;

const SUCCESS_HTML: &str = r#"<html><body><h1>Sign-in complete</h1><p>You may close this window and return to the shop.</p></body></html>"#;
const ERROR_HTML: &str = r#"<html><body><h1>Sign-in failed</h1><p>Please return to the shop for details.</p></body></html>"#;
const NOT_FOUND_HTML: &str = r#"<html><body><h1>Not found</h1></body></html>"#;

pub type NotifyFn = Arc<dyn Fn(&Url) -> Result<(), AuthError> + Send + Sync>;

/// Shows the authorization page to the user and hands back the redirect URL
/// the authorization server sent the user agent to.
#[async_trait]
pub trait AuthorizationPresenter: Send + Sync {
    async fn present(&self, authorization_url: &Url, redirect_url: &Url)
        -> Result<Url, AuthError>;
}

/// Captures the redirect with a one-shot HTTP listener bound to the configured
/// loopback redirect address.
#[derive(Clone)]
pub struct LoopbackPresenter {
    open_browser: bool,
    notify: NotifyFn,
}

impl LoopbackPresenter {
    pub fn new(open_browser: bool, notify: NotifyFn) -> Self {
        Self {
            open_browser,
            notify,
        }
    }

    /// Whether `redirect_url` points at a loopback address this presenter can listen on.
    pub fn supports(redirect_url: &Url) -> bool {
        loopback_address(redirect_url).is_some()
    }
}

impl std::fmt::Debug for LoopbackPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackPresenter")
            .field("open_browser", &self.open_browser)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthorizationPresenter for LoopbackPresenter {
    async fn present(
        &self,
        authorization_url: &Url,
        redirect_url: &Url,
    ) -> Result<Url, AuthError> {
        let (host, port) = loopback_address(redirect_url)
            .ok_or_else(|| AuthError::UnsupportedRedirect(redirect_url.to_string()))?;
        let listener = TcpListener::bind((host.as_str(), port)).await?;
        debug!(%host, port, "listening for authorization redirect");

        (self.notify)(authorization_url)?;
        if self.open_browser {
            open::that(authorization_url.as_str())
                .map_err(|err| AuthError::BrowserLaunch(err.to_string()))?;
        }

        accept_redirect(listener, redirect_url).await
    }
}

fn loopback_address(redirect_url: &Url) -> Option<(String, u16)> {
    if redirect_url.scheme() != "http" {
        return None;
    }
    let host = match redirect_url.host()? {
        Host::Domain("localhost") => "127.0.0.1".to_owned(),
        Host::Ipv4(ip) if ip.is_loopback() => ip.to_string(),
        Host::Ipv6(ip) if IpAddr::V6(ip).is_loopback() => ip.to_string(),
        _ => return None,
    };
    Some((host, redirect_url.port_or_known_default()?))
}

const MAX_REQUEST_BYTES: usize = 16 * 1024;

async fn accept_redirect(listener: TcpListener, redirect_url: &Url) -> Result<Url, AuthError> {
    loop {
        let (mut stream, _addr) = listener.accept().await?;
        let request = match read_request_head(&mut stream).await {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "dropping unreadable connection");
                continue;
            }
        };

        let captured = match parse_request_target(&request)
            .and_then(|target| redirect_url.join(target).map_err(AuthError::from))
        {
            Ok(captured) => captured,
            Err(err) => {
                debug!(error = %err, "ignoring malformed request");
                let _ = respond(&mut stream, 400, ERROR_HTML).await;
                continue;
            }
        };

        if captured.path() != redirect_url.path() {
            debug!(path = captured.path(), "ignoring request outside redirect path");
            let _ = respond(&mut stream, 404, NOT_FOUND_HTML).await;
            continue;
        }

        let has_code = captured.query_pairs().any(|(key, _)| key == "code");
        if has_code {
            respond(&mut stream, 200, SUCCESS_HTML).await?;
        } else {
            respond(&mut stream, 400, ERROR_HTML).await?;
        }
        let _ = stream.shutdown().await;
        return Ok(captured);
    }
}

/// Read up to the blank line ending the request head, or until the peer stops sending.
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while request.len() < MAX_REQUEST_BYTES {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);
        if request.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&request).into_owned())
}

fn parse_request_target(request: &str) -> Result<&str, AuthError> {
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing request line".into()))?;
    let mut parts = first_line.split_whitespace();
    let _method = parts
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing method".into()))?;
    parts
        .next()
        .filter(|target| target.starts_with('/'))
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing path".into()))
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) -> Result<(), AuthError> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let response = format!(
        "{status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Prints the authorization URL and reads back either the full redirect URL
/// or just the authorization code.
pub struct ManualPresenter<Notify, Input, Fut> {
    open_browser: bool,
    notify: Notify,
    read_input: Input,
    _input: PhantomData<fn() -> Fut>,
}

impl<Notify, Input, Fut> ManualPresenter<Notify, Input, Fut>
where
    Notify: Fn(&Url) -> Result<(), AuthError> + Send + Sync,
    Input: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, AuthError>> + Send,
{
    pub fn new(open_browser: bool, notify: Notify, read_input: Input) -> Self {
        Self {
            open_browser,
            notify,
            read_input,
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<Notify, Input, Fut> AuthorizationPresenter for ManualPresenter<Notify, Input, Fut>
where
    Notify: Fn(&Url) -> Result<(), AuthError> + Send + Sync,
    Input: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, AuthError>> + Send,
{
    async fn present(
        &self,
        authorization_url: &Url,
        redirect_url: &Url,
    ) -> Result<Url, AuthError> {
        (self.notify)(authorization_url)?;
        if self.open_browser {
            if let Err(err) = open::that(authorization_url.as_str()) {
                warn!(error = %err, "could not open browser; continuing with manual entry");
            }
        }

        let raw = (self.read_input)().await?;
        manual_input_to_redirect(raw.trim(), authorization_url, redirect_url)
    }
}

/// A bare code is wrapped into the redirect together with the state we sent.
fn manual_input_to_redirect(
    input: &str,
    authorization_url: &Url,
    redirect_url: &Url,
) -> Result<Url, AuthError> {
    if input.is_empty() {
        return Err(AuthError::Cancelled);
    }
    if let Ok(url) = Url::parse(input) {
        return Ok(url);
    }

    let mut url = redirect_url.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("code", input);
        if let Some((_, state)) = authorization_url
            .query_pairs()
            .find(|(key, _)| key == "state")
        {
            pairs.append_pair("state", &state);
        }
    }
    Ok(url)
}

/// Validate a captured redirect and extract the authorization code.
pub fn parse_callback(
    captured: &Url,
    expected_redirect: &Url,
    expected_state: &str,
) -> Result<String, AuthError> {
    let mut code: Option<String> = None;
    let mut state: Option<String> = None;
    let mut error: Option<String> = None;
    for (key, value) in captured.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = error {
        return Err(AuthError::AccessDenied(err));
    }

    if !same_endpoint(captured, expected_redirect) {
        return Err(AuthError::RedirectMismatch {
            expected: expected_redirect.to_string(),
            actual: redirect_base(captured),
        });
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }

    code.filter(|code| !code.is_empty())
        .ok_or(AuthError::MissingAuthorizationCode)
}

fn same_endpoint(left: &Url, right: &Url) -> bool {
    left.scheme() == right.scheme()
        && left.host_str() == right.host_str()
        && left.port_or_known_default() == right.port_or_known_default()
        && left.path().trim_end_matches('/') == right.path().trim_end_matches('/')
}

fn redirect_base(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.to_string()
}
