//! Local HTTP callback server for the OAuth browser flow
//!
//! A single-use listener on `127.0.0.1:<port>/callback`. The port is fixed
//! rather than random because the authorization server matches the
//! registered redirect URI exactly.
//!
//! Only a request carrying the expected `state` with either a `code` or an
//! `error` ends the flow. Anything else (wrong path, wrong method, missing or
//! guessed state, missing code) is answered and ignored, so a stray or hostile
//! request on the port cannot cut a legitimate login short.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Router,
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

pub const CALLBACK_PATH: &str = "/callback";

/// How long to wait for the browser redirect before giving up
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Time a response already in flight gets to reach the browser after the
/// flow ends; connections still open after that are dropped.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error(
        "Loopback port {0} is already in use. Close the process using it or set \
         EREMOS_LOOPBACK_PORT to an available port and register the matching redirect URI."
    )]
    PortInUse(u16),
    #[error("Failed to start callback server: {0}")]
    Bind(#[source] io::Error),
    /// The authorization server redirected back with `error`
    #[error("{0}")]
    Denied(String),
    #[error("Authorization timed out after 5 minutes")]
    Timeout,
    #[error("Callback server closed before authorization completed")]
    Closed,
}

/// Authorization code delivered by the redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub code: String,
    pub state: String,
}

type Outcome = Result<CallbackResult, CallbackError>;

/// One-shot guard shared by every path that can end the flow: a successful
/// callback, an OAuth error, the timer and `close()`. Whoever flips `done`
/// first delivers the outcome and stops the listener; everyone else is a no-op.
struct Completion {
    done: AtomicBool,
    result_tx: Mutex<Option<oneshot::Sender<Outcome>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Completion {
    /// Returns false when the flow had already finished
    fn finish(&self, outcome: Option<Outcome>) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Taking the sender even without an outcome wakes the waiter with `Closed`.
        let result_tx = self.result_tx.lock().ok().and_then(|mut guard| guard.take());
        if let (Some(tx), Some(outcome)) = (result_tx, outcome) {
            let _ = tx.send(outcome);
        }
        if let Some(tx) = self.shutdown_tx.lock().ok().and_then(|mut guard| guard.take()) {
            let _ = tx.send(());
        }
        true
    }

    #[cfg(test)]
    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ServerState {
    expected_state: Arc<str>,
    completion: Arc<Completion>,
}

/// Running loopback listener. Dropping it is equivalent to `close()`.
pub struct CallbackServer {
    completion: Arc<Completion>,
    result_rx: Option<oneshot::Receiver<Outcome>>,
    timer: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<port>` and wait up to `timeout` for the redirect
    pub async fn start(
        port: u16,
        expected_state: &str,
        timeout: Duration,
    ) -> Result<Self, CallbackError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AddrInUse => CallbackError::PortInUse(port),
                _ => CallbackError::Bind(e),
            })?;

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let completion = Arc::new(Completion {
            done: AtomicBool::new(false),
            result_tx: Mutex::new(Some(result_tx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        });

        let app = Router::new().fallback(handle_request).with_state(ServerState {
            expected_state: Arc::from(expected_state),
            completion: completion.clone(),
        });

        tokio::spawn(serve(listener, app, shutdown_rx));
        debug!("OAuth callback server listening on {}", addr);

        let timer_completion = completion.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if timer_completion.finish(Some(Err(CallbackError::Timeout))) {
                debug!("OAuth callback timed out");
            }
        });

        Ok(Self {
            completion,
            result_rx: Some(result_rx),
            timer,
        })
    }

    /// Wait for the flow to end. Yields `Closed` if `close()` won the race or
    /// the result was already taken.
    pub async fn wait(&mut self) -> Result<CallbackResult, CallbackError> {
        let rx = self.result_rx.take().ok_or(CallbackError::Closed)?;
        let outcome = rx.await.unwrap_or(Err(CallbackError::Closed));
        self.timer.abort();
        outcome
    }

    /// Stop the timer and the listener, then drop every open connection
    /// once the drain grace has passed. Safe to call any number of times.
    pub fn close(&self) {
        self.timer.abort();
        if self.completion.finish(None) {
            debug!("OAuth callback server closed");
        }
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.completion.is_done()
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accept loop owning every connection task, so shutdown can cut them all
async fn serve(listener: TcpListener, app: Router, mut shutdown_rx: oneshot::Receiver<()>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let service = TowerToHyperService::new(app.clone());
                    connections.spawn(async move {
                        let conn = http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service);
                        if let Err(e) = conn.await {
                            debug!("Callback connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => debug!("Callback server accept error: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Dropping {} open callback connection(s)", connections.len());
    }
    connections.shutdown().await;
}

/// Redirect URI registered with the authorization server for `port`
pub fn redirect_uri(port: u16) -> String {
    format!("http://{}:{}{}", Ipv4Addr::LOCALHOST, port, CALLBACK_PATH)
}

#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };
        // First occurrence of a key wins
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

async fn handle_request(State(server): State<ServerState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }
    if uri.path() != CALLBACK_PATH {
        debug!("Ignoring request for {}", uri.path());
        return plain(StatusCode::NOT_FOUND, "Not Found");
    }

    let params = CallbackParams::from_query(uri.query());

    if params.state.as_deref() != Some(&*server.expected_state) {
        debug!("Rejecting callback with missing or mismatched state");
        return page(StatusCode::BAD_REQUEST, "Error", "State mismatch or missing state.");
    }

    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        let reason = params
            .error_description
            .filter(|d| !d.is_empty())
            .unwrap_or(error);
        server.completion.finish(Some(Err(CallbackError::Denied(reason))));
        return page(StatusCode::OK, "Authorization Denied", "You can close this window.");
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return page(StatusCode::BAD_REQUEST, "Error", "Missing code parameter.");
    };

    let state = server.expected_state.to_string();
    server.completion.finish(Some(Ok(CallbackResult { code, state })));
    page(
        StatusCode::OK,
        "Success",
        "Authorization complete! You can close this window and return to the terminal.",
    )
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn page(status: StatusCode, title: &str, message: &str) -> Response {
    (status, Html(html_page(title, message))).into_response()
}

/// Only server-chosen strings reach this page; they are escaped regardless.
fn html_page(title: &str, message: &str) -> String {
    let title = escape_html(title);
    let message = escape_html(message);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title} - Eremos CLI</title>
    <style>
        body {{
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #111;
            color: #eee;
        }}
        .card {{ text-align: center; padding: 2rem; max-width: 36rem; }}
        h1 {{ margin-bottom: 0.5rem; }}
        p {{ color: #bbb; line-height: 1.4; }}
    </style>
</head>
<body>
    <div class="card"><h1>{title}</h1><p>{message}</p></div>
</body>
</html>"#
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
