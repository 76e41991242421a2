//! One-shot local HTTP listener that receives the OAuth redirect.
//!
//! The browser is sent to `http://localhost:<port>/code?code=...`. The first
//! request whose single path segment starts with `code` and carries a `code`
//! query parameter (and the expected `state`, when one was issued) is handed to
//! the waiting flow; everything else is answered with an error status and the
//! listener keeps waiting.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{Mutex, oneshot, watch},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const CONFIRMATION_PAGE: &str = "<h1>Authorization Ready, close and return to cli :)</h1>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

/// Extract the authorization code from a callback request URI
pub fn parse_callback(uri: &Uri) -> Option<CallbackParams> {
    let segment = uri.path().strip_prefix('/')?;
    if segment.contains('/') || !segment.starts_with("code") {
        return None;
    }

    let query = uri.query()?;
    let mut code = None;
    let mut state = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    code.filter(|c| !c.is_empty())
        .map(|code| CallbackParams { code, state })
}

struct CallbackState {
    sender: Mutex<Option<oneshot::Sender<CallbackParams>>>,
    expected_state: Option<String>,
}

pub struct CallbackServer {
    addrs: Vec<SocketAddr>,
    code_rx: oneshot::Receiver<CallbackParams>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<port>` (0 picks a free port) and start serving.
    ///
    /// `localhost` resolves to `::1` on some hosts, so the same port is also
    /// bound on the IPv6 loopback when it is available.
    pub async fn bind(port: u16, expected_state: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.map_err(|e| {
            Error::Authorization(format!("Failed to bind callback listener on port {}: {}", port, e))
        })?;
        let addr = listener.local_addr()?;

        let mut listeners = vec![listener];
        match TcpListener::bind((Ipv6Addr::LOCALHOST, addr.port())).await {
            Ok(v6) => listeners.push(v6),
            Err(e) => debug!("No IPv6 loopback listener on port {}: {}", addr.port(), e),
        }

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(CallbackState {
            sender: Mutex::new(Some(code_tx)),
            expected_state,
        });

        let app = Router::new()
            .fallback(handle_callback)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let mut addrs = Vec::with_capacity(listeners.len());
        for listener in listeners {
            addrs.push(listener.local_addr()?);
            let app = app.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let shutdown = async move {
                    let _ = shutdown_rx.changed().await;
                };
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    warn!("Callback listener stopped with error: {}", e);
                }
            });
        }

        debug!("Callback listener bound on {:?}", addrs);
        Ok(Self {
            addrs,
            code_rx,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// The IPv4 loopback address
    pub fn local_addr(&self) -> SocketAddr {
        self.addrs[0]
    }

    /// Every loopback address being served, IPv4 first
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Wait for the first valid callback, then shut the listener down
    pub async fn wait_for_code(mut self, timeout: Duration) -> Result<CallbackParams> {
        let received = tokio::time::timeout(timeout, &mut self.code_rx).await;
        self.shutdown();

        match received {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(Error::Authorization(
                "Callback listener closed before receiving a code".to_string(),
            )),
            Err(_) => Err(Error::Authorization(format!(
                "Timed out after {}s waiting for browser authorization",
                timeout.as_secs()
            ))),
        }
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_callback(State(state): State<Arc<CallbackState>>, uri: Uri) -> Response {
    let Some(params) = parse_callback(&uri) else {
        debug!("Ignoring request on callback listener: {}", uri.path());
        return StatusCode::NOT_FOUND.into_response();
    };

    if state.expected_state.is_some() && params.state != state.expected_state {
        warn!("Callback state mismatch - ignoring request");
        return (StatusCode::BAD_REQUEST, "state mismatch").into_response();
    }

    match state.sender.lock().await.take() {
        Some(tx) => {
            let _ = tx.send(params);
            Html(CONFIRMATION_PAGE).into_response()
        }
        None => StatusCode::GONE.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            parse_callback(&uri("/code?code=abc&state=xyz")),
            Some(CallbackParams {
                code: "abc".to_string(),
                state: Some("xyz".to_string()),
            })
        );
        assert_eq!(
            parse_callback(&uri("/code?code=a%2Fb")).map(|p| p.code),
            Some("a/b".to_string())
        );
    }

    #[test]
    fn test_parse_callback_rejects_other_paths() {
        assert!(parse_callback(&uri("/favicon.ico")).is_none());
        assert!(parse_callback(&uri("/code/extra?code=abc")).is_none());
        assert!(parse_callback(&uri("/code")).is_none());
        assert!(parse_callback(&uri("/code?error=access_denied")).is_none());
        assert!(parse_callback(&uri("/code?code=")).is_none());
    }

    #[tokio::test]
    async fn test_server_delivers_first_code() {
        let server = CallbackServer::bind(0, None).await.unwrap();
        let base = format!("http://{}", server.local_addr());
        let client = reqwest::Client::new();

        let ignored = client.get(format!("{}/favicon.ico", base)).send().await.unwrap();
        assert_eq!(ignored.status(), 404);

        let res = client
            .get(format!("{}/code?code=the-code", base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), CONFIRMATION_PAGE);

        let params = server.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(params.code, "the-code");
    }

    #[tokio::test]
    async fn test_server_checks_state() {
        let server = CallbackServer::bind(0, Some("expected".to_string())).await.unwrap();
        let base = format!("http://{}", server.local_addr());
        let client = reqwest::Client::new();

        let forged = client
            .get(format!("{}/code?code=c1&state=forged", base))
            .send()
            .await
            .unwrap();
        assert_eq!(forged.status(), 400);

        let ok = client
            .get(format!("{}/code?code=c2&state=expected", base))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);

        let params = server.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(params.code, "c2");
    }

    #[tokio::test]
    async fn test_server_answers_on_every_loopback() {
        let server = CallbackServer::bind(0, None).await.unwrap();
        let addrs = server.local_addrs().to_vec();
        assert!(addrs[0].is_ipv4());
        assert!(addrs.iter().all(|a| a.port() == addrs[0].port()));

        let client = reqwest::Client::new();
        for addr in &addrs {
            let res = client
                .get(format!("http://{}/favicon.ico", addr))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), 404);
        }

        // Delivered through the IPv6 listener when the host has one
        let last = addrs[addrs.len() - 1];
        let res = client
            .get(format!("http://{}/code?code=via-{}", last, last.port()))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);

        let params = server.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(params.code, format!("via-{}", last.port()));
    }

    #[tokio::test]
    async fn test_server_times_out() {
        let server = CallbackServer::bind(0, None).await.unwrap();
        let err = server
            .wait_for_code(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authorization(msg) if msg.contains("Timed out")));
    }
}
