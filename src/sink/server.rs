// * HTTP ingress for client deprecation reports
// * Serves the collector endpoint plus /metrics and /health for scraping

use crate::config::constants::{COLLECTOR_ENDPOINT_PATH, DATA_FIELD};
use crate::config::settings::SinkConfig;
use crate::ops::telemetry;
use crate::sink::ingest::{DeprecationSink, SinkError};
use crate::sink::rate_limit::ClientIdentity;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind sink server: {0}")]
    Bind(#[from] hyper::Error),
}

/// How a request is attributed to a client for rate limiting
#[derive(Debug, Clone)]
pub struct IdentityRules {
    pub user_id_header: String,
    pub trust_forwarded_for: bool,
}

impl From<&SinkConfig> for IdentityRules {
    fn from(config: &SinkConfig) -> Self {
        Self {
            user_id_header: config.user_id_header.clone(),
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }
}

/// Authenticated user id if present, else the forwarded client address, else the peer address.
pub fn resolve_identity(headers: &HeaderMap, remote: SocketAddr, rules: &IdentityRules) -> ClientIdentity {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(user) = header_str(rules.user_id_header.as_str()) {
        return ClientIdentity::User(user.to_string());
    }

    if rules.trust_forwarded_for {
        let forwarded = header_str("x-forwarded-for")
            .and_then(|chain| chain.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(addr) = forwarded {
            return ClientIdentity::Address(addr);
        }
    }

    ClientIdentity::Address(remote.ip())
}

/// Finds the `data` field in a form body, falling back to the query string.
pub fn extract_data(query: Option<&str>, body: &[u8]) -> Option<String> {
    let find = |bytes: &[u8]| {
        url::form_urlencoded::parse(bytes)
            .find(|(key, _)| key == DATA_FIELD)
            .map(|(_, value)| value.into_owned())
    };

    find(body).or_else(|| query.and_then(|q| find(q.as_bytes())))
}

struct ServerState {
    sink: Arc<DeprecationSink>,
    rules: IdentityRules,
}

/// Sink server handle for graceful shutdown
pub struct SinkServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl SinkServerHandle {
    /// Signals the server to shut down
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// Returns true if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Starts the sink HTTP server
///
/// # Example
/// ```ignore
/// let handle = start_sink_server(sink, &SinkConfig::default()).await?;
/// // POST /deprecation-collector/log is now accepted on :9000
/// handle.shutdown();
/// ```
pub async fn start_sink_server(
    sink: Arc<DeprecationSink>,
    config: &SinkConfig,
) -> Result<SinkServerHandle, ServerError> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    let state = Arc::new(ServerState {
        sink,
        rules: IdentityRules::from(config),
    });

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let remote = conn.remote_addr();
        let state = Arc::clone(&state);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle_request(Arc::clone(&state), remote, req)
            }))
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = hyper::Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();

    tokio::spawn(async move {
        let server = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        tracing::info!(addr = %local_addr, "Sink server started");

        if let Err(e) = server.await {
            tracing::error!(error = %e, "Sink server error");
        }

        running_clone.store(false, Ordering::Relaxed);
        tracing::info!("Sink server stopped");
    });

    Ok(SinkServerHandle {
        shutdown_tx: Some(shutdown_tx),
        running,
        local_addr,
    })
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

fn error_response(err: &SinkError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    let body = json!({
        "errors": [err.to_string()],
        "error_type": err.error_type(),
    });
    respond(status, "application/json", body.to_string())
}

/// Routes incoming HTTP requests
async fn handle_request(
    state: Arc<ServerState>,
    remote: SocketAddr,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET | &Method::POST, COLLECTOR_ENDPOINT_PATH) => {
            handle_log(&state, remote, req).await
        }
        (_, COLLECTOR_ENDPOINT_PATH) => {
            respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "Method Not Allowed")
        }
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            &telemetry::metrics_content_type(),
            telemetry::get_metrics_string(),
        ),
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "OK"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(response)
}

async fn handle_log(state: &ServerState, remote: SocketAddr, req: Request<Body>) -> Response<Body> {
    let identity = resolve_identity(req.headers(), remote, &state.rules);
    let query = req.uri().query().map(str::to_string);

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read report body");
            return error_response(&SinkError::MissingParameter);
        }
    };

    let data = extract_data(query.as_deref(), &body);
    match state.sink.submit(&identity, data.as_deref()).await {
        Ok(_) => respond(
            StatusCode::OK,
            "application/json",
            json!({ "success": "OK" }).to_string(),
        ),
        Err(err) => error_response(&err),
    }
}
