use std::{collections::BTreeMap, fmt::Write as _, io, net::SocketAddr, sync::Arc, time::Instant};

use http_body_util::Full;
use hyper::{
    body::{Body, Bytes},
    http::request::Parts,
    Method, Request, Response, StatusCode,
};
use metrics_relay::{
    codec::Signer,
    wire::{self, MetricQuery, WireMetric},
    Metric, MetricKind, Store, StoreError, ValidationError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::body::{accepts_gzip, read_payload, Reply};

/// Shared by every connection.
pub(crate) struct State {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) signer: Option<Signer>,
    pub(crate) max_body_size: usize,
}

/// Why a request could not be handled.
#[derive(Debug, Error)]
pub(crate) enum HandlerError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("invalid gzip body: {0}")]
    InvalidEncoding(io::Error),

    #[error("unsupported content encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("failed to read request body: {0}")]
    Body(Box<dyn std::error::Error + Send + Sync>),

    #[error("metric not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("failed to encode response: {0}")]
    Encode(serde_json::Error),

    #[error("database unavailable")]
    Unavailable(StoreError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl HandlerError {
    fn status(&self) -> StatusCode {
        match self {
            HandlerError::Validation(_)
            | HandlerError::InvalidJson(_)
            | HandlerError::InvalidEncoding(_)
            | HandlerError::UnsupportedEncoding(_)
            | HandlerError::SignatureMismatch
            | HandlerError::Body(_) => StatusCode::BAD_REQUEST,
            HandlerError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            HandlerError::NotFound => StatusCode::NOT_FOUND,
            HandlerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            HandlerError::Encode(_) | HandlerError::Unavailable(_) | HandlerError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn into_reply(self) -> Reply {
        Reply::text(self.status(), format!("{self}\n"))
    }
}

/// Handles one request, turning every failure into an error response.
pub(crate) async fn handle<B>(
    state: &State,
    remote: SocketAddr,
    request: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let gzip = accepts_gzip(request.headers());

    let reply = match route(state, request).await {
        Ok(reply) => reply,
        Err(e) => {
            if e.status().is_server_error() {
                warn!(error = %e, %method, %path, "Request failed.");
            } else {
                debug!(error = %e, %method, %path, "Request rejected.");
            }
            e.into_reply()
        }
    };

    info!(
        %remote,
        %method,
        %path,
        status = reply.status().as_u16(),
        elapsed = ?started.elapsed(),
        "Handled request."
    );
    reply.into_response(gzip)
}

async fn route<B>(state: &State, request: Request<B>) -> Result<Reply, HandlerError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = request.into_parts();
    let trimmed = parts.uri.path().trim_matches('/');
    let segments: Vec<&str> =
        if trimmed.is_empty() { Vec::new() } else { trimmed.split('/').collect() };

    match segments.as_slice() {
        [] => {
            allow(&parts, &Method::GET)?;
            list(state).await
        }
        ["ping"] => {
            allow(&parts, &Method::GET)?;
            ping(state).await
        }
        ["update"] => {
            allow(&parts, &Method::POST)?;
            let payload = read(state, &parts, body).await?;
            update_json(state, &payload).await
        }
        ["updates"] => {
            allow(&parts, &Method::POST)?;
            let payload = read(state, &parts, body).await?;
            update_batch(state, &payload).await
        }
        ["value"] => {
            allow(&parts, &Method::POST)?;
            let payload = read(state, &parts, body).await?;
            value_json(state, &payload).await
        }
        ["update", kind, name, value] => {
            allow(&parts, &Method::POST)?;
            if name.is_empty() {
                return Err(HandlerError::NotFound);
            }
            update_plain(state, kind, name, value).await
        }
        ["value", kind, name] => {
            allow(&parts, &Method::GET)?;
            if name.is_empty() {
                return Err(HandlerError::NotFound);
            }
            value_plain(state, kind, name).await
        }
        _ => Err(HandlerError::NotFound),
    }
}

fn allow(parts: &Parts, method: &Method) -> Result<(), HandlerError> {
    if parts.method == *method {
        Ok(())
    } else {
        Err(HandlerError::MethodNotAllowed)
    }
}

async fn read<B>(state: &State, parts: &Parts, body: B) -> Result<Vec<u8>, HandlerError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    read_payload(&parts.headers, body, state.max_body_size, state.signer.as_ref()).await
}

/// Runs a store call on the blocking pool, since durable stores block on I/O.
async fn with_store<T, F>(state: &State, f: F) -> Result<T, HandlerError>
where
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Aborted(e.to_string()))?
        .map_err(HandlerError::from)
}

fn lookup(store: &dyn Store, kind: MetricKind, name: &str) -> Result<Option<Metric>, StoreError> {
    Ok(match kind {
        MetricKind::Gauge => store.gauge(name)?.map(|v| Metric::gauge(name, v)),
        MetricKind::Counter => store.counter(name)?.map(|d| Metric::counter(name, d)),
    })
}

async fn update_plain(
    state: &State,
    kind: &str,
    name: &str,
    value: &str,
) -> Result<Reply, HandlerError> {
    let metric = Metric::parse(kind, name, value)?;
    with_store(state, move |store| store.update(&metric)).await?;
    Ok(Reply::text(StatusCode::OK, "OK\n"))
}

async fn update_json(state: &State, payload: &[u8]) -> Result<Reply, HandlerError> {
    let wire: WireMetric = serde_json::from_slice(payload).map_err(HandlerError::InvalidJson)?;
    let metric = Metric::try_from(wire)?;

    let stored = with_store(state, move |store| {
        let merged = store.update(&metric)?;
        Ok(Metric::new(metric.name(), merged))
    })
    .await?;

    Reply::json(&stored)
}

async fn update_batch(state: &State, payload: &[u8]) -> Result<Reply, HandlerError> {
    let metrics = wire::decode_batch(payload).map_err(HandlerError::InvalidJson)?;
    let count = metrics.len();

    with_store(state, move |store| store.batch_update(&metrics)).await?;
    debug!(count, "Applied batch.");

    Ok(Reply::text(StatusCode::OK, "OK\n"))
}

async fn value_json(state: &State, payload: &[u8]) -> Result<Reply, HandlerError> {
    let query: MetricQuery = serde_json::from_slice(payload).map_err(HandlerError::InvalidJson)?;
    let kind = query.kind()?;

    let metric = with_store(state, move |store| lookup(store, kind, &query.id)).await?;
    Reply::json(&metric.ok_or(HandlerError::NotFound)?)
}

async fn value_plain(state: &State, kind: &str, name: &str) -> Result<Reply, HandlerError> {
    let kind = kind.parse::<MetricKind>()?;
    let name = name.to_string();

    let metric = with_store(state, move |store| lookup(store, kind, &name)).await?;
    let metric = metric.ok_or(HandlerError::NotFound)?;
    Ok(Reply::text(StatusCode::OK, metric.value().to_string()))
}

async fn ping(state: &State) -> Result<Reply, HandlerError> {
    match with_store(state, |store| store.ping()).await {
        Ok(()) => Ok(Reply::text(StatusCode::OK, "OK\n")),
        Err(HandlerError::Store(e)) => Err(HandlerError::Unavailable(e)),
        Err(e) => Err(e),
    }
}

async fn list(state: &State) -> Result<Reply, HandlerError> {
    let snapshot = with_store(state, |store| store.snapshot()).await?;

    let gauges: BTreeMap<_, _> = snapshot.gauges.into_iter().collect();
    let counters: BTreeMap<_, _> = snapshot.counters.into_iter().collect();

    let mut body = String::new();
    for (name, value) in gauges {
        let _ = writeln!(body, "gauge {name} {value}");
    }
    for (name, delta) in counters {
        let _ = writeln!(body, "counter {name} {delta}");
    }
    Ok(Reply::text(StatusCode::OK, body))
}
